//! The external non-blocking read capability.
//!
//! `Device` is the contract through which a stream pulls bytes from an
//! asynchronous producer (a socket wrapper, a pipe, a test script). It is
//! poll-based and runtime-agnostic: the `Waker` inside the supplied
//! [`Context`] is the waiter capability: registering it is how a pending
//! read suspends the caller until the device can produce bytes. The library
//! never names an executor or a timer; deadlines are caller-supplied
//! futures (see [`crate::ByteStream::next_byte_before`]).
//!
//! The stream guarantees it only invokes the device when the current front
//! page is exhausted, never holds more than one refill in flight, and never
//! re-enters itself from inside a poll: the device sees only the
//! destination buffer.

use std::{
    io,
    task::{Context, Poll, RawWaker, RawWakerVTable, Waker},
};

/// An externally-implemented non-blocking byte source.
pub trait Device {
    /// Read up to `dst.len()` bytes into `dst`.
    ///
    /// Returns `Ready(Ok(0))` at end-of-input. `Pending` must arrange for
    /// the waker in `cx` to be woken when bytes (or EOF) become available.
    fn poll_read(&mut self, cx: &mut Context<'_>, dst: &mut [u8]) -> Poll<io::Result<usize>>;

    /// Release the device. Polled to completion by
    /// [`crate::ByteStream::close_async`]; the synchronous close path polls
    /// once and otherwise detaches.
    fn poll_close(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    /// Bytes the device can still produce, when known.
    fn remaining_len(&self) -> Option<u64> {
        None
    }
}

/// Outcome of racing one refill against a caller-supplied deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextByte {
    /// A byte became consumable before the deadline.
    Byte(u8),
    /// The source reported end-of-input.
    Eof,
    /// The deadline elapsed first; the cancelled refill lost no data and
    /// the stream may be re-read.
    TimedOut,
}

/// A waker that ignores wakes, for single-shot best-effort polls outside a
/// task context (the synchronous close of a device-backed stream).
pub(crate) fn noop_waker() -> Waker {
    const VTABLE: RawWakerVTable = RawWakerVTable::new(|_| RAW, |_| {}, |_| {}, |_| {});
    const RAW: RawWaker = RawWaker::new(std::ptr::null(), &VTABLE);
    // SAFETY: every vtable entry is a no-op on a null data pointer.
    unsafe { Waker::from_raw(RAW) }
}
