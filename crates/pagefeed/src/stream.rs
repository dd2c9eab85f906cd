//! The consumer-facing stream and its readability protocol.
//!
//! A `ByteStream` presents one contiguous readable window (the span) over
//! data that physically lives in caller memory, a memory mapping, or a FIFO
//! of pages filled by a source. The protocol has two halves:
//!
//! - `readable()` / `readable_bytes(n)` establish how much may be consumed.
//!   The hot path is a single pointer comparison; page flips, refills, and
//!   EOF handling live in `#[cold]` slow paths.
//! - Once a readability query has returned `true`, `peek`, `read_byte`,
//!   `advance`, `read_slice`, and `read_into` are guaranteed non-faulting up
//!   to the verified byte count. Consuming past the verified remainder is a
//!   programmer error and panics.
//!
//! EOF permanently disconnects the source, so a drained stream answers
//! `false` forever instead of retrying the device. Views returned by
//! `read_slice` borrow the stream and are invalidated by the next mutating
//! call; the borrow checker enforces what the contract states.

use std::{
    fmt,
    future::{poll_fn, Future},
    io,
    path::Path,
    pin::pin,
    task::{Context, Poll},
};

use memmap2::{Mmap, MmapOptions};

use crate::{
    device::{noop_waker, Device, NextByte},
    error::{Error, Result},
    page::{PageQueue, DEFAULT_PAGE_SIZE},
    source::{FileSource, Source},
    span::Span,
};

/// Minimum mapping granularity across supported targets; the OS enforces
/// the platform's real page size on top of this check.
const MAP_ALIGN: u64 = 4096;

/// Storage that keeps a non-paged stream's bytes alive.
enum Backing<'a> {
    None,
    Slice(&'a [u8]),
    Owned(Box<[u8]>),
    Mapped(Mmap),
}

impl Backing<'_> {
    fn bytes(&self) -> Option<&[u8]> {
        match self {
            Backing::None => None,
            Backing::Slice(bytes) => Some(bytes),
            Backing::Owned(bytes) => Some(bytes),
            Backing::Mapped(map) => Some(&map[..]),
        }
    }
}

/// State of an active `with_readable_range` scope: the hidden source, the
/// absolute position the body may not read past, and how many span bytes
/// were clamped off to keep the hot path a single comparison.
struct RangeScope {
    limit: u64,
    hidden: usize,
    source: Option<Source>,
}

/// A page-oriented buffered input stream.
///
/// The lifetime parameter is the borrow of caller-owned memory for
/// [`ByteStream::from_slice`] streams; every other constructor returns
/// `ByteStream<'static>`.
///
/// A stream is single-owner: it is neither `Sync` nor meant to be shared.
/// All I/O happens inside the readability queries and the bulk reads; the
/// single-byte primitives never touch the source.
pub struct ByteStream<'a> {
    span: Span,
    /// Absolute stream position of `span`'s end pointer.
    span_end_pos: u64,
    queue: Option<PageQueue>,
    source: Option<Source>,
    backing: Backing<'a>,
    /// Stream-owned spill buffer backing `read_slice` views that straddle
    /// pages.
    scratch: Vec<u8>,
    scope: Option<RangeScope>,
}

impl<'a> ByteStream<'a> {
    fn over_backing(backing: Backing<'a>) -> ByteStream<'a> {
        let mut stream = ByteStream {
            span: Span::empty(),
            span_end_pos: 0,
            queue: None,
            source: None,
            backing,
            scratch: Vec::new(),
            scope: None,
        };
        if let Some(bytes) = stream.backing.bytes() {
            stream.span = Span::over(bytes);
            stream.span_end_pos = bytes.len() as u64;
        }
        stream
    }

    /// A zero-copy stream over caller-owned memory. The borrow keeps the
    /// bytes alive for the life of the stream; `read_slice` views point
    /// straight into `bytes`.
    #[must_use]
    pub fn from_slice(bytes: &'a [u8]) -> ByteStream<'a> {
        Self::over_backing(Backing::Slice(bytes))
    }

    /// Renders the stream empty and re-points it at `bytes`, for reusing a
    /// memory stream across inputs. Panics if the stream has a source.
    pub fn reset(&mut self, bytes: &'a [u8]) {
        assert!(
            self.source.is_none() && self.scope.is_none(),
            "reset on a stream with an attached source"
        );
        self.queue = None;
        self.backing = Backing::Slice(bytes);
        self.span = Span::over(bytes);
        self.span_end_pos = bytes.len() as u64;
    }
}

impl ByteStream<'static> {
    /// A stream over an owned copy of the input.
    #[must_use]
    pub fn from_vec(bytes: Vec<u8>) -> ByteStream<'static> {
        Self::over_backing(Backing::Owned(bytes.into_boxed_slice()))
    }

    /// Buffered input over a regular file with the default page size.
    pub fn file(path: impl AsRef<Path>) -> Result<ByteStream<'static>> {
        Self::file_at(path, 0, DEFAULT_PAGE_SIZE)
    }

    /// Buffered input over a regular file, starting at `offset`, reading
    /// pages of `page_size` bytes.
    pub fn file_at(
        path: impl AsRef<Path>,
        offset: u64,
        page_size: usize,
    ) -> Result<ByteStream<'static>> {
        let source = FileSource::open(path.as_ref(), offset)?;
        let mut stream = Self::over_backing(Backing::None);
        stream.queue = Some(PageQueue::new(page_size));
        stream.source = Some(Source::File(source));
        Ok(stream)
    }

    /// Memory-maps a whole file. Empty files yield a permanently-empty
    /// stream rather than an error.
    pub fn mapped_file(path: impl AsRef<Path>) -> Result<ByteStream<'static>> {
        Self::mapped_file_at(path, 0, None)
    }

    /// Memory-maps a file from a page-aligned `offset`, at most `max_len`
    /// bytes. A misaligned offset fails with [`Error::InvalidOffset`].
    pub fn mapped_file_at(
        path: impl AsRef<Path>,
        offset: u64,
        max_len: Option<usize>,
    ) -> Result<ByteStream<'static>> {
        if offset % MAP_ALIGN != 0 {
            return Err(Error::InvalidOffset { offset });
        }
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| Error::open(path, e))?;
        let len = file.metadata().map_err(Error::Io)?.len();
        if len <= offset {
            return Ok(Self::over_backing(Backing::None));
        }
        let mut options = MmapOptions::new();
        options.offset(offset);
        let available = (len - offset) as usize;
        options.len(max_len.map_or(available, |max| max.min(available)));
        // SAFETY: the mapping is read-only and private to this stream. As
        // with every file mapping, truncation of the file by another
        // process while mapped is outside the program's control.
        let map = unsafe { options.map(&file) }.map_err(Error::Io)?;
        Ok(Self::over_backing(Backing::Mapped(map)))
    }

    /// Wraps an externally-supplied non-blocking read capability with the
    /// default page size. The stream must be driven through the `_async`
    /// operations; the synchronous readability queries treat a device as
    /// having no synchronous read capability.
    #[must_use]
    pub fn device(device: Box<dyn Device>) -> ByteStream<'static> {
        Self::device_with_page_size(device, DEFAULT_PAGE_SIZE)
    }

    /// Like [`ByteStream::device`] with an explicit allocation granule.
    #[must_use]
    pub fn device_with_page_size(device: Box<dyn Device>, page_size: usize) -> ByteStream<'static> {
        let mut stream = Self::over_backing(Backing::None);
        stream.queue = Some(PageQueue::new(page_size));
        stream.source = Some(Source::Device(device));
        stream
    }
}

// ------------------------------------------------------------------------
// Readability protocol
// ------------------------------------------------------------------------

impl<'a> ByteStream<'a> {
    /// Is at least one byte consumable? Blocks on the source only when the
    /// span and every queued page are exhausted. Once this returns `false`
    /// it returns `false` forever.
    #[inline]
    pub fn readable(&mut self) -> Result<bool> {
        if self.span.has_runway() {
            return Ok(true);
        }
        self.readable_slow()
    }

    #[cold]
    #[inline(never)]
    fn readable_slow(&mut self) -> Result<bool> {
        if self.flip() {
            return Ok(true);
        }
        if !matches!(self.source, Some(Source::File(_))) {
            return Ok(false);
        }
        let appended = self.fill_sync()?;
        if appended == 0 {
            return Ok(false);
        }
        let adopted = self.flip();
        debug_assert!(adopted, "refill appended bytes but produced no span");
        Ok(true)
    }

    /// Establishes that the next `n` bytes may be consumed, straddling
    /// pages if need be, without any further device interaction.
    #[inline]
    pub fn readable_bytes(&mut self, n: usize) -> Result<bool> {
        if self.span.len() >= n {
            return Ok(true);
        }
        self.readable_bytes_slow(n)
    }

    #[cold]
    #[inline(never)]
    fn readable_bytes_slow(&mut self, n: usize) -> Result<bool> {
        if let Some(scope) = &self.scope {
            if n as u64 > scope.limit.saturating_sub(self.pos()) {
                return Ok(false);
            }
        }
        if !self.span.has_runway() {
            self.flip();
        }
        let mut runway = self.buffered_runway();
        if runway >= n {
            return Ok(true);
        }
        if !matches!(self.source, Some(Source::File(_))) {
            return Ok(false);
        }
        let began_empty = !self.span.has_runway();
        while runway < n {
            runway += self.fill_sync()?;
            if self.source.is_none() {
                break;
            }
        }
        if began_empty && !self.span.has_runway() {
            self.flip();
        }
        Ok(runway >= n)
    }

    /// Non-blocking truthiness: bytes consumable without any source call.
    #[inline]
    #[must_use]
    pub fn readable_now(&self) -> bool {
        self.total_unconsumed() > 0
    }

    /// Adopt the front page's readable region as the span, retiring spent
    /// pages. Returns whether the span gained runway. Refused once an
    /// active range scope's limit is reached, so a clamped remainder is
    /// never popped out from under the scope.
    fn flip(&mut self) -> bool {
        if let Some(scope) = &self.scope {
            if self.span_end_pos - self.span.len() as u64 >= scope.limit {
                return false;
            }
        }
        let adopted = {
            let Some(queue) = self.queue.as_mut() else {
                return false;
            };
            loop {
                let Some(span) = queue.checkout_front() else {
                    break None;
                };
                if span.has_runway() {
                    break Some(span);
                }
                if queue.page_count() > 1 {
                    queue.retire_front();
                } else {
                    break None;
                }
            }
        };
        match adopted {
            Some(span) => {
                self.span_end_pos += span.len() as u64;
                self.span = span;
                self.clamp_to_scope();
                true
            }
            None => false,
        }
    }

    /// Synchronous refill: append at least one page's worth of bytes or
    /// mark EOF. EOF disconnects the source so no further attempts happen.
    fn fill_sync(&mut self) -> Result<usize> {
        let Self { source, queue, .. } = self;
        let Some(Source::File(file)) = source.as_mut() else {
            return Ok(0);
        };
        let queue = queue.as_mut().expect("refilling stream has a page queue");
        let appended = file.fill(queue)?;
        if queue.eof_reached() {
            *source = None;
            log::trace!("file source disconnected at EOF");
        }
        Ok(appended)
    }

    fn clamp_to_scope(&mut self) {
        let len = self.span.len();
        let Some(scope) = &mut self.scope else { return };
        let pos = self.span_end_pos - len as u64;
        let allowed = scope.limit.saturating_sub(pos);
        if len as u64 > allowed {
            let excess = len - allowed as usize;
            // SAFETY: excess <= len.
            unsafe { self.span.retract(excess) };
            self.span_end_pos -= excess as u64;
            scope.hidden += excess;
        }
    }

    #[inline]
    fn buffered_runway(&self) -> usize {
        self.span.len() + self.queue.as_ref().map_or(0, PageQueue::buffered)
    }
}

// ------------------------------------------------------------------------
// Single-byte operations
// ------------------------------------------------------------------------

impl ByteStream<'_> {
    /// The next byte, unconsumed. Requires an established readability
    /// guarantee; panics otherwise.
    #[inline]
    #[must_use]
    pub fn peek(&mut self) -> u8 {
        if self.span.has_runway() {
            // SAFETY: runway verified by the comparison above.
            return unsafe { self.span.first() };
        }
        self.peek_flip()
    }

    #[cold]
    fn peek_flip(&mut self) -> u8 {
        assert!(self.flip(), "peek/read without an established readability");
        // SAFETY: flip returned true, so the span has runway.
        unsafe { self.span.first() }
    }

    /// The next byte, consumed. Same precondition as [`ByteStream::peek`].
    #[inline]
    pub fn read_byte(&mut self) -> u8 {
        let byte = self.peek();
        // SAFETY: peek verified at least one byte of runway.
        unsafe { self.span.bump(1) };
        byte
    }

    /// Consume `n` bytes, crossing pages in bulk. Equivalent to `n`
    /// repetitions of [`ByteStream::read_byte`] with the results discarded;
    /// panics when `n` exceeds the verified remainder.
    pub fn advance(&mut self, n: usize) {
        let mut left = n;
        loop {
            let run = self.span.len().min(left);
            // SAFETY: run <= span length.
            unsafe { self.span.bump(run) };
            left -= run;
            if left == 0 {
                return;
            }
            assert!(self.flip(), "advance past the readable remainder");
        }
    }

    /// The byte at offset `k` from the current position, within the
    /// current span only; there is no cross-page lookahead here. Panics
    /// if `k` is not inside the span.
    #[inline]
    #[must_use]
    pub fn peek_at(&self, k: usize) -> u8 {
        assert!(
            k < self.span.len(),
            "peek_at offset {k} outside the current span"
        );
        // SAFETY: bound checked above.
        unsafe { self.span.get(k) }
    }

    /// Does the span begin with `pattern`? The caller must have
    /// established `readable_bytes(pattern.len())` and that the window is
    /// contained in one span.
    #[must_use]
    pub fn starts_with(&self, pattern: &[u8]) -> bool {
        debug_assert!(
            pattern.len() <= self.span.len(),
            "starts_with window exceeds the current span"
        );
        // SAFETY: the subslice bound is checked by the short-circuit.
        pattern.len() <= self.span.len()
            && unsafe { &self.span.as_slice()[..pattern.len()] } == pattern
    }
}

// ------------------------------------------------------------------------
// Bulk operations
// ------------------------------------------------------------------------

impl<'a> ByteStream<'a> {
    /// A view of the next `n` bytes, consumed. Zero-copy when the current
    /// span alone covers the request (the returned slice points into the
    /// backing page or memory), otherwise assembled in a stream-owned
    /// spill buffer. Either way the view lives until the next mutating
    /// call. Requires `readable_bytes(n)`; panics past the verified
    /// remainder.
    pub fn read_slice(&mut self, n: usize) -> &[u8] {
        if self.span.len() >= n {
            // SAFETY: length checked; the backing page cannot be retired
            // while the returned borrow is live because retirement requires
            // `&mut self`.
            unsafe {
                let prefix = self.span.take_front(n);
                return std::slice::from_raw_parts(prefix, n);
            }
        }
        self.read_slice_spilled(n)
    }

    #[cold]
    fn read_slice_spilled(&mut self, n: usize) -> &[u8] {
        self.scratch.clear();
        self.scratch.reserve(n);
        while self.scratch.len() < n {
            if !self.span.has_runway() {
                assert!(self.flip(), "read_slice past the verified remainder");
            }
            let take = self.span.len().min(n - self.scratch.len());
            // SAFETY: take <= span length.
            unsafe {
                self.scratch.extend_from_slice(&self.span.as_slice()[..take]);
                self.span.bump(take);
            }
        }
        &self.scratch[..n]
    }

    /// Fill `dst` from the span, then queued pages in order, then the
    /// source directly. Returns the count produced; a short count means
    /// EOF was reached.
    pub fn read_into(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = self.drain_buffered(dst);
        while filled < dst.len() && matches!(self.source, Some(Source::File(_))) {
            let (n, eof) = {
                let Some(Source::File(file)) = self.source.as_mut() else {
                    unreachable!()
                };
                file.read_direct(&mut dst[filled..])?
            };
            filled += n;
            self.span_end_pos += n as u64;
            if eof {
                self.disconnect_at_eof();
            }
        }
        Ok(filled)
    }

    /// `read_into` that demands the whole buffer: `false` means EOF struck
    /// first.
    pub fn read_full(&mut self, dst: &mut [u8]) -> Result<bool> {
        Ok(self.read_into(dst)? == dst.len())
    }

    /// `readable()` then `read_byte()`; `None` at end-of-input, forever.
    pub fn next_byte(&mut self) -> Result<Option<u8>> {
        Ok(if self.readable()? {
            Some(self.read_byte())
        } else {
            None
        })
    }

    /// Iterator adapter over [`ByteStream::next_byte`].
    pub fn bytes(&mut self) -> Bytes<'_, 'a> {
        Bytes { stream: self }
    }

    fn drain_buffered(&mut self, dst: &mut [u8]) -> usize {
        let mut filled = 0;
        loop {
            let take = self.span.len().min(dst.len() - filled);
            if take > 0 {
                // SAFETY: take <= span length and take <= remaining dst.
                unsafe {
                    dst[filled..filled + take].copy_from_slice(&self.span.as_slice()[..take]);
                    self.span.bump(take);
                }
                filled += take;
            }
            if filled == dst.len() || !self.flip() {
                return filled;
            }
        }
    }

    fn disconnect_at_eof(&mut self) {
        if let Some(queue) = self.queue.as_mut() {
            queue.mark_eof();
        }
        self.source = None;
        log::trace!("source disconnected at EOF");
    }
}

// ------------------------------------------------------------------------
// Position and length
// ------------------------------------------------------------------------

impl ByteStream<'_> {
    /// Logical index of the next byte to be read. Non-decreasing, and
    /// increments by exactly the bytes consumed.
    #[inline]
    #[must_use]
    pub fn pos(&self) -> u64 {
        self.span_end_pos - self.span.len() as u64
    }

    /// Bytes consumable without invoking the source: the span plus every
    /// queued page, clamped by an active range scope.
    #[must_use]
    pub fn total_unconsumed(&self) -> usize {
        let raw = self.buffered_runway();
        match &self.scope {
            Some(scope) => raw.min(scope.limit.saturating_sub(self.pos()) as usize),
            None => raw,
        }
    }

    /// Total bytes still readable from the current position, when known:
    /// buffered bytes plus whatever the source reports. `None` when the
    /// source cannot tell.
    #[must_use]
    pub fn remaining_len(&self) -> Option<u64> {
        let buffered = self.total_unconsumed() as u64;
        match &self.source {
            None => Some(buffered),
            Some(Source::File(file)) => Some(file.remaining() + buffered),
            Some(Source::Device(device)) => device.remaining_len().map(|rest| rest + buffered),
        }
    }
}

// ------------------------------------------------------------------------
// Readable-range scope
// ------------------------------------------------------------------------

impl<'a> ByteStream<'a> {
    /// Runs `body` with the source hidden and consumption confined to the
    /// next `n` bytes: inside the scope, `readable_bytes(k)` answers
    /// `false` for any `k` beyond the budget and no refill can occur. The
    /// scope does not itself buffer anything; establish availability with
    /// `readable_bytes(n)` beforehand. Restoration happens on every exit,
    /// panic included.
    pub fn with_readable_range<R>(
        &mut self,
        n: usize,
        body: impl FnOnce(&mut ByteStream<'a>) -> R,
    ) -> R {
        struct Restore<'s, 'a> {
            stream: &'s mut ByteStream<'a>,
            outer: Option<RangeScope>,
        }
        impl Drop for Restore<'_, '_> {
            fn drop(&mut self) {
                self.stream.exit_range(self.outer.take());
            }
        }

        let outer = self.enter_range(n);
        let mut guard = Restore {
            stream: self,
            outer,
        };
        body(&mut *guard.stream)
    }

    fn enter_range(&mut self, n: usize) -> Option<RangeScope> {
        let mut limit = self.pos() + n as u64;
        if let Some(outer) = &self.scope {
            limit = limit.min(outer.limit);
        }
        let source = self.source.take();
        let outer = self.scope.replace(RangeScope {
            limit,
            hidden: 0,
            source,
        });
        self.clamp_to_scope();
        outer
    }

    fn exit_range(&mut self, outer: Option<RangeScope>) {
        let Some(mut scope) = self.scope.take() else {
            // The stream was closed inside the scope; it stays closed and
            // any outer scope's hidden source is released with `outer`.
            return;
        };
        if scope.hidden > 0 {
            // SAFETY: the hidden bytes are the clamped-off tail of the
            // readable region the span was checked out from; flips past it
            // were refused while the scope was active.
            unsafe { self.span.extend(scope.hidden) };
            self.span_end_pos += scope.hidden as u64;
        }
        self.source = scope.source.take();
        self.scope = outer;
        self.clamp_to_scope();
    }
}

// ------------------------------------------------------------------------
// Close
// ------------------------------------------------------------------------

impl ByteStream<'_> {
    /// Releases the source and renders the stream permanently empty.
    /// Closing twice (or more) is a no-op. For a device-backed stream this
    /// polls the device close once and otherwise detaches; use
    /// [`ByteStream::close_async`] to wait for it.
    pub fn close(&mut self) -> Result<()> {
        let source = self.take_source_for_close();
        let result = match source {
            Some(Source::Device(mut device)) => {
                let waker = noop_waker();
                let mut cx = Context::from_waker(&waker);
                match device.poll_close(&mut cx) {
                    Poll::Ready(done) => done.map_err(Error::from),
                    Poll::Pending => {
                        log::warn!("device close still pending; detaching");
                        Ok(())
                    }
                }
            }
            // Dropping the file handle is the close; read-only descriptors
            // have nothing further to report.
            Some(Source::File(file)) => {
                drop(file);
                Ok(())
            }
            None => Ok(()),
        };
        self.finish_close();
        result
    }

    /// Releases the source, awaiting a device close to completion.
    pub async fn close_async(&mut self) -> Result<()> {
        let source = self.take_source_for_close();
        let result = match source {
            Some(Source::Device(mut device)) => poll_fn(|cx| device.poll_close(cx))
                .await
                .map_err(Error::from),
            Some(Source::File(file)) => {
                drop(file);
                Ok(())
            }
            None => Ok(()),
        };
        self.finish_close();
        result
    }

    fn take_source_for_close(&mut self) -> Option<Source> {
        let scoped = self.scope.take().and_then(|mut scope| scope.source.take());
        self.source.take().or(scoped)
    }

    fn finish_close(&mut self) {
        let pos = self.pos();
        self.queue = None;
        self.backing = Backing::None;
        self.span = Span::empty();
        self.span_end_pos = pos;
    }
}

// ------------------------------------------------------------------------
// Asynchronous surface
// ------------------------------------------------------------------------

impl ByteStream<'_> {
    /// `readable()` for device-backed streams: the refill suspends instead
    /// of blocking. Streams with a blocking or no source answer without
    /// suspending.
    pub async fn readable_async(&mut self) -> Result<bool> {
        if self.span.has_runway() {
            return Ok(true);
        }
        if self.flip() {
            return Ok(true);
        }
        if !matches!(self.source, Some(Source::Device(_))) {
            return self.readable_slow();
        }
        let appended = self.fill_async().await?;
        if appended == 0 {
            return Ok(false);
        }
        let adopted = self.flip();
        debug_assert!(adopted, "refill appended bytes but produced no span");
        Ok(true)
    }

    /// `readable_bytes(n)` with a suspending refill loop.
    pub async fn readable_bytes_async(&mut self, n: usize) -> Result<bool> {
        if self.span.len() >= n {
            return Ok(true);
        }
        if let Some(scope) = &self.scope {
            if n as u64 > scope.limit.saturating_sub(self.pos()) {
                return Ok(false);
            }
        }
        if !self.span.has_runway() {
            self.flip();
        }
        let mut runway = self.buffered_runway();
        if runway >= n {
            return Ok(true);
        }
        if !matches!(self.source, Some(Source::Device(_))) {
            return self.readable_bytes_slow(n);
        }
        let began_empty = !self.span.has_runway();
        while runway < n {
            runway += self.fill_async().await?;
            if self.source.is_none() {
                break;
            }
        }
        if began_empty && !self.span.has_runway() {
            self.flip();
        }
        Ok(runway >= n)
    }

    /// `read_into` with suspending direct reads from the device.
    pub async fn read_into_async(&mut self, dst: &mut [u8]) -> Result<usize> {
        if !matches!(self.source, Some(Source::Device(_))) {
            return self.read_into(dst);
        }
        let mut filled = self.drain_buffered(dst);
        while filled < dst.len() && matches!(self.source, Some(Source::Device(_))) {
            let n = {
                let Some(Source::Device(device)) = self.source.as_mut() else {
                    unreachable!()
                };
                poll_fn(|cx| device.poll_read(cx, &mut dst[filled..]))
                    .await
                    .map_err(map_device_err)?
            };
            if n == 0 {
                self.disconnect_at_eof();
                break;
            }
            filled += n;
            self.span_end_pos += n as u64;
        }
        Ok(filled)
    }

    /// `read_full` over [`ByteStream::read_into_async`].
    pub async fn read_full_async(&mut self, dst: &mut [u8]) -> Result<bool> {
        Ok(self.read_into_async(dst).await? == dst.len())
    }

    /// `next_byte` with a suspending refill. `None` at end-of-input.
    pub async fn next_byte_async(&mut self) -> Result<Option<u8>> {
        Ok(if self.readable_async().await? {
            Some(self.read_byte())
        } else {
            None
        })
    }

    /// Races one refill against a caller-supplied deadline. Returns
    /// immediately with a byte when one is already buffered; on timeout the
    /// refill is cancelled with no data loss (any page the device already
    /// filled stays buffered) and the stream may be re-read.
    pub async fn next_byte_before<D>(&mut self, deadline: D) -> Result<NextByte>
    where
        D: Future<Output = ()>,
    {
        if self.readable_now() {
            return Ok(NextByte::Byte(self.read_byte()));
        }
        let outcome = {
            let refill = self.readable_async();
            let mut refill = pin!(refill);
            let mut deadline = pin!(deadline);
            poll_fn(move |cx| {
                if let Poll::Ready(result) = refill.as_mut().poll(cx) {
                    return Poll::Ready(Some(result));
                }
                if deadline.as_mut().poll(cx).is_ready() {
                    return Poll::Ready(None);
                }
                Poll::Pending
            })
            .await
        };
        match outcome {
            Some(Ok(true)) => Ok(NextByte::Byte(self.read_byte())),
            Some(Ok(false)) => Ok(NextByte::Eof),
            Some(Err(err)) => Err(err),
            None => Ok(NextByte::TimedOut),
        }
    }

    /// One suspending refill step: read into the back page's spare
    /// capacity and commit what arrived. Committing happens inside the
    /// same poll that produced the bytes, so cancelling the returned
    /// future never discards data.
    async fn fill_async(&mut self) -> Result<usize> {
        let Self { source, queue, .. } = self;
        let Some(Source::Device(device)) = source.as_mut() else {
            return Ok(0);
        };
        let queue = queue.as_mut().expect("device streams are paged");
        let spare = queue.spare_mut();
        let n = poll_fn(|cx| device.poll_read(cx, spare))
            .await
            .map_err(map_device_err)?;
        if n == 0 {
            queue.mark_eof();
            *source = None;
            log::trace!("device disconnected at EOF");
        } else {
            queue.commit(n);
        }
        Ok(n)
    }
}

/// A device read that reports `Interrupted` was cancelled at the waiter
/// level; the stream stays consistent and may be retried.
fn map_device_err(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::Interrupted {
        Error::Cancelled
    } else {
        Error::Io(err)
    }
}

impl fmt::Debug for ByteStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.source.is_some() {
            "open"
        } else if self.total_unconsumed() > 0 {
            "draining"
        } else {
            "closed"
        };
        f.debug_struct("ByteStream")
            .field("pos", &self.pos())
            .field("unconsumed", &self.total_unconsumed())
            .field("state", &state)
            .finish()
    }
}

/// Byte iterator over a stream; see [`ByteStream::bytes`].
pub struct Bytes<'s, 'a> {
    stream: &'s mut ByteStream<'a>,
}

impl Iterator for Bytes<'_, '_> {
    type Item = Result<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next_byte().transpose()
    }
}
