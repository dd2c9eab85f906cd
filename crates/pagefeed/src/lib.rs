//! Page-oriented buffered input streams.
//!
//! `pagefeed` gives byte-consuming code (parsers, decoders, line-oriented
//! readers) one contract over heterogeneous sources: in-memory slices,
//! owned buffers, memory-mapped files, OS files read through blocking I/O,
//! and externally-supplied non-blocking devices.
//!
//! The model is a single contiguous readable window (the *span*) over data
//! that physically lives in caller memory, a mapping, or a FIFO of pages a
//! source refills. Consumers alternate freely between single-byte peeking
//! and bulk reads without per-byte virtual calls:
//!
//! ```
//! use pagefeed::ByteStream;
//!
//! let mut stream = ByteStream::from_slice(b"key=value\n");
//! let mut key = Vec::new();
//! while stream.readable().unwrap() {
//!     match stream.read_byte() {
//!         b'=' => break,
//!         byte => key.push(byte),
//!     }
//! }
//! assert_eq!(key, b"key");
//! assert_eq!(stream.read_slice(5), b"value");
//! ```
//!
//! The readability protocol is the load-bearing contract: `readable()` and
//! `readable_bytes(n)` are the only operations that may touch the source,
//! and once one of them has returned `true`, consuming up to the verified
//! count cannot fail or block. Page exhaustion, refill, EOF, and waiting
//! are folded into those two queries; end-of-input is a permanent `false`,
//! never an error.
//!
//! Non-blocking sources implement [`Device`] and are driven through the
//! `_async` mirrors of the same operations. The library names no runtime:
//! suspension is the task `Waker`, and deadlines are caller-supplied
//! futures (see [`ByteStream::next_byte_before`]).

mod device;
mod error;
mod handle;
mod page;
mod source;
mod span;
mod stream;

pub use device::{Device, NextByte};
pub use error::{Error, Result};
pub use handle::{CloseMode, Handle};
pub use page::DEFAULT_PAGE_SIZE;
pub use stream::{ByteStream, Bytes};

#[cfg(test)]
mod tests;
