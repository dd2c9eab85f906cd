//! Source variants: where refills come from.
//!
//! A stream's source is one closed enum so refill dispatch is a single
//! `match`; the hot path of `readable()` never consults it. Each variant
//! carries only the capabilities the underlying kind supports: a blocking
//! file supports synchronous refill, direct reads, and a known length; an
//! external device supports the same operations in poll form. Memory-backed
//! and mapped streams have no source at all; their single span is the whole
//! stream, and readability is decided entirely by the span.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::Path,
};

use crate::{device::Device, page::PageQueue};

pub(crate) enum Source {
    /// Blocking OS file, read page-at-a-time into the queue.
    File(FileSource),
    /// Externally-supplied non-blocking read capability.
    Device(Box<dyn Device>),
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File(src) => f.debug_tuple("File").field(&src.remaining).finish(),
            Source::Device(_) => f.write_str("Device"),
        }
    }
}

/// A regular file read through blocking I/O.
///
/// `remaining` counts the bytes between the current file offset and the end
/// offset captured at construction, so the stream can answer length queries
/// without a syscall. A short read marks EOF: regular files only return
/// fewer bytes than requested at end-of-file. `ErrorKind::Interrupted` is
/// retried first so a signal cannot masquerade as EOF.
#[derive(Debug)]
pub(crate) struct FileSource {
    file: File,
    remaining: u64,
}

impl FileSource {
    pub(crate) fn open(path: &Path, offset: u64) -> crate::Result<Self> {
        let mut file = File::open(path).map_err(|e| crate::Error::open(path, e))?;
        let len = file.metadata()?.len();
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(FileSource {
            file,
            remaining: len.saturating_sub(offset),
        })
    }

    #[inline]
    pub(crate) fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Refill: append freshly-read bytes to the queue, or mark EOF.
    /// Returns the byte count appended.
    pub(crate) fn fill(&mut self, queue: &mut PageQueue) -> io::Result<usize> {
        let spare = queue.spare_mut();
        let want = spare.len();
        let n = read_retrying(&mut self.file, spare)?;
        self.remaining = self.remaining.saturating_sub(n as u64);
        if n > 0 {
            queue.commit(n);
        }
        if n < want {
            log::trace!("file source reached EOF after {n} of {want} bytes");
            queue.mark_eof();
        }
        Ok(n)
    }

    /// Direct read bypassing the queue. Returns the count produced and
    /// whether the underlying EOF was reached.
    pub(crate) fn read_direct(&mut self, dst: &mut [u8]) -> io::Result<(usize, bool)> {
        let n = read_retrying(&mut self.file, dst)?;
        self.remaining = self.remaining.saturating_sub(n as u64);
        Ok((n, n < dst.len()))
    }
}

fn read_retrying(file: &mut File, dst: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(dst) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}
