//! Unit and property tests for the stream core.


use std::{
    collections::VecDeque,
    io,
    task::{Context, Poll},
};

use crate::Device;

/// A deterministic scripted device: yields the given chunks in order, then
/// EOF. With `interleave_pending` set, every successful read is preceded by
/// one `Pending` (with an immediate wake) to exercise suspension.
pub(crate) struct ScriptDevice {
    chunks: VecDeque<Vec<u8>>,
    interleave_pending: bool,
    armed: bool,
}

impl ScriptDevice {
    pub(crate) fn new(chunks: Vec<Vec<u8>>, interleave_pending: bool) -> Box<ScriptDevice> {
        Box::new(ScriptDevice {
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            interleave_pending,
            armed: false,
        })
    }

    pub(crate) fn of_bytes(bytes: &[u8], chunk_size: usize) -> Box<ScriptDevice> {
        Self::new(
            bytes.chunks(chunk_size.max(1)).map(<[u8]>::to_vec).collect(),
            false,
        )
    }
}

impl Device for ScriptDevice {
    fn poll_read(&mut self, cx: &mut Context<'_>, dst: &mut [u8]) -> Poll<io::Result<usize>> {
        if self.interleave_pending && !self.armed {
            self.armed = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.armed = false;
        match self.chunks.front_mut() {
            None => Poll::Ready(Ok(0)),
            Some(chunk) => {
                let n = chunk.len().min(dst.len());
                dst[..n].copy_from_slice(&chunk[..n]);
                chunk.drain(..n);
                if chunk.is_empty() {
                    self.chunks.pop_front();
                }
                Poll::Ready(Ok(n))
            }
        }
    }

    fn remaining_len(&self) -> Option<u64> {
        Some(self.chunks.iter().map(|c| c.len() as u64).sum())
    }
}
