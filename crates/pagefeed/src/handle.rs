//! Owning handle with close-on-drop.
//!
//! A `Handle` is the move-only owner of a stream for callers that want
//! deterministic release without remembering to close: dropping the handle
//! closes the stream, suppressing errors into the logging channel. Explicit
//! close with a chosen wait policy is also available. Handles cannot be
//! cloned.

use std::ops::{Deref, DerefMut};

use crate::{ByteStream, Result};

/// Policy for [`Handle::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Perform the close inline and surface its error.
    Wait,
    /// Release the source without waiting; failures are logged.
    Detach,
}

/// Move-only owner of a [`ByteStream`]; closes it on drop.
#[derive(Debug)]
pub struct Handle<'a> {
    stream: Option<ByteStream<'a>>,
}

impl<'a> Handle<'a> {
    #[must_use]
    pub fn new(stream: ByteStream<'a>) -> Self {
        Handle {
            stream: Some(stream),
        }
    }

    /// Close the stream now. With [`CloseMode::Detach`] the error, if any,
    /// goes to the log instead of the caller.
    pub fn close(mut self, mode: CloseMode) -> Result<()> {
        let mut stream = self.stream.take().expect("handle owns its stream");
        match mode {
            CloseMode::Wait => stream.close(),
            CloseMode::Detach => {
                if let Err(err) = stream.close() {
                    log::warn!("detached close failed: {err}");
                }
                Ok(())
            }
        }
    }

    /// Give up close-on-drop and take the stream back.
    #[must_use]
    pub fn into_inner(mut self) -> ByteStream<'a> {
        self.stream.take().expect("handle owns its stream")
    }
}

impl<'a> From<ByteStream<'a>> for Handle<'a> {
    fn from(stream: ByteStream<'a>) -> Self {
        Handle::new(stream)
    }
}

impl<'a> Deref for Handle<'a> {
    type Target = ByteStream<'a>;

    fn deref(&self) -> &Self::Target {
        self.stream.as_ref().expect("handle owns its stream")
    }
}

impl DerefMut for Handle<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stream.as_mut().expect("handle owns its stream")
    }
}

impl Drop for Handle<'_> {
    fn drop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.close() {
                log::warn!("close during drop failed: {err}");
            }
        }
    }
}
