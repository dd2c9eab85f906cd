use std::{io, path::PathBuf};

/// Errors surfaced by stream construction and by operations that touch the
/// underlying source.
///
/// End-of-file is never an error: it is reported as `false` from the
/// readability queries and `None` from [`crate::ByteStream::next_byte`].
/// Misuse of the read primitives (consuming without an established
/// readability guarantee) is a programmer error and panics instead of
/// returning a variant here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The path given to a file or mapped-file constructor does not exist.
    #[error("file not found: {}", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An I/O failure reported by the operating system or device.
    #[error("i/o failure")]
    Io(#[from] io::Error),

    /// A mapped-file offset that is not page-aligned.
    #[error("mapping offset {offset:#x} is not page-aligned")]
    InvalidOffset { offset: u64 },

    /// An asynchronous read was cancelled by the device before completion.
    ///
    /// The stream remains consistent and may still be read; any page the
    /// device had already filled stays buffered.
    #[error("read cancelled before completion")]
    Cancelled,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn open(path: &std::path::Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.to_path_buf(),
                source,
            }
        } else {
            Error::Io(source)
        }
    }
}
