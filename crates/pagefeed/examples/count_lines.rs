//! Counts the lines of a file through the buffered stream, the way a
//! line-oriented consumer would: establish readability, then consume bytes
//! with no further checks.
//!
//! ```sh
//! cargo run --example count_lines -- /path/to/file
//! ```

use pagefeed::{ByteStream, Handle};

fn main() -> pagefeed::Result<()> {
    let path = std::env::args()
        .nth(1)
        .expect("usage: count_lines <path>");

    let mut stream = Handle::new(ByteStream::file(&path)?);
    let mut lines = 0u64;
    let mut bytes = 0u64;

    while let Some(byte) = stream.next_byte()? {
        bytes += 1;
        if byte == b'\n' {
            lines += 1;
        }
    }

    println!("{lines} lines, {bytes} bytes in {path}");
    Ok(())
}
