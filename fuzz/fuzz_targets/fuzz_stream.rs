#![no_main]

//! Differential fuzzing of the read primitives against a reference cursor
//! over the same bytes. Any divergence in produced bytes, position, or
//! unconsumed count, or any panic from an operation whose precondition
//! was established, is a finding.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pagefeed::ByteStream;

#[derive(Arbitrary, Debug)]
enum Op {
    ReadByte,
    Peek,
    Advance(u8),
    ReadSlice(u8),
    ReadInto(u8),
    StartsWith(u8),
}

fuzz_target!(|input: (Vec<u8>, Vec<Op>)| {
    let (data, ops) = input;
    let mut stream = ByteStream::from_slice(&data);
    let mut cursor = 0usize;

    for op in ops {
        let left = data.len() - cursor;
        match op {
            Op::ReadByte => {
                if stream.readable().unwrap() {
                    assert_eq!(stream.read_byte(), data[cursor]);
                    cursor += 1;
                }
            }
            Op::Peek => {
                if stream.readable().unwrap() {
                    assert_eq!(stream.peek(), data[cursor]);
                }
            }
            Op::Advance(n) => {
                let n = usize::from(n).min(left);
                stream.advance(n);
                cursor += n;
            }
            Op::ReadSlice(n) => {
                let n = usize::from(n);
                if stream.readable_bytes(n).unwrap() {
                    assert_eq!(stream.read_slice(n), &data[cursor..cursor + n]);
                    cursor += n;
                }
            }
            Op::ReadInto(n) => {
                let mut dst = vec![0u8; usize::from(n)];
                let got = stream.read_into(&mut dst).unwrap();
                assert_eq!(got, dst.len().min(left));
                assert_eq!(&dst[..got], &data[cursor..cursor + got]);
                cursor += got;
            }
            Op::StartsWith(n) => {
                let n = usize::from(n).min(left);
                assert!(stream.starts_with(&data[cursor..cursor + n]));
            }
        }
        assert_eq!(stream.pos(), cursor as u64);
        assert_eq!(stream.total_unconsumed(), data.len() - cursor);
    }
});
