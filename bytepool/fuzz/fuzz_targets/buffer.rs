#![no_main]

use arbitrary::Arbitrary;
use bytes::Buf;
use commonware_bytepool::{Buffer, Error};
use libfuzzer_sys::fuzz_target;
use std::{collections::VecDeque, io};

const MAX_CAPACITY: usize = 1 << 20;
const MAX_OPERATIONS: usize = 256;

#[derive(Arbitrary, Debug)]
enum Operation {
    Write(Vec<u8>),
    Advance(u16),
    WriteTo { limit: u16, fail: bool },
    Truncate(u16),
    Reserve(u16),
    Reset,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    capacity: u16,
    operations: Vec<Operation>,
}

/// Sink accepting at most `limit` bytes per call (or failing outright).
struct Sink {
    accepted: Vec<u8>,
    limit: usize,
    fail: bool,
}

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::other("sink failed"));
        }
        let n = buf.len().min(self.limit);
        self.accepted.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn fuzz(input: FuzzInput) {
    let mut buffer = Buffer::with_capacity(input.capacity as usize);
    let mut expected = VecDeque::new();

    for operation in input.operations.into_iter().take(MAX_OPERATIONS) {
        match operation {
            Operation::Write(data) => {
                if buffer.capacity() + data.len() > MAX_CAPACITY {
                    continue;
                }
                assert_eq!(buffer.write(&data).unwrap(), data.len());
                expected.extend(data);
            }
            Operation::Advance(n) => {
                let n = (n as usize).min(expected.len());
                buffer.advance(n);
                expected.drain(..n);
            }
            Operation::WriteTo { limit, fail } => {
                let mut sink = Sink {
                    accepted: Vec::new(),
                    limit: limit as usize,
                    fail,
                };
                let available = expected.len();
                match buffer.write_to(&mut sink) {
                    Ok(n) => {
                        assert_eq!(n, available);
                        assert!(!fail || available == 0);
                    }
                    Err(Error::ShortWrite { written, .. }) => {
                        assert_eq!(written, limit as usize);
                        assert!(written < available);
                    }
                    Err(Error::Sink { written, .. }) => {
                        assert!(fail);
                        assert_eq!(written, 0);
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
                let drained: Vec<u8> = expected.drain(..sink.accepted.len()).collect();
                assert_eq!(drained, sink.accepted);
            }
            Operation::Truncate(n) => {
                let n = n as usize;
                let readable = expected.len();
                match buffer.truncate(n) {
                    Ok(()) if n <= readable => expected.truncate(n),
                    // Exposes previously written (or zeroed) bytes
                    Ok(()) => expected = buffer.as_ref().iter().copied().collect(),
                    Err(Error::InvalidArgument { capacity, .. }) => {
                        assert_eq!(capacity, buffer.capacity());
                        assert!(n > readable);
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            Operation::Reserve(n) => {
                buffer.reserve(n as usize).unwrap();
                assert!(buffer.capacity() - buffer.len() >= n as usize);
            }
            Operation::Reset => {
                let capacity = buffer.capacity();
                buffer.reset();
                expected.clear();
                assert_eq!(buffer.capacity(), capacity);
            }
        }

        assert_eq!(buffer.len(), expected.len());
        assert!(buffer.len() <= buffer.capacity());
        assert!(buffer.as_ref().iter().eq(expected.iter()));
    }
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
