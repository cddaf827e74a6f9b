#![no_main]

use arbitrary::Arbitrary;
use commonware_bytepool::{Admission, Buffer, Config, Pool};
use libfuzzer_sys::fuzz_target;
use prometheus_client::registry::Registry;
use std::num::NonZeroUsize;

const MAX_WRITE: usize = 1 << 16;
const MAX_OPERATIONS: usize = 128;

#[derive(Arbitrary, Debug)]
enum Operation {
    Acquire,
    Write { slot: u8, size: u16 },
    Release { slot: u8 },
    ReleaseFresh { capacity: u16 },
    Drain,
    UpdateMaxCapacity(u32),
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    hint: u32,
    bounded: bool,
    zero_on_release: bool,
    operations: Vec<Operation>,
}

fn fuzz(input: FuzzInput) {
    let hint = (input.hint as usize % MAX_WRITE).max(1);
    let config = Config {
        max_capacity_hint: NonZeroUsize::new(hint).unwrap(),
        admission: if input.bounded {
            Admission::Bounded
        } else {
            Admission::UpperBound
        },
        zero_on_release: input.zero_on_release,
        ..Config::default()
    };
    let pool = Pool::new(config, &mut Registry::default());
    let buckets = pool.buckets();
    let mut held: Vec<Buffer> = Vec::new();

    for operation in input.operations.into_iter().take(MAX_OPERATIONS) {
        match operation {
            Operation::Acquire => {
                let buffer = pool.acquire();
                assert!(buffer.is_empty());
                held.push(buffer);
            }
            Operation::Write { slot, size } => {
                let index = slot as usize % held.len().max(1);
                if let Some(buffer) = held.get_mut(index) {
                    let data = vec![slot; size as usize];
                    buffer.write(&data).unwrap();
                }
            }
            Operation::Release { slot } => {
                if held.is_empty() {
                    continue;
                }
                let buffer = held.swap_remove(slot as usize % held.len());
                let entries = pool.entries();
                let capacity = buffer.capacity();
                let admissible = capacity >= 1 && capacity <= pool.max_capacity();
                pool.release(buffer);
                if !admissible {
                    assert_eq!(pool.entries(), entries);
                }
            }
            Operation::ReleaseFresh { capacity } => {
                pool.release(Buffer::with_capacity(capacity as usize));
            }
            Operation::Drain => {
                pool.drain();
                assert_eq!(pool.entries(), 0);
            }
            Operation::UpdateMaxCapacity(value) => {
                pool.update_max_capacity(value as usize);
                assert_eq!(pool.max_capacity(), value as usize);
            }
        }
        assert_eq!(pool.buckets(), buckets);
    }

    pool.close();
    assert_eq!(pool.entries(), 0);
}

fuzz_target!(|input: FuzzInput| {
    fuzz(input);
});
