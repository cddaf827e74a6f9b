//! Growable byte buffer with a read cursor.
//!
//! A [Buffer] is the unit of storage handed out by [crate::Pool]. It can also be used on its
//! own as a scratch buffer that amortizes reallocation across reuse.
//!
//! # Buffer Layout
//!
//! ```text
//! [0................off...............len.............capacity]
//!  ^                 ^                 ^                 ^
//!  |                 |                 |                 |
//!  region start      read position     write position    region end
//!                    (consumed prefix)
//!
//! Regions:
//! - [0..off]:         consumed (via `write_to` or `Buf::advance`), no longer readable
//! - [off..len]:       readable bytes (`as_ref` returns this slice)
//! - [len..capacity]:  free space for subsequent writes
//! ```
//!
//! # Growth
//!
//! When a write would exceed capacity, the buffer (in order of preference):
//! 1. uses an inline region of [INLINE_CAPACITY] bytes if it has never been backed by storage
//!    and the write fits,
//! 2. slides the readable bytes down to offset 0 if that leaves at least half of the region free,
//! 3. allocates a new region of `2 * capacity + requested` bytes.
//!
//! Every byte in `[0, capacity)` is initialized, so no byte outside of what was written (or
//! zeroed) is ever exposed.

use crate::Error;
use bytes::{buf::UninitSlice, Buf, BufMut};
use std::io;
use zeroize::Zeroize;

/// Size of the inline region used by a buffer that has not yet been backed by an allocation.
pub const INLINE_CAPACITY: usize = 64;

/// A growable byte buffer with a read cursor.
pub struct Buffer {
    /// Heap region. Its length is the capacity of the buffer once allocated.
    heap: Vec<u8>,
    /// Inline region used before any heap allocation.
    inline: [u8; INLINE_CAPACITY],
    /// Whether `inline` is the active region.
    inline_active: bool,
    /// Read cursor.
    off: usize,
    /// Write position (end of readable bytes).
    len: usize,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("off", &self.off)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("inline", &self.inline_active)
            .finish()
    }
}

/// Allocates a zeroed region of `size` bytes, failing instead of aborting if the allocator
/// cannot satisfy the request.
fn allocate(size: usize) -> Result<Vec<u8>, Error> {
    let mut region = Vec::new();
    region
        .try_reserve_exact(size)
        .map_err(|_| Error::AllocationTooLarge(size))?;
    region.resize(size, 0);
    Ok(region)
}

impl Buffer {
    /// Creates an empty buffer without any backing storage.
    pub const fn new() -> Self {
        Self {
            heap: Vec::new(),
            inline: [0; INLINE_CAPACITY],
            inline_active: false,
            off: 0,
            len: 0,
        }
    }

    /// Creates an empty buffer backed by a region of exactly `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if the allocation cannot be satisfied. Use [Self::try_with_capacity] to handle
    /// that case.
    pub fn with_capacity(capacity: usize) -> Self {
        match Self::try_with_capacity(capacity) {
            Ok(buffer) => buffer,
            Err(err) => panic!("{err}"),
        }
    }

    /// Creates an empty buffer backed by a region of exactly `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [Error::AllocationTooLarge] if the allocation cannot be satisfied.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, Error> {
        let mut buffer = Self::new();
        if capacity > 0 {
            buffer.heap = allocate(capacity)?;
        }
        Ok(buffer)
    }

    /// Returns the number of readable bytes (`len - off`).
    #[inline]
    pub const fn len(&self) -> usize {
        self.len - self.off
    }

    /// Returns the write position: the end of the written bytes within the region.
    ///
    /// Reading does not move it, so after draining everything it still reports how much of
    /// the region was written since the last reset (compaction and truncation do move it).
    #[inline]
    pub(crate) const fn position(&self) -> usize {
        self.len
    }

    /// Returns true if no readable bytes remain.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.off == self.len
    }

    /// Returns the size of the active region.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.region().len()
    }

    #[inline]
    fn region(&self) -> &[u8] {
        if self.inline_active {
            &self.inline
        } else {
            &self.heap
        }
    }

    #[inline]
    fn region_mut(&mut self) -> &mut [u8] {
        if self.inline_active {
            &mut self.inline
        } else {
            &mut self.heap
        }
    }

    /// Makes room for `n` more bytes and returns the position at which they should be written.
    ///
    /// On success, the logical length already includes the `n` bytes.
    fn grow(&mut self, n: usize) -> Result<usize, Error> {
        let readable = self.len();

        // Nothing left to read: recover the consumed prefix before deciding whether to grow.
        if readable == 0 && self.off != 0 {
            self.reset();
        }

        let needed = self
            .len
            .checked_add(n)
            .ok_or(Error::AllocationTooLarge(usize::MAX))?;
        let capacity = self.capacity();
        if needed > capacity {
            if !self.inline_active && self.heap.is_empty() && n <= INLINE_CAPACITY {
                // No storage yet (so off == len == 0)
                self.inline_active = true;
            } else if readable + n <= capacity / 2 {
                // Sliding only requires `readable + n <= capacity`, but waiting until the region
                // is at most half full keeps copies from dominating.
                let (off, len) = (self.off, self.len);
                self.region_mut().copy_within(off..len, 0);
            } else {
                let size = capacity
                    .checked_mul(2)
                    .and_then(|size| size.checked_add(n))
                    .ok_or(Error::AllocationTooLarge(usize::MAX))?;
                let mut region = allocate(size)?;
                region[..readable].copy_from_slice(&self.region()[self.off..self.len]);
                self.heap = region;
                self.inline_active = false;
            }
            self.off = 0;
            self.len = readable;
        }

        let at = self.len;
        self.len += n;
        Ok(at)
    }

    /// Ensures at least `additional` bytes can be written without further growth.
    ///
    /// # Errors
    ///
    /// Returns [Error::AllocationTooLarge] if the region cannot be grown. The readable bytes
    /// are preserved.
    pub fn reserve(&mut self, additional: usize) -> Result<(), Error> {
        let at = self.grow(additional)?;
        self.len = at;
        Ok(())
    }

    /// Appends `data`, growing the buffer if required, and returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [Error::AllocationTooLarge] if the buffer cannot be grown to fit `data`. The
    /// readable bytes are preserved.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let at = self.grow(data.len())?;
        self.region_mut()[at..at + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    /// Offers all readable bytes to `sink` and advances the read cursor by the number of bytes
    /// it accepted.
    ///
    /// Bytes the sink did not accept remain readable, so the call can be retried.
    ///
    /// # Errors
    ///
    /// - [Error::ShortWrite]: the sink accepted fewer bytes than offered without an error.
    /// - [Error::Sink]: the sink returned an error.
    ///
    /// # Panics
    ///
    /// Panics if the sink reports accepting more bytes than were offered.
    pub fn write_to<W: io::Write + ?Sized>(&mut self, sink: &mut W) -> Result<usize, Error> {
        let available = self.len();
        if available == 0 {
            return Ok(0);
        }

        let written = sink
            .write(&self.region()[self.off..self.len])
            .map_err(|source| Error::Sink { written: 0, source })?;
        assert!(written <= available, "sink accepted more bytes than offered");
        self.off += written;

        if written != available {
            return Err(Error::ShortWrite { written, available });
        }
        Ok(written)
    }

    /// Sets the number of readable bytes to `n` (the logical length becomes `off + n`).
    ///
    /// Truncating to zero also resets the read cursor, recovering the consumed prefix.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidArgument] if `off + n` exceeds the capacity.
    pub fn truncate(&mut self, n: usize) -> Result<(), Error> {
        let capacity = self.capacity();
        let end = self
            .off
            .checked_add(n)
            .filter(|end| *end <= capacity)
            .ok_or(Error::InvalidArgument {
                offset: self.off,
                requested: n,
                capacity,
            })?;
        if n == 0 {
            self.reset();
        } else {
            self.len = end;
        }
        Ok(())
    }

    /// Discards all readable bytes and the consumed prefix (equivalent to `truncate(0)`).
    ///
    /// Capacity is preserved.
    #[inline]
    pub fn reset(&mut self) {
        self.off = 0;
        self.len = 0;
    }
}

impl Zeroize for Buffer {
    /// Overwrites the entire region (not just the readable bytes) with zeros and resets the
    /// cursors.
    fn zeroize(&mut self) {
        self.heap.as_mut_slice().zeroize();
        self.inline.zeroize();
        self.reset();
    }
}

impl AsRef<[u8]> for Buffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.region()[self.off..self.len]
    }
}

impl AsMut<[u8]> for Buffer {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        let (off, len) = (self.off, self.len);
        &mut self.region_mut()[off..len]
    }
}

impl io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Buffer::write(self, buf).map_err(|err| io::Error::new(io::ErrorKind::OutOfMemory, err))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Buf for Buffer {
    #[inline]
    fn remaining(&self) -> usize {
        self.len()
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        self.as_ref()
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        assert!(cnt <= self.len(), "cannot advance past end of buffer");
        self.off += cnt;
    }
}

// SAFETY: BufMut implementation for Buffer.
// - `remaining_mut()` reports how far the buffer may grow (like `Vec<u8>`)
// - `chunk_mut()` returns the (initialized) free space, growing first if there is none
// - `advance_mut()` only advances `len` within the region
unsafe impl BufMut for Buffer {
    #[inline]
    fn remaining_mut(&self) -> usize {
        isize::MAX as usize - self.len
    }

    #[inline]
    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(
            cnt <= self.capacity() - self.len,
            "cannot advance past end of buffer"
        );
        self.len += cnt;
    }

    /// # Panics
    ///
    /// Panics if the buffer is full and cannot be grown.
    #[inline]
    fn chunk_mut(&mut self) -> &mut UninitSlice {
        if self.len == self.capacity() {
            if let Err(err) = self.reserve(INLINE_CAPACITY) {
                panic!("{err}");
            }
        }
        let len = self.len;
        UninitSlice::new(&mut self.region_mut()[len..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::io::Write as _;

    /// A sink that accepts at most `limit` bytes per call.
    struct LimitedSink {
        data: Vec<u8>,
        limit: usize,
    }

    impl io::Write for LimitedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A sink that always fails.
    struct BrokenSink;

    impl io::Write for BrokenSink {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A sink that claims to have accepted more than it was given.
    struct LyingSink;

    impl io::Write for LyingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len() + 1)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_has_no_storage() {
        let buf = Buffer::new();
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.len(), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_with_capacity_is_exact() {
        for capacity in [1, 2, 63, 64, 65, 1024] {
            let buf = Buffer::with_capacity(capacity);
            assert_eq!(buf.capacity(), capacity);
            assert!(buf.is_empty());
        }
        assert_eq!(Buffer::with_capacity(0).capacity(), 0);
    }

    #[test]
    fn test_try_with_capacity_too_large() {
        let result = Buffer::try_with_capacity(usize::MAX);
        assert!(matches!(result, Err(Error::AllocationTooLarge(usize::MAX))));
    }

    #[test]
    fn test_small_write_uses_inline_region() {
        let mut buf = Buffer::new();
        assert_eq!(buf.write(b"hello").unwrap(), 5);
        assert!(buf.inline_active);
        assert!(buf.heap.is_empty());
        assert_eq!(buf.capacity(), INLINE_CAPACITY);
        assert_eq!(buf.as_ref(), b"hello");

        // Fill the inline region exactly
        buf.write(&[0xAA; INLINE_CAPACITY - 5]).unwrap();
        assert!(buf.inline_active);
        assert_eq!(buf.len(), INLINE_CAPACITY);
    }

    #[test]
    fn test_inline_region_spills_to_heap() {
        let mut buf = Buffer::new();
        buf.write(&[1; 10]).unwrap();
        buf.write(&[2; 60]).unwrap();
        assert!(!buf.inline_active);

        // 2 * 64 + 60
        assert_eq!(buf.capacity(), 188);
        assert_eq!(&buf.as_ref()[..10], &[1; 10]);
        assert_eq!(&buf.as_ref()[10..], &[2; 60]);
    }

    #[test]
    fn test_large_first_write_skips_inline_region() {
        let mut buf = Buffer::new();
        buf.write(&[7; INLINE_CAPACITY + 1]).unwrap();
        assert!(!buf.inline_active);
        assert_eq!(buf.capacity(), INLINE_CAPACITY + 1);
    }

    #[test]
    fn test_growth_doubles_plus_request() {
        let mut buf = Buffer::with_capacity(16);
        buf.write(&[1; 16]).unwrap();
        assert_eq!(buf.capacity(), 16);

        buf.write(&[2]).unwrap();
        assert_eq!(buf.capacity(), 33);
        assert_eq!(buf.len(), 17);
        assert_eq!(&buf.as_ref()[..16], &[1; 16]);
        assert_eq!(buf.as_ref()[16], 2);
    }

    #[test]
    fn test_growth_compacts_consumed_prefix() {
        let mut buf = Buffer::with_capacity(64);
        buf.write(&[0xAA; 50]).unwrap();
        buf.write(&[0xBB; 10]).unwrap();
        Buf::advance(&mut buf, 50);
        assert_eq!(buf.off, 50);

        // 10 readable + 10 requested <= 64 / 2, so the region is reused
        buf.write(&[0xCC; 10]).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.off, 0);
        assert_eq!(&buf.as_ref()[..10], &[0xBB; 10]);
        assert_eq!(&buf.as_ref()[10..], &[0xCC; 10]);
    }

    #[test]
    fn test_growth_reallocates_when_compaction_insufficient() {
        let mut buf = Buffer::with_capacity(64);
        buf.write(&[0xAA; 60]).unwrap();
        Buf::advance(&mut buf, 20);

        // 40 readable + 10 requested > 64 / 2
        buf.write(&[0xBB; 10]).unwrap();
        assert_eq!(buf.capacity(), 2 * 64 + 10);
        assert_eq!(buf.off, 0);
        assert_eq!(&buf.as_ref()[..40], &[0xAA; 40]);
        assert_eq!(&buf.as_ref()[40..], &[0xBB; 10]);
    }

    #[test]
    fn test_fully_consumed_buffer_recovers_prefix() {
        let mut buf = Buffer::with_capacity(32);
        buf.write(&[1; 32]).unwrap();
        Buf::advance(&mut buf, 32);
        assert!(buf.is_empty());

        buf.write(&[2; 32]).unwrap();
        assert_eq!(buf.capacity(), 32);
        assert_eq!(buf.as_ref(), &[2; 32]);
    }

    #[test]
    fn test_grow_overflow_preserves_contents() {
        let mut buf = Buffer::with_capacity(8);
        buf.write(b"abc").unwrap();
        let err = buf.reserve(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::AllocationTooLarge(_)));
        assert_eq!(buf.as_ref(), b"abc");
        assert_eq!(buf.capacity(), 8);
    }

    #[test]
    fn test_reserve() {
        let mut buf = Buffer::with_capacity(4);
        buf.write(b"ab").unwrap();
        buf.reserve(100).unwrap();
        assert!(buf.capacity() - buf.len() >= 100);
        assert_eq!(buf.as_ref(), b"ab");
    }

    #[test]
    fn test_write_to_drains_everything() {
        let mut buf = Buffer::new();
        buf.write(b"hello ").unwrap();
        buf.write(b"world").unwrap();

        let mut sink = Vec::new();
        assert_eq!(buf.write_to(&mut sink).unwrap(), 11);
        assert_eq!(sink, b"hello world");
        assert_eq!(buf.len(), 0);

        // Nothing left to drain
        assert_eq!(buf.write_to(&mut sink).unwrap(), 0);
        assert_eq!(sink, b"hello world");
    }

    #[test]
    fn test_write_to_short_write_retains_remainder() {
        let mut buf = Buffer::new();
        buf.write(b"0123456789").unwrap();

        let mut sink = LimitedSink {
            data: Vec::new(),
            limit: 4,
        };
        let err = buf.write_to(&mut sink).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortWrite {
                written: 4,
                available: 10
            }
        ));
        assert_eq!(err.written(), Some(4));
        assert_eq!(buf.as_ref(), b"456789");

        // Retry until drained
        while buf.write_to(&mut sink).is_err() {}
        assert_eq!(sink.data, b"0123456789");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_write_to_propagates_sink_error() {
        let mut buf = Buffer::new();
        buf.write(b"data").unwrap();
        let err = buf.write_to(&mut BrokenSink).unwrap_err();
        match err {
            Error::Sink { written, source } => {
                assert_eq!(written, 0);
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(buf.as_ref(), b"data");
    }

    #[test]
    #[should_panic(expected = "sink accepted more bytes than offered")]
    fn test_write_to_rejects_invalid_count() {
        let mut buf = Buffer::new();
        buf.write(b"data").unwrap();
        let _ = buf.write_to(&mut LyingSink);
    }

    #[test]
    fn test_position_survives_reads() {
        let mut buf = Buffer::with_capacity(128);
        buf.write(&[1; 100]).unwrap();
        assert_eq!(buf.position(), 100);

        let mut sink = Vec::new();
        buf.write_to(&mut sink).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.position(), 100);

        buf.reset();
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_truncate() {
        let mut buf = Buffer::with_capacity(16);
        buf.write(b"abcdefgh").unwrap();
        Buf::advance(&mut buf, 2);

        buf.truncate(3).unwrap();
        assert_eq!(buf.as_ref(), b"cde");
        assert_eq!(buf.off, 2);

        // Extending within capacity is allowed
        buf.truncate(6).unwrap();
        assert_eq!(buf.as_ref(), b"cdefgh");

        // off + n must fit in the region
        buf.truncate(14).unwrap();
        let err = buf.truncate(15).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidArgument {
                offset: 2,
                requested: 15,
                capacity: 16
            }
        ));
        assert_eq!(buf.len(), 14);

        let err = buf.truncate(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_truncate_zero_resets_cursor() {
        let mut buf = Buffer::with_capacity(16);
        buf.write(b"abcdefgh").unwrap();
        Buf::advance(&mut buf, 5);

        buf.truncate(0).unwrap();
        assert_eq!(buf.off, 0);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn test_reset_then_write_matches_fresh_buffer() {
        let mut reused = Buffer::new();
        reused.write(&[0xFF; 200]).unwrap();
        Buf::advance(&mut reused, 17);
        reused.reset();
        reused.write(b"payload").unwrap();

        let mut fresh = Buffer::new();
        fresh.write(b"payload").unwrap();

        assert_eq!(reused.as_ref(), fresh.as_ref());
        assert_eq!(reused.len(), fresh.len());

        let (mut a, mut b) = (Vec::new(), Vec::new());
        reused.write_to(&mut a).unwrap();
        fresh.write_to(&mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_zeroize_clears_region() {
        let mut buf = Buffer::with_capacity(32);
        buf.write(&[0xAB; 32]).unwrap();
        buf.zeroize();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 32);
        assert!(buf.heap.iter().all(|b| *b == 0));

        // Stale bytes are not resurrected by extending the length
        buf.truncate(32).unwrap();
        assert_eq!(buf.as_ref(), &[0; 32]);
    }

    #[test]
    fn test_io_write() {
        let mut buf = Buffer::new();
        write!(buf, "{}-{}", 42, "answer").unwrap();
        assert_eq!(buf.as_ref(), b"42-answer");
        io::Write::flush(&mut buf).unwrap();
    }

    #[test]
    fn test_as_mut() {
        let mut buf = Buffer::new();
        buf.write(b"hello").unwrap();
        Buf::advance(&mut buf, 1);
        buf.as_mut()[0] = b'E';
        assert_eq!(buf.as_ref(), b"Ello");
    }

    /// Verify Buffer matches BytesMut semantics for the Buf trait.
    #[test]
    fn test_bytesmut_parity_buf_trait() {
        let mut bytes = BytesMut::with_capacity(100);
        bytes.put_slice(&[0xAA; 50]);

        let mut buffer = Buffer::with_capacity(100);
        buffer.put_slice(&[0xAA; 50]);

        assert_eq!(Buf::remaining(&bytes), Buf::remaining(&buffer));
        assert_eq!(Buf::chunk(&bytes), Buf::chunk(&buffer));

        Buf::advance(&mut bytes, 10);
        Buf::advance(&mut buffer, 10);
        assert_eq!(Buf::remaining(&bytes), Buf::remaining(&buffer));
        assert_eq!(Buf::chunk(&bytes), Buf::chunk(&buffer));

        assert_eq!(bytes.get_u8(), buffer.get_u8());
        assert_eq!(bytes.get_u32(), buffer.get_u32());
        assert_eq!(Buf::remaining(&bytes), Buf::remaining(&buffer));
    }

    /// Verify Buffer matches BytesMut semantics for the BufMut trait, including growth.
    #[test]
    fn test_bytesmut_parity_bufmut_trait() {
        let mut bytes = BytesMut::new();
        let mut buffer = Buffer::new();

        bytes.put_slice(b"hello");
        buffer.put_slice(b"hello");
        assert_eq!(bytes.as_ref(), buffer.as_ref());

        bytes.put_u8(0x42);
        buffer.put_u8(0x42);
        bytes.put_u64(u64::MAX - 1);
        buffer.put_u64(u64::MAX - 1);
        assert_eq!(bytes.as_ref(), buffer.as_ref());

        // Grow well past the inline region
        bytes.put_bytes(0xCD, 1000);
        buffer.put_bytes(0xCD, 1000);
        assert_eq!(bytes.as_ref(), buffer.as_ref());
        assert!(buffer.capacity() >= buffer.len());
    }

    #[test]
    #[should_panic(expected = "cannot advance past end of buffer")]
    fn test_advance_past_end() {
        let mut buf = Buffer::new();
        buf.write(b"abc").unwrap();
        Buf::advance(&mut buf, 4);
    }

    #[test]
    fn test_random_operations_match_model() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut buf = Buffer::new();
        let mut model: Vec<u8> = Vec::new();

        for _ in 0..10_000 {
            match rng.gen_range(0..5) {
                0 | 1 => {
                    let size = rng.gen_range(0..300);
                    let data: Vec<u8> = (0..size).map(|_| rng.gen()).collect();
                    assert_eq!(buf.write(&data).unwrap(), size);
                    model.extend_from_slice(&data);
                }
                2 => {
                    let mut sink = LimitedSink {
                        data: Vec::new(),
                        limit: rng.gen_range(0..400),
                    };
                    let drained = match buf.write_to(&mut sink) {
                        Ok(n) => n,
                        Err(err) => err.written().unwrap(),
                    };
                    assert_eq!(sink.data, model[..drained]);
                    model.drain(..drained);
                }
                3 => {
                    if !model.is_empty() {
                        let n = rng.gen_range(0..=model.len());
                        buf.truncate(n).unwrap();
                        if n == 0 {
                            model.clear();
                        } else {
                            model.truncate(n);
                        }
                    }
                }
                _ => {
                    let cnt = rng.gen_range(0..=model.len());
                    Buf::advance(&mut buf, cnt);
                    model.drain(..cnt);
                }
            }
            assert_eq!(buf.len(), model.len());
            assert_eq!(buf.as_ref(), model.as_slice());
            assert!(buf.off <= buf.len && buf.len <= buf.capacity());
        }
    }
}
