//! Guest memory access.
//!
//! The emulator owns address translation; the engine only sees a
//! `read(addr, buf)` primitive. Reads are single-attempt: a failure is
//! reported to the caller immediately and never retried, so an unmapped
//! page can never stall the dispatch path.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use axerrno::AxResult;

use crate::error::{Error, Result};

/// Guest pages are read in chunks that never cross this boundary.
const PAGE_SIZE: u64 = 0x1000;

/// Raw guest-memory read primitive supplied by the host emulator.
pub trait GuestMemory {
    /// Fill `buf` with the bytes at guest virtual address `addr`.
    fn read(&self, addr: u64, buf: &mut [u8]) -> AxResult<()>;
}

impl<T: GuestMemory + ?Sized> GuestMemory for &T {
    fn read(&self, addr: u64, buf: &mut [u8]) -> AxResult<()> {
        (**self).read(addr, buf)
    }
}

/// Interpret a little-endian byte buffer as an unsigned integer.
///
/// Only the first 8 bytes participate.
pub fn bytes_to_uint(buf: &[u8]) -> u64 {
    buf.iter()
        .take(8)
        .rev()
        .fold(0u64, |val, &b| (val << 8) | b as u64)
}

/// Typed reader over a `GuestMemory` backend.
pub struct GuestReader<'a, M: ?Sized> {
    mem: &'a M,
}

impl<'a, M: GuestMemory + ?Sized> GuestReader<'a, M> {
    pub fn new(mem: &'a M) -> Self {
        Self { mem }
    }

    /// Read exactly `buf.len()` bytes or fail with `Unreadable`.
    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        self.mem.read(addr, buf).map_err(|e| {
            log::trace!("guest read {:#x}+{} failed: {:?}", addr, len, e);
            Error::Unreadable { addr, len }
        })
    }

    pub fn read_array<const N: usize>(&self, addr: u64) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_bytes(addr, &mut buf)?;
        Ok(buf)
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32> {
        self.read_array::<4>(addr).map(|b| bytes_to_uint(&b) as u32)
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        self.read_array::<8>(addr).map(|b| bytes_to_uint(&b))
    }

    /// Read a guest pointer (64-bit guest).
    #[inline]
    pub fn read_ptr(&self, addr: u64) -> Result<u64> {
        self.read_u64(addr)
    }

    /// Read a NUL-terminated string of at most `max` bytes.
    ///
    /// Returns the bytes before the terminator and whether the string was
    /// cut at `max`. Reads proceed page by page so a string ending just
    /// before an unmapped page is still readable. `max == 0` reads nothing and
    /// is not a truncation.
    pub fn read_c_string(&self, addr: u64, max: usize) -> Result<(Vec<u8>, bool)> {
        if max == 0 {
            return Ok((Vec::new(), false));
        }
        let mut out = Vec::new();
        let mut cur = addr;

        while out.len() < max {
            let to_page_end = (PAGE_SIZE - (cur % PAGE_SIZE)) as usize;
            let chunk_len = to_page_end.min(max - out.len());
            let mut chunk = vec![0u8; chunk_len];
            self.read_bytes(cur, &mut chunk)?;

            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok((out, false));
            }
            out.extend_from_slice(&chunk);
            cur = cur.wrapping_add(chunk_len as u64);
        }

        Ok((out, true))
    }

    /// Read `min(len, max)` bytes; the flag reports truncation.
    pub fn read_buffer(&self, addr: u64, len: u64, max: usize) -> Result<(Vec<u8>, bool)> {
        let take = (len.min(max as u64)) as usize;
        let mut buf = vec![0u8; take];
        self.read_bytes(addr, &mut buf)?;
        Ok((buf, len > max as u64))
    }
}

// =============================================================================
// Sparse guest image
// =============================================================================

/// Guest memory image built from discrete regions.
///
/// Backs offline analysis of captured guest memory and the test suite. A
/// read succeeds only if every requested byte lies inside some region.
#[derive(Debug, Default, Clone)]
pub struct SparseMemory {
    regions: BTreeMap<u64, Vec<u8>>,
}

impl SparseMemory {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    /// Map `data` at `addr`, replacing any region starting at the same address.
    pub fn map(&mut self, addr: u64, data: Vec<u8>) {
        self.regions.insert(addr, data);
    }

    /// Map a zero-filled region.
    pub fn map_zeroed(&mut self, addr: u64, len: usize) {
        self.map(addr, vec![0u8; len]);
    }

    /// Remove the region starting at `addr`.
    pub fn unmap(&mut self, addr: u64) -> Option<Vec<u8>> {
        self.regions.remove(&addr)
    }

    /// Write into already-mapped memory.
    ///
    /// Returns false, leaving the image unchanged, if any byte is unmapped.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> bool {
        let mapped = (0..data.len()).all(|i| self.byte(addr.wrapping_add(i as u64)).is_some());
        if !mapped {
            return false;
        }
        for (i, &b) in data.iter().enumerate() {
            match self.byte_mut(addr.wrapping_add(i as u64)) {
                Some(slot) => *slot = b,
                None => return false,
            }
        }
        true
    }

    pub fn write_u32(&mut self, addr: u64, val: u32) -> bool {
        self.write(addr, &val.to_le_bytes())
    }

    pub fn write_u64(&mut self, addr: u64, val: u64) -> bool {
        self.write(addr, &val.to_le_bytes())
    }

    fn byte(&self, addr: u64) -> Option<u8> {
        let (base, data) = self.regions.range(..=addr).next_back()?;
        data.get((addr - base) as usize).copied()
    }

    fn byte_mut(&mut self, addr: u64) -> Option<&mut u8> {
        let (base, data) = self.regions.range_mut(..=addr).next_back()?;
        data.get_mut((addr - *base) as usize)
    }
}

impl GuestMemory for SparseMemory {
    fn read(&self, addr: u64, buf: &mut [u8]) -> AxResult<()> {
        for (i, slot) in buf.iter_mut().enumerate() {
            match self.byte(addr.wrapping_add(i as u64)) {
                Some(b) => *slot = b,
                None => return axerrno::ax_err!(NotFound, "guest address not mapped"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_uint_is_little_endian() {
        assert_eq!(bytes_to_uint(&[0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(bytes_to_uint(&[0xff]), 0xff);
        assert_eq!(bytes_to_uint(&[]), 0);
        assert_eq!(
            bytes_to_uint(&[1, 0, 0, 0, 0, 0, 0, 0x80]),
            0x8000_0000_0000_0001
        );
    }

    #[test]
    fn sparse_read_requires_every_byte_mapped() {
        let mut mem = SparseMemory::new();
        mem.map(0x1000, vec![1, 2, 3, 4]);
        let reader = GuestReader::new(&mem);

        assert_eq!(reader.read_array::<4>(0x1000).unwrap(), [1, 2, 3, 4]);
        assert!(matches!(
            reader.read_array::<4>(0x1002),
            Err(Error::Unreadable { addr: 0x1002, len: 4 })
        ));
    }

    #[test]
    fn sparse_read_spans_adjacent_regions() {
        let mut mem = SparseMemory::new();
        mem.map(0x1000, vec![0x11; 4]);
        mem.map(0x1004, vec![0x22; 4]);
        let reader = GuestReader::new(&mem);
        assert_eq!(reader.read_u64(0x1000).unwrap(), 0x2222_2222_1111_1111);
    }

    #[test]
    fn c_string_stops_at_nul() {
        let mut mem = SparseMemory::new();
        mem.map_zeroed(0x2000, 0x1000);
        mem.write(0x2000, b"hello\0world");
        let reader = GuestReader::new(&mem);
        let (s, truncated) = reader.read_c_string(0x2000, 64).unwrap();
        assert_eq!(s, b"hello");
        assert!(!truncated);
    }

    #[test]
    fn c_string_truncates_at_max() {
        let mut mem = SparseMemory::new();
        mem.map(0x2000, b"abcdefgh".to_vec());
        let reader = GuestReader::new(&mem);
        let (s, truncated) = reader.read_c_string(0x2000, 4).unwrap();
        assert_eq!(s, b"abcd");
        assert!(truncated);
    }

    #[test]
    fn c_string_does_not_touch_next_page_after_nul() {
        let mut mem = SparseMemory::new();
        // String ends right before an unmapped page.
        mem.map(0x2ffc, b"abc\0".to_vec());
        let reader = GuestReader::new(&mem);
        let (s, _) = reader.read_c_string(0x2ffc, 256).unwrap();
        assert_eq!(s, b"abc");
    }

    #[test]
    fn c_string_fails_when_unterminated_into_unmapped_page() {
        let mut mem = SparseMemory::new();
        mem.map(0x2ffc, b"abcd".to_vec());
        let reader = GuestReader::new(&mem);
        assert!(reader.read_c_string(0x2ffc, 256).is_err());
    }

    #[test]
    fn write_rejects_unmapped_bytes() {
        let mut mem = SparseMemory::new();
        mem.map_zeroed(0x3000, 8);
        assert!(mem.write_u64(0x3000, 0xdead_beef));
        assert!(!mem.write_u64(0x3004, u64::MAX));
        let reader = GuestReader::new(&mem);
        assert_eq!(reader.read_u32(0x3000).unwrap(), 0xdead_beef);
        // The mapped half of a failed write is left untouched.
        assert_eq!(reader.read_u32(0x3004).unwrap(), 0);
    }

    #[test]
    fn c_string_with_zero_max_is_not_truncated() {
        // Nothing mapped: a zero-length read must not touch memory either.
        let mem = SparseMemory::new();
        let reader = GuestReader::new(&mem);
        let (s, truncated) = reader.read_c_string(0x2000, 0).unwrap();
        assert!(s.is_empty());
        assert!(!truncated);
    }
}
