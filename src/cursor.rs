//! Bounds-checked views over an in-memory buffer
//!
//! [`ByteCursor`] reads sequentially (with random repositioning) and never reads past the
//! end of its slice: every multi-byte read names its endianness through a
//! [`byteorder::ByteOrder`] type parameter and fails with [`Error::Truncated`] instead of
//! panicking. [`PatchCursor`] is the write-side twin used to patch fixed-width fields in
//! place (TIFF offsets, chunk-offset tables, flag bytes).

use crate::error::{Error, Result};
use byteorder::ByteOrder;

/// Sequential reader over a borrowed byte slice
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    /// Absolute offset of `data[0]` within the original file, for diagnostics
    base: u64,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }

    /// Cursor over a slice that starts at `base` in the enclosing file
    pub fn with_base(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    /// Position relative to the start of this cursor's slice
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Position within the original file
    pub fn absolute_position(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(self.truncated(pos - self.pos));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn truncated(&self, needed: usize) -> Error {
        Error::Truncated {
            offset: self.absolute_position(),
            needed: needed as u64,
            available: self.remaining() as u64,
        }
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(self.truncated(n))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16<B: ByteOrder>(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let v = B::read_u16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u24<B: ByteOrder>(&mut self) -> Result<u32> {
        self.ensure(3)?;
        let v = B::read_u24(&self.data[self.pos..]);
        self.pos += 3;
        Ok(v)
    }

    pub fn read_u32<B: ByteOrder>(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let v = B::read_u32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64<B: ByteOrder>(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let v = B::read_u64(&self.data[self.pos..]);
        self.pos += 8;
        Ok(v)
    }

    pub fn read_i16<B: ByteOrder>(&mut self) -> Result<i16> {
        self.ensure(2)?;
        let v = B::read_i16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_f64<B: ByteOrder>(&mut self) -> Result<f64> {
        self.ensure(8)?;
        let v = B::read_f64(&self.data[self.pos..]);
        self.pos += 8;
        Ok(v)
    }

    /// Borrow the next `n` bytes and advance past them
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Borrow the next `n` bytes without advancing
    pub fn peek_bytes(&self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Consume and return everything up to the end of the slice
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Split off a bounded cursor over the next `n` bytes and advance past them
    pub fn sub_cursor(&mut self, n: usize) -> Result<ByteCursor<'a>> {
        let base = self.absolute_position();
        let slice = self.read_bytes(n)?;
        Ok(ByteCursor::with_base(slice, base))
    }

    /// Read bytes up to (not including) the next NUL and skip the NUL.
    ///
    /// A missing terminator consumes the rest of the slice.
    pub fn read_nul_terminated(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(n) => {
                self.pos += n + 1;
                &rest[..n]
            }
            None => {
                self.pos = self.data.len();
                rest
            }
        }
    }
}

/// In-place writer over a mutable byte slice
#[derive(Debug)]
pub struct PatchCursor<'a> {
    data: &'a mut [u8],
    pos: usize,
}

impl<'a> PatchCursor<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(self.truncated(pos.saturating_sub(self.pos)));
        }
        self.pos = pos;
        Ok(())
    }

    fn truncated(&self, needed: usize) -> Error {
        Error::Truncated {
            offset: self.pos as u64,
            needed: needed as u64,
            available: (self.data.len() - self.pos) as u64,
        }
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if self.data.len() - self.pos < n {
            Err(self.truncated(n))
        } else {
            Ok(())
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16<B: ByteOrder>(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let v = B::read_u16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32<B: ByteOrder>(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let v = B::read_u32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64<B: ByteOrder>(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let v = B::read_u64(&self.data[self.pos..]);
        self.pos += 8;
        Ok(v)
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.ensure(1)?;
        self.data[self.pos] = v;
        self.pos += 1;
        Ok(())
    }

    pub fn write_u16<B: ByteOrder>(&mut self, v: u16) -> Result<()> {
        self.ensure(2)?;
        B::write_u16(&mut self.data[self.pos..], v);
        self.pos += 2;
        Ok(())
    }

    pub fn write_u32<B: ByteOrder>(&mut self, v: u32) -> Result<()> {
        self.ensure(4)?;
        B::write_u32(&mut self.data[self.pos..], v);
        self.pos += 4;
        Ok(())
    }

    pub fn write_u64<B: ByteOrder>(&mut self, v: u64) -> Result<()> {
        self.ensure(8)?;
        B::write_u64(&mut self.data[self.pos..], v);
        self.pos += 8;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.data[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Overwrite the next `n` bytes with zeros
    pub fn zero(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.data[self.pos..self.pos + n].fill(0);
        self.pos += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    #[test]
    fn test_reads_declare_endianness() {
        let data = [0x12, 0x34, 0x56, 0x78];
        let mut be = ByteCursor::new(&data);
        assert_eq!(be.read_u32::<BigEndian>().unwrap(), 0x12345678);
        let mut le = ByteCursor::new(&data);
        assert_eq!(le.read_u16::<LittleEndian>().unwrap(), 0x3412);
        assert_eq!(le.read_u16::<LittleEndian>().unwrap(), 0x7856);
        assert!(le.at_end());
    }

    #[test]
    fn test_truncated_reports_offset() {
        let data = [0u8; 3];
        let mut cursor = ByteCursor::with_base(&data, 100);
        cursor.skip(1).unwrap();
        match cursor.read_u32::<BigEndian>() {
            Err(Error::Truncated {
                offset,
                needed,
                available,
            }) => {
                assert_eq!(offset, 101);
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("expected Truncated, got {:?}", other),
        }
        // A failed read does not move the cursor
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_sub_cursor_is_bounded() {
        let data = [1, 2, 3, 4, 5];
        let mut cursor = ByteCursor::new(&data);
        cursor.skip(1).unwrap();
        let mut sub = cursor.sub_cursor(2).unwrap();
        assert_eq!(sub.absolute_position(), 1);
        assert_eq!(sub.read_bytes(2).unwrap(), &[2, 3]);
        assert!(sub.read_u8().is_err());
        assert_eq!(cursor.read_u8().unwrap(), 4);
    }

    #[test]
    fn test_nul_terminated() {
        let data = b"key\0value";
        let mut cursor = ByteCursor::new(data);
        assert_eq!(cursor.read_nul_terminated(), b"key");
        assert_eq!(cursor.read_nul_terminated(), b"value");
        assert!(cursor.at_end());
    }

    #[test]
    fn test_patch_cursor() {
        let mut data = [0u8; 6];
        let mut patch = PatchCursor::new(&mut data);
        patch.set_position(2).unwrap();
        patch.write_u32::<BigEndian>(0xDEADBEEF).unwrap();
        assert!(patch.write_u8(0).is_err());
        assert_eq!(data, [0, 0, 0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
