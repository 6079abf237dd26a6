// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-place little-endian codec primitives.
//!
//! Requests are decoded directly from the transport payload slice: string
//! and byte fields borrow from it and are valid only while the payload is.
//! Responses are encoded into the same payload slice through [`Writer`].

use core::str;

/// Codec failure. Decoding failures map to `EIO` at the handler boundary.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,
    #[error("trailing bytes after message body")]
    TrailingBytes,
    #[error("invalid utf-8 in string field")]
    InvalidUtf8,
    #[error("unknown message tag {0}")]
    UnknownTag(u32),
    #[error("value out of range")]
    OutOfRange,
}

pub type WireResult<T> = Result<T, WireError>;

/// Borrowing cursor over a request payload.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take `n` raw bytes, aliasing the underlying payload.
    pub fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(WireError::OutOfRange)?;
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes(b.try_into().expect("length checked")))
    }

    pub fn read_u32(&mut self) -> WireResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().expect("length checked")))
    }

    pub fn read_u64(&mut self) -> WireResult<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().expect("length checked")))
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> WireResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Length-prefixed byte buffer, aliasing the payload.
    pub fn read_bytes(&mut self) -> WireResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Length-prefixed UTF-8 string, aliasing the payload.
    pub fn read_str(&mut self) -> WireResult<&'a str> {
        let raw = self.read_bytes()?;
        str::from_utf8(raw).map_err(|_| WireError::InvalidUtf8)
    }

    /// Checked-unmarshal discipline: the message must consume the payload
    /// exactly; anything left over fails the request.
    pub fn finish(self) -> WireResult<()> {
        if self.remaining() != 0 {
            return Err(WireError::TrailingBytes);
        }
        Ok(())
    }
}

/// Cursor writing a response into the payload slice.
#[derive(Debug)]
pub struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn reserve(&mut self, n: usize) -> WireResult<&mut [u8]> {
        let end = self.pos.checked_add(n).ok_or(WireError::OutOfRange)?;
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let out = &mut self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn put_u8(&mut self, v: u8) -> WireResult<()> {
        self.reserve(1)?[0] = v;
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> WireResult<()> {
        self.reserve(2)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> WireResult<()> {
        self.reserve(4)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn put_u64(&mut self, v: u64) -> WireResult<()> {
        self.reserve(8)?.copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn put_i32(&mut self, v: i32) -> WireResult<()> {
        self.put_u32(v as u32)
    }

    pub fn put_i64(&mut self, v: i64) -> WireResult<()> {
        self.put_u64(v as u64)
    }

    pub fn put_raw(&mut self, data: &[u8]) -> WireResult<()> {
        self.reserve(data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Length-prefixed byte buffer.
    pub fn put_bytes(&mut self, data: &[u8]) -> WireResult<()> {
        let len: u32 = data.len().try_into().map_err(|_| WireError::OutOfRange)?;
        self.put_u32(len)?;
        self.put_raw(data)
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, s: &str) -> WireResult<()> {
        self.put_bytes(s.as_bytes())
    }

    /// Overwrite a previously reserved range. Used by incremental encoders
    /// that write a metadata prefix after producing the variable body.
    pub fn patch_u32_at(&mut self, offset: usize, v: u32) -> WireResult<()> {
        let end = offset.checked_add(4).ok_or(WireError::OutOfRange)?;
        if end > self.pos {
            return Err(WireError::Truncated);
        }
        self.buf[offset..end].copy_from_slice(&v.to_le_bytes());
        Ok(())
    }

    pub fn patch_u8_at(&mut self, offset: usize, v: u8) -> WireResult<()> {
        if offset >= self.pos {
            return Err(WireError::Truncated);
        }
        self.buf[offset] = v;
        Ok(())
    }
}

/// Wire size of a length-prefixed string or byte buffer.
pub fn sized_len(data_len: usize) -> usize {
    4 + data_len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_past_end_is_truncated() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.read_u32(), Err(WireError::Truncated));
    }

    #[test]
    fn strings_alias_the_payload() {
        let mut buf = vec![0u8; 16];
        {
            let mut w = Writer::new(&mut buf);
            w.put_str("hosts").unwrap();
        }
        let mut r = Reader::new(&buf);
        let s = r.read_str().unwrap();
        assert_eq!(s, "hosts");
        assert_eq!(s.as_ptr(), buf[4..].as_ptr());
    }

    #[test]
    fn finish_rejects_trailing_bytes() {
        let mut r = Reader::new(&[7, 0, 0, 0, 9]);
        assert_eq!(r.read_u32().unwrap(), 7);
        assert_eq!(r.finish(), Err(WireError::TrailingBytes));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let buf = [2u8, 0, 0, 0, 0xfe, 0xff];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_str(), Err(WireError::InvalidUtf8));
    }

    #[test]
    fn writer_rejects_overflow() {
        let mut buf = [0u8; 3];
        let mut w = Writer::new(&mut buf);
        assert_eq!(w.put_u32(1), Err(WireError::Truncated));
    }

    #[test]
    fn patch_fills_reserved_prefix() {
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        w.put_u32(0).unwrap();
        w.put_u32(0xdead_beef).unwrap();
        w.patch_u32_at(0, 2).unwrap();
        assert_eq!(&buf[..4], &2u32.to_le_bytes());
    }
}
