//! Encoding utilities for variable-length integers and length-prefixed slices.
//!
//! Encoders append to a `BytesMut`; decoding goes through [`Decoder`], a cursor
//! over a borrowed slice that reports truncation as corruption.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Maximum bytes needed to encode a varint64.
pub const MAX_VARINT64_LEN: usize = 10;

/// Encode a 32-bit unsigned integer as a varint.
pub fn encode_varint32(buf: &mut BytesMut, value: u32) {
    encode_varint64(buf, value as u64);
}

/// Encode a 64-bit unsigned integer as a varint.
pub fn encode_varint64(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Get the number of bytes needed to encode a varint.
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Encode a length-prefixed byte slice.
pub fn encode_length_prefixed(buf: &mut BytesMut, data: &[u8]) {
    encode_varint64(buf, data.len() as u64);
    buf.put_slice(data);
}

/// Cursor for decoding the formats produced above.
///
/// `what` names the structure being decoded and ends up in error messages.
pub struct Decoder<'a> {
    data: &'a [u8],
    what: &'static str,
}

impl<'a> Decoder<'a> {
    /// Start decoding `data`.
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, what }
    }

    /// Whether all input has been consumed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to decode.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    fn truncated(&self, field: &str) -> Error {
        Error::corruption(format!("{}: truncated {}", self.what, field))
    }

    /// Read one byte.
    pub fn u8(&mut self, field: &str) -> Result<u8> {
        if self.data.is_empty() {
            return Err(self.truncated(field));
        }
        Ok(self.data.get_u8())
    }

    /// Read a fixed 32-bit little-endian integer.
    pub fn fixed32(&mut self, field: &str) -> Result<u32> {
        if self.data.len() < 4 {
            return Err(self.truncated(field));
        }
        Ok(self.data.get_u32_le())
    }

    /// Read a fixed 64-bit little-endian integer.
    pub fn fixed64(&mut self, field: &str) -> Result<u64> {
        if self.data.len() < 8 {
            return Err(self.truncated(field));
        }
        Ok(self.data.get_u64_le())
    }

    /// Read a varint64.
    pub fn varint64(&mut self, field: &str) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;

        for _ in 0..MAX_VARINT64_LEN {
            if self.data.is_empty() {
                return Err(self.truncated(field));
            }
            let byte = self.data.get_u8();
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }

        Err(Error::corruption(format!(
            "{}: varint overflow in {}",
            self.what, field
        )))
    }

    /// Read a varint that must fit in 32 bits.
    pub fn varint32(&mut self, field: &str) -> Result<u32> {
        let value = self.varint64(field)?;
        u32::try_from(value).map_err(|_| {
            Error::corruption(format!("{}: {} out of range", self.what, field))
        })
    }

    /// Read a length-prefixed byte slice.
    pub fn length_prefixed(&mut self, field: &str) -> Result<Bytes> {
        let len = self.varint64(field)? as usize;
        if self.data.len() < len {
            return Err(self.truncated(field));
        }
        let out = Bytes::copy_from_slice(&self.data[..len]);
        self.data.advance(len);
        Ok(out)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self, field: &str) -> Result<String> {
        let raw = self.length_prefixed(field)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::corruption(format!("{}: {} is not UTF-8", self.what, field)))
    }
}
