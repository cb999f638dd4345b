use bytes::{Buf as _, Bytes};
use num_bigint_dig::BigUint;
use std::str;
use crate::{Error, Result};

/// Decoder of SSH payloads (RFC 4251, section 5).
///
/// Every getter fails with [`Error::Decode`] when the payload is truncated.
#[derive(Debug)]
pub struct PacketDecode {
    orig_buf: Bytes,
    buf: Bytes,
}

impl PacketDecode {
    /// Wraps the bytes into [`PacketDecode`].
    pub fn new(buf: Bytes) -> PacketDecode {
        PacketDecode { orig_buf: buf.clone(), buf }
    }

    /// Decode a `byte`.
    pub fn get_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Decode a `boolean`.
    pub fn get_bool(&mut self) -> Result<bool> {
        self.get_u8().map(|x| x != 0)
    }

    /// Decode a `uint32`.
    pub fn get_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Decode a `string` of arbitrary bytes.
    pub fn get_bytes(&mut self) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Decode a `string` that must have exactly `N` bytes.
    pub fn get_byte_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.get_bytes()?;
        bytes.as_ref().try_into().map_err(|_| Error::Decode("wrong size of `string`"))
    }

    /// Decode a `string` in UTF-8.
    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        match str::from_utf8(&bytes) {
            Ok(string) => Ok(string.into()),
            Err(_) => Err(Error::Decode("string is not valid utf-8")),
        }
    }

    /// Decode a `name-list`.
    pub fn get_name_list(&mut self) -> Result<Vec<String>> {
        let list = self.get_string()?;
        if list.is_empty() {
            return Ok(Vec::new())
        }
        Ok(list.split(',').map(String::from).collect())
    }

    /// Decode a non-negative `mpint`.
    pub fn get_biguint(&mut self) -> Result<BigUint> {
        let bytes = self.get_bytes()?;
        if bytes.first().map_or(false, |&b| b >= 0x80) {
            return Err(Error::Decode("expected a non-negative mpint"))
        }
        Ok(BigUint::from_bytes_be(&bytes))
    }

    /// Skip `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }

    /// Read `len` raw bytes.
    pub fn get_raw(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    fn ensure(&self, min_remaining: usize) -> Result<()> {
        if min_remaining <= self.buf.remaining() {
            Ok(())
        } else {
            Err(Error::Decode("unexpected end of packet"))
        }
    }

    /// The bytes originally given to [`PacketDecode::new()`].
    pub fn as_original_bytes(&self) -> &[u8] {
        &self.orig_buf
    }

    /// The bytes that were not decoded yet.
    pub fn remaining(&self) -> Bytes {
        self.buf.clone()
    }

    /// Number of bytes that were not decoded yet.
    pub fn remaining_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<D: AsRef<[u8]> + ?Sized>(data: &D) -> PacketDecode {
        PacketDecode::new(Bytes::copy_from_slice(data.as_ref()))
    }

    #[test]
    fn test_get_u32() {
        let mut d = decode(&[0,0,0,42, 0xde,0xad,0xbe,0xef]);
        assert_eq!(d.get_u32().unwrap(), 42);
        assert_eq!(d.get_u32().unwrap(), 0xdeadbeef);
        assert_eq!(d.remaining_len(), 0);

        let mut d = decode(&[0xde,0xad]);
        assert!(matches!(d.get_u32(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_get_bytes() {
        let mut d = decode(&[0,0,0,2, 10,20]);
        assert_eq!(d.get_bytes().unwrap().as_ref(), &[10,20]);

        let mut d = decode(&[0,0,0,8, 10,20,30]);
        assert!(d.get_bytes().is_err());
    }

    #[test]
    fn test_get_byte_array() {
        let mut d = decode(&[0,0,0,2, 1,2, 0,0,0,1, 9]);
        assert_eq!(d.get_byte_array::<2>().unwrap(), [1, 2]);
        assert!(d.get_byte_array::<2>().is_err());
    }

    #[test]
    fn test_get_name_list() {
        let mut d = decode(&b"\x00\x00\x00\x00"[..]);
        assert_eq!(d.get_name_list().unwrap(), Vec::<String>::new());

        let mut d = decode(&b"\x00\x00\x00\x09zlib,none"[..]);
        assert_eq!(d.get_name_list().unwrap(), vec!["zlib", "none"]);

        let mut d = decode(&b"\x00\x00\x00\x05zlib,"[..]);
        assert_eq!(d.get_name_list().unwrap(), vec!["zlib", ""]);
    }

    #[test]
    fn test_get_biguint() {
        let mut d = decode(&[0,0,0,3, 0,0x80,1, 0,0,0,0]);
        assert_eq!(d.get_biguint().unwrap(), BigUint::from(0x8001u32));
        assert_eq!(d.get_biguint().unwrap(), BigUint::from(0u32));

        let mut d = decode(&[0,0,0,1, 0xff]);
        assert!(d.get_biguint().is_err());
    }
}
