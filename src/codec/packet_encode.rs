use bytes::{BufMut as _, Bytes, BytesMut};
use num_bigint_dig::BigUint;

/// Encoder of SSH payloads (RFC 4251, section 5).
///
/// All integers are big endian, `string` is prefixed with its `uint32` length.
#[derive(Debug, Clone)]
pub struct PacketEncode {
    buf: BytesMut,
}

impl PacketEncode {
    /// Creates an empty [`PacketEncode`].
    pub fn new() -> PacketEncode {
        PacketEncode { buf: BytesMut::new() }
    }

    /// Starts a new payload with the given message number.
    pub fn with_msg(msg_id: u8) -> PacketEncode {
        let mut this = Self::new();
        this.put_u8(msg_id);
        this
    }

    /// Encode a `byte`.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Encode a `boolean`.
    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    /// Encode a `uint32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Encode a `string` of arbitrary bytes.
    pub fn put_bytes(&mut self, value: &[u8]) {
        self.buf.reserve(4 + value.len());
        self.buf.put_u32(value.len().try_into().expect("string too long"));
        self.buf.put_slice(value);
    }

    /// Encode a `string` in UTF-8.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes())
    }

    /// Encode a `name-list`.
    pub fn put_name_list<S: AsRef<str>>(&mut self, names: &[S]) {
        let joined = names.iter().map(|name| name.as_ref()).collect::<Vec<_>>().join(",");
        self.put_str(&joined);
    }

    /// Encode a non-negative `mpint`.
    pub fn put_biguint(&mut self, value: &BigUint) {
        let bytes_vec = value.to_bytes_be();
        let mut bytes = bytes_vec.as_slice();
        while let [0, rest @ ..] = bytes {
            bytes = rest;
        }

        if bytes.first().map_or(false, |&b| b >= 0x80) {
            self.buf.put_u32(bytes.len() as u32 + 1);
            self.buf.put_u8(0);
        } else {
            self.buf.put_u32(bytes.len() as u32);
        }
        self.buf.put_slice(bytes);
    }

    /// Encode an unsigned big endian scalar as `mpint`.
    pub fn put_scalar(&mut self, digits_be: &[u8]) {
        self.put_biguint(&BigUint::from_bytes_be(digits_be))
    }

    /// Append raw bytes to the buffer.
    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Unwraps the internal bytes.
    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    /// Unwraps and freezes the internal bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for PacketEncode {
    fn default() -> Self { Self::new() }
}
