use bytes::{Bytes, BytesMut};
use crate::{Error, Result};
use crate::cipher::{self, PacketDecrypt};
use crate::compress::Decompress;
use crate::mac::{self, MacVerified};
use super::MAX_PACKET_LEN;

/// Incoming half of the binary packet protocol (RFC 4253, section 6).
///
/// Bytes from the socket are appended to [`feed_buf()`][Self::feed_buf] and packets are taken out
/// with [`consume_packet()`][Self::consume_packet]. The decryption state can be replaced between
/// two packets, which is how new keys take effect exactly after `SSH_MSG_NEWKEYS`.
pub(crate) struct RecvPipe {
    buf: BytesMut,
    state: State,
    decrypt: PacketDecrypt,
    decompress: Option<Box<dyn Decompress + Send>>,
    block_len: usize,
    tag_len: usize,
    packet_seq: u32,
    bytes_since_keys: u64,
    packets_since_keys: u64,
}

#[derive(Debug, Copy, Clone)]
enum State {
    Ready,
    ScanningLine { pos: usize },
    DecryptedLen { packet_len: usize },
}

#[derive(Debug)]
pub(crate) struct RecvPacket {
    pub payload: Bytes,
    pub packet_seq: u32,
}

impl RecvPipe {
    pub fn new() -> RecvPipe {
        RecvPipe {
            buf: BytesMut::new(),
            state: State::Ready,
            decrypt: PacketDecrypt::EncryptAndMac(Box::new(cipher::Identity), Box::new(mac::Empty)),
            decompress: None,
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            bytes_since_keys: 0,
            packets_since_keys: 0,
        }
    }

    /// Buffer for reading more bytes from the stream, with room for at least one read.
    pub fn feed_buf(&mut self) -> &mut BytesMut {
        self.buf.reserve(4096);
        &mut self.buf
    }

    /// Consumes lines until the version line is found (RFC 4253, section 4.2).
    pub fn consume_ident(&mut self) -> Result<Option<Bytes>> {
        loop {
            let line = match self.consume_line()? {
                Some(line) => line,
                None => return Ok(None),
            };

            if line.len() > 255 {
                return Err(Error::Protocol("received line before identification is too long"))
            }
            if line.starts_with(b"SSH-") {
                return Ok(Some(line));
            }
            log::debug!("ignoring line before identification: {:?}", String::from_utf8_lossy(&line));
        }
    }

    fn consume_line(&mut self) -> Result<Option<Bytes>> {
        let mut pos = match self.state {
            State::Ready => 0,
            State::ScanningLine { pos } => pos,
            State::DecryptedLen { .. } =>
                return Err(Error::Protocol("identification requested in the middle of a packet")),
        };

        let mut line_len = None;
        while pos < self.buf.len() {
            if self.buf[pos] == b'\n' {
                let end = if pos > 0 && self.buf[pos - 1] == b'\r' { pos - 1 } else { pos };
                line_len = Some(end);
                pos += 1;
                break
            }
            pos += 1;
        }

        match line_len {
            Some(line_len) => {
                self.state = State::Ready;
                let mut line = self.buf.split_to(pos).freeze();
                line.truncate(line_len);
                Ok(Some(line))
            },
            None if pos > 2 * 255 => Err(Error::Protocol("received identification string is too long")),
            None => {
                self.state = State::ScanningLine { pos };
                Ok(None)
            },
        }
    }

    pub fn consume_packet(&mut self) -> Result<Option<RecvPacket>> {
        let packet_len = match self.state {
            State::Ready => {
                let packet_len = match self.decrypt_packet_len()? {
                    Some(packet_len) => packet_len as usize,
                    None => return Ok(None),
                };

                if packet_len > MAX_PACKET_LEN {
                    return Err(Error::Protocol("invalid packet length (too long, probably invalid)"));
                } else if packet_len < 5 {
                    return Err(Error::Protocol("invalid packet length (too short)"));
                }

                let aligned_len = if self.decrypt.len_is_unaligned() { packet_len } else { 4 + packet_len };
                if aligned_len % self.block_len != 0 {
                    return Err(Error::Protocol("invalid packet length (not aligned to cipher block length)"));
                }

                log::trace!("decrypted packet len {}", packet_len);
                self.state = State::DecryptedLen { packet_len };
                packet_len
            },
            State::DecryptedLen { packet_len } => packet_len,
            State::ScanningLine { .. } =>
                return Err(Error::Protocol("packet requested in the middle of identification")),
        };

        let total_len = 4 + packet_len + self.tag_len;
        if self.buf.len() < total_len {
            self.buf.reserve(total_len - self.buf.len());
            return Ok(None)
        }

        let mut packet = self.buf.split_to(total_len);
        let _verified: MacVerified = self.decrypt_packet_body(&mut packet, packet_len)?;

        let padding_len = packet[4] as usize;
        if padding_len < 4 || packet_len < 1 + padding_len {
            return Err(Error::Protocol("invalid packet length (too short for given padding)"));
        }

        let payload_len = packet_len - padding_len - 1;
        let mut payload = packet.freeze().slice(5..(5 + payload_len));
        if let Some(decompress) = self.decompress.as_mut() {
            payload = decompress.decompress(&payload)?;
        }

        let packet_seq = self.packet_seq;
        self.packet_seq = self.packet_seq.wrapping_add(1);
        self.bytes_since_keys += total_len as u64;
        self.packets_since_keys += 1;
        self.state = State::Ready;
        Ok(Some(RecvPacket { payload, packet_seq }))
    }

    fn decrypt_packet_len(&mut self) -> Result<Option<u32>> {
        Ok(Some(match self.decrypt {
            PacketDecrypt::EncryptAndMac(ref mut decrypt, _) => {
                // the first block is decrypted in place, the rest waits for the whole packet
                if self.buf.len() < self.block_len { return Ok(None) }
                decrypt.decrypt(&mut self.buf[..self.block_len]);
                read_u32(&self.buf)
            },
            PacketDecrypt::EncryptThenMac(..) => {
                if self.buf.len() < 4 { return Ok(None) }
                read_u32(&self.buf)
            },
            PacketDecrypt::Aead(ref mut aead) => {
                if self.buf.len() < 4 { return Ok(None) }
                let len = aead.decrypt_packet_len(self.packet_seq, &[self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                u32::from_be_bytes(len)
            },
        }))
    }

    fn decrypt_packet_body(&mut self, packet: &mut [u8], packet_len: usize) -> Result<MacVerified> {
        let (packet, tag) = packet.split_at_mut(4 + packet_len);
        match self.decrypt {
            PacketDecrypt::EncryptAndMac(ref mut decrypt, ref mut mac) => {
                decrypt.decrypt(&mut packet[self.block_len..]);
                mac.verify(self.packet_seq, packet, tag)
            },
            PacketDecrypt::EncryptThenMac(ref mut decrypt, ref mut mac) => {
                let verified = mac.verify(self.packet_seq, packet, tag)?;
                decrypt.decrypt(&mut packet[4..]);
                Ok(verified)
            },
            PacketDecrypt::Aead(ref mut aead) =>
                aead.decrypt_and_verify(self.packet_seq, packet, tag),
        }
    }

    /// Switches to new keys. Must be called between two packets.
    pub fn set_decrypt(&mut self, decrypt: PacketDecrypt, block_len: usize, tag_len: usize) {
        debug_assert!(matches!(self.state, State::Ready));
        self.decrypt = decrypt;
        self.block_len = block_len.max(8);
        self.tag_len = tag_len;
        self.bytes_since_keys = 0;
        self.packets_since_keys = 0;
    }

    pub fn set_decompress(&mut self, decompress: Option<Box<dyn Decompress + Send>>) {
        self.decompress = decompress;
    }

    pub fn bytes_since_keys(&self) -> u64 {
        self.bytes_since_keys
    }

    pub fn packets_since_keys(&self) -> u64 {
        self.packets_since_keys
    }
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

#[cfg(test)]
mod tests {
    use rand::{Rng as _, RngCore, SeedableRng as _};
    use crate::mac::Mac;
    use super::*;

    fn make_rng() -> Box<dyn RngCore> {
        Box::new(rand_chacha::ChaCha8Rng::seed_from_u64(42))
    }

    fn b<D: AsRef<[u8]> + ?Sized>(data: &D) -> Bytes {
        Bytes::copy_from_slice(data.as_ref())
    }

    /// Feeds `data` in random chunks, checking the pipe after every chunk and at the end.
    fn check_feeding<F0, F1, F2>(data: &[u8], mut prepare: F0, mut before: F1, mut after: F2)
        where F0: FnMut(&mut RecvPipe),
              F1: FnMut(&mut RecvPipe),
              F2: FnMut(&mut RecvPipe),
    {
        let mut rng = make_rng();
        for iter in 0..50 {
            let mut data = data;
            let mut pipe = RecvPipe::new();
            prepare(&mut pipe);

            while !data.is_empty() {
                before(&mut pipe);
                let feed_len = if iter == 0 { 1 } else { rng.gen_range(0..data.len()) + 1 };
                pipe.feed_buf().extend_from_slice(&data[..feed_len]);
                data = &data[feed_len..];
            }

            after(&mut pipe);
        }
    }

    fn check_ident<D: AsRef<[u8]>>(data: &D, ident: Option<Bytes>) {
        check_feeding(
            data.as_ref(),
            |_| (),
            |pipe| assert_eq!(pipe.consume_ident().unwrap(), None),
            |pipe| assert_eq!(pipe.consume_ident().unwrap(), ident.clone()),
        );
    }

    #[test]
    fn test_consume_ident() {
        check_ident(b"banner line\nanother one\r\nSSH-2.0-peer_1.0\r\n", Some(b("SSH-2.0-peer_1.0")));
        check_ident(b"SSH-1.99-old\n", Some(b("SSH-1.99-old")));
        check_ident(b"no terminator SSH-2.0-x", None);
    }

    #[test]
    fn test_consume_ident_too_long() {
        let mut pipe = RecvPipe::new();
        let mut line = vec![b'x'; 300];
        line.push(b'\n');
        pipe.feed_buf().extend_from_slice(&line);
        assert!(matches!(pipe.consume_ident(), Err(Error::Protocol(_))));
    }

    fn check_packet<D: AsRef<[u8]>>(data: &D, payload: Bytes) {
        check_feeding(
            data.as_ref(),
            |_| (),
            |pipe| assert!(pipe.consume_packet().unwrap().is_none()),
            |pipe| assert_eq!(pipe.consume_packet().unwrap().unwrap().payload, payload),
        );
    }

    fn check_packet_err<D: AsRef<[u8]>>(data: &D, expected_msg: &str) {
        check_feeding(
            data.as_ref(),
            |_| (),
            |pipe| assert!(pipe.consume_packet().unwrap().is_none()),
            |pipe| match pipe.consume_packet() {
                Err(Error::Protocol(msg)) => assert!(msg.contains(expected_msg), "{}", msg),
                Err(err) => panic!("unexpected error {:?}", err),
                Ok(_) => panic!("expected an error"),
            },
        );
    }

    #[test]
    fn test_consume_packet() {
        check_packet(b"\x00\x00\x00\x0c\x08foo01234567", b("foo"));
        check_packet(b"\x00\x00\x00\x0c\x0b0123456789a", b(""));

        check_packet_err(b"\xde\xad\xbe\xef\x00zzz", "too long");
        check_packet_err(b"\x00\x00\x00\x03\x00zzz", "too short");
        check_packet_err(b"\x00\x00\x00\x0c\x20zzzxxxxyyyy", "too short for given padding");
        check_packet_err(b"\x00\x00\x00\x0c\x02zzzxxxxyyyy", "too short for given padding");
        check_packet_err(b"\x00\x00\x00\x08\x04zzz", "not aligned");
    }

    #[test]
    fn test_sequence_numbers() {
        let mut pipe = RecvPipe::new();
        for _ in 0..3 {
            pipe.feed_buf().extend_from_slice(b"\x00\x00\x00\x0c\x08foo01234567");
        }
        for seq in 0..3 {
            assert_eq!(pipe.consume_packet().unwrap().unwrap().packet_seq, seq);
        }
        assert_eq!(pipe.packets_since_keys(), 3);
        assert!(pipe.consume_packet().unwrap().is_none());
    }

    struct DummyMac {
        expected_data: Bytes,
        expected_tag: Bytes,
        verify: bool,
    }

    impl Mac for DummyMac {
        fn sign(&mut self, _: u32, _: &[u8], _: &mut [u8]) {
            panic!("called DummyMac::sign()")
        }

        fn verify(&mut self, packet_seq: u32, data: &[u8], tag: &[u8]) -> Result<MacVerified> {
            assert_eq!(packet_seq, 0);
            assert_eq!(data, self.expected_data.as_ref());
            assert_eq!(tag, self.expected_tag.as_ref());
            if self.verify { Ok(MacVerified::assertion()) } else { Err(Error::Mac) }
        }
    }

    #[test]
    fn test_consume_packet_mac() {
        let tag = b(b"magicmac");
        for verify in [true, false] {
            for etm in [false, true] {
                // with encrypt-then-mac, the length field is not part of the aligned data
                let data: &[u8] = match etm {
                    false => b"\x00\x00\x00\x0c\x08foo01234567magicmac",
                    true => b"\x00\x00\x00\x10\x0cfoo0123456789abmagicmac",
                };
                let plaintext = b(&data[..data.len() - tag.len()]);
                check_feeding(
                    data,
                    |pipe| {
                        let mac = Box::new(DummyMac {
                            expected_data: plaintext.clone(),
                            expected_tag: tag.clone(),
                            verify,
                        });
                        let decrypt = match etm {
                            false => PacketDecrypt::EncryptAndMac(Box::new(cipher::Identity), mac),
                            true => PacketDecrypt::EncryptThenMac(Box::new(cipher::Identity), mac),
                        };
                        pipe.set_decrypt(decrypt, 8, tag.len());
                    },
                    |pipe| assert!(pipe.consume_packet().unwrap().is_none()),
                    |pipe| match pipe.consume_packet() {
                        Ok(packet) if verify => assert_eq!(packet.unwrap().payload, b("foo")),
                        Err(Error::Mac) if !verify => {},
                        res => panic!("unexpected result {:?}", res),
                    },
                );
            }
        }
    }
}
