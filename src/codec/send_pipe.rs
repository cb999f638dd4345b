use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};
use rand::{RngCore as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use crate::{Error, Result};
use crate::cipher::{self, PacketEncrypt};
use crate::compress::Compress;
use crate::mac;
use crate::util::CryptoRngCore;
use super::MIN_PACKET_LEN;

/// Outgoing half of the binary packet protocol (RFC 4253, section 6).
///
/// Every fed packet is encoded with the encryption state that is current at that moment, so the
/// keys can be switched right after the `SSH_MSG_NEWKEYS` packet has been fed.
pub(crate) struct SendPipe {
    buf: BytesMut,
    encrypt: PacketEncrypt,
    compress: Option<Box<dyn Compress + Send>>,
    block_len: usize,
    tag_len: usize,
    packet_seq: u32,
    bytes_since_keys: u64,
    packets_since_keys: u64,
    padding_rng: ChaCha8Rng,
}

impl SendPipe {
    pub fn new(rng: &mut dyn CryptoRngCore) -> Result<SendPipe> {
        let padding_rng = ChaCha8Rng::from_rng(rng.as_rngcore())
            .map_err(|_| Error::Random("could not generate seed for padding generator"))?;
        Ok(SendPipe {
            buf: BytesMut::new(),
            encrypt: PacketEncrypt::EncryptAndMac(Box::new(cipher::Identity), Box::new(mac::Empty)),
            compress: None,
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            bytes_since_keys: 0,
            packets_since_keys: 0,
            padding_rng,
        })
    }

    /// Queues our identification line (RFC 4253, section 4.2).
    pub fn feed_ident(&mut self, ident: &[u8]) {
        self.buf.reserve(ident.len() + 2);
        self.buf.put_slice(ident);
        self.buf.put_slice(b"\r\n");
    }

    /// Encodes and queues a packet, returns its sequence number.
    pub fn feed_packet(&mut self, payload: &[u8]) -> Result<u32> {
        log::trace!("feed packet {}, len {}, seq {}",
            payload.first().cloned().unwrap_or(0), payload.len(), self.packet_seq);

        let compressed: Bytes;
        let payload = match self.compress.as_mut() {
            Some(compress) => {
                compressed = compress.compress(payload)?;
                &compressed[..]
            },
            None => payload,
        };

        // packet layout:
        // 4 bytes: `packet_len = 1 + payload_len + padding_len`
        // 1 byte: `padding_len`
        // `payload_len` bytes: payload
        // `padding_len` bytes: random padding
        // `tag_len` bytes: mac tag
        let unaligned_len = self.encrypt.len_is_unaligned();
        let padding_len = calculate_padding_len(payload.len(), self.block_len, unaligned_len);

        let packet_begin = self.buf.len();
        let total_len = 5 + payload.len() + padding_len + self.tag_len;
        self.buf.reserve(total_len);
        self.buf.put_u32((1 + payload.len() + padding_len) as u32);
        self.buf.put_u8(padding_len as u8);
        self.buf.put_slice(payload);
        self.buf.put_bytes(0, padding_len + self.tag_len);

        let packet = &mut self.buf[packet_begin..];
        self.padding_rng.fill_bytes(&mut packet[5 + payload.len()..][..padding_len]);

        let (packet, tag) = packet.split_at_mut(5 + payload.len() + padding_len);
        match self.encrypt {
            PacketEncrypt::EncryptAndMac(ref mut encrypt, ref mut mac) => {
                mac.sign(self.packet_seq, packet, tag);
                encrypt.encrypt(packet);
            },
            PacketEncrypt::EncryptThenMac(ref mut encrypt, ref mut mac) => {
                encrypt.encrypt(&mut packet[4..]);
                mac.sign(self.packet_seq, packet, tag);
            },
            PacketEncrypt::Aead(ref mut aead) => {
                aead.encrypt_and_sign(self.packet_seq, packet, tag)?;
            },
        }

        let packet_seq = self.packet_seq;
        self.packet_seq = self.packet_seq.wrapping_add(1);
        self.bytes_since_keys += total_len as u64;
        self.packets_since_keys += 1;
        Ok(packet_seq)
    }

    /// Switches to new keys; applies to all packets fed from now on.
    pub fn set_encrypt(&mut self, encrypt: PacketEncrypt, block_len: usize, tag_len: usize) {
        self.encrypt = encrypt;
        self.block_len = block_len.max(8);
        self.tag_len = tag_len;
        self.bytes_since_keys = 0;
        self.packets_since_keys = 0;
    }

    pub fn set_compress(&mut self, compress: Option<Box<dyn Compress + Send>>) {
        self.compress = compress;
    }

    pub fn peek_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn consume_bytes(&mut self, len: usize) {
        self.buf.advance(len);
    }

    pub fn bytes_since_keys(&self) -> u64 {
        self.bytes_since_keys
    }

    pub fn packets_since_keys(&self) -> u64 {
        self.packets_since_keys
    }
}

/// Padding is at least 4 bytes, aligns the packet to the block and keeps the packet at least
/// [`MIN_PACKET_LEN`] bytes long. With AEAD and encrypt-then-MAC, the length field is excluded from
/// the alignment.
fn calculate_padding_len(payload_len: usize, block_len: usize, unaligned_len: bool) -> usize {
    let header_len = if unaligned_len { 1 } else { 5 };
    let min_padded_len = (header_len + payload_len + 4).max(MIN_PACKET_LEN - (5 - header_len));
    let padded_len = (min_padded_len + block_len - 1) / block_len * block_len;
    padded_len - payload_len - header_len
}

#[cfg(test)]
mod tests {
    use rand::{Rng as _, SeedableRng as _};
    use crate::cipher::{CipherAlgo, CipherAlgoVariant, PacketDecrypt};
    use crate::compress;
    use crate::mac::{MacAlgo, MacAlgoVariant};
    use crate::codec::RecvPipe;
    use super::*;

    #[test]
    fn test_calculate_padding_len() {
        for &block_len in &[8, 16, 32] {
            for payload_len in 0..100 {
                let padding_len = calculate_padding_len(payload_len, block_len, false);
                assert_eq!((5 + payload_len + padding_len) % block_len, 0);
                assert!(padding_len >= 4 && padding_len < 256);
                assert!(5 + payload_len + padding_len >= MIN_PACKET_LEN);

                let padding_len = calculate_padding_len(payload_len, block_len, true);
                assert_eq!((1 + payload_len + padding_len) % block_len, 0);
                assert!(padding_len >= 4 && padding_len < 256);
                assert!(5 + payload_len + padding_len >= MIN_PACKET_LEN);
            }
        }
    }

    fn make_pipes(
        cipher: &CipherAlgo,
        mac: &MacAlgo,
        compress: &compress::CompressAlgo,
    ) -> (SendPipe, RecvPipe) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);
        let mut send = SendPipe::new(&mut rng).unwrap();
        let mut recv = RecvPipe::new();

        let key = vec![0x11; cipher.key_len];
        let iv = vec![0x22; cipher.iv_len];
        let mac_key = vec![0x33; mac.key_len];
        match cipher.variant {
            CipherAlgoVariant::Standard(ref algo) => {
                let (encrypt, decrypt) = ((algo.make_encrypt)(&key, &iv).unwrap(), (algo.make_decrypt)(&key, &iv).unwrap());
                let (mac_send, mac_recv) = ((mac.make_mac)(&mac_key).unwrap(), (mac.make_mac)(&mac_key).unwrap());
                let (encrypt, decrypt) = match mac.variant {
                    MacAlgoVariant::EncryptAndMac => (
                        PacketEncrypt::EncryptAndMac(encrypt, mac_send),
                        PacketDecrypt::EncryptAndMac(decrypt, mac_recv),
                    ),
                    MacAlgoVariant::EncryptThenMac => (
                        PacketEncrypt::EncryptThenMac(encrypt, mac_send),
                        PacketDecrypt::EncryptThenMac(decrypt, mac_recv),
                    ),
                };
                send.set_encrypt(encrypt, cipher.block_len, mac.tag_len);
                recv.set_decrypt(decrypt, cipher.block_len, mac.tag_len);
            },
            CipherAlgoVariant::Aead(ref algo) => {
                let encrypt = PacketEncrypt::Aead((algo.make_encrypt)(&key, &iv).unwrap());
                let decrypt = PacketDecrypt::Aead((algo.make_decrypt)(&key, &iv).unwrap());
                send.set_encrypt(encrypt, cipher.block_len, algo.tag_len);
                recv.set_decrypt(decrypt, cipher.block_len, algo.tag_len);
            },
        }
        send.set_compress(compress.make_compress.map(|make| make()));
        recv.set_decompress(compress.make_decompress.map(|make| make()));
        (send, recv)
    }

    #[test]
    fn test_send_then_recv() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(2);
        let combos: &[(&CipherAlgo, &MacAlgo, &compress::CompressAlgo)] = &[
            (&cipher::NONE, &mac::NONE, &compress::NONE),
            (&cipher::AES128_CTR, &mac::HMAC_SHA1, &compress::NONE),
            (&cipher::AES256_CTR, &mac::HMAC_SHA2_256_ETM, &compress::ZLIB),
            (&cipher::AES192_CBC, &mac::HMAC_SHA2_512, &compress::ZLIB),
            (&cipher::AES128_GCM, &mac::INVALID, &compress::NONE),
            (&cipher::CHACHA20_POLY1305, &mac::INVALID, &compress::ZLIB_OPENSSH),
        ];

        for &(cipher, mac, compress) in combos {
            let (mut send, mut recv) = make_pipes(cipher, mac, compress);
            let payloads = (0..10)
                .map(|i| {
                    let len = if i == 0 { 0 } else { rng.gen_range(1..5000) };
                    (0..len).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>()
                })
                .collect::<Vec<_>>();

            for (i, payload) in payloads.iter().enumerate() {
                assert_eq!(send.feed_packet(payload).unwrap(), i as u32);
            }

            let wire = send.peek_bytes().to_vec();
            send.consume_bytes(wire.len());
            assert!(send.is_empty());
            recv.feed_buf().extend_from_slice(&wire);

            for (i, payload) in payloads.iter().enumerate() {
                let packet = recv.consume_packet().unwrap().unwrap();
                assert_eq!(packet.packet_seq, i as u32);
                assert_eq!(packet.payload.as_ref(), &payload[..], "{} {} {}", cipher.name, mac.name, compress.name);
            }
            assert!(recv.consume_packet().unwrap().is_none());
            assert_eq!(send.packets_since_keys(), recv.packets_since_keys());
            assert_eq!(send.bytes_since_keys(), recv.bytes_since_keys());
        }
    }

    #[test]
    fn test_tampered_packet_is_rejected() {
        let (mut send, mut recv) = make_pipes(&cipher::AES128_CTR, &mac::HMAC_SHA2_256, &compress::NONE);
        send.feed_packet(b"\x5eprivate data").unwrap();
        let mut wire = send.peek_bytes().to_vec();
        wire[20] ^= 0x01;
        recv.feed_buf().extend_from_slice(&wire);
        assert!(matches!(recv.consume_packet(), Err(Error::Mac)));
    }
}
