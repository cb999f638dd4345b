use chacha20::ChaCha20Legacy;
use chacha20::cipher::{KeyIvInit as _, StreamCipher as _, StreamCipherSeek as _};
use poly1305::Poly1305;
use poly1305::universal_hash::KeyInit as _;
use subtle::ConstantTimeEq as _;
use crate::{Error, Result};
use crate::mac::MacVerified;
use super::{CipherAlgo, CipherAlgoVariant, AeadCipherAlgo, AeadEncrypt, AeadDecrypt};

/// "chacha20-poly1305@openssh.com" cipher as introduced by OpenSSH.
///
/// This is an AEAD cipher, no separate [MAC][crate::mac] is used with it.
pub static CHACHA20_POLY1305: CipherAlgo = CipherAlgo {
    name: "chacha20-poly1305@openssh.com",
    block_len: 8,
    key_len: 64,
    iv_len: 0,
    variant: CipherAlgoVariant::Aead(AeadCipherAlgo {
        tag_len: 16,
        make_encrypt: |key, _| Ok(Box::new(new_chacha_poly(key)?)),
        make_decrypt: |key, _| Ok(Box::new(new_chacha_poly(key)?)),
    }),
};

/// The length is encrypted with `header_key`, the rest of the packet with `main_key` starting from
/// the second keystream block. The first block of `main_key` yields the Poly1305 key.
struct ChachaPolyCipher {
    main_key: chacha20::Key,
    header_key: chacha20::Key,
}

fn new_chacha_poly(key: &[u8]) -> Result<ChachaPolyCipher> {
    if key.len() != 64 {
        return Err(Error::Crypto("invalid key length for chacha20-poly1305"))
    }
    Ok(ChachaPolyCipher {
        main_key: *chacha20::Key::from_slice(&key[..32]),
        header_key: *chacha20::Key::from_slice(&key[32..]),
    })
}

impl ChachaPolyCipher {
    fn header_cipher(&self, packet_seq: u32) -> ChaCha20Legacy {
        let nonce = chacha20::LegacyNonce::from((packet_seq as u64).to_be_bytes());
        ChaCha20Legacy::new(&self.header_key, &nonce)
    }

    fn main_cipher(&self, packet_seq: u32) -> (ChaCha20Legacy, Poly1305) {
        let nonce = chacha20::LegacyNonce::from((packet_seq as u64).to_be_bytes());
        let mut cipher = ChaCha20Legacy::new(&self.main_key, &nonce);
        let mut poly_key = [0; 32];
        cipher.apply_keystream(&mut poly_key);
        cipher.seek(64u64);
        (cipher, Poly1305::new(poly1305::Key::from_slice(&poly_key)))
    }
}

impl AeadEncrypt for ChachaPolyCipher {
    fn encrypt_and_sign(&mut self, packet_seq: u32, packet: &mut [u8], tag: &mut [u8]) -> Result<()> {
        self.header_cipher(packet_seq).apply_keystream(&mut packet[..4]);
        let (mut cipher, poly) = self.main_cipher(packet_seq);
        cipher.apply_keystream(&mut packet[4..]);
        tag.copy_from_slice(&poly.compute_unpadded(packet));
        Ok(())
    }
}

impl AeadDecrypt for ChachaPolyCipher {
    fn decrypt_packet_len(&mut self, packet_seq: u32, ciphertext: &[u8; 4]) -> [u8; 4] {
        let mut len = *ciphertext;
        self.header_cipher(packet_seq).apply_keystream(&mut len);
        len
    }

    fn decrypt_and_verify(&mut self, packet_seq: u32, packet: &mut [u8], tag: &[u8]) -> Result<MacVerified> {
        let (mut cipher, poly) = self.main_cipher(packet_seq);
        let computed_tag = poly.compute_unpadded(packet);
        if !bool::from(computed_tag.as_slice().ct_eq(tag)) {
            return Err(Error::Mac)
        }

        let len = self.decrypt_packet_len(packet_seq, &[packet[0], packet[1], packet[2], packet[3]]);
        packet[..4].copy_from_slice(&len);
        cipher.apply_keystream(&mut packet[4..]);
        Ok(MacVerified::assertion())
    }
}
