use aes_gcm::{Aes128Gcm, Aes256Gcm};
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use crate::{Error, Result};
use crate::mac::MacVerified;
use super::{CipherAlgo, CipherAlgoVariant, AeadCipherAlgo, AeadEncrypt, AeadDecrypt};

/// "aes128-gcm@openssh.com" cipher (RFC 5647 as modified by OpenSSH).
///
/// This is an AEAD cipher, no separate [MAC][crate::mac] is used with it.
pub static AES128_GCM: CipherAlgo = CipherAlgo {
    name: "aes128-gcm@openssh.com",
    block_len: 16,
    key_len: 16,
    iv_len: 12,
    variant: CipherAlgoVariant::Aead(AeadCipherAlgo {
        tag_len: 16,
        make_encrypt: |key, iv| Ok(Box::new(new_gcm::<Aes128Gcm>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_gcm::<Aes128Gcm>(key, iv)?)),
    }),
};

/// "aes256-gcm@openssh.com" cipher (RFC 5647 as modified by OpenSSH).
///
/// This is an AEAD cipher, no separate [MAC][crate::mac] is used with it.
pub static AES256_GCM: CipherAlgo = CipherAlgo {
    name: "aes256-gcm@openssh.com",
    block_len: 16,
    key_len: 32,
    iv_len: 12,
    variant: CipherAlgoVariant::Aead(AeadCipherAlgo {
        tag_len: 16,
        make_encrypt: |key, iv| Ok(Box::new(new_gcm::<Aes256Gcm>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_gcm::<Aes256Gcm>(key, iv)?)),
    }),
};

/// The nonce is a fixed 4-byte field followed by a 64-bit invocation counter that is incremented
/// after every packet (RFC 5647, section 7.1).
struct GcmCipher<A> {
    aead: A,
    iv_fixed: [u8; 4],
    iv_counter: u64,
}

fn new_gcm<A: KeyInit>(key: &[u8], iv: &[u8]) -> Result<GcmCipher<A>> {
    let aead = A::new_from_slice(key).map_err(|_| Error::Crypto("invalid key length for aes-gcm"))?;
    if iv.len() != 12 {
        return Err(Error::Crypto("invalid iv length for aes-gcm"))
    }

    let mut iv_fixed = [0; 4];
    iv_fixed.copy_from_slice(&iv[..4]);
    let mut iv_counter = [0; 8];
    iv_counter.copy_from_slice(&iv[4..]);
    Ok(GcmCipher { aead, iv_fixed, iv_counter: u64::from_be_bytes(iv_counter) })
}

impl<A> GcmCipher<A> {
    fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0; 12];
        nonce[..4].copy_from_slice(&self.iv_fixed);
        nonce[4..].copy_from_slice(&self.iv_counter.to_be_bytes());
        self.iv_counter = self.iv_counter.wrapping_add(1);
        nonce
    }
}

impl<A: AeadInPlace + AeadCore<NonceSize = U12>> AeadEncrypt for GcmCipher<A> {
    fn encrypt_and_sign(&mut self, _packet_seq: u32, packet: &mut [u8], tag: &mut [u8]) -> Result<()> {
        let nonce = self.next_nonce();
        let (packet_len, packet_rest) = packet.split_at_mut(4);
        let gcm_tag = self.aead
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), packet_len, packet_rest)
            .map_err(|_| Error::Crypto("aes-gcm encryption failed"))?;
        tag.copy_from_slice(&gcm_tag);
        Ok(())
    }
}

impl<A: AeadInPlace + AeadCore<NonceSize = U12>> AeadDecrypt for GcmCipher<A> {
    fn decrypt_packet_len(&mut self, _packet_seq: u32, ciphertext: &[u8; 4]) -> [u8; 4] {
        // the length is sent in the clear as associated data
        *ciphertext
    }

    fn decrypt_and_verify(&mut self, _packet_seq: u32, packet: &mut [u8], tag: &[u8]) -> Result<MacVerified> {
        let nonce = self.next_nonce();
        if tag.len() != 16 {
            return Err(Error::Mac)
        }
        let (packet_len, packet_rest) = packet.split_at_mut(4);
        self.aead
            .decrypt_in_place_detached(
                GenericArray::from_slice(&nonce), packet_len, packet_rest, GenericArray::from_slice(tag))
            .map_err(|_| Error::Mac)?;
        Ok(MacVerified::assertion())
    }
}
