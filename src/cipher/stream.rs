use aes::cipher::{KeyIvInit, StreamCipher};
use crate::{Error, Result};
use super::{CipherAlgo, CipherAlgoVariant, StandardCipherAlgo, Encrypt, Decrypt};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// "aes128-ctr" cipher from RFC 4344.
pub static AES128_CTR: CipherAlgo = CipherAlgo {
    name: "aes128-ctr",
    block_len: 16,
    key_len: 16,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Ok(Box::new(new_ctr::<Aes128Ctr>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_ctr::<Aes128Ctr>(key, iv)?)),
    }),
};

/// "aes192-ctr" cipher from RFC 4344.
pub static AES192_CTR: CipherAlgo = CipherAlgo {
    name: "aes192-ctr",
    block_len: 16,
    key_len: 24,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Ok(Box::new(new_ctr::<Aes192Ctr>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_ctr::<Aes192Ctr>(key, iv)?)),
    }),
};

/// "aes256-ctr" cipher from RFC 4344.
pub static AES256_CTR: CipherAlgo = CipherAlgo {
    name: "aes256-ctr",
    block_len: 16,
    key_len: 32,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Ok(Box::new(new_ctr::<Aes256Ctr>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_ctr::<Aes256Ctr>(key, iv)?)),
    }),
};

struct CtrCipher<C> {
    cipher: C,
}

fn new_ctr<C: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<CtrCipher<C>> {
    let cipher = C::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or iv length for aes-ctr"))?;
    Ok(CtrCipher { cipher })
}

impl<C: StreamCipher> Encrypt for CtrCipher<C> {
    fn encrypt(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data)
    }
}

impl<C: StreamCipher> Decrypt for CtrCipher<C> {
    fn decrypt(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_aes128_ctr_keystream_continues_across_packets() {
        // the counter is shared by consecutive packets, so encrypting in two halves is the same
        // as encrypting at once
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex!("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
        let mut whole = [0u8; 32];
        new_ctr::<Aes128Ctr>(&key, &iv).unwrap().encrypt(&mut whole);

        let mut halves = [0u8; 32];
        let mut cipher = new_ctr::<Aes128Ctr>(&key, &iv).unwrap();
        cipher.encrypt(&mut halves[..16]);
        cipher.encrypt(&mut halves[16..]);
        assert_eq!(whole, halves);
    }

    #[test]
    fn test_invalid_key_len() {
        assert!(new_ctr::<Aes128Ctr>(&[0; 15], &[0; 16]).is_err());
    }
}
