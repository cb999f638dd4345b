use aes::cipher::{BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit};
use aes::cipher::generic_array::GenericArray;
use crate::{Error, Result};
use super::{CipherAlgo, CipherAlgoVariant, StandardCipherAlgo, Encrypt, Decrypt};

/// "aes128-cbc" cipher from RFC 4253.
pub static AES128_CBC: CipherAlgo = CipherAlgo {
    name: "aes128-cbc",
    block_len: 16,
    key_len: 16,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Ok(Box::new(new_cbc::<cbc::Encryptor<aes::Aes128>>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_cbc::<cbc::Decryptor<aes::Aes128>>(key, iv)?)),
    }),
};

/// "aes192-cbc" cipher from RFC 4253.
pub static AES192_CBC: CipherAlgo = CipherAlgo {
    name: "aes192-cbc",
    block_len: 16,
    key_len: 24,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Ok(Box::new(new_cbc::<cbc::Encryptor<aes::Aes192>>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_cbc::<cbc::Decryptor<aes::Aes192>>(key, iv)?)),
    }),
};

/// "aes256-cbc" cipher from RFC 4253.
pub static AES256_CBC: CipherAlgo = CipherAlgo {
    name: "aes256-cbc",
    block_len: 16,
    key_len: 32,
    iv_len: 16,
    variant: CipherAlgoVariant::Standard(StandardCipherAlgo {
        make_encrypt: |key, iv| Ok(Box::new(new_cbc::<cbc::Encryptor<aes::Aes256>>(key, iv)?)),
        make_decrypt: |key, iv| Ok(Box::new(new_cbc::<cbc::Decryptor<aes::Aes256>>(key, iv)?)),
    }),
};

struct CbcCipher<T> {
    mode: T,
}

fn new_cbc<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<CbcCipher<T>> {
    let mode = T::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or iv length for aes-cbc"))?;
    Ok(CbcCipher { mode })
}

impl<T: BlockEncryptMut> Encrypt for CbcCipher<T> {
    fn encrypt(&mut self, data: &mut [u8]) {
        let block_len = T::block_size();
        debug_assert!(data.len() % block_len == 0, "plaintext is not aligned to block");
        for block in data.chunks_exact_mut(block_len) {
            self.mode.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}

impl<T: BlockDecryptMut> Decrypt for CbcCipher<T> {
    fn decrypt(&mut self, data: &mut [u8]) {
        let block_len = <T as BlockSizeUser>::block_size();
        debug_assert!(data.len() % block_len == 0, "ciphertext is not aligned to block");
        for block in data.chunks_exact_mut(block_len) {
            self.mode.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
    }
}
