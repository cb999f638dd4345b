//! Encryption and decryption algorithms.
//!
//! Ciphers provide **confidentiality** of the packets. Both peers offer a list of supported
//! algorithms and the first algorithm on the client's list that is also supported by the server is
//! used, separately for each direction.
//!
//! # Supported algorithms
//!
//! - "chacha20-poly1305@openssh.com" ([`CHACHA20_POLY1305`])
//! - "aes128-gcm@openssh.com" ([`AES128_GCM`])
//! - "aes256-gcm@openssh.com" ([`AES256_GCM`])
//! - "aes128-ctr" ([`AES128_CTR`])
//! - "aes192-ctr" ([`AES192_CTR`])
//! - "aes256-ctr" ([`AES256_CTR`])
//! - "aes128-cbc" ([`AES128_CBC`])
//! - "aes192-cbc" ([`AES192_CBC`])
//! - "aes256-cbc" ([`AES256_CBC`])
//! - "none" ([`NONE`])
use derivative::Derivative;
use crate::Result;
use crate::mac::{Mac, MacVerified};
pub use self::block::{AES128_CBC, AES192_CBC, AES256_CBC};
pub use self::chacha_poly::CHACHA20_POLY1305;
pub use self::gcm::{AES128_GCM, AES256_GCM};
pub use self::none::NONE;
pub use self::stream::{AES128_CTR, AES192_CTR, AES256_CTR};
pub(crate) use self::none::Identity;

mod block;
mod chacha_poly;
mod gcm;
mod none;
mod stream;

/// Algorithm for encrypting and decrypting packets.
///
/// See the [module documentation][self] for details.
#[derive(Debug)]
pub struct CipherAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    pub(crate) block_len: usize,
    pub(crate) key_len: usize,
    pub(crate) iv_len: usize,
    pub(crate) variant: CipherAlgoVariant,
}

#[derive(Debug)]
pub(crate) enum CipherAlgoVariant {
    Standard(StandardCipherAlgo),
    Aead(AeadCipherAlgo),
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct StandardCipherAlgo {
    #[derivative(Debug = "ignore")]
    pub make_encrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn Encrypt + Send>>,
    #[derivative(Debug = "ignore")]
    pub make_decrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn Decrypt + Send>>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct AeadCipherAlgo {
    pub tag_len: usize,
    #[derivative(Debug = "ignore")]
    pub make_encrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn AeadEncrypt + Send>>,
    #[derivative(Debug = "ignore")]
    pub make_decrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn AeadDecrypt + Send>>,
}

impl CipherAlgo {
    pub(crate) fn is_aead(&self) -> bool {
        matches!(self.variant, CipherAlgoVariant::Aead(_))
    }
}

pub(crate) trait Encrypt {
    fn encrypt(&mut self, data: &mut [u8]);
}

pub(crate) trait Decrypt {
    fn decrypt(&mut self, data: &mut [u8]);
}

pub(crate) trait AeadEncrypt {
    /// Encrypts the whole `packet` in place (including the 4-byte length) and writes the tag.
    fn encrypt_and_sign(&mut self, packet_seq: u32, packet: &mut [u8], tag: &mut [u8]) -> Result<()>;
}

pub(crate) trait AeadDecrypt {
    fn decrypt_packet_len(&mut self, packet_seq: u32, ciphertext: &[u8; 4]) -> [u8; 4];
    fn decrypt_and_verify(&mut self, packet_seq: u32, packet: &mut [u8], tag: &[u8]) -> Result<MacVerified>;
}

/// Encryption and authentication of outgoing packets in one direction.
pub(crate) enum PacketEncrypt {
    EncryptAndMac(Box<dyn Encrypt + Send>, Box<dyn Mac + Send>),
    EncryptThenMac(Box<dyn Encrypt + Send>, Box<dyn Mac + Send>),
    Aead(Box<dyn AeadEncrypt + Send>),
}

/// Decryption and verification of incoming packets in one direction.
pub(crate) enum PacketDecrypt {
    EncryptAndMac(Box<dyn Decrypt + Send>, Box<dyn Mac + Send>),
    EncryptThenMac(Box<dyn Decrypt + Send>, Box<dyn Mac + Send>),
    Aead(Box<dyn AeadDecrypt + Send>),
}

impl PacketEncrypt {
    /// Is the packet length field excluded from block alignment?
    pub fn len_is_unaligned(&self) -> bool {
        !matches!(self, PacketEncrypt::EncryptAndMac(..))
    }
}

impl PacketDecrypt {
    pub fn len_is_unaligned(&self) -> bool {
        !matches!(self, PacketDecrypt::EncryptAndMac(..))
    }
}

/// Looks up a cipher by its name.
pub fn by_name(name: &str) -> Option<&'static CipherAlgo> {
    static ALL: &[&CipherAlgo] = &[
        &CHACHA20_POLY1305, &AES128_GCM, &AES256_GCM,
        &AES128_CTR, &AES192_CTR, &AES256_CTR,
        &AES128_CBC, &AES192_CBC, &AES256_CBC,
        &NONE,
    ];
    ALL.iter().copied().find(|algo| algo.name == name)
}
