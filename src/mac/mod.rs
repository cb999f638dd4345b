//! Message authentication algorithms.
//!
//! MACs provide **integrity** of the packets. The tag is computed over the packet sequence number
//! and the packet, either over the plaintext (encrypt-and-MAC, RFC 4253) or over the ciphertext
//! (encrypt-then-MAC, the `-etm@openssh.com` variants).
//!
//! # Supported algorithms
//!
//! - "hmac-sha2-256-etm@openssh.com" ([`HMAC_SHA2_256_ETM`])
//! - "hmac-sha2-512-etm@openssh.com" ([`HMAC_SHA2_512_ETM`])
//! - "hmac-sha1-etm@openssh.com" ([`HMAC_SHA1_ETM`])
//! - "hmac-sha2-256" ([`HMAC_SHA2_256`])
//! - "hmac-sha2-512" ([`HMAC_SHA2_512`])
//! - "hmac-sha1" ([`HMAC_SHA1`])
//! - "none" ([`NONE`])
use derivative::Derivative;
use crate::Result;
pub use self::hmac::{
    HMAC_SHA2_256, HMAC_SHA2_512, HMAC_SHA1,
    HMAC_SHA2_256_ETM, HMAC_SHA2_512_ETM, HMAC_SHA1_ETM,
};
pub use self::none::NONE;
pub(crate) use self::none::{INVALID, Empty};

mod hmac;
mod none;

/// Algorithm for authenticating packets.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct MacAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    pub(crate) tag_len: usize,
    pub(crate) key_len: usize,
    pub(crate) variant: MacAlgoVariant,
    #[derivative(Debug = "ignore")]
    pub(crate) make_mac: fn(key: &[u8]) -> Result<Box<dyn Mac + Send>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum MacAlgoVariant {
    EncryptAndMac,
    EncryptThenMac,
}

pub(crate) trait Mac {
    fn sign(&mut self, packet_seq: u32, data: &[u8], tag: &mut [u8]);
    fn verify(&mut self, packet_seq: u32, data: &[u8], tag: &[u8]) -> Result<MacVerified>;
}

/// Proof that a MAC (or an AEAD tag) was verified.
#[derive(Debug)]
pub(crate) struct MacVerified(());

impl MacVerified {
    pub fn assertion() -> Self {
        Self(())
    }
}

/// Looks up a MAC by its name.
pub fn by_name(name: &str) -> Option<&'static MacAlgo> {
    static ALL: &[&MacAlgo] = &[
        &HMAC_SHA2_256_ETM, &HMAC_SHA2_512_ETM, &HMAC_SHA1_ETM,
        &HMAC_SHA2_256, &HMAC_SHA2_512, &HMAC_SHA1,
        &NONE,
    ];
    ALL.iter().copied().find(|algo| algo.name == name)
}
