use crate::{Error, Result};
use super::{Mac, MacAlgo, MacAlgoVariant, MacVerified};

/// "none" MAC (no message authentication).
pub static NONE: MacAlgo = MacAlgo {
    name: "none",
    tag_len: 0,
    key_len: 0,
    variant: MacAlgoVariant::EncryptAndMac,
    make_mac: |_key| Ok(Box::new(Empty)),
};

/// Placeholder used with AEAD ciphers, which authenticate the packets themselves.
pub static INVALID: MacAlgo = MacAlgo {
    name: "invalid",
    tag_len: 0,
    key_len: 0,
    variant: MacAlgoVariant::EncryptAndMac,
    make_mac: |_key| Err(Error::Crypto("mac algorithm is not used with aead cipher")),
};

#[derive(Debug)]
pub struct Empty;

impl Mac for Empty {
    fn sign(&mut self, _packet_seq: u32, _data: &[u8], tag: &mut [u8]) {
        debug_assert!(tag.is_empty());
    }

    fn verify(&mut self, _packet_seq: u32, _data: &[u8], tag: &[u8]) -> Result<MacVerified> {
        match tag.is_empty() {
            true => Ok(MacVerified::assertion()),
            false => Err(Error::Mac),
        }
    }
}
