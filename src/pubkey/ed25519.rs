use bytes::Bytes;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, Privkey, SignatureVerified};

const NAME: &str = "ssh-ed25519";
const PUBKEY_LEN: usize = ed25519_dalek::PUBLIC_KEY_LENGTH;
const SIGNATURE_LEN: usize = ed25519_dalek::SIGNATURE_LENGTH;

/// "ssh-ed25519" public key algorithm from RFC 8709.
///
/// Works with [`Ed25519Pubkey`] and [`Ed25519Privkey`]. Signatures are verified in the strict
/// mode, so malleable or small-order signatures are rejected.
pub static SSH_ED25519: PubkeyAlgo = PubkeyAlgo {
    name: NAME,
    verify: verify_ed25519,
    sign: sign_ed25519,
};

/// Ed25519 public key (RFC 8032).
///
/// Wraps an [`ed25519_dalek::VerifyingKey`]; `From` conversions work in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519Pubkey {
    pub(crate) verifying: ed25519_dalek::VerifyingKey,
}

/// Ed25519 signing key (RFC 8032).
///
/// Wraps an [`ed25519_dalek::SigningKey`]; `From` conversions work in both directions.
#[derive(Clone)]
#[cfg_attr(feature = "debug_less_secure", derive(Debug))]
pub struct Ed25519Privkey {
    pub(crate) signing: ed25519_dalek::SigningKey,
}

impl Ed25519Privkey {
    /// The public half of this key.
    pub fn pubkey(&self) -> Ed25519Pubkey {
        self.signing.verifying_key().into()
    }
}

// signature blob: string "ssh-ed25519", string R || S (64 bytes)
fn verify_ed25519(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Ed25519(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };

    let mut blob = PacketDecode::new(signature);
    if blob.get_string()? != NAME {
        return Err(Error::Decode("expected signature format 'ssh-ed25519'"))
    }
    let raw = fixed_bytes::<SIGNATURE_LEN>(blob.get_bytes()?).ok_or(Error::Signature)?;

    pubkey.verifying.verify_strict(message, &ed25519_dalek::Signature::from_bytes(&raw))
        .map(|_| SignatureVerified::assertion())
        .map_err(|_| Error::Signature)
}

fn sign_ed25519(privkey: &Privkey, message: &[u8]) -> Result<Bytes> {
    use ed25519_dalek::Signer as _;
    let Privkey::Ed25519(privkey) = privkey else { return Err(Error::PrivkeyFormat) };

    let raw = privkey.signing.try_sign(message)
        .map_err(|_| Error::Crypto("could not sign with ed25519"))?
        .to_bytes();

    let mut blob = PacketEncode::new();
    blob.put_str(NAME);
    blob.put_bytes(&raw);
    Ok(blob.finish())
}

pub(super) fn encode_pubkey(blob: &mut PacketEncode, pubkey: &Ed25519Pubkey) {
    blob.put_str(NAME);
    blob.put_bytes(pubkey.verifying.as_bytes());
}

/// Decodes the key data that follows the algorithm name in a public key blob.
pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<Ed25519Pubkey> {
    let raw = fixed_bytes::<PUBKEY_LEN>(blob.get_bytes()?)
        .ok_or(Error::Decode("ed25519 public key has invalid length"))?;
    ed25519_dalek::VerifyingKey::from_bytes(&raw)
        .map(Ed25519Pubkey::from)
        .map_err(|_| Error::Decode("ed25519 public key is not valid"))
}

fn fixed_bytes<const N: usize>(data: Bytes) -> Option<[u8; N]> {
    data.as_ref().try_into().ok()
}

impl From<ed25519_dalek::VerifyingKey> for Ed25519Pubkey {
    fn from(verifying: ed25519_dalek::VerifyingKey) -> Self { Self { verifying } }
}

impl From<Ed25519Pubkey> for ed25519_dalek::VerifyingKey {
    fn from(pubkey: Ed25519Pubkey) -> Self { pubkey.verifying }
}

impl From<ed25519_dalek::SigningKey> for Ed25519Privkey {
    fn from(signing: ed25519_dalek::SigningKey) -> Self { Self { signing } }
}

impl From<Ed25519Privkey> for ed25519_dalek::SigningKey {
    fn from(privkey: Ed25519Privkey) -> Self { privkey.signing }
}

impl fmt::Display for Ed25519Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ed25519 ")?;
        self.verifying.as_bytes().iter().try_for_each(|b| write!(f, "{:02x}", b))
    }
}

impl PartialEq for Ed25519Privkey {
    fn eq(&self, other: &Self) -> bool {
        self.signing.to_bytes() == other.signing.to_bytes()
    }
}

impl Eq for Ed25519Privkey {}

#[cfg(test)]
mod tests {
    use super::*;

    fn privkey(seed: u8) -> Privkey {
        Privkey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[seed; 32]).into())
    }

    #[test]
    fn test_signature_blob_layout() {
        let signature = sign_ed25519(&privkey(5), b"hash").unwrap();
        let mut blob = PacketDecode::new(signature);
        assert_eq!(blob.get_string().unwrap(), "ssh-ed25519");
        assert_eq!(blob.get_bytes().unwrap().len(), 64);
        assert_eq!(blob.remaining_len(), 0);
    }

    #[test]
    fn test_truncated_signature() {
        let pubkey = privkey(5).pubkey();
        let mut blob = PacketEncode::new();
        blob.put_str("ssh-ed25519");
        blob.put_bytes(&[0; 63]);
        assert!(matches!(verify_ed25519(&pubkey, b"hash", blob.finish()), Err(Error::Signature)));
    }

    #[test]
    fn test_signature_of_other_key() {
        let signature = sign_ed25519(&privkey(5), b"hash").unwrap();
        let other = privkey(6).pubkey();
        assert!(matches!(verify_ed25519(&other, b"hash", signature), Err(Error::Signature)));
    }

    #[test]
    fn test_decode_short_pubkey() {
        let mut blob = PacketEncode::new();
        blob.put_bytes(&[1; 31]);
        let mut blob = PacketDecode::new(blob.finish());
        assert!(matches!(decode_pubkey(&mut blob), Err(Error::Decode(_))));
    }

    #[test]
    fn test_display() {
        let Pubkey::Ed25519(pubkey) = privkey(5).pubkey() else { unreachable!() };
        let text = pubkey.to_string();
        assert!(text.starts_with("ed25519 "));
        assert_eq!(text.len(), "ed25519 ".len() + 64);
    }
}
