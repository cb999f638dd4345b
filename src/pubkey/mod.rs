//! Public key algorithms.
//!
//! Public key algorithms authenticate the server (host keys) and may also authenticate the client
//! (the "publickey" authentication method). The server signs the exchange hash with its host key
//! and the client verifies the signature; in public key authentication the roles are swapped.
//!
//! # Supported algorithms
//!
//! - "ssh-ed25519" ([`SSH_ED25519`], uses [`Ed25519Pubkey`] and [`Ed25519Privkey`])
//! - "ecdsa-sha2-nistp256" ([`ECDSA_SHA2_NISTP256`], uses [`EcdsaP256Pubkey`] and
//! [`EcdsaP256Privkey`])
//! - "ecdsa-sha2-nistp384" ([`ECDSA_SHA2_NISTP384`], uses [`EcdsaP384Pubkey`] and
//! [`EcdsaP384Privkey`])
//! - "rsa-sha2-256" ([`RSA_SHA2_256`], uses [`RsaPubkey`] and [`RsaPrivkey`])
//! - "rsa-sha2-512" ([`RSA_SHA2_512`], uses [`RsaPubkey`] and [`RsaPrivkey`])
//! - "ssh-rsa" ([`SSH_RSA`], uses [`RsaPubkey`] and [`RsaPrivkey`])
use base64::Engine as _;
use bytes::Bytes;
use derivative::Derivative;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
pub use self::ecdsa::{
    ECDSA_SHA2_NISTP256, ECDSA_SHA2_NISTP384,
    EcdsaP256Pubkey, EcdsaP256Privkey, EcdsaP384Pubkey, EcdsaP384Privkey,
};
pub use self::ed25519::{SSH_ED25519, Ed25519Pubkey, Ed25519Privkey};
pub use self::rsa::{SSH_RSA, RSA_SHA2_256, RSA_SHA2_512, RsaPubkey, RsaPrivkey};

mod ecdsa;
mod ed25519;
mod rsa;

/// Algorithm for public key cryptography.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PubkeyAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) verify: fn(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified>,
    #[derivative(Debug = "ignore")]
    pub(crate) sign: fn(privkey: &Privkey, message: &[u8]) -> Result<Bytes>,
}

/// Looks up a public key algorithm by its name.
pub fn by_name(name: &str) -> Option<&'static PubkeyAlgo> {
    [
        &SSH_ED25519, &ECDSA_SHA2_NISTP256, &ECDSA_SHA2_NISTP384,
        &RSA_SHA2_256, &RSA_SHA2_512, &SSH_RSA,
    ].into_iter().find(|algo| algo.name == name)
}

/// Public key in one of supported formats.
///
/// This enum is marked as `#[non_exhaustive]`, so we might add new variants without breaking
/// backwards compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Pubkey {
    /// Ed25519 public key.
    Ed25519(Ed25519Pubkey),
    /// RSA public key.
    Rsa(RsaPubkey),
    /// ECDSA public key on NIST P-256 curve.
    EcdsaP256(EcdsaP256Pubkey),
    /// ECDSA public key on NIST P-384 curve.
    EcdsaP384(EcdsaP384Pubkey),
}

impl Pubkey {
    /// Get best public key algorithms that work with this key.
    ///
    /// Most key types work with just a single public key algorithm, but with RSA keys
    /// ([`Pubkey::Rsa`]), there are multiple algorithms that differ in the hash function. This
    /// method returns only secure algorithms, but older peers may not support them.
    pub fn algos_secure(&self) -> &'static [&'static PubkeyAlgo] {
        static ED25519: &[&PubkeyAlgo] = &[&SSH_ED25519];
        static RSA: &[&PubkeyAlgo] = &[&RSA_SHA2_256, &RSA_SHA2_512];
        static ECDSA_P256: &[&PubkeyAlgo] = &[&ECDSA_SHA2_NISTP256];
        static ECDSA_P384: &[&PubkeyAlgo] = &[&ECDSA_SHA2_NISTP384];
        match self {
            Pubkey::Ed25519(_) => ED25519,
            Pubkey::Rsa(_) => RSA,
            Pubkey::EcdsaP256(_) => ECDSA_P256,
            Pubkey::EcdsaP384(_) => ECDSA_P384,
        }
    }

    /// Get all public key algorithms that work with this key, including the insecure ones.
    pub fn algos_compatible_less_secure(&self) -> &'static [&'static PubkeyAlgo] {
        static RSA: &[&PubkeyAlgo] = &[&RSA_SHA2_256, &RSA_SHA2_512, &SSH_RSA];
        match self {
            Pubkey::Rsa(_) => RSA,
            _ => self.algos_secure(),
        }
    }

    /// Returns true if signatures of `algo` can be made or verified with this key.
    pub fn supports_algo(&self, algo: &PubkeyAlgo) -> bool {
        self.algos_compatible_less_secure().iter().any(|a| a.name == algo.name)
    }

    /// Decode a public key from SSH wire encoding (RFC 4253, section 6.6).
    pub fn decode(blob: Bytes) -> Result<Self> {
        let mut blob = PacketDecode::new(blob);
        let format = blob.get_string()?;
        match format.as_str() {
            "ssh-ed25519" => ed25519::decode_pubkey(&mut blob).map(Pubkey::Ed25519),
            "ssh-rsa" => rsa::decode_pubkey(&mut blob).map(Pubkey::Rsa),
            "ecdsa-sha2-nistp256" => ecdsa::nistp256::decode_pubkey(&mut blob).map(Pubkey::EcdsaP256),
            "ecdsa-sha2-nistp384" => ecdsa::nistp384::decode_pubkey(&mut blob).map(Pubkey::EcdsaP384),
            _ => {
                log::debug!("unknown pubkey format {:?}", format);
                Err(Error::Decode("unknown public key format"))
            },
        }
    }

    /// Encode a public key into SSH wire encoding (RFC 4253, section 6.6).
    pub fn encode(&self) -> Bytes {
        let mut blob = PacketEncode::new();
        match self {
            Pubkey::Ed25519(pubkey) => ed25519::encode_pubkey(&mut blob, pubkey),
            Pubkey::Rsa(pubkey) => rsa::encode_pubkey(&mut blob, pubkey),
            Pubkey::EcdsaP256(pubkey) => ecdsa::nistp256::encode_pubkey(&mut blob, pubkey),
            Pubkey::EcdsaP384(pubkey) => ecdsa::nistp384::encode_pubkey(&mut blob, pubkey),
        }
        blob.finish()
    }

    /// Compute a fingerprint of the public key.
    ///
    /// The fingerprint is the SHA-256 digest of the encoded public key in base64 (not padded with
    /// `=` characters) and prefixed with `SHA256:`, the same format that OpenSSH prints.
    pub fn fingerprint(&self) -> String {
        use sha2::Digest as _;
        let digest = sha2::Sha256::digest(self.encode());
        format!("SHA256:{}", base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Pubkey::Ed25519(pubkey) => fmt::Display::fmt(pubkey, f),
            Pubkey::Rsa(pubkey) => fmt::Display::fmt(pubkey, f),
            Pubkey::EcdsaP256(pubkey) => fmt::Display::fmt(pubkey, f),
            Pubkey::EcdsaP384(pubkey) => fmt::Display::fmt(pubkey, f),
        }
    }
}

impl From<Ed25519Pubkey> for Pubkey {
    fn from(pubkey: Ed25519Pubkey) -> Self { Pubkey::Ed25519(pubkey) }
}

impl From<RsaPubkey> for Pubkey {
    fn from(pubkey: RsaPubkey) -> Self { Pubkey::Rsa(pubkey) }
}

impl From<EcdsaP256Pubkey> for Pubkey {
    fn from(pubkey: EcdsaP256Pubkey) -> Self { Pubkey::EcdsaP256(pubkey) }
}

impl From<EcdsaP384Pubkey> for Pubkey {
    fn from(pubkey: EcdsaP384Pubkey) -> Self { Pubkey::EcdsaP384(pubkey) }
}

/// Proof that a signature was verified.
#[derive(Debug)]
pub(crate) struct SignatureVerified(());

impl SignatureVerified {
    fn assertion() -> Self { Self(()) }
}

/// Private key (keypair) in one of supported formats.
///
/// This enum is marked as `#[non_exhaustive]`, so we might add new variants without breaking
/// backwards compatibility.
#[derive(Clone, PartialEq, Eq)]
#[non_exhaustive]
#[cfg_attr(feature = "debug_less_secure", derive(Debug))]
pub enum Privkey {
    /// Ed25519 private key.
    Ed25519(Ed25519Privkey),
    /// RSA private key.
    Rsa(RsaPrivkey),
    /// ECDSA private key on NIST P-256 curve.
    EcdsaP256(EcdsaP256Privkey),
    /// ECDSA private key on NIST P-384 curve.
    EcdsaP384(EcdsaP384Privkey),
}

impl Privkey {
    /// Return the public key associated with this private key.
    pub fn pubkey(&self) -> Pubkey {
        match self {
            Privkey::Ed25519(privkey) => Pubkey::Ed25519(privkey.pubkey()),
            Privkey::Rsa(privkey) => Pubkey::Rsa(privkey.pubkey()),
            Privkey::EcdsaP256(privkey) => Pubkey::EcdsaP256(privkey.pubkey()),
            Privkey::EcdsaP384(privkey) => Pubkey::EcdsaP384(privkey.pubkey()),
        }
    }
}

impl From<Ed25519Privkey> for Privkey {
    fn from(privkey: Ed25519Privkey) -> Self { Privkey::Ed25519(privkey) }
}

impl From<RsaPrivkey> for Privkey {
    fn from(privkey: RsaPrivkey) -> Self { Privkey::Rsa(privkey) }
}

impl From<EcdsaP256Privkey> for Privkey {
    fn from(privkey: EcdsaP256Privkey) -> Self { Privkey::EcdsaP256(privkey) }
}

impl From<EcdsaP384Privkey> for Privkey {
    fn from(privkey: EcdsaP384Privkey) -> Self { Privkey::EcdsaP384(privkey) }
}

#[cfg(not(feature = "debug_less_secure"))]
impl fmt::Debug for Privkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Privkey").field(&self.pubkey()).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::SeedableRng as _;
    use super::*;

    pub fn ed25519_privkey(seed: u8) -> Privkey {
        Privkey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[seed; 32]).into())
    }

    fn test_keys() -> Vec<Privkey> {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(11);
        vec![
            ed25519_privkey(1),
            Privkey::EcdsaP256(p256::ecdsa::SigningKey::random(&mut rng).into()),
            Privkey::EcdsaP384(p384::ecdsa::SigningKey::random(&mut rng).into()),
            Privkey::Rsa(::rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap().into()),
        ]
    }

    #[test]
    fn test_sign_verify() {
        for privkey in test_keys() {
            let pubkey = privkey.pubkey();
            for algo in pubkey.algos_compatible_less_secure() {
                let signature = (algo.sign)(&privkey, b"exchange hash").unwrap();
                (algo.verify)(&pubkey, b"exchange hash", signature.clone()).unwrap();
                assert!(matches!((algo.verify)(&pubkey, b"other hash", signature), Err(Error::Signature)),
                    "{}", algo.name);
            }
        }
    }

    #[test]
    fn test_encode_decode() {
        for privkey in test_keys() {
            let pubkey = privkey.pubkey();
            assert_eq!(Pubkey::decode(pubkey.encode()).unwrap(), pubkey);
        }
    }

    #[test]
    fn test_wrong_key_type() {
        let ed = ed25519_privkey(2);
        let signature = (SSH_ED25519.sign)(&ed, b"data").unwrap();
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(12);
        let p256_pubkey = Pubkey::EcdsaP256(EcdsaP256Privkey::from(p256::ecdsa::SigningKey::random(&mut rng)).pubkey());
        assert!(matches!((SSH_ED25519.verify)(&p256_pubkey, b"data", signature), Err(Error::PubkeyFormat)));
        assert!(!p256_pubkey.supports_algo(&SSH_ED25519));
    }

    #[test]
    fn test_fingerprint() {
        let fingerprint = ed25519_privkey(3).pubkey().fingerprint();
        assert!(fingerprint.starts_with("SHA256:"));
        assert_eq!(fingerprint.len(), "SHA256:".len() + 43);
    }

    #[test]
    fn test_by_name() {
        assert_eq!(by_name("rsa-sha2-512").unwrap().name, "rsa-sha2-512");
        assert!(by_name("ssh-dss").is_none());
    }
}
