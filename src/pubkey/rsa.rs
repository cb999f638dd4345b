use bytes::Bytes;
use num_bigint_dig::BigUint;
use rsa::Pkcs1v15Sign;
use rsa::traits::PublicKeyParts as _;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, Privkey, SignatureVerified};

/// "rsa-sha2-256" public key algorithm from RFC 8332.
///
/// This algorithm is compatible with [`RsaPubkey`] and [`RsaPrivkey`].
pub static RSA_SHA2_256: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-256",
    verify: verify::<sha2::Sha256>,
    sign: sign::<sha2::Sha256>,
};

/// "rsa-sha2-512" public key algorithm from RFC 8332.
///
/// This algorithm is compatible with [`RsaPubkey`] and [`RsaPrivkey`].
pub static RSA_SHA2_512: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-512",
    verify: verify::<sha2::Sha512>,
    sign: sign::<sha2::Sha512>,
};

/// "ssh-rsa" public key algorithm from RFC 4253, which uses SHA-1.
///
/// This algorithm is compatible with [`RsaPubkey`] and [`RsaPrivkey`]. It is not secure and is
/// offered only by the "compatible" configurations.
pub static SSH_RSA: PubkeyAlgo = PubkeyAlgo {
    name: "ssh-rsa",
    verify: verify::<sha1::Sha1>,
    sign: sign::<sha1::Sha1>,
};

/// RSA public key.
///
/// You can convert it to and from [`rsa::RsaPublicKey`] using `from()`/`into()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPubkey {
    pub(crate) pubkey: rsa::RsaPublicKey,
}

/// RSA private key.
///
/// You can convert it to and from [`rsa::RsaPrivateKey`] using `from()`/`into()`.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "debug_less_secure", derive(Debug))]
pub struct RsaPrivkey {
    pub(crate) privkey: rsa::RsaPrivateKey,
}

impl RsaPrivkey {
    /// Get the public key associated with this private key.
    pub fn pubkey(&self) -> RsaPubkey {
        RsaPubkey { pubkey: self.privkey.to_public_key() }
    }
}

/// Digests that RSA signatures in SSH are made with, together with the algorithm name that labels
/// the signature.
trait SignatureHash: sha2::Digest + sha2::digest::const_oid::AssociatedOid {
    const SIGNATURE_NAME: &'static str;
}

impl SignatureHash for sha2::Sha256 {
    const SIGNATURE_NAME: &'static str = "rsa-sha2-256";
}

impl SignatureHash for sha2::Sha512 {
    const SIGNATURE_NAME: &'static str = "rsa-sha2-512";
}

impl SignatureHash for sha1::Sha1 {
    const SIGNATURE_NAME: &'static str = "ssh-rsa";
}

fn verify<H: SignatureHash>(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Rsa(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };

    let mut signature = PacketDecode::new(signature);
    if signature.get_string()? != H::SIGNATURE_NAME {
        return Err(Error::Decode("unexpected rsa signature format"))
    }

    // some implementations strip leading zeros from the signature
    let signature_data = signature.get_bytes()?;
    let modulus_len = pubkey.pubkey.size();
    if signature_data.len() > modulus_len {
        return Err(Error::Signature)
    }
    let mut padded = vec![0; modulus_len - signature_data.len()];
    padded.extend_from_slice(&signature_data);

    let hashed = H::digest(message);
    match pubkey.pubkey.verify(Pkcs1v15Sign::new::<H>(), &hashed, &padded) {
        Ok(_) => Ok(SignatureVerified::assertion()),
        Err(_) => Err(Error::Signature),
    }
}

fn sign<H: SignatureHash>(privkey: &Privkey, message: &[u8]) -> Result<Bytes> {
    let Privkey::Rsa(privkey) = privkey else { return Err(Error::PrivkeyFormat) };

    let hashed = H::digest(message);
    let signature_data = privkey.privkey.sign(Pkcs1v15Sign::new::<H>(), &hashed)
        .map_err(|_| Error::Crypto("could not sign with rsa"))?;

    let mut signature = PacketEncode::new();
    signature.put_str(H::SIGNATURE_NAME);
    signature.put_bytes(&signature_data);
    Ok(signature.finish())
}

pub(super) fn encode_pubkey(blob: &mut PacketEncode, pubkey: &RsaPubkey) {
    blob.put_str("ssh-rsa");
    blob.put_biguint(&BigUint::from_bytes_be(&pubkey.pubkey.e().to_bytes_be()));
    blob.put_biguint(&BigUint::from_bytes_be(&pubkey.pubkey.n().to_bytes_be()));
}

pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<RsaPubkey> {
    let e = blob.get_biguint()?;
    let n = blob.get_biguint()?;
    let e = rsa::BigUint::from_bytes_be(&e.to_bytes_be());
    let n = rsa::BigUint::from_bytes_be(&n.to_bytes_be());
    let pubkey = rsa::RsaPublicKey::new(n, e)
        .map_err(|_| Error::Decode("rsa public key is not valid"))?;
    Ok(RsaPubkey { pubkey })
}

impl From<rsa::RsaPublicKey> for RsaPubkey {
    fn from(pubkey: rsa::RsaPublicKey) -> Self { Self { pubkey } }
}

impl From<RsaPubkey> for rsa::RsaPublicKey {
    fn from(pubkey: RsaPubkey) -> Self { pubkey.pubkey }
}

impl From<rsa::RsaPrivateKey> for RsaPrivkey {
    fn from(privkey: rsa::RsaPrivateKey) -> Self { Self { privkey } }
}

impl From<RsaPrivkey> for rsa::RsaPrivateKey {
    fn from(privkey: RsaPrivkey) -> Self { privkey.privkey }
}

impl fmt::Display for RsaPubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rsa {} bits, e {}", self.pubkey.n().bits(), self.pubkey.e())
    }
}
