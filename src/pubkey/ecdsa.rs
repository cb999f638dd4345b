use bytes::Bytes;
use num_bigint_dig::BigUint;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, Privkey, SignatureVerified};

/// "ecdsa-sha2-nistp256" public key algorithm from RFC 5656.
///
/// This algorithm is compatible with [`EcdsaP256Pubkey`] and [`EcdsaP256Privkey`].
pub static ECDSA_SHA2_NISTP256: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp256",
    verify: nistp256::verify,
    sign: nistp256::sign,
};

/// "ecdsa-sha2-nistp384" public key algorithm from RFC 5656.
///
/// This algorithm is compatible with [`EcdsaP384Pubkey`] and [`EcdsaP384Privkey`].
pub static ECDSA_SHA2_NISTP384: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp384",
    verify: nistp384::verify,
    sign: nistp384::sign,
};

/// ECDSA public key on the NIST P-256 curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaP256Pubkey {
    pub(crate) verifying: p256::ecdsa::VerifyingKey,
}

/// ECDSA private key on the NIST P-256 curve.
#[derive(Clone)]
pub struct EcdsaP256Privkey {
    pub(crate) signing: p256::ecdsa::SigningKey,
}

/// ECDSA public key on the NIST P-384 curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaP384Pubkey {
    pub(crate) verifying: p384::ecdsa::VerifyingKey,
}

/// ECDSA private key on the NIST P-384 curve.
#[derive(Clone)]
pub struct EcdsaP384Privkey {
    pub(crate) signing: p384::ecdsa::SigningKey,
}

/// Generates the signing, verification and wire encoding for one curve. The curves differ only
/// in types and names, the `ecdsa` crate does the rest.
macro_rules! ecdsa_curve {
    (
        mod $mod_name:ident, $curve:ident, $algo_name:literal, $curve_name:literal,
        $variant:ident, $pubkey:ident, $privkey:ident
    ) => {
        pub(super) mod $mod_name {
            use $curve::ecdsa::{Signature, VerifyingKey};
            use super::*;

            pub fn verify(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
                let Pubkey::$variant(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };

                let mut signature = PacketDecode::new(signature);
                if signature.get_string()? != $algo_name {
                    return Err(Error::Decode("unexpected ecdsa signature format"))
                }

                // RFC 5656, section 3.1.2
                let mut signature_blob = PacketDecode::new(signature.get_bytes()?);
                let r = to_field_bytes(signature_blob.get_biguint()?)?;
                let s = to_field_bytes(signature_blob.get_biguint()?)?;
                let ecdsa_signature = Signature::from_scalars(r, s)
                    .map_err(|_| Error::Signature)?;

                use ::ecdsa::signature::Verifier as _;
                match pubkey.verifying.verify(message, &ecdsa_signature) {
                    Ok(_) => Ok(SignatureVerified::assertion()),
                    Err(_) => Err(Error::Signature),
                }
            }

            pub fn sign(privkey: &Privkey, message: &[u8]) -> Result<Bytes> {
                let Privkey::$variant(privkey) = privkey else { return Err(Error::PrivkeyFormat) };

                use ::ecdsa::signature::Signer as _;
                let ecdsa_signature: Signature = privkey.signing.try_sign(message)
                    .map_err(|_| Error::Crypto("could not sign with ecdsa"))?;
                let (r, s) = ecdsa_signature.split_bytes();

                let mut signature_blob = PacketEncode::new();
                signature_blob.put_biguint(&BigUint::from_bytes_be(&r));
                signature_blob.put_biguint(&BigUint::from_bytes_be(&s));

                let mut signature = PacketEncode::new();
                signature.put_str($algo_name);
                signature.put_bytes(&signature_blob.finish());
                Ok(signature.finish())
            }

            fn to_field_bytes(scalar: BigUint) -> Result<$curve::FieldBytes> {
                let scalar = scalar.to_bytes_be();
                let mut field_bytes = $curve::FieldBytes::default();
                if scalar.len() > field_bytes.len() {
                    return Err(Error::Signature)
                }
                let offset = field_bytes.len() - scalar.len();
                field_bytes[offset..].copy_from_slice(&scalar);
                Ok(field_bytes)
            }

            pub fn encode_pubkey(blob: &mut PacketEncode, pubkey: &$pubkey) {
                blob.put_str($algo_name);
                blob.put_str($curve_name);
                blob.put_bytes(pubkey.verifying.to_encoded_point(false).as_bytes());
            }

            pub fn decode_pubkey(blob: &mut PacketDecode) -> Result<$pubkey> {
                if blob.get_string()? != $curve_name {
                    return Err(Error::Decode("ecdsa public key has unexpected curve"))
                }
                let point = blob.get_bytes()?;
                let verifying = VerifyingKey::from_sec1_bytes(&point)
                    .map_err(|_| Error::Decode("ecdsa public key is not valid"))?;
                Ok($pubkey { verifying })
            }

            impl $privkey {
                /// Get the public key associated with this private key.
                pub fn pubkey(&self) -> $pubkey {
                    $pubkey { verifying: self.signing.verifying_key().clone() }
                }
            }

            impl From<VerifyingKey> for $pubkey {
                fn from(verifying: VerifyingKey) -> Self { Self { verifying } }
            }

            impl From<$curve::ecdsa::SigningKey> for $privkey {
                fn from(signing: $curve::ecdsa::SigningKey) -> Self { Self { signing } }
            }

            impl From<$curve::SecretKey> for $privkey {
                fn from(secret: $curve::SecretKey) -> Self { Self { signing: secret.into() } }
            }

            impl PartialEq for $privkey {
                fn eq(&self, other: &Self) -> bool {
                    self.signing.to_bytes() == other.signing.to_bytes()
                }
            }
            impl Eq for $privkey {}

            #[cfg(feature = "debug_less_secure")]
            impl fmt::Debug for $privkey {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    f.debug_struct(stringify!($privkey)).field("pubkey", &self.pubkey()).finish()
                }
            }

            impl fmt::Display for $pubkey {
                fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                    let point = self.verifying.to_encoded_point(true);
                    write!(f, "{} {:x}", $curve_name, Bytes::copy_from_slice(point.as_bytes()))
                }
            }
        }
    };
}

ecdsa_curve!(mod nistp256, p256, "ecdsa-sha2-nistp256", "nistp256", EcdsaP256, EcdsaP256Pubkey, EcdsaP256Privkey);
ecdsa_curve!(mod nistp384, p384, "ecdsa-sha2-nistp384", "nistp384", EcdsaP384, EcdsaP384Pubkey, EcdsaP384Privkey);
