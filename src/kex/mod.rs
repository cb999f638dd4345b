//! Key exchange algorithms.
//!
//! The SSH protocol supports several key exchange (kex) algorithms, which are used to establish
//! the one-time keys used for message [encryption][crate::cipher] and
//! [authentication][crate::mac].
//!
//! The client and the server exchange lists of supported algorithms, and the first algorithm on
//! the client's list that is also supported by the server is used for the connection.
//!
//! # Supported algorithms
//!
//! - "curve25519-sha256" / "curve25519-sha256@libssh.org" ([`CURVE25519_SHA256`] /
//! [`CURVE25519_SHA256_LIBSSH`])
//! - "diffie-hellman-group-exchange-sha256" ([`DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256`])
//! - "diffie-hellman-group-exchange-sha1" ([`DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1`])
//! - "diffie-hellman-group14-sha256" ([`DIFFIE_HELLMAN_GROUP14_SHA256`])
//! - "diffie-hellman-group16-sha512" ([`DIFFIE_HELLMAN_GROUP16_SHA512`])
//! - "diffie-hellman-group18-sha512" ([`DIFFIE_HELLMAN_GROUP18_SHA512`])
//! - "diffie-hellman-group14-sha1" ([`DIFFIE_HELLMAN_GROUP14_SHA1`])
//! - "diffie-hellman-group1-sha1" ([`DIFFIE_HELLMAN_GROUP1_SHA1`])
use bytes::Bytes;
use derivative::Derivative;
use num_bigint_dig::BigUint;
use std::task::Poll;
use crate::Result;
use crate::codec::PacketDecode;
use crate::pubkey::{PubkeyAlgo, Privkey};
use crate::transport::Role;
use crate::util::CryptoRngCore;
pub use self::curve25519::{CURVE25519_SHA256, CURVE25519_SHA256_LIBSSH};
pub use self::dh::{
    DIFFIE_HELLMAN_GROUP1_SHA1, DIFFIE_HELLMAN_GROUP14_SHA1, DIFFIE_HELLMAN_GROUP14_SHA256,
    DIFFIE_HELLMAN_GROUP16_SHA512, DIFFIE_HELLMAN_GROUP18_SHA512,
};
pub use self::gex::{DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1, DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256};
pub use self::groups::DhGroup;

mod curve25519;
mod dh;
mod gex;
mod groups;

/// Algorithm for key exchange.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct KexAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) make_kex: fn(ctx: KexContext) -> Result<Box<dyn Kex + Send>>,
}

/// Parameters of the Diffie-Hellman group exchange (RFC 4419).
///
/// The client uses the sizes to request a group, the server chooses a group from
/// [`groups`][Self::groups].
#[derive(Debug, Clone)]
pub struct GroupExchangeConfig {
    /// Minimal size of the modulus in bits that the client accepts.
    pub min_bits: u32,
    /// Preferred size of the modulus in bits.
    pub preferred_bits: u32,
    /// Maximal size of the modulus in bits that the client accepts.
    pub max_bits: u32,
    /// Groups that the server offers to the clients.
    pub groups: Vec<DhGroup>,
}

impl Default for GroupExchangeConfig {
    fn default() -> Self {
        GroupExchangeConfig {
            min_bits: 1024,
            preferred_bits: 2048,
            max_bits: 8192,
            groups: vec![
                DhGroup::group2(), DhGroup::group14(), DhGroup::group16(), DhGroup::group18(),
            ],
        }
    }
}

pub(crate) struct KexContext<'a> {
    pub role: Role,
    pub rng: &'a mut dyn CryptoRngCore,
    pub gex: &'a GroupExchangeConfig,
}

pub(crate) struct KexInput<'a> {
    pub client_ident: &'a [u8],
    pub server_ident: &'a [u8],
    pub client_kex_init: &'a [u8],
    pub server_kex_init: &'a [u8],
    /// Our host key, only on the server.
    pub host_key: Option<(&'a Privkey, &'static PubkeyAlgo)>,
}

pub(crate) struct KexOutput {
    pub shared_secret: BigUint,
    pub exchange_hash: Vec<u8>,
    pub server_pubkey: Bytes,
    pub server_exchange_hash_sign: Bytes,
}

pub(crate) trait Kex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()>;
    fn send_packet(&mut self) -> Result<Option<Bytes>>;
    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>>;
    fn compute_hash(&self, data: &[u8]) -> Vec<u8>;
}

/// Looks up a key exchange algorithm by its name.
pub fn by_name(name: &str) -> Option<&'static KexAlgo> {
    [
        &CURVE25519_SHA256, &CURVE25519_SHA256_LIBSSH,
        &DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256, &DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1,
        &DIFFIE_HELLMAN_GROUP14_SHA256, &DIFFIE_HELLMAN_GROUP16_SHA512,
        &DIFFIE_HELLMAN_GROUP18_SHA512, &DIFFIE_HELLMAN_GROUP14_SHA1, &DIFFIE_HELLMAN_GROUP1_SHA1,
    ].into_iter().find(|algo| algo.name == name)
}

/// Exchange hash functions, shared by the Diffie-Hellman variants.
pub(crate) mod hash {
    pub fn sha1(data: &[u8]) -> Vec<u8> {
        use sha1::digest::Digest as _;
        sha1::Sha1::digest(data).to_vec()
    }

    pub fn sha256(data: &[u8]) -> Vec<u8> {
        use sha2::digest::Digest as _;
        sha2::Sha256::digest(data).to_vec()
    }

    pub fn sha512(data: &[u8]) -> Vec<u8> {
        use sha2::digest::Digest as _;
        sha2::Sha512::digest(data).to_vec()
    }
}

/// Signs the exchange hash with the server host key.
fn sign_exchange_hash(input: &KexInput, exchange_hash: &[u8]) -> Result<Bytes> {
    let Some((privkey, algo)) = input.host_key else {
        return Err(crate::Error::KeyExchange("server has no host key for the negotiated algorithm"))
    };
    (algo.sign)(privkey, exchange_hash)
}
