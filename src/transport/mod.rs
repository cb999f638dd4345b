//! Transport layer of SSH (RFC 4253), shared by the client and the server.
//!
//! The whole connection is one [`TransportState`] behind a mutex. The future returned to the user
//! locks the state and runs [`poll_transport()`], which pumps the individual state machines
//! (negotiation, authentication, connection) until none of them can make progress.
use derivative::Derivative;
use crate::cipher::{self, CipherAlgo};
use crate::compress::{self, CompressAlgo};
use crate::kex::{self, GroupExchangeConfig, KexAlgo};
use crate::mac::{self, MacAlgo};
use crate::pubkey::{self, PubkeyAlgo, Privkey};
pub(crate) use self::event::{AcceptPubkeySender, DebugMsg, Event};
pub(crate) use self::pump::Pump;
pub(crate) use self::recv::{RecvState, ResultRecvState};
pub(crate) use self::state::{TransportState, new_transport, poll_transport};

#[macro_use] mod pump;
pub(crate) mod event;
pub(crate) mod negotiate;
pub(crate) mod recv;
pub(crate) mod state;

/// Side of the connection that we implement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// We are the client: we verify the host key and authenticate ourselves.
    Client,
    /// We are the server: we sign with the host key and authenticate the client.
    Server,
}

/// Selects the first name in `preferred` that also appears in `offered`.
///
/// This is the algorithm negotiation rule from RFC 4253, section 7.1: both peers call it with the
/// client's list as `preferred` and the server's list as `offered`, so they reach the same result.
pub fn negotiate_algo<'a, P: AsRef<str>, O: AsRef<str>>(preferred: &'a [P], offered: &[O]) -> Option<&'a str> {
    preferred.iter()
        .map(|name| name.as_ref())
        .find(|name| offered.iter().any(|offered| offered.as_ref() == *name))
}

/// Algorithms and limits of the transport layer, common to both roles.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub(crate) struct TransportConfig {
    pub kex_algos: Vec<&'static KexAlgo>,
    pub pubkey_algos: Vec<&'static PubkeyAlgo>,
    pub cipher_algos: Vec<&'static CipherAlgo>,
    pub mac_algos: Vec<&'static MacAlgo>,
    pub compress_algos: Vec<&'static CompressAlgo>,
    pub rekey_after_bytes: u64,
    pub rekey_after_packets: u64,
    pub gex: GroupExchangeConfig,
    /// Host keys of the server, empty on the client.
    #[cfg_attr(not(feature = "debug_less_secure"), derivative(Debug = "ignore"))]
    pub host_keys: Vec<Privkey>,
}

/// Rekey after 1 GiB, as recommended by RFC 4253, section 9.
pub(crate) const DEFAULT_REKEY_AFTER_BYTES: u64 = 1 << 30;
/// Rekey after 2^28 packets, well before the sequence numbers wrap (RFC 4344, section 3.1).
pub(crate) const DEFAULT_REKEY_AFTER_PACKETS: u64 = 1 << 28;

pub(crate) fn default_kex_algos() -> Vec<&'static KexAlgo> {
    vec![
        &kex::CURVE25519_SHA256, &kex::CURVE25519_SHA256_LIBSSH,
        &kex::DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256,
        &kex::DIFFIE_HELLMAN_GROUP14_SHA256,
        &kex::DIFFIE_HELLMAN_GROUP16_SHA512, &kex::DIFFIE_HELLMAN_GROUP18_SHA512,
    ]
}

pub(crate) fn compatible_kex_algos() -> [&'static KexAlgo; 3] {
    [
        &kex::DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1,
        &kex::DIFFIE_HELLMAN_GROUP14_SHA1,
        &kex::DIFFIE_HELLMAN_GROUP1_SHA1,
    ]
}

pub(crate) fn default_pubkey_algos() -> Vec<&'static PubkeyAlgo> {
    vec![
        &pubkey::SSH_ED25519,
        &pubkey::ECDSA_SHA2_NISTP256, &pubkey::ECDSA_SHA2_NISTP384,
        &pubkey::RSA_SHA2_256, &pubkey::RSA_SHA2_512,
    ]
}

pub(crate) fn default_cipher_algos() -> Vec<&'static CipherAlgo> {
    vec![
        &cipher::CHACHA20_POLY1305,
        &cipher::AES128_GCM, &cipher::AES256_GCM,
        &cipher::AES128_CTR, &cipher::AES192_CTR, &cipher::AES256_CTR,
    ]
}

pub(crate) fn compatible_cipher_algos() -> [&'static CipherAlgo; 3] {
    [&cipher::AES128_CBC, &cipher::AES192_CBC, &cipher::AES256_CBC]
}

pub(crate) fn default_mac_algos() -> Vec<&'static MacAlgo> {
    vec![
        &mac::HMAC_SHA2_256_ETM, &mac::HMAC_SHA2_512_ETM,
        &mac::HMAC_SHA2_256, &mac::HMAC_SHA2_512,
    ]
}

pub(crate) fn compatible_mac_algos() -> [&'static MacAlgo; 2] {
    [&mac::HMAC_SHA1_ETM, &mac::HMAC_SHA1]
}

pub(crate) fn default_compress_algos() -> Vec<&'static CompressAlgo> {
    vec![&compress::NONE, &compress::ZLIB_OPENSSH, &compress::ZLIB]
}
