use std::fmt;
use crate::codes::{disconnect, open};

/// Result type for our [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error that occured while handling an SSH connection.
///
/// This enum is `#[non_exhaustive]`, new variants may be added in minor releases.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    #[error("cryptography error: {0}")]
    Crypto(&'static str),
    #[error("randomness error: {0}")]
    Random(&'static str),
    #[error("mac verification failed")]
    Mac,
    #[error("signature verification failed")]
    Signature,
    #[error("public key does not match the algorithm")]
    PubkeyFormat,
    #[error("private key does not match the algorithm")]
    PrivkeyFormat,
    #[error("server public key was not accepted")]
    PubkeyAccept(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    #[error("unsupported protocol version {0:?}")]
    ProtocolVersion(String),
    #[error("could not decode bytes: {0}")]
    Decode(&'static str),
    #[error("compression error: {0}")]
    Compress(&'static str),
    #[error("could not negotiate algorithm: {0}")]
    AlgoNegotiate(AlgoNegotiateError),
    #[error("key exchange failed: {0}")]
    KeyExchange(&'static str),
    #[error("service {0:?} is not available")]
    ServiceNotAvailable(String),
    #[error("too many failed authentication attempts")]
    AuthAttempts,
    #[error("packet {0} not implemented")]
    PacketNotImplemented(u8),
    #[error("another authentication method is pending")]
    AuthMethodPending,
    #[error("authentication method was aborted")]
    AuthAborted,
    #[error("authentication failed")]
    AuthFailed,
    #[error("channel is closed")]
    ChannelClosed,
    #[error("could not open channel: {0}")]
    ChannelOpen(ChannelOpenError),
    #[error("channel request failed")]
    ChannelReq,
    #[error("global request failed")]
    GlobalReq,
    #[error("connection was lost")]
    ConnectionLost,
    #[error("IO error when reading")]
    ReadIo(#[source] std::io::Error),
    #[error("IO error when writing")]
    WriteIo(#[source] std::io::Error),
    #[error("connection unexpectedly closed by peer")]
    PeerClosed,
    #[error("peer disconnected: {0}")]
    PeerDisconnected(DisconnectError),
    #[error("we disconnected: {0}")]
    Disconnected(DisconnectError),
}

impl Error {
    /// Reason code that we send to the peer in `SSH_MSG_DISCONNECT` when this error terminates
    /// the connection, or `None` if no disconnect should be sent.
    pub fn disconnect_reason(&self) -> Option<u32> {
        Some(match self {
            Error::Mac => disconnect::MAC_ERROR,
            Error::Compress(_) => disconnect::COMPRESSION_ERROR,
            Error::AlgoNegotiate(_) | Error::KeyExchange(_) | Error::Signature =>
                disconnect::KEY_EXCHANGE_FAILED,
            Error::PubkeyAccept(_) => disconnect::HOST_KEY_NOT_VERIFIABLE,
            Error::ProtocolVersion(_) => disconnect::PROTOCOL_VERSION_NOT_SUPPORTED,
            Error::ServiceNotAvailable(_) => disconnect::SERVICE_NOT_AVAILABLE,
            Error::AuthAttempts => disconnect::NO_MORE_AUTH_METHODS_AVAILABLE,
            Error::Protocol(_) | Error::Decode(_) | Error::PacketNotImplemented(_) =>
                disconnect::PROTOCOL_ERROR,
            Error::Crypto(_) | Error::Random(_) => disconnect::BY_APPLICATION,
            _ => return None,
        })
    }
}

/// Error that occured because we could not negotiate an algorithm.
///
/// Both peers offer a list of algorithms for every category (RFC 4253, section 7.1). This error
/// occurs when the two lists for some category do not intersect.
#[derive(Debug, Clone, thiserror::Error)]
#[error("for {algo_name:}, our algos are {our_algos:?}, their algos are {their_algos:?}")]
pub struct AlgoNegotiateError {
    /// Human readable name of the algorithm category.
    pub algo_name: String,
    /// The algorithms offered by us.
    pub our_algos: Vec<String>,
    /// The algorithms offered by the peer.
    pub their_algos: Vec<String>,
}

/// Disconnect reason carried by `SSH_MSG_DISCONNECT` (RFC 4253, section 11.1).
#[derive(Debug, Clone, thiserror::Error)]
pub struct DisconnectError {
    /// Machine-readable reason code (see [`codes::disconnect`][crate::codes::disconnect]).
    pub reason_code: u32,
    /// Human-readable description of the error.
    pub description: String,
    /// Language tag of `description` (per RFC 3066).
    pub description_lang: String,
}

impl DisconnectError {
    /// Disconnect "by application" with an empty description.
    pub fn by_app() -> Self {
        Self::new(disconnect::BY_APPLICATION, "")
    }

    pub(crate) fn new(reason_code: u32, description: impl Into<String>) -> Self {
        Self { reason_code, description: description.into(), description_lang: String::new() }
    }

    /// Translates the [`reason_code`][Self::reason_code] into a string.
    pub fn reason_to_str(&self) -> Option<&'static str> {
        disconnect::to_str(self.reason_code)
    }
}

impl fmt::Display for DisconnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_reason(f, disconnect::to_str(self.reason_code), self.reason_code, &self.description)
    }
}

/// Reason why a channel could not be opened (RFC 4254, section 5.1).
#[derive(Debug, Clone, thiserror::Error)]
pub struct ChannelOpenError {
    /// Machine-readable reason code (see [`codes::open`][crate::codes::open]).
    pub reason_code: u32,
    /// Human-readable description of the error.
    pub description: String,
    /// Language tag of `description` (per RFC 3066).
    pub description_lang: String,
}

impl ChannelOpenError {
    /// Error with the given reason code and description.
    pub fn new(reason_code: u32, description: impl Into<String>) -> Self {
        Self { reason_code, description: description.into(), description_lang: String::new() }
    }
}

impl fmt::Display for ChannelOpenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt_reason(f, open::to_str(self.reason_code), self.reason_code, &self.description)
    }
}

fn fmt_reason(
    f: &mut fmt::Formatter,
    reason: Option<&'static str>,
    reason_code: u32,
    description: &str,
) -> fmt::Result {
    write!(f, "peer returned error ")?;
    if let Some(reason) = reason {
        write!(f, "`{}` ({})", reason, reason_code)?;
    } else {
        write!(f, "{}", reason_code)?;
    }
    if !description.is_empty() {
        write!(f, ": {:?}", description)?;
    }
    Ok(())
}
