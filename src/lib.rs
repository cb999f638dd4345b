//! Asynchronous SSH v2 protocol engine in pure Rust, for both clients and servers.
//!
//! The crate implements the three layers of SSH: the transport (RFC 4253) with key exchange and
//! rekeying, user authentication (RFC 4252) and the connection protocol (RFC 4254) with sessions,
//! TCP/IP tunnels and global requests.
//!
//! - To connect to a server, start with [`Client::open()`].
//! - To serve a connection, start with [`Server::accept()`].
//!
//! Both return a handle, a receiver of events and a future that performs the I/O. You must poll
//! the future (typically in a task of its own) and receive the events, otherwise the connection
//! stalls.
//!
//! We never touch the network ourselves: you supply any stream that implements
//! [`AsyncRead`][tokio::io::AsyncRead] and [`AsyncWrite`][tokio::io::AsyncWrite].
#![allow(clippy::box_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::unused_unit)]
#![allow(clippy::unit_arg)]
#![allow(clippy::module_inception)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

pub use crate::auth::{
    AuthBanner, AuthFailure, AuthMethodRequest, AuthNoneResult, AuthPasswordPrompt,
    AuthPasswordResult, AuthPolicy, AuthPubkeyResult, AuthRequest,
};
pub use crate::client::{
    Client, ClientReceiver, ClientFuture, ClientConfig, ClientEvent,
    Session, SessionReceiver, SessionEvent, SessionReply,
};
pub use crate::codec::{PacketEncode, PacketDecode};
pub use crate::conn::{
    AcceptChannel, Channel, ChannelReceiver, ChannelEvent, ChannelReq, ChannelReply, ChannelConfig,
    DataType, DATA_STANDARD, DATA_STDERR,
};
pub use crate::conn::{GlobalReply, GlobalRequest, GlobalRequestEvent};
pub use crate::conn::{ExitSignal, PtyRequest, PtyTerminalModes, SessionRequest, WindowChange};
pub use crate::conn::{
    Tunnel, TunnelAddrs, TunnelEvent, TunnelReceiver, TunnelReader, TunnelWriter, TunnelStream,
};
pub use crate::error::{Result, Error, AlgoNegotiateError, DisconnectError, ChannelOpenError};
pub use crate::server::{
    Server, ServerReceiver, ServerFuture, ServerConfig, ServerEvent,
    ServerSession, ServerSessionReceiver, ServerSessionEvent, SessionRequestEvent,
};
pub use crate::transport::{negotiate_algo, Role};
pub use crate::transport::event::{AcceptPubkeySender, DebugMsg};

pub use self::cipher::CipherAlgo;
pub use self::compress::CompressAlgo;
pub use self::kex::{KexAlgo, DhGroup, GroupExchangeConfig};
pub use self::mac::MacAlgo;
pub use self::pubkey::{PubkeyAlgo, Pubkey, Privkey};

pub use bytes;
pub use ecdsa;
pub use ecdsa::elliptic_curve;
pub use ed25519_dalek;
pub use p256;
pub use p384;
pub use rsa;

#[macro_use] mod transport;
mod auth;
pub mod cipher;
mod client;
mod codec;
pub mod codes;
pub mod compress;
mod conn;
mod error;
pub mod kex;
pub mod mac;
pub mod pubkey;
mod server;
mod util;
