use bytes::Bytes;
use derivative::Derivative;
use parking_lot::Mutex;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use crate::auth::{self, AuthPolicy, AuthState, ServerAuthConfig, ServerAuthState};
use crate::cipher::CipherAlgo;
use crate::compress::CompressAlgo;
use crate::conn::{
    self, Channel, ChannelReceiver, ChannelConfig, GlobalReply, GlobalRequest,
    Tunnel, TunnelAddrs, TunnelReceiver,
};
use crate::error::{Result, Error, DisconnectError};
use crate::kex::{GroupExchangeConfig, KexAlgo};
use crate::mac::MacAlgo;
use crate::pubkey::{Privkey, PubkeyAlgo};
use crate::transport::{self, negotiate, state, Event, Role, TransportConfig, TransportState};
use super::server_event::ServerEvent;

/// Handle to an SSH connection from the server side.
///
/// Use this object to send requests to the client. In tandem, you also need [`ServerReceiver`] to
/// authenticate the client and accept its channels, and [`ServerFuture`] to perform the actual
/// I/O.
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Server {
    transport_st: Weak<Mutex<TransportState>>,
}

impl Server {
    /// Serves an SSH connection that a client made over `stream`.
    ///
    /// We don't perform any I/O in this method. You should use the returned objects as follows:
    ///
    /// - [`Server`] to open channels to the client or to disconnect.
    /// - [`ServerReceiver`] to receive [`ServerEvent`]s: decide the authentication requests and
    /// accept or reject the channels. You **must** receive these events, otherwise the server
    /// stalls.
    /// - [`ServerFuture`] that you must poll to drive the connection.
    ///
    /// Fails if `config` contains no host key.
    pub fn accept<IO>(stream: IO, config: ServerConfig) -> Result<(Server, ServerReceiver, ServerFuture<IO>)>
        where IO: AsyncRead + AsyncWrite
    {
        if config.host_keys.is_empty() {
            return Err(Error::KeyExchange("the server has no host keys"))
        }

        let (event_tx, event_rx) = mpsc::channel(1);
        let auth_st = AuthState::Server(Box::new(ServerAuthState::new(config.auth_config())));
        let transport_st = transport::new_transport(
            Role::Server, config.transport_config(), auth_st, event_tx)?;

        let server = Server { transport_st: Arc::downgrade(&transport_st) };
        let server_rx = ServerReceiver { event_rx };
        let server_fut = ServerFuture { transport_st, stream };
        Ok((server, server_rx, server_fut))
    }

    fn upgrade(&self) -> Result<Arc<Mutex<TransportState>>> {
        self.transport_st.upgrade().ok_or(Error::ConnectionLost)
    }

    /// Returns true if the client has been authenticated.
    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(auth::is_authenticated(&self.upgrade()?.lock()))
    }

    /// Opens a raw SSH channel to the client (low level API).
    ///
    /// This method waits until the client is authenticated.
    pub async fn open_channel(&self, channel_type: String, config: ChannelConfig, open_payload: Bytes)
        -> Result<(Channel, ChannelReceiver, Bytes)>
    {
        conn::open_channel(&self.transport_st, channel_type, config, open_payload).await
    }

    /// Forwards a connection that we accepted on a port bound by `"tcpip-forward"` to the client
    /// (a `"forwarded-tcpip"` channel, RFC 4254, section 7.2).
    pub async fn forward_tunnel(&self, config: ChannelConfig, addrs: TunnelAddrs)
        -> Result<(Tunnel, TunnelReceiver)>
    {
        conn::open_tunnel(&self.transport_st, "forwarded-tcpip", config, &addrs).await
    }

    /// Sends a global request to the client and waits for the reply.
    pub async fn send_global_request(&self, request: GlobalRequest) -> Result<GlobalReply> {
        conn::global_request(&self.transport_st, request).await
    }

    /// Starts a key re-exchange and waits until it completes.
    pub async fn rekey(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let transport_mutex = self.upgrade()?;
            let mut st = transport_mutex.lock();
            negotiate::start_kex(&mut st, Some(done_tx));
            state::wakeup(&mut st);
        }
        done_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Disconnects the client. The [`ServerFuture`] returns after `SSH_MSG_DISCONNECT` is sent.
    pub fn disconnect(&self, error: DisconnectError) -> Result<()> {
        state::disconnect(&mut self.upgrade()?.lock(), error)
    }
}

/// Receiving half of a [`Server`].
///
/// You **must** receive the events, otherwise the server stalls when the internal buffer fills
/// up.
pub struct ServerReceiver {
    event_rx: mpsc::Receiver<Event>,
}

impl ServerReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the connection was closed.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            let event = self.event_rx.recv().await?;
            if let Some(event) = ServerEvent::from_event(event) {
                return Some(event)
            }
        }
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ServerEvent>> {
        loop {
            match futures_core::ready!(self.event_rx.poll_recv(cx)) {
                Some(event) => if let Some(event) = ServerEvent::from_event(event) {
                    return Poll::Ready(Some(event))
                },
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Future that drives the connection on the server.
#[pin_project]
pub struct ServerFuture<IO> {
    transport_st: Arc<Mutex<TransportState>>,
    #[pin] stream: IO,
}

impl<IO> ServerFuture<IO> {
    /// Deconstructs the future and gives the `IO` back to you.
    pub fn into_stream(self) -> IO {
        self.stream
    }
}

impl<IO> Future for ServerFuture<IO>
    where IO: AsyncRead + AsyncWrite
{
    type Output = Result<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        let this = self.project();
        let mut st = this.transport_st.lock();
        transport::poll_transport(&mut st, this.stream, cx)
    }
}

/// Configuration of a [`Server`].
///
/// You must add at least one host key to [`host_keys`][Self::host_keys]. Start from the
/// [default][Default] and modify it with [`ServerConfig::with()`].
///
/// This struct is `#[non_exhaustive]`.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct ServerConfig {
    /// Supported [key exchange algorithms][crate::kex]. The client's order of preference wins.
    pub kex_algos: Vec<&'static KexAlgo>,
    /// Supported host key algorithms. We only offer the algorithms supported by some key in
    /// [`host_keys`][Self::host_keys].
    pub host_key_algos: Vec<&'static PubkeyAlgo>,
    /// Supported [encryption algorithms][crate::cipher].
    pub cipher_algos: Vec<&'static CipherAlgo>,
    /// Supported [message authentication algorithms][crate::mac].
    pub mac_algos: Vec<&'static MacAlgo>,
    /// Supported [compression algorithms][crate::compress].
    pub compress_algos: Vec<&'static CompressAlgo>,
    /// Start key re-exchange after this many bytes in either direction.
    pub rekey_after_bytes: u64,
    /// Start key re-exchange after this many packets in either direction.
    pub rekey_after_packets: u64,
    /// Groups that we offer in `"diffie-hellman-group-exchange-*"`.
    pub gex: GroupExchangeConfig,
    /// Private host keys of the server.
    #[cfg_attr(not(feature = "debug_less_secure"), derivative(Debug = "ignore"))]
    pub host_keys: Vec<Privkey>,
    /// Authentication methods that we advertise to the client, such as `"password"` and
    /// `"publickey"`.
    pub auth_methods: Vec<String>,
    /// Methods that the client must pass before we let it in.
    pub auth_policy: AuthPolicy,
    /// Delay before we reply to a rejected password or public key.
    pub auth_failure_delay: Duration,
    /// Number of failed attempts after which we disconnect the client.
    pub max_auth_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            kex_algos: transport::default_kex_algos(),
            host_key_algos: transport::default_pubkey_algos(),
            cipher_algos: transport::default_cipher_algos(),
            mac_algos: transport::default_mac_algos(),
            compress_algos: transport::default_compress_algos(),
            rekey_after_bytes: transport::DEFAULT_REKEY_AFTER_BYTES,
            rekey_after_packets: transport::DEFAULT_REKEY_AFTER_PACKETS,
            gex: GroupExchangeConfig::default(),
            host_keys: Vec::new(),
            auth_methods: vec!["publickey".into(), "password".into()],
            auth_policy: AuthPolicy::Any,
            auth_failure_delay: Duration::from_secs(1),
            max_auth_attempts: 20,
        }
    }
}

impl ServerConfig {
    /// Default configuration with higher compatibility and lower security.
    ///
    /// Adds support for outdated and potentially insecure crypto, notably SHA-1. **Use at your own
    /// risk!**
    pub fn default_compatible_less_secure() -> ServerConfig {
        Self::default().with(|c| {
            c.kex_algos.extend_from_slice(&transport::compatible_kex_algos());
            c.host_key_algos.push(&crate::pubkey::SSH_RSA);
            c.cipher_algos.extend_from_slice(&transport::compatible_cipher_algos());
            c.mac_algos.extend_from_slice(&transport::compatible_mac_algos());
        })
    }

    /// Mutate `self` in a closure.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }

    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            kex_algos: self.kex_algos.clone(),
            pubkey_algos: self.host_key_algos.clone(),
            cipher_algos: self.cipher_algos.clone(),
            mac_algos: self.mac_algos.clone(),
            compress_algos: self.compress_algos.clone(),
            rekey_after_bytes: self.rekey_after_bytes.min(transport::DEFAULT_REKEY_AFTER_BYTES),
            rekey_after_packets: self.rekey_after_packets.min(transport::DEFAULT_REKEY_AFTER_PACKETS),
            gex: self.gex.clone(),
            host_keys: self.host_keys.clone(),
        }
    }

    fn auth_config(&self) -> ServerAuthConfig {
        ServerAuthConfig {
            methods: self.auth_methods.clone(),
            policy: self.auth_policy.clone(),
            failure_delay: self.auth_failure_delay,
            max_attempts: self.max_auth_attempts.max(1),
        }
    }
}
