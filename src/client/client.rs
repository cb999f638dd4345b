use bytes::Bytes;
use parking_lot::Mutex;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use crate::auth::{self, AuthState, AuthNoneResult, AuthPasswordResult, AuthPubkeyResult};
use crate::auth::client::start_method;
use crate::auth::method::{AuthNone, AuthPassword, AuthPubkey, CheckPubkey};
use crate::cipher::CipherAlgo;
use crate::codec::PacketDecode;
use crate::compress::CompressAlgo;
use crate::conn::{
    self, Channel, ChannelReceiver, ChannelConfig, GlobalReply, GlobalRequest,
    Tunnel, TunnelAddrs, TunnelReceiver,
};
use crate::error::{Result, Error, DisconnectError};
use crate::kex::{GroupExchangeConfig, KexAlgo};
use crate::mac::MacAlgo;
use crate::pubkey::{Privkey, Pubkey, PubkeyAlgo};
use crate::transport::{self, negotiate, state, Event, Role, TransportConfig, TransportState};
use super::client_event::ClientEvent;
use super::session::{Session, SessionReceiver};

/// Handle to an SSH connection from the client side.
///
/// Use this object to send requests to the server. In tandem, you also need [`ClientReceiver`]
/// to handle events from the server, and [`ClientFuture`] to perform the actual I/O.
///
/// To open a connection, pass your I/O stream (such as `tokio::net::TcpStream`) to
/// [`Client::open()`] and authenticate using one of the `auth_*` methods. Once you are
/// authenticated, you can open sessions, tunnels and raw channels.
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Client {
    transport_st: Weak<Mutex<TransportState>>,
}

impl Client {
    /// Creates an SSH connection from an existing stream.
    ///
    /// We don't perform any I/O in this method. You should use the returned objects as follows:
    ///
    /// - [`Client`] to authenticate and then open channels.
    /// - [`ClientReceiver`] to receive [`ClientEvent`]s. The only event that you need to handle
    /// is [`ClientEvent::ServerPubkey`], but you **must** receive all events, otherwise the
    /// client stalls.
    /// - [`ClientFuture`] that you must poll to drive the connection. You will usually spawn a
    /// task for it.
    pub fn open<IO>(stream: IO, config: ClientConfig) -> Result<(Client, ClientReceiver, ClientFuture<IO>)>
        where IO: AsyncRead + AsyncWrite
    {
        let (event_tx, event_rx) = mpsc::channel(1);
        let auth_st = AuthState::Client(Box::default());
        let transport_st = transport::new_transport(
            Role::Client, config.transport_config(), auth_st, event_tx)?;

        let client = Client { transport_st: Arc::downgrade(&transport_st) };
        let client_rx = ClientReceiver { event_rx };
        let client_fut = ClientFuture { transport_st, stream };
        Ok((client, client_rx, client_fut))
    }

    fn upgrade(&self) -> Result<Arc<Mutex<TransportState>>> {
        self.transport_st.upgrade().ok_or(Error::ConnectionLost)
    }

    /// Try to authenticate using the "none" method (RFC 4252, section 5.2).
    ///
    /// This is mostly useful to learn the list of methods that can continue from the
    /// [`AuthFailure`][crate::AuthFailure].
    ///
    /// If you start another method before this one is resolved, it fails with
    /// [`Error::AuthMethodPending`].
    pub async fn auth_none(&self, username: String) -> Result<AuthNoneResult> {
        let (result_tx, result_rx) = oneshot::channel();
        let method = AuthNone::new(username, result_tx);
        start_method(&mut self.upgrade()?.lock(), Box::new(method))?;
        result_rx.await.map_err(|_| Error::AuthAborted)
    }

    /// Try to authenticate using the "password" method (RFC 4252, section 8).
    ///
    /// If the server wants you to change the password, you get
    /// [`AuthPasswordResult::ChangePassword`]; use
    /// [`auth_password_change()`][Self::auth_password_change()] to continue.
    pub async fn auth_password(&self, username: String, password: String) -> Result<AuthPasswordResult> {
        self.start_password(username, password, None).await
    }

    /// Try to authenticate using the "password" method and change the password to
    /// `new_password` at the same time.
    pub async fn auth_password_change(
        &self,
        username: String,
        password: String,
        new_password: String,
    ) -> Result<AuthPasswordResult> {
        self.start_password(username, password, Some(new_password)).await
    }

    async fn start_password(
        &self,
        username: String,
        password: String,
        new_password: Option<String>,
    ) -> Result<AuthPasswordResult> {
        let (result_tx, result_rx) = oneshot::channel();
        let method = AuthPassword::new(username, password, new_password, result_tx);
        start_method(&mut self.upgrade()?.lock(), Box::new(method))?;
        result_rx.await.map_err(|_| Error::AuthAborted)
    }

    /// Try to authenticate using the "publickey" method (RFC 4252, section 7).
    ///
    /// The `pubkey_algo` must be compatible with the `privkey`, otherwise you will get
    /// [`Error::PrivkeyFormat`].
    pub async fn auth_pubkey(
        &self,
        username: String,
        privkey: Privkey,
        pubkey_algo: &'static PubkeyAlgo,
    ) -> Result<AuthPubkeyResult> {
        let (result_tx, result_rx) = oneshot::channel();
        let method = AuthPubkey::new(username, privkey, pubkey_algo, result_tx);
        start_method(&mut self.upgrade()?.lock(), Box::new(method))?;
        result_rx.await.map_err(|_| Error::AuthAborted)?
    }

    /// Asks the server whether it would accept the "publickey" method with this key, without
    /// signing anything.
    pub async fn check_pubkey(
        &self,
        username: String,
        pubkey: Pubkey,
        pubkey_algo: &'static PubkeyAlgo,
    ) -> Result<bool> {
        let (result_tx, result_rx) = oneshot::channel();
        let method = CheckPubkey::new(username, pubkey, pubkey_algo, result_tx);
        start_method(&mut self.upgrade()?.lock(), Box::new(method))?;
        result_rx.await.map_err(|_| Error::AuthAborted)
    }

    /// Returns true if the server has authenticated you.
    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(auth::is_authenticated(&self.upgrade()?.lock()))
    }

    /// Opens an SSH session to execute a program or the shell.
    ///
    /// This method waits until you are authenticated.
    pub async fn open_session(&self, config: ChannelConfig) -> Result<(Session, SessionReceiver)> {
        let (channel, channel_rx, _) = self.open_channel("session".into(), config, Bytes::new()).await?;
        Ok(Session::new(channel, channel_rx))
    }

    /// Asks the server to connect to `target` and opens a `"direct-tcpip"` tunnel to it.
    ///
    /// `originator` is the address of the peer that initiated the connection on our side. This
    /// method waits until you are authenticated.
    pub async fn connect_tunnel(
        &self,
        config: ChannelConfig,
        target: (String, u16),
        originator: (String, u16),
    ) -> Result<(Tunnel, TunnelReceiver)> {
        let addrs = TunnelAddrs { target, originator };
        conn::open_tunnel(&self.transport_st, "direct-tcpip", config, &addrs).await
    }

    /// Opens a raw SSH channel (low level API, RFC 4254, section 5.1).
    ///
    /// `open_payload` is appended to `SSH_MSG_CHANNEL_OPEN` as the channel specific data, and the
    /// returned `Bytes` are the channel specific data from `SSH_MSG_CHANNEL_OPEN_CONFIRMATION`.
    ///
    /// This method waits until you are authenticated.
    pub async fn open_channel(&self, channel_type: String, config: ChannelConfig, open_payload: Bytes)
        -> Result<(Channel, ChannelReceiver, Bytes)>
    {
        conn::open_channel(&self.transport_st, channel_type, config, open_payload).await
    }

    /// Asks the server to listen on `bind_address` and `bind_port` and forward the accepted
    /// connections to us (`"tcpip-forward"`, RFC 4254, section 7.1).
    ///
    /// Returns the bound port, which differs from `bind_port` when you ask for port 0. The
    /// forwarded connections arrive as [`ClientEvent::Channel`] with type `"forwarded-tcpip"`.
    pub async fn bind_tunnel(&self, bind_address: String, bind_port: u16) -> Result<u16> {
        let request = GlobalRequest::TcpipForward { bind_address, bind_port: bind_port as u32 };
        let data = self.send_global_request(request).await?.success_or_error()?;
        if data.is_empty() {
            return Ok(bind_port)
        }
        let port = PacketDecode::new(data).get_u32()?;
        u16::try_from(port).map_err(|_| Error::Decode("bound port is out of range"))
    }

    /// Cancels a previous [`bind_tunnel()`][Self::bind_tunnel()].
    pub async fn unbind_tunnel(&self, bind_address: String, bind_port: u16) -> Result<()> {
        let request = GlobalRequest::CancelTcpipForward { bind_address, bind_port: bind_port as u32 };
        self.send_global_request(request).await?.success_or_error()?;
        Ok(())
    }

    /// Sends a global request and waits for the reply (RFC 4254, section 4).
    pub async fn send_global_request(&self, request: GlobalRequest) -> Result<GlobalReply> {
        conn::global_request(&self.transport_st, request).await
    }

    /// Sends a global request without asking for a reply.
    pub fn send_global_notification(&self, request: &GlobalRequest) -> Result<()> {
        conn::global_request_no_reply(&self.transport_st, request)
    }

    /// Starts a key re-exchange (RFC 4253, section 9) and waits until it completes.
    ///
    /// We rekey automatically after [`ClientConfig::rekey_after_bytes`] or
    /// [`ClientConfig::rekey_after_packets`]; use this method to rekey earlier. If an exchange is
    /// already in progress, we wait for it instead of starting another one.
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

    /// Disconnects from the server.
    ///
    /// We send `SSH_MSG_DISCONNECT` and then the [`ClientFuture`] returns. Use
    /// [`DisconnectError::by_app()`] as a reasonable default for `error`.
    pub fn disconnect(&self, error: DisconnectError) -> Result<()> {
        state::disconnect(&mut self.upgrade()?.lock(), error)
    }
}

/// Receiving half of a [`Client`].
///
/// You **must** receive the events, otherwise the client stalls when the internal buffer fills
/// up. If you don't handle [`ClientEvent::ServerPubkey`], the server key is rejected.
pub struct ClientReceiver {
    event_rx: mpsc::Receiver<Event>,
}

impl ClientReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the connection was closed.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            let event = self.event_rx.recv().await?;
            if let Some(event) = ClientEvent::from_event(event) {
                return Some(event)
            }
        }
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ClientEvent>> {
        loop {
            match futures_core::ready!(self.event_rx.poll_recv(cx)) {
                Some(event) => if let Some(event) = ClientEvent::from_event(event) {
                    return Poll::Ready(Some(event))
                },
                None => return Poll::Ready(None),
            }
        }
    }
}

/// Future that drives the connection.
///
/// This future performs the reads and writes on `IO`. You must poll it, usually by spawning a
/// task. It completes when the connection is closed or when an error happens.
#[pin_project]
pub struct ClientFuture<IO> {
    transport_st: Arc<Mutex<TransportState>>,
    #[pin] stream: IO,
}

impl<IO> ClientFuture<IO> {
    /// Deconstructs the future and gives the `IO` back to you.
    pub fn into_stream(self) -> IO {
        self.stream
    }
}

impl<IO> Future for ClientFuture<IO>
    where IO: AsyncRead + AsyncWrite
{
    type Output = Result<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        let this = self.project();
        let mut st = this.transport_st.lock();
        transport::poll_transport(&mut st, this.stream, cx)
    }
}

/// Configuration of a [`Client`].
///
/// Start from the [default][Default], which is reasonably secure, and modify it with
/// [`ClientConfig::with()`]. For old servers, [`ClientConfig::default_compatible_less_secure()`]
/// adds outdated algorithms.
///
/// This struct is `#[non_exhaustive]`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Supported [key exchange algorithms][crate::kex], in the order of preference.
    pub kex_algos: Vec<&'static KexAlgo>,
    /// Supported [server public key algorithms][crate::pubkey], in the order of preference.
    pub server_pubkey_algos: Vec<&'static PubkeyAlgo>,
    /// Supported [encryption algorithms][crate::cipher], in the order of preference.
    pub cipher_algos: Vec<&'static CipherAlgo>,
    /// Supported [message authentication algorithms][crate::mac], in the order of preference.
    pub mac_algos: Vec<&'static MacAlgo>,
    /// Supported [compression algorithms][crate::compress], in the order of preference.
    pub compress_algos: Vec<&'static CompressAlgo>,
    /// Start key re-exchange after this many bytes in either direction.
    ///
    /// Higher values than the default (1 GiB) are ignored.
    pub rekey_after_bytes: u64,
    /// Start key re-exchange after this many packets in either direction.
    ///
    /// Higher values than the default (2^28) are ignored.
    pub rekey_after_packets: u64,
    /// Group sizes that we ask for in `"diffie-hellman-group-exchange-*"`.
    pub gex: GroupExchangeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            kex_algos: transport::default_kex_algos(),
            server_pubkey_algos: transport::default_pubkey_algos(),
            cipher_algos: transport::default_cipher_algos(),
            mac_algos: transport::default_mac_algos(),
            compress_algos: transport::default_compress_algos(),
            rekey_after_bytes: transport::DEFAULT_REKEY_AFTER_BYTES,
            rekey_after_packets: transport::DEFAULT_REKEY_AFTER_PACKETS,
            gex: GroupExchangeConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default configuration with higher compatibility and lower security.
    ///
    /// Adds support for outdated and potentially insecure crypto, notably SHA-1. **Use at your own
    /// risk!**
    pub fn default_compatible_less_secure() -> ClientConfig {
        Self::default().with(|c| {
            c.kex_algos.extend_from_slice(&transport::compatible_kex_algos());
            c.server_pubkey_algos.push(&crate::pubkey::SSH_RSA);
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
            pubkey_algos: self.server_pubkey_algos.clone(),
            cipher_algos: self.cipher_algos.clone(),
            mac_algos: self.mac_algos.clone(),
            compress_algos: self.compress_algos.clone(),
            rekey_after_bytes: self.rekey_after_bytes.min(transport::DEFAULT_REKEY_AFTER_BYTES),
            rekey_after_packets: self.rekey_after_packets.min(transport::DEFAULT_REKEY_AFTER_PACKETS),
            gex: self.gex.clone(),
            host_keys: Vec::new(),
        }
    }
}
