use bytes::{Bytes, Buf as _};
use futures_core::ready;
use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use std::cmp::min;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncBufRead, AsyncWrite};
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use crate::transport::TransportState;
use super::{AcceptChannel, Channel, ChannelReceiver, ChannelEvent, ChannelConfig, DATA_STANDARD};

/// Handle to an SSH tunnel (TCP/IP forwarding channel, RFC 4254, section 7).
///
/// A tunnel is opened either as `"direct-tcpip"`, when the client asks the server to connect to
/// an address ([`Client::connect_tunnel()`][crate::Client::connect_tunnel()]), or as
/// `"forwarded-tcpip"`, when the server forwards a connection that it accepted on a port bound
/// with `"tcpip-forward"` ([`Server::forward_tunnel()`][crate::Server::forward_tunnel()]).
///
/// If you need something that implements `AsyncWrite`, use [`TunnelWriter`] or [`TunnelStream`].
#[derive(Clone)]
pub struct Tunnel {
    channel: Channel,
}

/// Addresses carried by `"direct-tcpip"` and `"forwarded-tcpip"` channel opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelAddrs {
    /// For `"direct-tcpip"`, the address that the server should connect to. For
    /// `"forwarded-tcpip"`, the address where the server accepted the connection.
    pub target: (String, u16),
    /// Address of the peer that initiated the TCP connection.
    pub originator: (String, u16),
}

impl TunnelAddrs {
    pub(crate) fn encode(&self) -> Bytes {
        let mut payload = PacketEncode::new();
        payload.put_str(&self.target.0);
        payload.put_u32(self.target.1 as u32);
        payload.put_str(&self.originator.0);
        payload.put_u32(self.originator.1 as u32);
        payload.finish()
    }

    pub(crate) fn decode(payload: Bytes) -> Result<TunnelAddrs> {
        let mut payload = PacketDecode::new(payload);
        let target = (payload.get_string()?, get_port(&mut payload)?);
        let originator = (payload.get_string()?, get_port(&mut payload)?);
        Ok(TunnelAddrs { target, originator })
    }
}

fn get_port(payload: &mut PacketDecode) -> Result<u16> {
    u16::try_from(payload.get_u32()?).map_err(|_| Error::Decode("port number is out of range"))
}

pub(crate) async fn open_tunnel(
    transport_st: &Weak<Mutex<TransportState>>,
    channel_type: &str,
    config: ChannelConfig,
    addrs: &TunnelAddrs,
) -> Result<(Tunnel, TunnelReceiver)> {
    let (channel, channel_rx, _) = super::open_channel(
        transport_st, channel_type.into(), config, addrs.encode()).await?;
    Ok((Tunnel { channel }, TunnelReceiver { channel_rx }))
}

impl AcceptChannel {
    /// Decodes the addresses of a `"direct-tcpip"` or `"forwarded-tcpip"` channel.
    pub fn tunnel_addrs(&self) -> Result<TunnelAddrs> {
        match self.channel_type.as_str() {
            "direct-tcpip" | "forwarded-tcpip" => TunnelAddrs::decode(self.open_payload.clone()),
            _ => Err(Error::Protocol("channel is not a tunnel")),
        }
    }

    /// Accept the channel as a [`Tunnel`].
    pub async fn accept_tunnel(self, config: ChannelConfig) -> Result<(Tunnel, TunnelReceiver)> {
        let (channel, channel_rx) = self.accept(config).await?;
        Ok((Tunnel { channel }, TunnelReceiver { channel_rx }))
    }
}

impl Tunnel {
    /// Send data to the tunnel.
    ///
    /// Returns after all bytes have been accepted by the flow control mechanism.
    pub async fn send_data(&self, data: Bytes) -> Result<()> {
        self.channel.send_data(data, DATA_STANDARD).await
    }

    /// Signals that no more data will be sent to this tunnel.
    ///
    /// If the tunnel is already closed, we quietly return `Ok`.
    pub async fn send_eof(&self) -> Result<()> {
        self.channel.send_eof().await
    }

    /// Close the tunnel.
    pub fn close(&self) {
        self.channel.close()
    }
}

/// Receiving half of a [`Tunnel`].
///
/// Unreceived data holds the window of the tunnel, so the peer pauses until you catch up. If you
/// need something that implements `AsyncRead`, use [`TunnelReader`] or [`TunnelStream`].
#[derive(Debug)]
pub struct TunnelReceiver {
    channel_rx: ChannelReceiver,
}

/// An event returned from [`TunnelReceiver`].
#[derive(Debug)]
#[non_exhaustive]
pub enum TunnelEvent {
    /// Data received from the tunnel.
    ///
    /// The boundaries between consecutive `Data` events are arbitrary.
    Data(Bytes),

    /// End of file received from the tunnel. The tunnel is not closed yet.
    Eof,
}

impl TunnelReceiver {
    /// Receive the next event from the tunnel.
    ///
    /// Returns `None` if the tunnel was closed.
    pub async fn recv(&mut self) -> Option<TunnelEvent> {
        struct Recv<'a> { rx: &'a mut TunnelReceiver }
        impl<'a> Future for Recv<'a> {
            type Output = Option<TunnelEvent>;
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
                self.rx.poll_recv(cx)
            }
        }
        Recv { rx: self }.await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<TunnelEvent>> {
        loop {
            match ready!(self.channel_rx.poll_recv(cx)) {
                Some(ChannelEvent::Data(data, DATA_STANDARD)) =>
                    return Poll::Ready(Some(TunnelEvent::Data(data))),
                Some(ChannelEvent::Eof) =>
                    return Poll::Ready(Some(TunnelEvent::Eof)),
                // dropping the request replies with a failure
                Some(ChannelEvent::Data(_, _) | ChannelEvent::Request(_)) =>
                    continue,
                None => return Poll::Ready(None),
            }
        }
    }
}

/// `AsyncRead` and `AsyncBufRead` for an SSH tunnel.
///
/// The reader wraps a [`TunnelReceiver`], so you **must** keep polling it.
pub struct TunnelReader {
    tunnel_rx: TunnelReceiver,
    read_buf: Bytes,
    read_eof: bool,
}

impl TunnelReader {
    /// Create [`TunnelReader`] from a [`TunnelReceiver`].
    pub fn new(tunnel_rx: TunnelReceiver) -> Self {
        Self { tunnel_rx, read_buf: Bytes::new(), read_eof: false }
    }

    /// Returns the underlying [`TunnelReceiver`]. Buffered data is lost.
    pub fn into_inner(self) -> TunnelReceiver {
        self.tunnel_rx
    }
}

impl AsyncRead for TunnelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let filled_buf = ready!(self.as_mut().poll_fill_buf(cx))?;
        let fill_len = min(filled_buf.len(), buf.remaining());
        buf.put_slice(&filled_buf[..fill_len]);
        self.as_mut().consume(fill_len);
        Poll::Ready(Ok(()))
    }
}

impl AsyncBufRead for TunnelReader {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<&[u8]>> {
        let this = self.get_mut();
        loop {
            if !this.read_buf.is_empty() || this.read_eof {
                return Poll::Ready(Ok(&this.read_buf))
            }

            match ready!(this.tunnel_rx.poll_recv(cx)) {
                Some(TunnelEvent::Data(data)) => this.read_buf = data,
                Some(TunnelEvent::Eof) | None => this.read_eof = true,
            }
        }
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        self.get_mut().read_buf.advance(amt);
    }
}

/// `AsyncWrite` for an SSH tunnel. Shutting down the writer sends EOF.
pub struct TunnelWriter {
    tunnel: Tunnel,
    /// Pending `Tunnel::send_data()`, which must complete before we write more data.
    pending_write_fut: Option<BoxFuture<'static, Result<()>>>,
    pending_shutdown_fut: Option<BoxFuture<'static, Result<()>>>,
}

impl TunnelWriter {
    /// Create [`TunnelWriter`] from a [`Tunnel`].
    pub fn new(tunnel: Tunnel) -> Self {
        Self { tunnel, pending_write_fut: None, pending_shutdown_fut: None }
    }
}

fn io_error(err: Error) -> std::io::Error {
    match err {
        Error::ChannelClosed => std::io::Error::new(std::io::ErrorKind::BrokenPipe, err),
        err => std::io::Error::new(std::io::ErrorKind::Other, err),
    }
}

impl AsyncWrite for TunnelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        ready!(self.as_mut().poll_flush(cx))?;

        let this = self.get_mut();
        let data = Bytes::copy_from_slice(buf);
        let tunnel = this.tunnel.clone();
        let mut write_fut: BoxFuture<'static, Result<()>> = Box::pin(async move {
            tunnel.send_data(data).await
        });
        match write_fut.as_mut().poll(cx) {
            Poll::Ready(Ok(())) => {},
            Poll::Ready(Err(err)) => return Poll::Ready(Err(io_error(err))),
            Poll::Pending => this.pending_write_fut = Some(write_fut),
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if let Some(write_fut) = this.pending_write_fut.as_mut() {
            let res = ready!(write_fut.as_mut().poll(cx));
            this.pending_write_fut = None;
            res.map_err(io_error)?;
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;

        let this = self.get_mut();
        let shutdown_fut = this.pending_shutdown_fut.get_or_insert_with(|| {
            let tunnel = this.tunnel.clone();
            Box::pin(async move { tunnel.send_eof().await })
        });

        let res = ready!(shutdown_fut.as_mut().poll(cx));
        this.pending_shutdown_fut = None;
        res.map_err(io_error)?;
        Poll::Ready(Ok(()))
    }
}

/// `AsyncRead + AsyncWrite` for an SSH tunnel.
///
/// Wraps a [`TunnelReader`] and a [`TunnelWriter`], so you can run another protocol (even another
/// SSH connection) through the tunnel.
pub struct TunnelStream {
    /// The reader part of this I/O stream.
    pub reader: TunnelReader,
    /// The writer part of this I/O stream.
    pub writer: TunnelWriter,
}

impl TunnelStream {
    /// Create a [`TunnelStream`] from the tunnel and the tunnel receiver.
    pub fn new(tunnel: Tunnel, tunnel_rx: TunnelReceiver) -> Self {
        Self { reader: TunnelReader::new(tunnel_rx), writer: TunnelWriter::new(tunnel) }
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncBufRead for TunnelStream {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().reader).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().reader).consume(amt)
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}
