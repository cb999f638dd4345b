use bytes::Bytes;
use derivative::Derivative;
use futures_core::ready;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use crate::error::{Result, Error};
use crate::transport::TransportState;
use super::channel_state::{self, ChannelState, ChannelSendData, MAX_DATA_LEN};

/// Handle to an SSH channel (low level API).
///
/// Use this object to send requests and data to the peer over an SSH channel (RFC 4254, section
/// 5). Events and data from the peer are delivered to the matching [`ChannelReceiver`].
///
/// Channels are obtained from [`Client::open_channel()`][crate::Client::open_channel()],
/// [`Server::open_channel()`][crate::Server::open_channel()] or by accepting an
/// [`AcceptChannel`][crate::AcceptChannel]. Higher level wrappers are
/// [`Session`][crate::Session], [`ServerSession`][crate::ServerSession] and
/// [`Tunnel`][crate::Tunnel].
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Channel {
    pub(crate) transport_st: Weak<Mutex<TransportState>>,
    pub(crate) channel_st: Weak<Mutex<ChannelState>>,
}

impl Channel {
    /// Send a request to the peer.
    ///
    /// This sends a `SSH_MSG_CHANNEL_REQUEST` (RFC 4254, section 5.4). We enqueue the request and
    /// return immediately; use [`ChannelReq::reply_tx`] to wait for the reply. Requests are not
    /// subject to flow control.
    pub fn send_request(&self, req: ChannelReq) -> Result<()> {
        self.with_state(|st, channel_st| channel_state::send_request(st, channel_st, req))
    }

    /// Send channel data to the peer.
    ///
    /// This sends a series of `SSH_MSG_CHANNEL_DATA` or `SSH_MSG_CHANNEL_EXTENDED_DATA` (depending
    /// on `data_type`). The data is split into packets according to the window and the maximum
    /// packet size of the peer.
    ///
    /// Returns after all bytes have been accepted by the flow control mechanism and written to the
    /// internal send buffer, so this also waits until the peer extends the window.
    pub async fn send_data(&self, data: Bytes, data_type: DataType) -> Result<()> {
        self.send_channel_data(ChannelSendData::Data(data, data_type))?.await
    }

    /// Send end-of-file to the peer (`SSH_MSG_CHANNEL_EOF`, RFC 4254, section 5.3).
    ///
    /// The EOF is sent after all data that was sent before it. If the channel is closed in the
    /// meantime, we return `Ok`.
    pub async fn send_eof(&self) -> Result<()> {
        match self.try_send_eof().await {
            Ok(_) => Ok(()),
            // the peer often closes the channel before we had a chance to send EOF
            Err(Error::ChannelClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn try_send_eof(&self) -> Result<()> {
        self.send_channel_data(ChannelSendData::Eof)?.await
    }

    /// Close the channel.
    ///
    /// We send `SSH_MSG_CHANNEL_CLOSE` once all queued data is sent, and the channel is closed
    /// after the peer closes it too. This method is idempotent.
    pub fn close(&self) {
        let _ = self.with_state(|st, channel_st| {
            channel_state::close(st, channel_st);
            Ok(())
        });
    }

    fn send_channel_data(&self, data: ChannelSendData) -> Result<impl Future<Output = Result<()>>> {
        self.with_state(|st, channel_st| channel_state::send_data(st, channel_st, data))
    }

    fn with_state<F, T>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut TransportState, &mut ChannelState) -> Result<T>
    {
        let transport_st = self.transport_st.upgrade().ok_or(Error::ChannelClosed)?;
        let mut st = transport_st.lock();
        let channel_st = self.channel_st.upgrade().ok_or(Error::ChannelClosed)?;
        let mut channel_st = channel_st.lock();
        f(&mut st, &mut channel_st)
    }
}

/// Receiving half of a [`Channel`] (low level API).
///
/// Data that you have not received yet counts against the window of the channel: if you stop
/// receiving, the peer stops sending data on this channel once the window is exhausted. Other
/// channels are not affected.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ChannelReceiver {
    #[derivative(Debug = "ignore")]
    pub(crate) transport_st: Weak<Mutex<TransportState>>,
    #[derivative(Debug = "ignore")]
    pub(crate) channel_st: Weak<Mutex<ChannelState>>,
    pub(crate) event_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the channel was closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ChannelEvent>> {
        let event = ready!(self.event_rx.poll_recv(cx));
        if let Some(ChannelEvent::Data(data, _)) = &event {
            self.consume(data.len());
        }
        Poll::Ready(event)
    }

    fn consume(&self, len: usize) {
        let (Some(transport_mutex), Some(channel_mutex)) =
            (self.transport_st.upgrade(), self.channel_st.upgrade()) else { return };
        let mut st = transport_mutex.lock();
        channel_state::consume_data(&mut st, &mut channel_mutex.lock(), len);
    }
}

/// An event returned from [`ChannelReceiver`] (low level API).
#[derive(Debug)]
#[non_exhaustive]
pub enum ChannelEvent {
    /// Request from the peer (`SSH_MSG_CHANNEL_REQUEST`).
    ///
    /// If the peer wants a reply, [`ChannelReq::reply_tx`] is set. Replies are sent in the order
    /// of the requests, even if you answer them in a different order. Dropping the sender replies
    /// with a failure.
    Request(ChannelReq),

    /// Data from the peer (`SSH_MSG_CHANNEL_DATA` or `SSH_MSG_CHANNEL_EXTENDED_DATA`).
    ///
    /// The boundaries between consecutive `Data` events are arbitrary.
    Data(Bytes, DataType),

    /// The peer will not send more data (`SSH_MSG_CHANNEL_EOF`).
    Eof,
}

/// Request on an SSH channel (low level API).
///
/// The same structure is used for requests that you send ([`Channel::send_request()`]) and
/// requests that you receive ([`ChannelEvent::Request`]).
#[derive(Debug)]
pub struct ChannelReq {
    /// The type of the request, such as `"exec"` or `"exit-status"`.
    pub request_type: String,

    /// Type-specific data of the request.
    pub payload: Bytes,

    /// The reply to the request.
    ///
    /// - For requests that you send, set this to the sender of a [`oneshot`] channel if you want
    /// a reply; we set the `want reply` flag and forward the reply of the peer.
    /// - For requests that you receive, this is set if the peer wants a reply. If you drop it, we
    /// reply with a failure.
    pub reply_tx: Option<oneshot::Sender<ChannelReply>>,
}

/// Reply to a [`ChannelReq`] (`SSH_MSG_CHANNEL_SUCCESS` or `SSH_MSG_CHANNEL_FAILURE`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelReply {
    /// Successful reply.
    Success,
    /// Failure reply.
    Failure,
}

/// Type of data sent over an SSH channel.
///
/// In practice, the only two data types are [`DATA_STANDARD`] and [`DATA_STDERR`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Standard data, sent using `SSH_MSG_CHANNEL_DATA`.
    Standard,
    /// Extended data with the given type code, sent using `SSH_MSG_CHANNEL_EXTENDED_DATA`.
    Extended(u32),
}

/// Shorthand for `DataType::Standard`.
pub const DATA_STANDARD: DataType = DataType::Standard;

/// Shorthand for `DataType::Extended(1)`, which is used for stderr (RFC 4254, section 5.2).
pub const DATA_STDERR: DataType = DataType::Extended(1);

/// Configuration of a channel.
///
/// This struct is `#[non_exhaustive]`; start from the [default][Default] and use
/// [`ChannelConfig::with()`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ChannelConfig {
    /// Maximal size of our receive window, in bytes.
    ///
    /// The peer may send at most this many bytes before we adjust the window. We adjust it after
    /// you receive 1/8 of the window.
    pub recv_window_max: usize,

    /// Maximal size of data in a single packet that we accept from the peer.
    ///
    /// Values above the packet size limit of the transport (about 1 MiB) are lowered.
    pub recv_packet_len_max: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            recv_window_max: 131072,
            recv_packet_len_max: 32768,
        }
    }
}

impl ChannelConfig {
    /// Mutate `self` in a closure.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }

    pub(crate) fn window_max(&self) -> u32 {
        self.recv_window_max.clamp(1000, u32::MAX as usize) as u32
    }

    pub(crate) fn packet_len_max(&self) -> u32 {
        self.recv_packet_len_max.clamp(200, MAX_DATA_LEN) as u32
    }
}
