//! Connection service ("ssh-connection", RFC 4254), shared by the client and the server.
//!
//! All channels of a connection live in one map behind its own mutex, and every channel has its
//! own mutex too. We always lock the transport first, then the map, then the channel.
use bytes::Bytes;
use derivative::Derivative;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future as _;
use std::mem::replace;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use crate::auth;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::{msg, open};
use crate::error::{Result, Error, ChannelOpenError};
use crate::transport::{negotiate, recv, state, Event, Pump, ResultRecvState, TransportState};
use self::channel_state::{ChannelInit, ChannelState};
pub use self::channel::{
    Channel, ChannelReceiver, ChannelEvent, ChannelReq, ChannelReply, ChannelConfig,
    DataType, DATA_STANDARD, DATA_STDERR,
};
pub use self::global::{GlobalReply, GlobalRequest, GlobalRequestEvent};
pub use self::session::{ExitSignal, PtyRequest, PtyTerminalModes, SessionRequest, WindowChange};
pub use self::tunnel::{
    Tunnel, TunnelAddrs, TunnelEvent, TunnelReceiver, TunnelReader, TunnelWriter, TunnelStream,
};
pub(crate) use self::global::GlobalReq;
pub(crate) use self::tunnel::open_tunnel;

mod channel;
mod channel_state;
mod global;
mod session;
mod tunnel;

#[derive(Default)]
pub(crate) struct ConnState {
    open_channels: VecDeque<OpenChannel>,
    channels: Arc<Mutex<HashMap<u32, ConnChannelState>>>,
    /// Channel opens from the peer that we reject before the user sees them.
    reject_opens: VecDeque<(u32, ChannelOpenError)>,
    send_reqs: VecDeque<GlobalReq>,
    /// Replies that we expect from the peer, in the order of our global requests.
    recv_replies: VecDeque<oneshot::Sender<GlobalReply>>,
    /// Replies that we owe to the peer, in the order of their global requests.
    our_replies: VecDeque<oneshot::Receiver<GlobalReply>>,
}

enum ConnChannelState {
    Open(OpenChannelState),
    Accept(AcceptChannelState),
    Ready(Arc<Mutex<ChannelState>>),
    Closed,
}

struct OpenChannelState {
    our_id: u32,
    open: OpenChannel,
    open_sent: bool,
}

struct OpenChannel {
    channel_type: String,
    recv_window_max: usize,
    recv_packet_len_max: usize,
    open_payload: Bytes,
    result_tx: oneshot::Sender<Result<OpenChannelResult>>,
}

struct OpenChannelResult {
    channel_st: Weak<Mutex<ChannelState>>,
    event_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    confirm_payload: Bytes,
}

struct ConfirmChannel {
    their_id: u32,
    send_window: usize,
    send_packet_len_max: usize,
    confirm_payload: Bytes,
}

struct AcceptChannelState {
    our_id: u32,
    their_id: u32,
    send_window: usize,
    send_packet_len_max: usize,
    accepted_rx: oneshot::Receiver<std::result::Result<AcceptedChannel, ChannelOpenError>>,
}

struct AcceptedChannel {
    recv_window_max: usize,
    recv_packet_len_max: usize,
    confirm_payload: Bytes,
    result_tx: oneshot::Sender<AcceptedChannelResult>,
}

struct AcceptedChannelResult {
    channel_st: Weak<Mutex<ChannelState>>,
    event_rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Channel opened by the peer, which you should accept or reject.
///
/// You receive this object in `ClientEvent::Channel` or `ServerEvent::Channel`. If you drop it,
/// the channel is rejected with `ADMINISTRATIVELY_PROHIBITED`.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AcceptChannel {
    /// Type of the channel, such as `"session"` or `"direct-tcpip"`.
    pub channel_type: String,
    /// Type-specific data from `SSH_MSG_CHANNEL_OPEN`.
    pub open_payload: Bytes,
    #[derivative(Debug = "ignore")]
    transport_st: Weak<Mutex<TransportState>>,
    #[derivative(Debug = "ignore")]
    accepted_tx: oneshot::Sender<std::result::Result<AcceptedChannel, ChannelOpenError>>,
}

impl AcceptChannel {
    /// Accept the channel.
    pub async fn accept(self, config: ChannelConfig) -> Result<(Channel, ChannelReceiver)> {
        self.accept_with(config, Bytes::new()).await
    }

    /// Accept the channel and send `confirm_payload` as the type-specific data of
    /// `SSH_MSG_CHANNEL_OPEN_CONFIRMATION`.
    pub async fn accept_with(self, config: ChannelConfig, confirm_payload: Bytes)
        -> Result<(Channel, ChannelReceiver)>
    {
        let (result_tx, result_rx) = oneshot::channel();
        let accepted = AcceptedChannel {
            recv_window_max: config.window_max() as usize,
            recv_packet_len_max: config.packet_len_max() as usize,
            confirm_payload,
            result_tx,
        };
        let _ = self.accepted_tx.send(Ok(accepted));
        if let Some(transport_mutex) = self.transport_st.upgrade() {
            state::wakeup(&mut transport_mutex.lock());
        }

        let result = result_rx.await.map_err(|_| Error::ChannelClosed)?;
        let channel_rx = ChannelReceiver {
            transport_st: self.transport_st.clone(),
            channel_st: result.channel_st.clone(),
            event_rx: result.event_rx,
        };
        let channel = Channel { transport_st: self.transport_st, channel_st: result.channel_st };
        Ok((channel, channel_rx))
    }

    /// Reject the channel with the given error.
    pub fn reject(self, error: ChannelOpenError) {
        let _ = self.accepted_tx.send(Err(error));
        if let Some(transport_mutex) = self.transport_st.upgrade() {
            state::wakeup(&mut transport_mutex.lock());
        }
    }
}


pub(crate) fn init_conn() -> ConnState {
    ConnState::default()
}

pub(crate) fn pump_conn(st: &mut TransportState, cx: &mut Context) -> Result<Pump> {
    if !auth::is_authenticated(st) {
        return Ok(Pump::Pending)
    }

    if negotiate::is_ready(st) {
        if let Some(reply_rx) = st.conn_st.our_replies.front_mut() {
            if let Poll::Ready(reply) = Pin::new(reply_rx).poll(cx) {
                st.conn_st.our_replies.pop_front();
                send_global_reply(st, reply.unwrap_or(GlobalReply::Failure))?;
                return Ok(Pump::Progress)
            }
        }

        if let Some(req) = st.conn_st.send_reqs.pop_front() {
            send_global_request(st, &req)?;
            if let Some(reply_tx) = req.reply_tx {
                st.conn_st.recv_replies.push_back(reply_tx);
            }
            return Ok(Pump::Progress)
        }

        if let Some((their_id, error)) = st.conn_st.reject_opens.pop_front() {
            send_channel_open_failure(st, their_id, &error)?;
            return Ok(Pump::Progress)
        }
    }

    pump_channels(st, cx)
}

fn pump_channels(st: &mut TransportState, cx: &mut Context) -> Result<Pump> {
    let channels = st.conn_st.channels.clone();
    let mut channels = channels.lock();
    let mut progress = Pump::Pending;

    while let Some(open) = st.conn_st.open_channels.pop_front() {
        let Some(our_id) = alloc_our_id(&channels) else {
            let error = ChannelOpenError::new(open::RESOURCE_SHORTAGE, "no free channel ids");
            let _ = open.result_tx.send(Err(Error::ChannelOpen(error)));
            continue
        };
        let open_st = OpenChannelState { our_id, open, open_sent: false };
        channels.insert(our_id, ConnChannelState::Open(open_st));
        progress = Pump::Progress;
    }

    for conn_channel_st in channels.values_mut() {
        while pump_channel(st, conn_channel_st, cx)?.is_progress() {
            progress = Pump::Progress
        }
    }

    channels.retain(|_, conn_channel_st| {
        !matches!(conn_channel_st, ConnChannelState::Closed)
    });

    Ok(progress)
}

fn pump_channel(
    st: &mut TransportState,
    conn_channel_st: &mut ConnChannelState,
    cx: &mut Context,
) -> Result<Pump> {
    let mut progress = Pump::Pending;
    // we move out of `*conn_channel_st`, so every branch must put the state back
    match replace(conn_channel_st, ConnChannelState::Closed) {
        ConnChannelState::Open(mut open_st) => {
            if !open_st.open_sent && negotiate::is_ready(st) {
                send_channel_open(st, &open_st)?;
                open_st.open_sent = true;
                progress = Pump::Progress;
            }
            *conn_channel_st = ConnChannelState::Open(open_st);
        },
        ConnChannelState::Accept(mut accept_st) if negotiate::is_ready(st) => {
            match Pin::new(&mut accept_st.accepted_rx).poll(cx) {
                Poll::Ready(Ok(Ok(accepted))) => {
                    send_channel_open_confirmation(st, &accept_st, &accepted)?;
                    *conn_channel_st = init_accepted_channel(accept_st, accepted);
                    progress = Pump::Progress;
                },
                Poll::Ready(Ok(Err(error))) => {
                    send_channel_open_failure(st, accept_st.their_id, &error)?;
                    progress = Pump::Progress;
                },
                Poll::Ready(Err(_)) => {
                    let error = ChannelOpenError::new(open::ADMINISTRATIVELY_PROHIBITED, "channel was not accepted");
                    send_channel_open_failure(st, accept_st.their_id, &error)?;
                    progress = Pump::Progress;
                },
                Poll::Pending => {
                    *conn_channel_st = ConnChannelState::Accept(accept_st);
                },
            }
        },
        ConnChannelState::Accept(accept_st) => {
            *conn_channel_st = ConnChannelState::Accept(accept_st);
        },
        ConnChannelState::Ready(channel_mutex) => {
            let mut channel_st = channel_mutex.lock();
            if !channel_state::is_closed(&channel_st) {
                progress |= channel_state::pump_channel(st, &mut channel_st, cx)?;
                drop(channel_st);
                *conn_channel_st = ConnChannelState::Ready(channel_mutex);
            }
        },
        ConnChannelState::Closed => {},
    }
    Ok(progress)
}

pub(crate) fn recv_conn_packet(
    st: &mut TransportState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::GLOBAL_REQUEST => recv_global_request(st, payload),
        msg::REQUEST_SUCCESS => recv_request_success(st, payload),
        msg::REQUEST_FAILURE => recv_request_failure(st),
        msg::CHANNEL_OPEN => recv_channel_open(st, payload),
        msg::CHANNEL_OPEN_CONFIRMATION => recv_channel_open_confirmation(st, payload),
        msg::CHANNEL_OPEN_FAILURE => recv_channel_open_failure(st, payload),
        msg::CHANNEL_SUCCESS => recv_channel_packet(st, payload, "SSH_MSG_CHANNEL_SUCCESS",
            |channel_mutex, _| channel_state::recv_channel_success(&mut channel_mutex.lock())),
        msg::CHANNEL_FAILURE => recv_channel_packet(st, payload, "SSH_MSG_CHANNEL_FAILURE",
            |channel_mutex, _| channel_state::recv_channel_failure(&mut channel_mutex.lock())),
        msg::CHANNEL_REQUEST => recv_channel_packet(st, payload, "SSH_MSG_CHANNEL_REQUEST",
            |channel_mutex, payload| channel_state::recv_channel_request(&mut channel_mutex.lock(), payload)),
        msg::CHANNEL_DATA => recv_channel_packet(st, payload, "SSH_MSG_CHANNEL_DATA",
            |channel_mutex, payload| channel_state::recv_channel_data(&mut channel_mutex.lock(), payload)),
        msg::CHANNEL_EXTENDED_DATA => recv_channel_packet(st, payload, "SSH_MSG_CHANNEL_EXTENDED_DATA",
            |channel_mutex, payload| channel_state::recv_channel_extended_data(&mut channel_mutex.lock(), payload)),
        msg::CHANNEL_WINDOW_ADJUST => recv_channel_packet(st, payload, "SSH_MSG_CHANNEL_WINDOW_ADJUST",
            |channel_mutex, payload| channel_state::recv_channel_window_adjust(
                &mut channel_mutex.lock(), payload)),
        msg::CHANNEL_EOF => recv_channel_packet(st, payload, "SSH_MSG_CHANNEL_EOF",
            |channel_mutex, _| channel_state::recv_channel_eof(&mut channel_mutex.lock())),
        msg::CHANNEL_CLOSE => recv_channel_close(st, payload),
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

fn alloc_our_id(channels: &HashMap<u32, ConnChannelState>) -> Option<u32> {
    (0..=u32::MAX).find(|our_id| !channels.contains_key(our_id))
}

fn recv_channel_packet<F>(
    st: &mut TransportState,
    payload: &mut PacketDecode,
    msg_name: &str,
    callback: F,
) -> ResultRecvState
    where F: FnOnce(&Arc<Mutex<ChannelState>>, &mut PacketDecode) -> ResultRecvState
{
    let our_id = payload.get_u32()?;
    let channels = st.conn_st.channels.lock();
    match channels.get(&our_id) {
        Some(ConnChannelState::Ready(channel_mutex)) => callback(channel_mutex, payload),
        Some(_) => {
            log::debug!("received {} for our channel {} that is not open", msg_name, our_id);
            Err(Error::Protocol("received channel packet for a channel that is not open"))
        },
        None => {
            log::debug!("received {} for unknown channel {}", msg_name, our_id);
            Err(Error::Protocol("received channel packet for unknown channel"))
        },
    }
}

fn recv_channel_close(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let our_id = payload.get_u32()?;
    let channels = st.conn_st.channels.lock();
    match channels.get(&our_id) {
        Some(ConnChannelState::Ready(channel_mutex)) =>
            channel_state::recv_channel_close(&mut channel_mutex.lock()),
        Some(_) =>
            Err(Error::Protocol("received SSH_MSG_CHANNEL_CLOSE for a channel that is not open")),
        None => {
            log::debug!("ignoring SSH_MSG_CHANNEL_CLOSE for closed channel {}", our_id);
            Ok(None)
        },
    }
}



pub(crate) async fn open_channel(
    transport_st: &Weak<Mutex<TransportState>>,
    channel_type: String,
    config: ChannelConfig,
    open_payload: Bytes,
) -> Result<(Channel, ChannelReceiver, Bytes)> {
    let (result_tx, result_rx) = oneshot::channel();
    let open = OpenChannel {
        channel_type,
        recv_window_max: config.window_max() as usize,
        recv_packet_len_max: config.packet_len_max() as usize,
        open_payload,
        result_tx,
    };

    {
        let transport_mutex = transport_st.upgrade().ok_or(Error::ConnectionLost)?;
        let mut st = transport_mutex.lock();
        st.conn_st.open_channels.push_back(open);
        state::wakeup(&mut st);
    }

    let opened = result_rx.await.map_err(|_| Error::ChannelClosed)??;
    let channel_rx = ChannelReceiver {
        transport_st: transport_st.clone(),
        channel_st: opened.channel_st.clone(),
        event_rx: opened.event_rx,
    };
    let channel = Channel { transport_st: transport_st.clone(), channel_st: opened.channel_st };
    Ok((channel, channel_rx, opened.confirm_payload))
}

fn send_channel_open(st: &mut TransportState, open_st: &OpenChannelState) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN);
    payload.put_str(&open_st.open.channel_type);
    payload.put_u32(open_st.our_id);
    payload.put_u32(open_st.open.recv_window_max as u32);
    payload.put_u32(open_st.open.recv_packet_len_max as u32);
    payload.put_raw(&open_st.open.open_payload);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_OPEN {:?} for our channel {}",
        open_st.open.channel_type, open_st.our_id);
    Ok(())
}

fn recv_channel_open_confirmation(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let our_id = payload.get_u32()?;
    let confirm = ConfirmChannel {
        their_id: payload.get_u32()?,
        send_window: payload.get_u32()? as usize,
        send_packet_len_max: payload.get_u32()? as usize,
        confirm_payload: payload.remaining(),
    };
    log::debug!("received SSH_MSG_CHANNEL_OPEN_CONFIRMATION for our channel {}, their channel {}, \
        window {}, max packet size {}", our_id, confirm.their_id, confirm.send_window, confirm.send_packet_len_max);

    let mut channels = st.conn_st.channels.lock();
    let Some(conn_channel_st) = channels.get_mut(&our_id) else {
        return Err(Error::Protocol("received SSH_MSG_CHANNEL_OPEN_CONFIRMATION for unknown channel"))
    };
    match replace(conn_channel_st, ConnChannelState::Closed) {
        ConnChannelState::Open(open_st) if open_st.open_sent => {
            *conn_channel_st = init_confirmed_channel(open_st, confirm);
            Ok(None)
        },
        other => {
            *conn_channel_st = other;
            Err(Error::Protocol("received SSH_MSG_CHANNEL_OPEN_CONFIRMATION for a channel that is not being opened"))
        },
    }
}

fn init_confirmed_channel(open_st: OpenChannelState, confirm: ConfirmChannel) -> ConnChannelState {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let channel_st = channel_state::init_channel(ChannelInit {
        our_id: open_st.our_id,
        their_id: confirm.their_id,
        event_tx,
        send_window: confirm.send_window,
        send_len_max: confirm.send_packet_len_max,
        recv_window_max: open_st.open.recv_window_max,
        recv_len_max: open_st.open.recv_packet_len_max,
    });
    let channel_st = Arc::new(Mutex::new(channel_st));

    let result = OpenChannelResult {
        channel_st: Arc::downgrade(&channel_st),
        event_rx,
        confirm_payload: confirm.confirm_payload,
    };
    let _ = open_st.open.result_tx.send(Ok(result));

    ConnChannelState::Ready(channel_st)
}

fn recv_channel_open_failure(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let our_id = payload.get_u32()?;
    let error = ChannelOpenError {
        reason_code: payload.get_u32()?,
        description: payload.get_string()?,
        description_lang: payload.get_string()?,
    };

    let mut channels = st.conn_st.channels.lock();
    let Some(conn_channel_st) = channels.get_mut(&our_id) else {
        return Err(Error::Protocol("received SSH_MSG_CHANNEL_OPEN_FAILURE for unknown channel"))
    };
    match replace(conn_channel_st, ConnChannelState::Closed) {
        ConnChannelState::Open(open_st) if open_st.open_sent => {
            log::debug!("received SSH_MSG_CHANNEL_OPEN_FAILURE for our channel {}: {}", our_id, error);
            let _ = open_st.open.result_tx.send(Err(Error::ChannelOpen(error)));
            Ok(None)
        },
        other => {
            *conn_channel_st = other;
            Err(Error::Protocol("received SSH_MSG_CHANNEL_OPEN_FAILURE for a channel that is not being opened"))
        },
    }
}



fn recv_channel_open(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let channel_type = payload.get_string()?;
    let their_id = payload.get_u32()?;
    let send_window = payload.get_u32()? as usize;
    let send_packet_len_max = payload.get_u32()? as usize;
    let open_payload = payload.remaining();

    let (accepted_tx, accepted_rx) = oneshot::channel();
    {
        let mut channels = st.conn_st.channels.lock();
        let Some(our_id) = alloc_our_id(&channels) else {
            drop(channels);
            log::warn!("rejecting SSH_MSG_CHANNEL_OPEN {:?}, no free channel ids", channel_type);
            let error = ChannelOpenError::new(open::RESOURCE_SHORTAGE, "no free channel ids");
            st.conn_st.reject_opens.push_back((their_id, error));
            return Ok(None)
        };
        log::debug!("received SSH_MSG_CHANNEL_OPEN {:?} for our channel {}, their channel {}",
            channel_type, our_id, their_id);
        let accept_st = AcceptChannelState { our_id, their_id, send_window, send_packet_len_max, accepted_rx };
        channels.insert(our_id, ConnChannelState::Accept(accept_st));
    }

    let accept = AcceptChannel {
        channel_type,
        open_payload,
        transport_st: st.weak.clone(),
        accepted_tx,
    };
    recv::send_event(Event::Channel(accept))
}

fn init_accepted_channel(accept_st: AcceptChannelState, accepted: AcceptedChannel) -> ConnChannelState {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let channel_st = channel_state::init_channel(ChannelInit {
        our_id: accept_st.our_id,
        their_id: accept_st.their_id,
        event_tx,
        send_window: accept_st.send_window,
        send_len_max: accept_st.send_packet_len_max,
        recv_window_max: accepted.recv_window_max,
        recv_len_max: accepted.recv_packet_len_max,
    });
    let channel_st = Arc::new(Mutex::new(channel_st));

    let _ = accepted.result_tx.send(AcceptedChannelResult {
        channel_st: Arc::downgrade(&channel_st),
        event_rx,
    });

    ConnChannelState::Ready(channel_st)
}

fn send_channel_open_confirmation(
    st: &mut TransportState,
    accept_st: &AcceptChannelState,
    accepted: &AcceptedChannel,
) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN_CONFIRMATION);
    payload.put_u32(accept_st.their_id);
    payload.put_u32(accept_st.our_id);
    payload.put_u32(accepted.recv_window_max as u32);
    payload.put_u32(accepted.recv_packet_len_max as u32);
    payload.put_raw(&accepted.confirm_payload);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_OPEN_CONFIRMATION for our channel {}", accept_st.our_id);
    Ok(())
}

fn send_channel_open_failure(st: &mut TransportState, their_id: u32, error: &ChannelOpenError) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::CHANNEL_OPEN_FAILURE);
    payload.put_u32(their_id);
    payload.put_u32(error.reason_code);
    payload.put_str(&error.description);
    payload.put_str(&error.description_lang);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_OPEN_FAILURE for their channel {}, reason: {}",
        their_id, open::to_str(error.reason_code).unwrap_or("unknown"));
    Ok(())
}



/// Sends a global request and waits for the reply.
pub(crate) async fn global_request(
    transport_st: &Weak<Mutex<TransportState>>,
    request: GlobalRequest,
) -> Result<GlobalReply> {
    let (reply_tx, reply_rx) = oneshot::channel();
    queue_global_request(transport_st, &request, Some(reply_tx))?;
    reply_rx.await.map_err(|_| Error::ConnectionLost)
}

/// Sends a global request without `want reply`.
pub(crate) fn global_request_no_reply(
    transport_st: &Weak<Mutex<TransportState>>,
    request: &GlobalRequest,
) -> Result<()> {
    queue_global_request(transport_st, request, None)
}

fn queue_global_request(
    transport_st: &Weak<Mutex<TransportState>>,
    request: &GlobalRequest,
    reply_tx: Option<oneshot::Sender<GlobalReply>>,
) -> Result<()> {
    let req = GlobalReq {
        request_type: request.request_type().into(),
        payload: request.encode_payload(),
        reply_tx,
    };
    let transport_mutex = transport_st.upgrade().ok_or(Error::ConnectionLost)?;
    let mut st = transport_mutex.lock();
    st.conn_st.send_reqs.push_back(req);
    state::wakeup(&mut st);
    Ok(())
}

fn send_global_request(st: &mut TransportState, req: &GlobalReq) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::GLOBAL_REQUEST);
    payload.put_str(&req.request_type);
    payload.put_bool(req.reply_tx.is_some());
    payload.put_raw(&req.payload);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_GLOBAL_REQUEST {:?}", req.request_type);
    Ok(())
}

fn recv_global_request(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let request_type = payload.get_string()?;
    let want_reply = payload.get_bool()?;
    log::debug!("received SSH_MSG_GLOBAL_REQUEST {:?}", request_type);
    let request = GlobalRequest::decode(request_type, payload.remaining())?;

    let reply_tx = if want_reply {
        let (reply_tx, reply_rx) = oneshot::channel();
        st.conn_st.our_replies.push_back(reply_rx);
        Some(reply_tx)
    } else {
        None
    };
    recv::send_event(Event::GlobalRequest(GlobalRequestEvent { request, reply_tx }))
}

fn send_global_reply(st: &mut TransportState, reply: GlobalReply) -> Result<()> {
    let payload = match reply {
        GlobalReply::Success(data) => {
            let mut payload = PacketEncode::with_msg(msg::REQUEST_SUCCESS);
            payload.put_raw(&data);
            log::debug!("sending SSH_MSG_REQUEST_SUCCESS");
            payload
        },
        GlobalReply::Failure => {
            log::debug!("sending SSH_MSG_REQUEST_FAILURE");
            PacketEncode::with_msg(msg::REQUEST_FAILURE)
        },
    };
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    Ok(())
}

fn recv_request_success(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let Some(reply_tx) = st.conn_st.recv_replies.pop_front() else {
        return Err(Error::Protocol("received SSH_MSG_REQUEST_SUCCESS, but no reply was expected"))
    };
    log::debug!("received SSH_MSG_REQUEST_SUCCESS");
    let _ = reply_tx.send(GlobalReply::Success(payload.remaining()));
    Ok(None)
}

fn recv_request_failure(st: &mut TransportState) -> ResultRecvState {
    let Some(reply_tx) = st.conn_st.recv_replies.pop_front() else {
        return Err(Error::Protocol("received SSH_MSG_REQUEST_FAILURE, but no reply was expected"))
    };
    log::debug!("received SSH_MSG_REQUEST_FAILURE");
    let _ = reply_tx.send(GlobalReply::Failure);
    Ok(None)
}
