use bytes::Bytes;
use std::cmp::min;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use crate::codec::{PacketDecode, PacketEncode, MAX_PACKET_LEN};
use crate::codes::msg;
use crate::error::{Result, Error};
use crate::transport::{negotiate, state, Pump, ResultRecvState, TransportState};
use super::channel::{ChannelEvent, ChannelReq, ChannelReply, DataType};

/// Upper bound for the data in one `SSH_MSG_CHANNEL_DATA`, so that the whole packet (with the
/// message header, padding and compression overhead) stays below [`MAX_PACKET_LEN`].
pub(crate) const MAX_DATA_LEN: usize = MAX_PACKET_LEN - 4096;

pub(crate) struct ChannelInit {
    pub our_id: u32,
    pub their_id: u32,
    pub event_tx: mpsc::UnboundedSender<ChannelEvent>,
    pub send_window: usize,
    pub send_len_max: usize,
    pub recv_window_max: usize,
    pub recv_len_max: usize,
}

pub(crate) struct ChannelState {
    our_id: u32,
    their_id: u32,
    want_close: bool,
    close_sent: bool,
    close_recvd: bool,
    closed: bool,
    /// Events for the [`ChannelReceiver`][super::ChannelReceiver]. The queue is not bounded, but
    /// the data in it never exceeds our receive window.
    event_tx: Option<mpsc::UnboundedSender<ChannelEvent>>,
    send_reqs: VecDeque<ChannelReq>,
    send_datas: VecDeque<SendData>,
    /// Replies that we expect from the peer, in the order of our requests.
    recv_replies: VecDeque<oneshot::Sender<ChannelReply>>,
    /// Replies that we owe to the peer, in the order of their requests.
    our_replies: VecDeque<oneshot::Receiver<ChannelReply>>,
    send_window: usize,
    send_len_max: usize,
    recv_window: usize,
    recv_window_max: usize,
    recv_len_max: usize,
    /// Bytes received by the user since the last `SSH_MSG_CHANNEL_WINDOW_ADJUST`.
    recv_consumed: usize,
}

#[derive(Debug)]
struct SendData {
    data: ChannelSendData,
    sent_tx: oneshot::Sender<()>,
}

#[derive(Debug)]
pub(crate) enum ChannelSendData {
    Data(Bytes, DataType),
    Eof,
}

enum SendProgress {
    Done,
    Partial,
    Blocked,
}

pub(crate) fn init_channel(init: ChannelInit) -> ChannelState {
    ChannelState {
        our_id: init.our_id,
        their_id: init.their_id,
        want_close: false,
        close_sent: false,
        close_recvd: false,
        closed: false,
        event_tx: Some(init.event_tx),
        send_reqs: VecDeque::new(),
        send_datas: VecDeque::new(),
        recv_replies: VecDeque::new(),
        our_replies: VecDeque::new(),
        send_window: init.send_window,
        send_len_max: init.send_len_max.clamp(1, MAX_DATA_LEN),
        recv_window: init.recv_window_max,
        recv_window_max: init.recv_window_max,
        recv_len_max: init.recv_len_max,
        recv_consumed: 0,
    }
}

pub(crate) fn pump_channel(
    st: &mut TransportState,
    channel_st: &mut ChannelState,
    cx: &mut Context,
) -> Result<Pump> {
    if channel_st.closed {
        return Ok(Pump::Pending)
    }

    if channel_st.close_recvd && channel_st.close_sent {
        log::debug!("channel {} is closed", channel_st.our_id);
        channel_st.closed = true;
        channel_st.send_reqs.clear();
        channel_st.send_datas.clear();
        channel_st.recv_replies.clear();
        channel_st.our_replies.clear();
        channel_st.event_tx = None;
        return Ok(Pump::Progress)
    }

    if channel_st.close_sent || !negotiate::is_ready(st) {
        return Ok(Pump::Pending)
    }

    if channel_st.close_recvd {
        // nobody will process requests or replies on a channel that the peer closed
        channel_st.send_reqs.clear();
        channel_st.our_replies.clear();
    }

    if let Some(reply_rx) = channel_st.our_replies.front_mut() {
        if let Poll::Ready(reply) = Pin::new(reply_rx).poll(cx) {
            channel_st.our_replies.pop_front();
            send_channel_reply(st, channel_st, reply.unwrap_or(ChannelReply::Failure))?;
            return Ok(Pump::Progress)
        }
    }

    if let Some(req) = channel_st.send_reqs.pop_front() {
        send_channel_request(st, channel_st, &req)?;
        if let Some(reply_tx) = req.reply_tx {
            channel_st.recv_replies.push_back(reply_tx);
        }
        return Ok(Pump::Progress)
    }

    if let Some(mut send_data) = channel_st.send_datas.pop_front() {
        match send_channel_data(st, channel_st, &mut send_data.data)? {
            SendProgress::Done => {
                let _ = send_data.sent_tx.send(());
                return Ok(Pump::Progress)
            },
            SendProgress::Partial => {
                channel_st.send_datas.push_front(send_data);
                return Ok(Pump::Progress)
            },
            SendProgress::Blocked if channel_st.close_recvd => {
                // the peer closed the channel, so it will never extend the window
                log::debug!("discarding data for channel {} that was closed by the peer", channel_st.our_id);
                channel_st.send_datas.clear();
                return Ok(Pump::Progress)
            },
            SendProgress::Blocked => channel_st.send_datas.push_front(send_data),
        }
    }

    if !channel_st.close_recvd && channel_st.recv_consumed > 0
        && channel_st.recv_consumed >= channel_st.recv_window_max / 8
    {
        let adjust = channel_st.recv_consumed;
        send_channel_window_adjust(st, channel_st, adjust)?;
        channel_st.recv_window += adjust;
        channel_st.recv_consumed = 0;
        return Ok(Pump::Progress)
    }

    if (channel_st.want_close || channel_st.close_recvd) && channel_st.send_datas.is_empty() {
        send_channel_close(st, channel_st)?;
        channel_st.close_sent = true;
        return Ok(Pump::Progress)
    }

    Ok(Pump::Pending)
}

pub(crate) fn is_closed(channel_st: &ChannelState) -> bool {
    channel_st.closed
}

fn check_open(channel_st: &ChannelState) -> Result<()> {
    if channel_st.closed || channel_st.want_close || channel_st.close_sent {
        return Err(Error::ChannelClosed)
    }
    Ok(())
}



pub(crate) fn send_request(
    st: &mut TransportState,
    channel_st: &mut ChannelState,
    req: ChannelReq,
) -> Result<()> {
    check_open(channel_st)?;
    channel_st.send_reqs.push_back(req);
    state::wakeup(st);
    Ok(())
}

fn send_channel_request(st: &mut TransportState, channel_st: &ChannelState, req: &ChannelReq) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::CHANNEL_REQUEST);
    payload.put_u32(channel_st.their_id);
    payload.put_str(&req.request_type);
    payload.put_bool(req.reply_tx.is_some());
    payload.put_raw(&req.payload);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_REQUEST {:?} for our channel {}",
        req.request_type, channel_st.our_id);
    Ok(())
}

fn send_channel_reply(st: &mut TransportState, channel_st: &ChannelState, reply: ChannelReply) -> Result<()> {
    let msg_id = match reply {
        ChannelReply::Success => msg::CHANNEL_SUCCESS,
        ChannelReply::Failure => msg::CHANNEL_FAILURE,
    };
    let mut payload = PacketEncode::with_msg(msg_id);
    payload.put_u32(channel_st.their_id);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending {:?} reply for our channel {}", reply, channel_st.our_id);
    Ok(())
}

pub(crate) fn recv_channel_request(channel_st: &mut ChannelState, payload: &mut PacketDecode) -> ResultRecvState {
    let request_type = payload.get_string()?;
    let want_reply = payload.get_bool()?;
    let req_payload = payload.remaining();
    log::debug!("received SSH_MSG_CHANNEL_REQUEST {:?} for our channel {}", request_type, channel_st.our_id);

    let reply_tx = if want_reply {
        let (reply_tx, reply_rx) = oneshot::channel();
        channel_st.our_replies.push_back(reply_rx);
        Some(reply_tx)
    } else {
        None
    };

    let req = ChannelReq { request_type, payload: req_payload, reply_tx };
    send_event(channel_st, ChannelEvent::Request(req), 0)
}

pub(crate) fn recv_channel_success(channel_st: &mut ChannelState) -> ResultRecvState {
    let Some(reply_tx) = channel_st.recv_replies.pop_front() else {
        return Err(Error::Protocol("received SSH_MSG_CHANNEL_SUCCESS, but no reply was expected"))
    };
    log::debug!("received SSH_MSG_CHANNEL_SUCCESS for our channel {}", channel_st.our_id);
    let _ = reply_tx.send(ChannelReply::Success);
    Ok(None)
}

pub(crate) fn recv_channel_failure(channel_st: &mut ChannelState) -> ResultRecvState {
    let Some(reply_tx) = channel_st.recv_replies.pop_front() else {
        return Err(Error::Protocol("received SSH_MSG_CHANNEL_FAILURE, but no reply was expected"))
    };
    log::debug!("received SSH_MSG_CHANNEL_FAILURE for our channel {}", channel_st.our_id);
    let _ = reply_tx.send(ChannelReply::Failure);
    Ok(None)
}



pub(crate) fn send_data(
    st: &mut TransportState,
    channel_st: &mut ChannelState,
    data: ChannelSendData,
) -> Result<impl Future<Output = Result<()>>> {
    check_open(channel_st)?;
    let (sent_tx, sent_rx) = oneshot::channel();
    channel_st.send_datas.push_back(SendData { data, sent_tx });
    state::wakeup(st);
    Ok(async { sent_rx.await.map_err(|_| Error::ChannelClosed) })
}

fn send_channel_data(
    st: &mut TransportState,
    channel_st: &mut ChannelState,
    data: &mut ChannelSendData,
) -> Result<SendProgress> {
    match data {
        ChannelSendData::Data(data, data_type) => {
            if data.is_empty() {
                return Ok(SendProgress::Done)
            }
            let Some(chunk) = take_chunk(channel_st, data) else {
                log::trace!("channel {} is blocked by the window", channel_st.our_id);
                return Ok(SendProgress::Blocked)
            };

            let mut payload = match data_type {
                DataType::Standard => {
                    let mut payload = PacketEncode::with_msg(msg::CHANNEL_DATA);
                    payload.put_u32(channel_st.their_id);
                    log::trace!("sending SSH_MSG_CHANNEL_DATA for our channel {} with {} bytes",
                        channel_st.our_id, chunk.len());
                    payload
                },
                DataType::Extended(code) => {
                    let mut payload = PacketEncode::with_msg(msg::CHANNEL_EXTENDED_DATA);
                    payload.put_u32(channel_st.their_id);
                    payload.put_u32(*code);
                    log::trace!("sending SSH_MSG_CHANNEL_EXTENDED_DATA for our channel {}, code {}, with {} bytes",
                        channel_st.our_id, code, chunk.len());
                    payload
                },
            };
            payload.put_bytes(&chunk);
            st.codec.send_pipe.feed_packet(&payload.finish())?;

            Ok(if data.is_empty() { SendProgress::Done } else { SendProgress::Partial })
        },
        ChannelSendData::Eof => {
            let mut payload = PacketEncode::with_msg(msg::CHANNEL_EOF);
            payload.put_u32(channel_st.their_id);
            st.codec.send_pipe.feed_packet(&payload.finish())?;
            log::debug!("sending SSH_MSG_CHANNEL_EOF for our channel {}", channel_st.our_id);
            Ok(SendProgress::Done)
        },
    }
}

/// Splits off the largest prefix of `data` that the window and the packet size of the peer
/// allow, and charges it to the window.
fn take_chunk(channel_st: &mut ChannelState, data: &mut Bytes) -> Option<Bytes> {
    let len = min(data.len(), min(channel_st.send_window, channel_st.send_len_max));
    if len == 0 {
        return None
    }
    channel_st.send_window -= len;
    Some(data.split_to(len))
}

pub(crate) fn recv_channel_data(channel_st: &mut ChannelState, payload: &mut PacketDecode) -> ResultRecvState {
    let data = payload.get_bytes()?;
    log::trace!("received SSH_MSG_CHANNEL_DATA for our channel {} with {} bytes",
        channel_st.our_id, data.len());
    recv_data(channel_st, data, DataType::Standard)
}

pub(crate) fn recv_channel_extended_data(channel_st: &mut ChannelState, payload: &mut PacketDecode) -> ResultRecvState {
    let code = payload.get_u32()?;
    let data = payload.get_bytes()?;
    log::trace!("received SSH_MSG_CHANNEL_EXTENDED_DATA for our channel {}, code {}, with {} bytes",
        channel_st.our_id, code, data.len());
    recv_data(channel_st, data, DataType::Extended(code))
}

fn recv_data(channel_st: &mut ChannelState, data: Bytes, data_type: DataType) -> ResultRecvState {
    if data.len() > channel_st.recv_len_max {
        log::warn!("peer sent {} bytes to our channel {} in one packet, but the maximum is {} bytes",
            data.len(), channel_st.our_id, channel_st.recv_len_max);
        return Err(Error::Protocol("received channel data that exceeds the maximum packet size"))
    }
    if data.len() > channel_st.recv_window {
        log::warn!("peer sent {} bytes to our channel {}, but the window is only {} bytes",
            data.len(), channel_st.our_id, channel_st.recv_window);
        return Err(Error::Protocol("received channel data that exceeds the window"))
    }
    channel_st.recv_window -= data.len();

    if channel_st.close_recvd {
        log::debug!("ignoring data for our channel {} after SSH_MSG_CHANNEL_CLOSE", channel_st.our_id);
        return Ok(None)
    }

    let data_len = data.len();
    send_event(channel_st, ChannelEvent::Data(data, data_type), data_len)
}

pub(crate) fn recv_channel_eof(channel_st: &mut ChannelState) -> ResultRecvState {
    log::debug!("received SSH_MSG_CHANNEL_EOF for our channel {}", channel_st.our_id);
    send_event(channel_st, ChannelEvent::Eof, 0)
}

/// Called when the user received `len` bytes of data from the channel.
pub(crate) fn consume_data(st: &mut TransportState, channel_st: &mut ChannelState, len: usize) {
    channel_st.recv_consumed += len;
    if channel_st.recv_consumed >= channel_st.recv_window_max / 8 {
        state::wakeup(st);
    }
}

fn send_channel_window_adjust(
    st: &mut TransportState,
    channel_st: &ChannelState,
    adjust: usize,
) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::CHANNEL_WINDOW_ADJUST);
    payload.put_u32(channel_st.their_id);
    payload.put_u32(adjust as u32);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::trace!("sending SSH_MSG_CHANNEL_WINDOW_ADJUST for our channel {} with {} bytes",
        channel_st.our_id, adjust);
    Ok(())
}

pub(crate) fn recv_channel_window_adjust(
    channel_st: &mut ChannelState,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    let adjust = payload.get_u32()? as usize;
    if let Some(send_window) = channel_st.send_window.checked_add(adjust) {
        if send_window <= u32::MAX as usize {
            log::trace!("received SSH_MSG_CHANNEL_WINDOW_ADJUST for our channel {} with {} bytes",
                channel_st.our_id, adjust);
            channel_st.send_window = send_window;
            return Ok(None)
        }
    }
    Err(Error::Protocol("received SSH_MSG_CHANNEL_WINDOW_ADJUST that overflows the send window"))
}



pub(crate) fn close(st: &mut TransportState, channel_st: &mut ChannelState) {
    if !channel_st.want_close {
        channel_st.want_close = true;
        state::wakeup(st);
    }
}

fn send_channel_close(st: &mut TransportState, channel_st: &ChannelState) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::CHANNEL_CLOSE);
    payload.put_u32(channel_st.their_id);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_CLOSE for our channel {}", channel_st.our_id);
    Ok(())
}

pub(crate) fn recv_channel_close(channel_st: &mut ChannelState) -> ResultRecvState {
    if channel_st.close_recvd {
        log::debug!("ignoring repeated SSH_MSG_CHANNEL_CLOSE for our channel {}", channel_st.our_id);
        return Ok(None)
    }
    log::debug!("received SSH_MSG_CHANNEL_CLOSE for our channel {}", channel_st.our_id);
    channel_st.close_recvd = true;
    Ok(None)
}



/// Queues `event` for the [`ChannelReceiver`][super::ChannelReceiver] without waiting for the
/// user. The receive window bounds the queue.
///
/// `data_len` bytes count as consumed once the user receives the event, or immediately if the
/// receiver is gone.
fn send_event(channel_st: &mut ChannelState, event: ChannelEvent, data_len: usize) -> ResultRecvState {
    let delivered = match channel_st.event_tx.as_ref() {
        Some(event_tx) => event_tx.send(event).is_ok(),
        None => false,
    };
    if !delivered {
        channel_st.recv_consumed += data_len;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_channel(recv_window_max: usize, send_window: usize, send_len_max: usize)
        -> (ChannelState, mpsc::UnboundedReceiver<ChannelEvent>)
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let channel_st = init_channel(ChannelInit {
            our_id: 0,
            their_id: 42,
            event_tx,
            send_window,
            send_len_max,
            recv_window_max,
            recv_len_max: 800,
        });
        (channel_st, event_rx)
    }

    fn data_payload(len: usize) -> PacketDecode {
        let mut payload = PacketEncode::new();
        payload.put_bytes(&vec![0xab; len]);
        PacketDecode::new(payload.finish())
    }

    #[test]
    fn test_recv_data_within_window() {
        let (mut channel_st, mut event_rx) = new_channel(1000, 0, 0);
        assert!(matches!(recv_channel_data(&mut channel_st, &mut data_payload(600)), Ok(None)));
        assert!(matches!(recv_channel_data(&mut channel_st, &mut data_payload(400)), Ok(None)));
        assert_eq!(channel_st.recv_window, 0);

        // the data waits for the user and is not consumed until the user receives it
        assert!(matches!(event_rx.try_recv(), Ok(ChannelEvent::Data(data, DataType::Standard)) if data.len() == 600));
        assert!(matches!(event_rx.try_recv(), Ok(ChannelEvent::Data(data, DataType::Standard)) if data.len() == 400));
        assert_eq!(channel_st.recv_consumed, 0);
    }

    #[test]
    fn test_recv_data_exceeding_window() {
        let (mut channel_st, _event_rx) = new_channel(1000, 0, 0);
        assert!(matches!(recv_channel_data(&mut channel_st, &mut data_payload(700)), Ok(None)));
        let res = recv_channel_data(&mut channel_st, &mut data_payload(301));
        assert!(matches!(res, Err(Error::Protocol(_))));
        // the rejected data is not charged to the window
        assert_eq!(channel_st.recv_window, 300);
    }

    #[test]
    fn test_recv_data_exceeding_packet_len() {
        let (mut channel_st, _event_rx) = new_channel(1000, 0, 0);
        let res = recv_channel_data(&mut channel_st, &mut data_payload(801));
        assert!(matches!(res, Err(Error::Protocol(_))));
        assert_eq!(channel_st.recv_window, 1000);
    }

    #[test]
    fn test_recv_extended_data_exceeding_window() {
        let (mut channel_st, _event_rx) = new_channel(500, 0, 0);
        let mut payload = PacketEncode::new();
        payload.put_u32(1);
        payload.put_bytes(&[0; 501]);
        let mut payload = PacketDecode::new(payload.finish());
        let res = recv_channel_extended_data(&mut channel_st, &mut payload);
        assert!(matches!(res, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_recv_data_after_receiver_dropped() {
        let (mut channel_st, event_rx) = new_channel(1000, 0, 0);
        drop(event_rx);
        assert!(matches!(recv_channel_data(&mut channel_st, &mut data_payload(300)), Ok(None)));
        // nobody will ever read the data, so it must not hold the window
        assert_eq!(channel_st.recv_consumed, 300);
    }

    #[test]
    fn test_take_chunk_respects_window_and_packet_size() {
        let (mut channel_st, _event_rx) = new_channel(1000, 100, 30);
        let mut data = Bytes::from(vec![1; 250]);

        let mut chunks = Vec::new();
        while let Some(chunk) = take_chunk(&mut channel_st, &mut data) {
            chunks.push(chunk.len());
        }
        assert_eq!(chunks, vec![30, 30, 30, 10]);
        assert_eq!(channel_st.send_window, 0);
        assert_eq!(data.len(), 150);

        let mut adjust = PacketEncode::new();
        adjust.put_u32(200);
        recv_channel_window_adjust(&mut channel_st, &mut PacketDecode::new(adjust.finish())).unwrap();

        let mut sent = 0;
        while let Some(chunk) = take_chunk(&mut channel_st, &mut data) {
            assert!(chunk.len() <= 30);
            sent += chunk.len();
        }
        assert_eq!(sent, 150);
        assert_eq!(channel_st.send_window, 50);
        assert!(data.is_empty());
    }

    #[test]
    fn test_take_chunk_fits_into_packet() {
        let (mut channel_st, _event_rx) = new_channel(1000, 8 << 20, u32::MAX as usize);
        let mut data = Bytes::from(vec![1; 3 << 20]);
        while let Some(chunk) = take_chunk(&mut channel_st, &mut data) {
            assert!(chunk.len() <= MAX_DATA_LEN);
        }
        assert!(data.is_empty());
    }

    #[test]
    fn test_window_adjust_overflow() {
        let (mut channel_st, _event_rx) = new_channel(1000, u32::MAX as usize - 10, 100);
        let mut adjust = PacketEncode::new();
        adjust.put_u32(11);
        let res = recv_channel_window_adjust(&mut channel_st, &mut PacketDecode::new(adjust.finish()));
        assert!(matches!(res, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_repeated_close_is_ignored() {
        let (mut channel_st, _event_rx) = new_channel(1000, 0, 0);
        assert!(matches!(recv_channel_close(&mut channel_st), Ok(None)));
        assert!(matches!(recv_channel_close(&mut channel_st), Ok(None)));
        assert!(channel_st.close_recvd);
    }

    #[test]
    fn test_unexpected_reply() {
        let (mut channel_st, _event_rx) = new_channel(1000, 0, 0);
        let res = recv_channel_success(&mut channel_st);
        assert!(matches!(res, Err(Error::Protocol(_))));
    }
}
