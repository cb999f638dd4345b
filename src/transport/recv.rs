use futures_core::ready;
use std::task::{Context, Poll};
use crate::auth;
use crate::codec::{PacketDecode, PacketEncode, RecvPacket};
use crate::codes::msg;
use crate::conn;
use crate::error::{Error, Result, DisconnectError};
use super::{DebugMsg, Event, Pump, Role, TransportState};
use super::negotiate;

/// Work that remains after a packet was received and that must finish before we receive the next
/// packet (typically, delivering an event to the user).
pub(crate) trait RecvState {
    fn poll(&mut self, st: &mut TransportState, cx: &mut Context) -> Poll<Result<()>>;
}

pub(crate) type ResultRecvState = Result<Option<Box<dyn RecvState + Send>>>;

pub(crate) fn pump_recv(st: &mut TransportState, cx: &mut Context) -> Result<Pump> {
    match st.recv_st.take() {
        Some(mut recv_st) => match recv_st.poll(st, cx) {
            Poll::Ready(Ok(())) => Ok(Pump::Progress),
            Poll::Ready(Err(err)) => Err(err),
            Poll::Pending => {
                st.recv_st = Some(recv_st);
                Ok(Pump::Pending)
            },
        },
        None => Ok(Pump::Pending),
    }
}

pub(crate) fn recv_packet(st: &mut TransportState, packet: RecvPacket) -> ResultRecvState {
    let msg_id = packet.payload.first().copied().unwrap_or(0);
    if !msg::is_transport_kex(msg_id) && negotiate::is_peer_ahead(st) {
        log::debug!("holding packet {} until our side of the key exchange finishes", msg_id);
        return Ok(Some(Box::new(HoldPacketState { packet: Some(packet), next: None })))
    }

    let mut payload = PacketDecode::new(packet.payload.clone());
    match recv_packet_dispatch(st, &mut payload) {
        Ok(recv_state) => Ok(recv_state),
        Err(Error::PacketNotImplemented(msg_id)) => not_implemented(st, msg_id, &packet),
        Err(err) => Err(err),
    }
}

fn recv_packet_dispatch(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let msg_id = payload.get_u8()?;
    log::trace!("received packet {}", msg_id);

    // RFC 4253, section 7.1: only transport messages may be sent between KEXINIT and NEWKEYS
    if !msg::is_transport_kex(msg_id) && (st.session_id.is_none() || negotiate::is_peer_in_kex(st)) {
        log::debug!("received packet {} during key exchange", msg_id);
        return Err(Error::Protocol("received non-transport packet during key exchange"))
    }

    match msg_id {
        msg::DISCONNECT => recv_disconnect(st, payload),
        msg::IGNORE => Ok(None),
        msg::UNIMPLEMENTED => recv_unimplemented(st, payload),
        msg::DEBUG => recv_debug(st, payload),
        msg::SERVICE_REQUEST if st.role == Role::Server => auth::recv_service_request(st, payload),
        msg::SERVICE_ACCEPT if st.role == Role::Client => auth::recv_service_accept(st, payload),
        msg::EXT_INFO => {
            log::debug!("ignoring SSH_MSG_EXT_INFO");
            Ok(None)
        },
        20..=29 => negotiate::recv_negotiate_packet(st, msg_id, payload),
        30..=49 => negotiate::recv_kex_packet(st, msg_id, payload),
        50..=79 => auth::recv_auth_packet(st, msg_id, payload),
        80..=127 => {
            if !auth::is_authenticated(st) {
                return Err(Error::Protocol("received connection packet before authentication"))
            }
            conn::recv_conn_packet(st, msg_id, payload)
        },
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

fn recv_disconnect(_: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let disconnect = DisconnectError {
        reason_code: payload.get_u32()?,
        description: payload.get_string()?,
        description_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_DISCONNECT: {:?}", disconnect);
    Err(Error::PeerDisconnected(disconnect))
}

fn recv_debug(_: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let debug_msg = DebugMsg {
        always_display: payload.get_bool()?,
        message: payload.get_string()?,
        message_lang: payload.get_string()?,
    };
    send_event(Event::DebugMsg(debug_msg))
}

fn recv_unimplemented(_: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let packet_seq = payload.get_u32()?;
    log::debug!("received SSH_MSG_UNIMPLEMENTED for packet seq {}", packet_seq);
    Ok(None)
}

/// Delivers `event` to the user before we read the next packet.
///
/// If the user has dropped the receiver, the event is silently dropped.
pub(crate) fn send_event(event: Event) -> ResultRecvState {
    struct SendEventState {
        event: Option<Event>,
    }

    impl RecvState for SendEventState {
        fn poll(&mut self, st: &mut TransportState, cx: &mut Context) -> Poll<Result<()>> {
            let reserve_res = ready!(st.event_tx.poll_reserve(cx));
            if let Some(event) = self.event.take() {
                if reserve_res.is_ok() {
                    let _ = st.event_tx.send_item(event);
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    Ok(Some(Box::new(SendEventState { event: Some(event) })))
}

/// A packet that the peer sent with the new keys, which we pass to the services only after the key
/// exchange has finished on our side too.
struct HoldPacketState {
    packet: Option<RecvPacket>,
    next: Option<Box<dyn RecvState + Send>>,
}

impl RecvState for HoldPacketState {
    fn poll(&mut self, st: &mut TransportState, cx: &mut Context) -> Poll<Result<()>> {
        if let Some(packet) = self.packet.take() {
            if !negotiate::is_ready(st) {
                self.packet = Some(packet);
                return Poll::Pending
            }
            match recv_packet(st, packet) {
                Ok(next) => self.next = next,
                Err(err) => return Poll::Ready(Err(err)),
            }
        }

        match self.next.as_mut() {
            Some(next) => next.poll(st, cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

fn not_implemented(st: &mut TransportState, msg_id: u8, packet: &RecvPacket) -> ResultRecvState {
    log::debug!("received unimplemented packet {}, seq {}", msg_id, packet.packet_seq);
    let mut reply = PacketEncode::with_msg(msg::UNIMPLEMENTED);
    reply.put_u32(packet.packet_seq);
    st.codec.send_pipe.feed_packet(&reply.finish())?;
    Ok(None)
}
