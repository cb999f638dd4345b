use bytes::Bytes;
use parking_lot::Mutex;
use rand_chacha::ChaCha20Rng;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;
use crate::auth::{self, AuthState};
use crate::codec::{Codec, PacketEncode, RecvPipe, SendPipe};
use crate::codes::msg;
use crate::compress::CompressAlgo;
use crate::conn::{self, ConnState};
use crate::error::{Error, Result, DisconnectError};
use crate::util::{self, AsyncReadWrite};
use super::{Event, Pump, Role, TransportConfig};
use super::negotiate::{self, NegotiateState};
use super::recv::{self, RecvState};

pub(crate) struct TransportState {
    pub role: Role,
    pub config: TransportConfig,
    pub rng: ChaCha20Rng,
    pub event_tx: PollSender<Event>,
    pub codec: Codec,
    pub our_ident: Bytes,
    pub their_ident: Option<Bytes>,
    our_disconnect: Option<DisconnectError>,
    disconnect_sent: bool,
    fatal_error: Option<Error>,
    pub recv_st: Option<Box<dyn RecvState + Send>>,
    pub negotiate_st: Box<NegotiateState>,
    pub auth_st: AuthState,
    pub conn_st: Box<ConnState>,
    pub session_id: Option<Vec<u8>>,
    /// Compression negotiated for the current keys that starts only after authentication.
    pub delayed_compress_send: Option<&'static CompressAlgo>,
    pub delayed_compress_recv: Option<&'static CompressAlgo>,
    /// Reference to ourselves, handed out to the handles created from events.
    pub weak: Weak<Mutex<TransportState>>,
    waker: Option<Waker>,
}

pub(crate) fn new_transport(
    role: Role,
    config: TransportConfig,
    auth_st: AuthState,
    event_tx: mpsc::Sender<Event>,
) -> Result<Arc<Mutex<TransportState>>> {
    let mut rng = util::new_connection_rng()?;
    let mut send_pipe = SendPipe::new(&mut rng)?;
    let our_ident = Bytes::from_static(concat!("SSH-2.0-kusari_", env!("CARGO_PKG_VERSION")).as_bytes());
    send_pipe.feed_ident(&our_ident);
    log::debug!("starting {:?} transport", role);

    Ok(Arc::new_cyclic(|weak| Mutex::new(TransportState {
        role,
        config,
        rng,
        event_tx: PollSender::new(event_tx),
        codec: Codec {
            recv_pipe: RecvPipe::new(),
            send_pipe,
        },
        our_ident,
        their_ident: None,
        our_disconnect: None,
        disconnect_sent: false,
        fatal_error: None,
        recv_st: None,
        negotiate_st: Box::new(negotiate::init_negotiate()),
        auth_st,
        conn_st: Box::new(conn::init_conn()),
        session_id: None,
        delayed_compress_send: None,
        delayed_compress_recv: None,
        weak: weak.clone(),
        waker: None,
    })))
}

/// Drives the connection. Returns `Ready(Ok)` after we disconnect, `Ready(Err)` when the
/// connection fails.
pub(crate) fn poll_transport(
    st: &mut TransportState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Poll<Result<()>> {
    if st.fatal_error.is_none() {
        match poll_pumps(st, stream.as_mut(), cx) {
            Poll::Ready(Err(err)) => {
                match err.disconnect_reason() {
                    Some(reason_code) if !st.disconnect_sent => {
                        log::debug!("connection failed, disconnecting: {}", err);
                        let error = DisconnectError::new(reason_code, err.to_string());
                        if send_disconnect(st, error).is_err() {
                            teardown(st);
                            return Poll::Ready(Err(err))
                        }
                        st.disconnect_sent = true;
                        st.fatal_error = Some(err);
                    },
                    _ => {
                        log::debug!("connection failed: {}", err);
                        teardown(st);
                        return Poll::Ready(Err(err))
                    },
                }
            },
            Poll::Ready(Ok(())) => {
                teardown(st);
                return Poll::Ready(Ok(()))
            },
            Poll::Pending => return Poll::Pending,
        }
    }

    // after a fatal error, we only try to deliver the SSH_MSG_DISCONNECT
    let flushed = loop {
        match pump_write(st, stream.as_mut(), cx) {
            Ok(Pump::Progress) => continue,
            Ok(Pump::Pending) => break flush_write(st, stream.as_mut(), cx).unwrap_or(true),
            Err(_) => break true,
        }
    };
    if !flushed {
        st.waker = Some(cx.waker().clone());
        return Poll::Pending
    }

    teardown(st);
    match st.fatal_error.take() {
        Some(err) => Poll::Ready(Err(err)),
        None => Poll::Ready(Ok(())),
    }
}

fn poll_pumps(
    st: &mut TransportState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Poll<Result<()>> {
    if let Some(error) = st.our_disconnect.take() {
        if !st.disconnect_sent {
            send_disconnect(st, error)?;
            st.disconnect_sent = true;
        }
    }

    loop {
        let mut progress = false;

        if !st.disconnect_sent {
            while recv::pump_recv(st, cx)?.is_progress() { progress = true }
            while negotiate::pump_negotiate(st, cx)?.is_progress() { progress = true }
            while auth::pump_auth(st, cx)?.is_progress() { progress = true }
            while conn::pump_conn(st, cx)?.is_progress() { progress = true }

            if pump_read(st, stream.as_mut(), cx)?.is_progress() { continue }
        }

        while pump_write(st, stream.as_mut(), cx)?.is_progress() { progress = true }

        if !progress { break }
    }

    let flushed = flush_write(st, stream.as_mut(), cx)?;
    if st.disconnect_sent && flushed {
        log::debug!("disconnected");
        return Poll::Ready(Ok(()))
    }

    st.waker = Some(cx.waker().clone());
    Poll::Pending
}

/// Wakes up the connection future after a handle queued some work.
pub(crate) fn wakeup(st: &mut TransportState) {
    if let Some(waker) = st.waker.take() {
        waker.wake();
    }
}

/// Drops all pending work, so that everybody who waits for a reply observes that the connection
/// is gone.
fn teardown(st: &mut TransportState) {
    st.recv_st = None;
    st.negotiate_st = Box::new(NegotiateState::default());
    auth::abort_auth(st);
    st.conn_st = Box::new(conn::init_conn());
    st.event_tx.close();
}

fn pump_read(
    st: &mut TransportState,
    stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    if st.their_ident.is_some() {
        pump_read_packet(st, stream, cx)
    } else {
        pump_read_ident(st, stream, cx)
    }
}

fn pump_read_packet(
    st: &mut TransportState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    if st.recv_st.is_some() {
        return Ok(Pump::Pending)
    }

    let packet = pump_ready!(poll_read(st, stream.as_mut(), cx, |pipe| pipe.consume_packet()))?;
    st.recv_st = recv::recv_packet(st, packet)?;
    Ok(Pump::Progress)
}

fn pump_read_ident(
    st: &mut TransportState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    let ident = pump_ready!(poll_read(st, stream.as_mut(), cx, |pipe| pipe.consume_ident()))?;
    let ident = Bytes::copy_from_slice(&ident);
    log::debug!("received peer identifier: {:?}", ident);

    // RFC 4253, section 5.1: "1.99" is announced by servers that also speak the old protocol
    if !ident.starts_with(b"SSH-2.0-") && !ident.starts_with(b"SSH-1.99-") {
        return Err(Error::ProtocolVersion(String::from_utf8_lossy(&ident).into_owned()))
    }

    st.their_ident = Some(ident);
    Ok(Pump::Progress)
}

fn pump_write(
    st: &mut TransportState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    let data = st.codec.send_pipe.peek_bytes();
    if data.is_empty() { return Ok(Pump::Pending) }
    match stream.as_mut().poll_write(cx, data) {
        Poll::Ready(Ok(0)) | Poll::Pending => {
            log::trace!("pending write of {} bytes", data.len());
            Ok(Pump::Pending)
        },
        Poll::Ready(Ok(written_len)) => {
            log::trace!("written {}/{} bytes", written_len, data.len());
            st.codec.send_pipe.consume_bytes(written_len);
            Ok(Pump::Progress)
        },
        Poll::Ready(Err(err)) => {
            log::debug!("error when writing: {}", err);
            Err(Error::WriteIo(err))
        },
    }
}

fn flush_write(
    st: &mut TransportState,
    stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<bool> {
    match stream.poll_flush(cx) {
        Poll::Ready(Ok(())) => Ok(st.codec.send_pipe.is_empty()),
        Poll::Pending => Ok(false),
        Poll::Ready(Err(err)) => Err(Error::WriteIo(err)),
    }
}

fn poll_read<F, T>(
    st: &mut TransportState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
    consume_f: F,
) -> Poll<Result<T>>
    where F: Fn(&mut RecvPipe) -> Result<Option<T>>
{
    loop {
        if let Some(value) = consume_f(&mut st.codec.recv_pipe)? {
            return Poll::Ready(Ok(value))
        }

        let feed_buf = st.codec.recv_pipe.feed_buf();
        match tokio_util::io::poll_read_buf(stream.as_mut(), cx, feed_buf) {
            Poll::Pending => {
                log::trace!("pending read");
                return Poll::Pending
            },
            Poll::Ready(Ok(0)) => {
                log::debug!("received eof");
                return Poll::Ready(Err(Error::PeerClosed))
            },
            Poll::Ready(Ok(read_len)) => {
                log::trace!("read {} bytes", read_len);
                continue
            },
            Poll::Ready(Err(err)) => {
                log::debug!("error when reading: {}", err);
                return Poll::Ready(Err(Error::ReadIo(err)))
            },
        }
    }
}

/// Queues a disconnect, the connection future finishes after it is sent.
pub(crate) fn disconnect(st: &mut TransportState, error: DisconnectError) -> Result<()> {
    if !st.disconnect_sent && st.our_disconnect.is_none() {
        st.our_disconnect = Some(error);
        wakeup(st);
        Ok(())
    } else {
        Err(Error::Disconnected(error))
    }
}

fn send_disconnect(st: &mut TransportState, error: DisconnectError) -> Result<()> {
    let mut payload = PacketEncode::with_msg(msg::DISCONNECT);
    payload.put_u32(error.reason_code);
    payload.put_str(&error.description);
    payload.put_str(&error.description_lang);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::info!("sending SSH_MSG_DISCONNECT with reason code {}", error.reason_code);
    Ok(())
}

/// Starts the compression that was postponed until the user is authenticated
/// ("zlib@openssh.com").
pub(crate) fn start_delayed_compression(st: &mut TransportState) {
    if let Some(algo) = st.delayed_compress_send.take() {
        log::debug!("starting delayed compression {:?} for sending", algo.name);
        st.codec.send_pipe.set_compress(algo.make_compress.map(|make| make()));
    }
    if let Some(algo) = st.delayed_compress_recv.take() {
        log::debug!("starting delayed compression {:?} for receiving", algo.name);
        st.codec.recv_pipe.set_decompress(algo.make_decompress.map(|make| make()));
    }
}
