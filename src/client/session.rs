use bytes::Bytes;
use futures_core::ready;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::conn::{
    Channel, ChannelReceiver, ChannelEvent, ChannelReq, ChannelReply, DATA_STANDARD, DATA_STDERR,
    ExitSignal, PtyRequest, SessionRequest, WindowChange,
};
use crate::error::{Result, Error};

/// Handle to an SSH session on the client.
///
/// A session (RFC 4254, section 6) corresponds to the execution of a single process. Open it
/// with [`Client::open_session()`][super::Client::open_session()]. You will typically:
///
/// - prepare the execution environment: [`env()`][Self::env()], [`request_pty()`][Self::request_pty()],
/// - start the process: [`shell()`][Self::shell()], [`exec()`][Self::exec()] or
/// [`subsystem()`][Self::subsystem()],
/// - interact with the process: [`send_stdin()`][Self::send_stdin()],
/// [`send_eof()`][Self::send_eof()], [`signal()`][Self::signal()],
/// [`window_change()`][Self::window_change()].
///
/// In parallel, you handle the events from [`SessionReceiver`].
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Session {
    channel: Channel,
}

impl Session {
    pub(super) fn new(channel: Channel, channel_rx: ChannelReceiver) -> (Session, SessionReceiver) {
        (Session { channel }, SessionReceiver { channel_rx })
    }

    /// Close the session.
    ///
    /// We send `SSH_MSG_CHANNEL_CLOSE` after the queued data, and the session is closed once the
    /// server closes it too. This method is idempotent.
    pub fn close(&self) {
        self.channel.close()
    }

    /// Sends a session request.
    ///
    /// Requests that RFC 4254 defines without a reply (`"window-change"`, `"signal"`,
    /// `"exit-status"` and `"exit-signal"`) are sent without `want reply` and the returned
    /// [`SessionReply`] resolves with an error. Prefer the specific methods below.
    pub fn send_request(&self, request: SessionRequest) -> Result<SessionReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let reply_tx = (!request.is_notification()).then_some(reply_tx);
        self.channel.send_request(ChannelReq {
            request_type: request.request_type().into(),
            payload: request.encode_payload(),
            reply_tx,
        })?;
        Ok(SessionReply { reply_rx })
    }

    fn send_notification(&self, request: SessionRequest) -> Result<()> {
        self.send_request(request)?.no_reply();
        Ok(())
    }
}

/// # Preparing the execution environment
impl Session {
    /// Pass an environment variable to the future process.
    pub fn env(&self, name: &[u8], value: &[u8]) -> Result<SessionReply> {
        self.send_request(SessionRequest::Env {
            name: Bytes::copy_from_slice(name),
            value: Bytes::copy_from_slice(value),
        })
    }

    /// Request a pseudo-terminal for the future process.
    pub fn request_pty(&self, request: PtyRequest) -> Result<SessionReply> {
        self.send_request(SessionRequest::Pty(request))
    }
}

/// # Starting the process
///
/// Only one of these requests can succeed in a session.
impl Session {
    /// Start the default shell of the user.
    pub fn shell(&self) -> Result<SessionReply> {
        self.send_request(SessionRequest::Shell)
    }

    /// Execute a command.
    pub fn exec(&self, command: &[u8]) -> Result<SessionReply> {
        self.send_request(SessionRequest::Exec { command: Bytes::copy_from_slice(command) })
    }

    /// Start a subsystem (RFC 4254, section 6.5).
    pub fn subsystem(&self, subsystem_name: &str) -> Result<SessionReply> {
        self.send_request(SessionRequest::Subsystem { name: subsystem_name.into() })
    }
}

/// # Interacting with a running process
impl Session {
    /// Send data to the standard input of the process.
    ///
    /// Returns after all bytes have been accepted by the flow control mechanism.
    pub async fn send_stdin(&self, data: Bytes) -> Result<()> {
        self.channel.send_data(data, DATA_STANDARD).await
    }

    /// Close the standard input of the process.
    ///
    /// If the session is already closed, we quietly return `Ok`.
    pub async fn send_eof(&self) -> Result<()> {
        self.channel.send_eof().await
    }

    /// Deliver a signal to the process.
    ///
    /// [`codes::signal`][crate::codes::signal] lists the signal names defined by SSH.
    pub fn signal(&self, signal_name: &str) -> Result<()> {
        self.send_notification(SessionRequest::Signal { signal_name: signal_name.into() })
    }

    /// Tell the server that the size of the terminal changed.
    pub fn window_change(&self, change: WindowChange) -> Result<()> {
        self.send_notification(SessionRequest::WindowChange(change))
    }
}

/// Future server response to a [`Session`] request.
#[derive(Debug)]
#[must_use = "please use .want_reply() to await the reply, or .no_reply() to ignore it"]
pub struct SessionReply {
    reply_rx: oneshot::Receiver<ChannelReply>,
}

impl SessionReply {
    /// Wait for the reply from the server.
    ///
    /// If the request failed, this returns [`Error::ChannelReq`].
    pub async fn want_reply(self) -> Result<()> {
        match self.reply_rx.await {
            Ok(ChannelReply::Success) => Ok(()),
            Ok(ChannelReply::Failure) => Err(Error::ChannelReq),
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// Ignore the reply.
    pub fn no_reply(self) {}
}

/// An event returned from [`SessionReceiver`].
///
/// This enum is `#[non_exhaustive]`, it is always safe to ignore events that you don't handle.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionEvent {
    /// Data from the standard output of the process.
    ///
    /// The boundaries between consecutive `StdoutData` events are arbitrary.
    StdoutData(Bytes),
    /// Data from the standard error of the process.
    StderrData(Bytes),
    /// The process will not send more data.
    Eof,
    /// The process terminated with the given exit status.
    ExitStatus(u32),
    /// The process terminated due to a signal.
    ExitSignal(ExitSignal),
}

/// Receiving half of a [`Session`].
///
/// Output that you have not received holds the window of the session, so the server pauses
/// sending until you catch up.
pub struct SessionReceiver {
    channel_rx: ChannelReceiver,
}

impl SessionReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the session was closed.
    pub async fn recv(&mut self) -> Result<Option<SessionEvent>> {
        struct Recv<'a> { rx: &'a mut SessionReceiver }
        impl<'a> Future for Recv<'a> {
            type Output = Result<Option<SessionEvent>>;
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
                self.rx.poll_recv(cx)
            }
        }
        Recv { rx: self }.await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<SessionEvent>>> {
        loop {
            match ready!(self.channel_rx.poll_recv(cx)) {
                Some(channel_event) => match translate_event(channel_event)? {
                    Some(event) => return Poll::Ready(Ok(Some(event))),
                    None => continue,
                },
                None => return Poll::Ready(Ok(None)),
            }
        }
    }
}

fn translate_event(event: ChannelEvent) -> Result<Option<SessionEvent>> {
    Ok(match event {
        ChannelEvent::Data(data, DATA_STANDARD) => Some(SessionEvent::StdoutData(data)),
        ChannelEvent::Data(data, DATA_STDERR) => Some(SessionEvent::StderrData(data)),
        ChannelEvent::Data(_, _) => None,
        ChannelEvent::Eof => Some(SessionEvent::Eof),
        ChannelEvent::Request(req) => translate_request(req)?,
    })
}

fn translate_request(req: ChannelReq) -> Result<Option<SessionEvent>> {
    let event = match SessionRequest::decode(req.request_type, req.payload)? {
        SessionRequest::ExitStatus(status) => SessionEvent::ExitStatus(status),
        SessionRequest::ExitSignal(signal) => SessionEvent::ExitSignal(signal),
        // requests that a client does not serve are answered with failure when `reply_tx` drops
        request => {
            log::debug!("ignoring session request {:?} from the server", request.request_type());
            return Ok(None)
        },
    };

    if let Some(reply_tx) = req.reply_tx {
        let _ = reply_tx.send(ChannelReply::Success);
    }
    Ok(Some(event))
}
