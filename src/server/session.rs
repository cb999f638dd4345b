use bytes::Bytes;
use futures_core::ready;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::conn::{
    AcceptChannel, Channel, ChannelReceiver, ChannelConfig, ChannelEvent, ChannelReq, ChannelReply,
    DATA_STANDARD, DATA_STDERR, ExitSignal, SessionRequest,
};
use crate::error::{Result, Error};

/// Handle to an SSH session on the server.
///
/// Obtain it by accepting a `"session"` channel with [`AcceptChannel::accept_session()`]. The
/// client configures and starts the process with requests that you receive from
/// [`ServerSessionReceiver`]; you run the process and report its output and exit status with
/// this object.
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct ServerSession {
    channel: Channel,
}

impl AcceptChannel {
    /// Accept the channel as a [`ServerSession`].
    pub async fn accept_session(self, config: ChannelConfig) -> Result<(ServerSession, ServerSessionReceiver)> {
        if self.channel_type != "session" {
            return Err(Error::Protocol("channel is not a session"))
        }
        let (channel, channel_rx) = self.accept(config).await?;
        Ok((ServerSession { channel }, ServerSessionReceiver { channel_rx }))
    }
}

impl ServerSession {
    /// Send data to the standard output of the client.
    pub async fn send_stdout(&self, data: Bytes) -> Result<()> {
        self.channel.send_data(data, DATA_STANDARD).await
    }

    /// Send data to the standard error of the client.
    pub async fn send_stderr(&self, data: Bytes) -> Result<()> {
        self.channel.send_data(data, DATA_STDERR).await
    }

    /// Tell the client that the process will not produce more output.
    pub async fn send_eof(&self) -> Result<()> {
        self.channel.send_eof().await
    }

    /// Report the exit status of the process (`"exit-status"`).
    ///
    /// The status is sent after the output that was sent before it. You should then
    /// [`close()`][Self::close()] the session.
    pub fn send_exit_status(&self, status: u32) -> Result<()> {
        self.send_notification(SessionRequest::ExitStatus(status))
    }

    /// Report that the process was killed by a signal (`"exit-signal"`).
    pub fn send_exit_signal(&self, signal: ExitSignal) -> Result<()> {
        self.send_notification(SessionRequest::ExitSignal(signal))
    }

    /// Close the session.
    ///
    /// We send `SSH_MSG_CHANNEL_CLOSE` after the queued data. This method is idempotent.
    pub fn close(&self) {
        self.channel.close()
    }

    fn send_notification(&self, request: SessionRequest) -> Result<()> {
        self.channel.send_request(ChannelReq {
            request_type: request.request_type().into(),
            payload: request.encode_payload(),
            reply_tx: None,
        })
    }
}

/// Receiving half of a [`ServerSession`].
///
/// If you stop receiving, the client stops sending stdin once the window of the session is
/// exhausted.
pub struct ServerSessionReceiver {
    channel_rx: ChannelReceiver,
}

/// An event returned from [`ServerSessionReceiver`].
#[derive(Debug)]
#[non_exhaustive]
pub enum ServerSessionEvent {
    /// Request from the client, such as `"pty-req"` or `"exec"`.
    Request(SessionRequestEvent),
    /// Data for the standard input of the process.
    StdinData(Bytes),
    /// The client will not send more input.
    Eof,
}

/// Session request received from the client.
///
/// If the client wants a reply, answer with [`accept()`][Self::accept()] or
/// [`reject()`][Self::reject()]. Dropping the event rejects the request. Replies are sent in the
/// order of the requests, even if you answer them in a different order.
#[derive(Debug)]
pub struct SessionRequestEvent {
    /// The request.
    pub request: SessionRequest,
    reply_tx: Option<oneshot::Sender<ChannelReply>>,
}

impl SessionRequestEvent {
    /// True if the client asked for a reply.
    pub fn wants_reply(&self) -> bool {
        self.reply_tx.is_some()
    }

    /// Reply with success.
    pub fn accept(self) {
        self.reply(ChannelReply::Success)
    }

    /// Reply with failure.
    pub fn reject(self) {
        self.reply(ChannelReply::Failure)
    }

    fn reply(self, reply: ChannelReply) {
        if let Some(reply_tx) = self.reply_tx {
            let _ = reply_tx.send(reply);
        }
    }
}

impl ServerSessionReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the session was closed.
    pub async fn recv(&mut self) -> Result<Option<ServerSessionEvent>> {
        struct Recv<'a> { rx: &'a mut ServerSessionReceiver }
        impl<'a> Future for Recv<'a> {
            type Output = Result<Option<ServerSessionEvent>>;
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
                self.rx.poll_recv(cx)
            }
        }
        Recv { rx: self }.await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<ServerSessionEvent>>> {
        loop {
            let event = match ready!(self.channel_rx.poll_recv(cx)) {
                Some(ChannelEvent::Data(data, DATA_STANDARD)) => ServerSessionEvent::StdinData(data),
                Some(ChannelEvent::Data(_, _)) => continue,
                Some(ChannelEvent::Eof) => ServerSessionEvent::Eof,
                Some(ChannelEvent::Request(req)) => {
                    let request = SessionRequest::decode(req.request_type, req.payload)?;
                    ServerSessionEvent::Request(SessionRequestEvent { request, reply_tx: req.reply_tx })
                },
                None => return Poll::Ready(Ok(None)),
            };
            return Poll::Ready(Ok(Some(event)))
        }
    }
}
