use bytes::Bytes;
use std::task::Poll;
use tokio::sync::oneshot;
use crate::codec::PacketDecode;
use crate::error::{Result, Error};
use super::{AuthFailure, AuthMethod, MethodResult, request_header};

/// Result of the ["none"][crate::Client::auth_none] authentication method.
#[derive(Debug, Clone)]
#[must_use]
pub enum AuthNoneResult {
    /// The server accepted the user without any credentials.
    Success,
    /// The server wants more; [`AuthFailure::methods_can_continue`] lists the methods it accepts.
    Failure(AuthFailure),
}

#[derive(Debug)]
pub(crate) struct AuthNone {
    username: String,
    request_sent: bool,
    result: MethodResult<AuthNoneResult>,
}

impl AuthNone {
    pub fn new(username: String, result_tx: oneshot::Sender<AuthNoneResult>) -> AuthNone {
        AuthNone { username, request_sent: false, result: MethodResult::new(result_tx) }
    }
}

impl AuthMethod for AuthNone {
    fn recv_success(&mut self) -> Result<()> {
        self.result.send(AuthNoneResult::Success);
        Ok(())
    }

    fn recv_failure(&mut self, failure: AuthFailure) -> Result<()> {
        self.result.send(AuthNoneResult::Failure(failure));
        Ok(())
    }

    fn recv_packet(&mut self, msg_id: u8, _payload: &mut PacketDecode) -> Result<()> {
        Err(Error::PacketNotImplemented(msg_id))
    }

    fn send_packet(&mut self, _session_id: &[u8]) -> Result<Option<Bytes>> {
        if self.request_sent {
            return Ok(None)
        }
        log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method 'none'");
        self.request_sent = true;
        Ok(Some(request_header(&self.username, "none").finish()))
    }

    fn poll(&mut self) -> Poll<Result<()>> {
        self.result.poll()
    }
}

impl AuthNoneResult {
    /// Returns `Ok` if this is a success, `Err` otherwise.
    pub fn success_or_error(&self) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failure(_) => Err(Error::AuthFailed),
        }
    }
}
