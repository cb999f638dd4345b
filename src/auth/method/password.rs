use bytes::Bytes;
use derivative::Derivative;
use std::task::Poll;
use tokio::sync::oneshot;
use crate::codec::PacketDecode;
use crate::codes::msg;
use crate::error::{Result, Error};
use super::{AuthFailure, AuthMethod, MethodResult, request_header};

/// Result of the ["password"][crate::Client::auth_password] authentication method.
#[derive(Debug, Clone)]
#[must_use]
pub enum AuthPasswordResult {
    /// The password was accepted.
    Success,
    /// The password has expired and the server asks for a new one
    /// (`SSH_MSG_USERAUTH_PASSWD_CHANGEREQ`).
    ChangePassword(AuthPasswordPrompt),
    /// The password was rejected.
    Failure(AuthFailure),
}

/// Prompt from the server asking the user to change the password (RFC 4252, section 8).
#[derive(Debug, Clone)]
pub struct AuthPasswordPrompt {
    /// Message that should be displayed to the user.
    pub prompt: String,
    /// Language tag of the prompt.
    pub prompt_lang: String,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct AuthPassword {
    username: String,
    #[cfg_attr(not(feature = "debug_less_secure"), derivative(Debug = "ignore"))]
    password: String,
    #[cfg_attr(not(feature = "debug_less_secure"), derivative(Debug = "ignore"))]
    new_password: Option<String>,
    request_sent: bool,
    result: MethodResult<AuthPasswordResult>,
}

impl AuthPassword {
    pub fn new(
        username: String,
        password: String,
        new_password: Option<String>,
        result_tx: oneshot::Sender<AuthPasswordResult>,
    ) -> AuthPassword {
        AuthPassword { username, password, new_password, request_sent: false, result: MethodResult::new(result_tx) }
    }
}

impl AuthMethod for AuthPassword {
    fn recv_success(&mut self) -> Result<()> {
        self.result.send(AuthPasswordResult::Success);
        Ok(())
    }

    fn recv_failure(&mut self, failure: AuthFailure) -> Result<()> {
        self.result.send(AuthPasswordResult::Failure(failure));
        Ok(())
    }

    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        if msg_id != msg::USERAUTH_PASSWD_CHANGEREQ {
            return Err(Error::PacketNotImplemented(msg_id))
        }

        let prompt = AuthPasswordPrompt {
            prompt: payload.get_string()?,
            prompt_lang: payload.get_string()?,
        };
        log::debug!("received SSH_MSG_USERAUTH_PASSWD_CHANGEREQ");
        self.result.send(AuthPasswordResult::ChangePassword(prompt));
        Ok(())
    }

    fn send_packet(&mut self, _session_id: &[u8]) -> Result<Option<Bytes>> {
        if self.request_sent {
            return Ok(None)
        }

        let mut payload = request_header(&self.username, "password");
        payload.put_bool(self.new_password.is_some());
        payload.put_str(&self.password);
        if let Some(new_password) = self.new_password.as_ref() {
            payload.put_str(new_password);
        }
        log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method 'password'");
        self.request_sent = true;
        Ok(Some(payload.finish()))
    }

    fn poll(&mut self) -> Poll<Result<()>> {
        self.result.poll()
    }
}

impl AuthPasswordResult {
    /// Returns `Ok` if this is a success, `Err` otherwise.
    pub fn success_or_error(&self) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::ChangePassword(_) | Self::Failure(_) => Err(Error::AuthFailed),
        }
    }
}
