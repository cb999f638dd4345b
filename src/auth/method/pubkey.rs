use bytes::Bytes;
use derivative::Derivative;
use std::task::Poll;
use tokio::sync::oneshot;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use crate::pubkey::{Privkey, Pubkey, PubkeyAlgo};
use super::{AuthFailure, AuthMethod, MethodResult, request_header};

/// Result of the ["publickey"][crate::Client::auth_pubkey] authentication method.
#[derive(Debug, Clone)]
#[must_use]
pub enum AuthPubkeyResult {
    /// The authentication was successful.
    Success,

    /// The authentication was rejected.
    Failure(AuthFailure),
}

/// Data signed by the client in "publickey" authentication (RFC 4252, section 7).
pub(crate) fn signed_data(
    session_id: &[u8],
    username: &str,
    service_name: &str,
    algo_name: &str,
    pubkey_blob: &[u8],
) -> Bytes {
    let mut signed = PacketEncode::new();
    signed.put_bytes(session_id);
    signed.put_u8(msg::USERAUTH_REQUEST);
    signed.put_str(username);
    signed.put_str(service_name);
    signed.put_str("publickey");
    signed.put_bool(true);
    signed.put_str(algo_name);
    signed.put_bytes(pubkey_blob);
    signed.finish()
}

#[derive(Derivative)]
#[derivative(Debug)]
pub(crate) struct AuthPubkey {
    username: String,
    #[derivative(Debug = "ignore")]
    privkey: Privkey,
    pubkey_algo: &'static PubkeyAlgo,
    request_sent: bool,
    result: MethodResult<Result<AuthPubkeyResult>>,
}

impl AuthPubkey {
    pub fn new(
        username: String,
        privkey: Privkey,
        pubkey_algo: &'static PubkeyAlgo,
        result_tx: oneshot::Sender<Result<AuthPubkeyResult>>,
    ) -> AuthPubkey {
        AuthPubkey { username, privkey, pubkey_algo, request_sent: false, result: MethodResult::new(result_tx) }
    }
}

impl AuthMethod for AuthPubkey {
    fn recv_success(&mut self) -> Result<()> {
        self.result.send(Ok(AuthPubkeyResult::Success));
        Ok(())
    }

    fn recv_failure(&mut self, failure: AuthFailure) -> Result<()> {
        self.result.send(Ok(AuthPubkeyResult::Failure(failure)));
        Ok(())
    }

    fn recv_packet(&mut self, msg_id: u8, _payload: &mut PacketDecode) -> Result<()> {
        Err(Error::PacketNotImplemented(msg_id))
    }

    fn send_packet(&mut self, session_id: &[u8]) -> Result<Option<Bytes>> {
        if self.request_sent {
            return Ok(None)
        }
        self.request_sent = true;

        let pubkey_blob = self.privkey.pubkey().encode();
        let signed = signed_data(session_id, &self.username, "ssh-connection", self.pubkey_algo.name, &pubkey_blob);
        let signature = match (self.pubkey_algo.sign)(&self.privkey, &signed) {
            Ok(signature) => signature,
            Err(err) => {
                // the key does not match the algorithm; this fails the method, not the connection
                self.result.send(Err(err));
                return Ok(None)
            },
        };

        let mut payload = request_header(&self.username, "publickey");
        payload.put_bool(true);
        payload.put_str(self.pubkey_algo.name);
        payload.put_bytes(&pubkey_blob);
        payload.put_bytes(&signature);
        log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method 'publickey' with {:?}", self.pubkey_algo.name);
        Ok(Some(payload.finish()))
    }

    fn poll(&mut self) -> Poll<Result<()>> {
        self.result.poll()
    }
}

impl AuthPubkeyResult {
    /// Returns `Ok` if this is a success, `Err` otherwise.
    pub fn success_or_error(&self) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failure(_) => Err(Error::AuthFailed),
        }
    }
}

/// Asks the server whether it would accept a public key, without signing anything
/// (RFC 4252, section 7, answered with `SSH_MSG_USERAUTH_PK_OK`).
#[derive(Debug)]
pub(crate) struct CheckPubkey {
    username: String,
    pubkey: Pubkey,
    pubkey_algo: &'static PubkeyAlgo,
    request_sent: bool,
    result: MethodResult<bool>,
}

impl CheckPubkey {
    pub fn new(
        username: String,
        pubkey: Pubkey,
        pubkey_algo: &'static PubkeyAlgo,
        result_tx: oneshot::Sender<bool>,
    ) -> CheckPubkey {
        CheckPubkey { username, pubkey, pubkey_algo, request_sent: false, result: MethodResult::new(result_tx) }
    }
}

impl AuthMethod for CheckPubkey {
    fn recv_success(&mut self) -> Result<()> {
        log::debug!("server accepted the user when checking a public key");
        self.result.send(true);
        Ok(())
    }

    fn recv_failure(&mut self, _failure: AuthFailure) -> Result<()> {
        self.result.send(false);
        Ok(())
    }

    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        if msg_id != msg::USERAUTH_PK_OK {
            return Err(Error::PacketNotImplemented(msg_id))
        }

        let algo_name = payload.get_string()?;
        let pubkey_blob = payload.get_bytes()?;
        log::debug!("received SSH_MSG_USERAUTH_PK_OK for {:?}", algo_name);
        if algo_name != self.pubkey_algo.name || pubkey_blob != self.pubkey.encode() {
            return Err(Error::Protocol("received SSH_MSG_USERAUTH_PK_OK for a different key"))
        }
        self.result.send(true);
        Ok(())
    }

    fn send_packet(&mut self, _session_id: &[u8]) -> Result<Option<Bytes>> {
        if self.request_sent {
            return Ok(None)
        }

        let mut payload = request_header(&self.username, "publickey");
        payload.put_bool(false);
        payload.put_str(self.pubkey_algo.name);
        payload.put_bytes(&self.pubkey.encode());
        log::debug!("sending SSH_MSG_USERAUTH_REQUEST for method 'publickey' without signature");
        self.request_sent = true;
        Ok(Some(payload.finish()))
    }

    fn poll(&mut self) -> Poll<Result<()>> {
        self.result.poll()
    }
}
