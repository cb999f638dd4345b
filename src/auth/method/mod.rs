//! Authentication methods of the client (RFC 4252, sections 5 to 8).
use bytes::Bytes;
use std::task::Poll;
use tokio::sync::oneshot;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::Result;
use super::AuthFailure;
pub use self::none::AuthNoneResult;
pub use self::password::{AuthPasswordPrompt, AuthPasswordResult};
pub use self::pubkey::AuthPubkeyResult;
pub(crate) use self::none::AuthNone;
pub(crate) use self::password::AuthPassword;
pub(crate) use self::pubkey::{AuthPubkey, CheckPubkey, signed_data as pubkey_signed_data};

mod none;
mod password;
mod pubkey;

/// One attempt to authenticate, driven by the client auth state.
///
/// The method sends its request with `send_packet()` and then waits for the server to reply;
/// `poll()` becomes ready when the result was delivered to the caller.
pub(crate) trait AuthMethod {
    fn recv_success(&mut self) -> Result<()>;
    fn recv_failure(&mut self, failure: AuthFailure) -> Result<()>;
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()>;
    fn send_packet(&mut self, session_id: &[u8]) -> Result<Option<Bytes>>;
    fn poll(&mut self) -> Poll<Result<()>>;
}

/// Sender of the result of a method, which can be used only once.
#[derive(Debug)]
struct MethodResult<T> {
    result_tx: Option<oneshot::Sender<T>>,
}

impl<T> MethodResult<T> {
    fn new(result_tx: oneshot::Sender<T>) -> Self {
        Self { result_tx: Some(result_tx) }
    }

    fn send(&mut self, result: T) {
        if let Some(result_tx) = self.result_tx.take() {
            let _ = result_tx.send(result);
        }
    }

    fn poll(&self) -> Poll<Result<()>> {
        match self.result_tx {
            Some(_) => Poll::Pending,
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Encodes the common prefix of `SSH_MSG_USERAUTH_REQUEST` (RFC 4252, section 5).
fn request_header(username: &str, method_name: &str) -> PacketEncode {
    let mut payload = PacketEncode::with_msg(msg::USERAUTH_REQUEST);
    payload.put_str(username);
    payload.put_str("ssh-connection");
    payload.put_str(method_name);
    payload
}
