use tokio::sync::oneshot;
use crate::auth::{AuthBanner, AuthRequest};
use crate::conn::{AcceptChannel, GlobalRequestEvent};
use crate::error::{Result, Error};
use crate::pubkey::Pubkey;

/// Event produced by the transport, translated into `ClientEvent` or `ServerEvent` by the
/// receivers.
#[derive(Debug)]
pub(crate) enum Event {
    ServerPubkey(Pubkey, AcceptPubkeySender),
    DebugMsg(DebugMsg),
    AuthBanner(AuthBanner),
    AuthRequest(AuthRequest),
    Channel(AcceptChannel),
    GlobalRequest(GlobalRequestEvent),
}

/// Debugging message sent by the peer (`SSH_MSG_DEBUG`, RFC 4253, section 11.3).
#[derive(Debug, Clone)]
pub struct DebugMsg {
    /// If true, the message should be displayed.
    pub always_display: bool,
    /// The debugging message string.
    pub message: String,
    /// Language tag of the message (as in RFC 3066).
    pub message_lang: String,
}

/// Tell us whether the server public key is valid.
///
/// You receive this object in `ClientEvent::ServerPubkey` and use it to accept or reject the
/// server public key. If you drop this object, it is treated as rejection.
#[derive(Debug)]
pub struct AcceptPubkeySender {
    pub(crate) accept_tx: oneshot::Sender<Result<PubkeyAccepted>>,
}

/// Witness that the user has called [`AcceptPubkeySender::accept()`].
#[derive(Debug)]
pub(crate) struct PubkeyAccepted(());

impl AcceptPubkeySender {
    /// Accept the server public key.
    ///
    /// You assert that this public key really belongs to the server that you want to connect to.
    pub fn accept(self) {
        let _ = self.accept_tx.send(Ok(PubkeyAccepted(())));
    }

    /// Reject the server public key.
    ///
    /// The connection will be aborted with error `Error::PubkeyAccept(Box::new(err))`.
    pub fn reject<E: std::error::Error + Send + Sync + 'static>(self, err: E) {
        let _ = self.accept_tx.send(Err(Error::PubkeyAccept(Box::new(err))));
    }
}
