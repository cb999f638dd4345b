use crate::auth::AuthBanner;
use crate::conn::{AcceptChannel, GlobalRequestEvent};
use crate::pubkey::Pubkey;
use crate::transport::{AcceptPubkeySender, DebugMsg, Event};

/// An event returned from [`ClientReceiver`][super::ClientReceiver].
///
/// These events are related to the whole connection, not to a particular channel. You can ignore
/// all events except [`ServerPubkey`][Self::ServerPubkey]: if you don't accept the key, we abort
/// the connection.
///
/// This enum is `#[non_exhaustive]`, it is always safe to ignore events that you don't handle.
#[non_exhaustive]
#[derive(Debug)]
pub enum ClientEvent {
    /// Server presented its public key and you should verify it.
    ///
    /// You receive this event during the initial key exchange and again after every rekey. We
    /// have already verified that the server owns the private key; it is up to you to decide
    /// whether the key belongs to the server that you wanted to connect to (RFC 4251, section 4.1).
    ServerPubkey(Pubkey, AcceptPubkeySender),

    /// Server sent us a debugging message (`SSH_MSG_DEBUG`).
    DebugMsg(DebugMsg),

    /// Server sent a text that the user should see before authentication
    /// (`SSH_MSG_USERAUTH_BANNER`).
    AuthBanner(AuthBanner),

    /// Server wants to open a channel.
    ///
    /// Servers open `"forwarded-tcpip"` channels for connections accepted on ports bound with
    /// [`Client::bind_tunnel()`][super::Client::bind_tunnel()]. Use
    /// [`AcceptChannel::accept_tunnel()`] to accept them. If you drop the [`AcceptChannel`], the
    /// channel is rejected.
    Channel(AcceptChannel),

    /// Server sent a global request.
    ///
    /// If you drop the event, we reply with a failure.
    GlobalRequest(GlobalRequestEvent),
}

impl ClientEvent {
    pub(super) fn from_event(event: Event) -> Option<ClientEvent> {
        Some(match event {
            Event::ServerPubkey(pubkey, accept_tx) => ClientEvent::ServerPubkey(pubkey, accept_tx),
            Event::DebugMsg(msg) => ClientEvent::DebugMsg(msg),
            Event::AuthBanner(banner) => ClientEvent::AuthBanner(banner),
            Event::Channel(accept) => ClientEvent::Channel(accept),
            Event::GlobalRequest(request) => ClientEvent::GlobalRequest(request),
            Event::AuthRequest(_) => return None,
        })
    }
}
