use crate::auth::AuthRequest;
use crate::conn::{AcceptChannel, GlobalRequestEvent};
use crate::transport::{DebugMsg, Event};

/// An event returned from [`ServerReceiver`][super::ServerReceiver].
///
/// This enum is `#[non_exhaustive]`, it is always safe to ignore events that you don't handle:
/// dropping a request rejects it.
#[non_exhaustive]
#[derive(Debug)]
pub enum ServerEvent {
    /// Client wants to authenticate.
    ///
    /// Decide with [`AuthRequest::accept()`], [`AuthRequest::accept_partial()`] or
    /// [`AuthRequest::reject()`]. We reply in the order of the requests.
    AuthRequest(AuthRequest),

    /// Client wants to open a channel, such as a `"session"` or a `"direct-tcpip"` tunnel.
    ///
    /// Use [`AcceptChannel::accept_session()`] for sessions and
    /// [`AcceptChannel::accept_tunnel()`] for tunnels. If you drop the [`AcceptChannel`], the
    /// channel is rejected.
    Channel(AcceptChannel),

    /// Client sent a global request, such as `"tcpip-forward"`.
    ///
    /// If you drop the event, we reply with a failure.
    GlobalRequest(GlobalRequestEvent),

    /// Client sent us a debugging message (`SSH_MSG_DEBUG`).
    DebugMsg(DebugMsg),
}

impl ServerEvent {
    pub(super) fn from_event(event: Event) -> Option<ServerEvent> {
        Some(match event {
            Event::AuthRequest(request) => ServerEvent::AuthRequest(request),
            Event::Channel(accept) => ServerEvent::Channel(accept),
            Event::GlobalRequest(request) => ServerEvent::GlobalRequest(request),
            Event::DebugMsg(msg) => ServerEvent::DebugMsg(msg),
            Event::ServerPubkey(..) | Event::AuthBanner(_) => return None,
        })
    }
}
