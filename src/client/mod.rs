//! Client side of a connection: authenticating ourselves and opening sessions and tunnels.
pub use self::client::{Client, ClientReceiver, ClientFuture, ClientConfig};
pub use self::client_event::ClientEvent;
pub use self::session::{Session, SessionReceiver, SessionEvent, SessionReply};

mod client;
mod client_event;
mod session;
