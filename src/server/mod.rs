//! Server side of a connection: authenticating the client and serving its channels.
pub use self::server::{Server, ServerReceiver, ServerFuture, ServerConfig};
pub use self::server_event::ServerEvent;
pub use self::session::{ServerSession, ServerSessionReceiver, ServerSessionEvent, SessionRequestEvent};

mod server;
mod server_event;
mod session;
