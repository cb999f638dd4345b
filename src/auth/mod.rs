//! User authentication service ("ssh-userauth", RFC 4252).
//!
//! The client runs one [method][method] at a time and reports the outcome to the caller of
//! [`Client::auth_password()`][crate::Client::auth_password] and friends. The server turns every
//! request into an [`AuthRequest`] for the application, collects the methods that were accepted
//! and grants success once its [`AuthPolicy`] is satisfied.
use std::task::Context;
use crate::codec::PacketDecode;
use crate::error::Result;
use crate::transport::{Pump, ResultRecvState, TransportState};
pub use self::client::{AuthBanner, AuthFailure};
pub use self::method::{
    AuthNoneResult, AuthPasswordPrompt, AuthPasswordResult, AuthPubkeyResult,
};
pub use self::server::{AuthMethodRequest, AuthPolicy, AuthRequest};
pub(crate) use self::client::ClientAuthState;
pub(crate) use self::server::{ServerAuthConfig, ServerAuthState};

pub(crate) mod client;
pub(crate) mod method;
mod server;

pub(crate) enum AuthState {
    Client(Box<ClientAuthState>),
    Server(Box<ServerAuthState>),
}

pub(crate) fn pump_auth(st: &mut TransportState, cx: &mut Context) -> Result<Pump> {
    match st.auth_st {
        AuthState::Client(_) => client::pump_auth(st),
        AuthState::Server(_) => server::pump_auth(st, cx),
    }
}

pub(crate) fn recv_auth_packet(
    st: &mut TransportState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match st.auth_st {
        AuthState::Client(_) => client::recv_auth_packet(st, msg_id, payload),
        AuthState::Server(_) => server::recv_auth_packet(st, msg_id, payload),
    }
}

pub(crate) fn recv_service_request(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    server::recv_service_request(st, payload)
}

pub(crate) fn recv_service_accept(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    client::recv_service_accept(st, payload)
}

pub(crate) fn is_authenticated(st: &TransportState) -> bool {
    match &st.auth_st {
        AuthState::Client(auth_st) => auth_st.success,
        AuthState::Server(auth_st) => auth_st.success,
    }
}

/// Drops the pending method or requests, their callers observe that the connection is gone.
pub(crate) fn abort_auth(st: &mut TransportState) {
    match &mut st.auth_st {
        AuthState::Client(auth_st) => auth_st.method = None,
        AuthState::Server(auth_st) => auth_st.pending.clear(),
    }
}
