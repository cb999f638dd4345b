use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use crate::transport::{self, negotiate, Event, Pump, ResultRecvState, TransportState};
use crate::transport::recv;
use super::AuthState;
use super::method::AuthMethod;

/// Message sent by the server when authentication attempt fails.
///
/// This corresponds to `SSH_MSG_USERAUTH_FAILURE` (RFC 4252, section 5.1). Note that this may
/// actually represent a [partial success][Self::partial_success].
#[derive(Debug, Clone)]
pub struct AuthFailure {
    /// Authentication methods that may productively continue the authentication.
    ///
    /// Note that the server must not list the `"none"` method here, even if it is supported.
    pub methods_can_continue: Vec<String>,

    /// True if the authentication request was successful, but the authentication should continue.
    pub partial_success: bool,
}

/// Banner sent by the server during authentication (`SSH_MSG_USERAUTH_BANNER`, RFC 4252,
/// section 5.4).
#[derive(Debug, Clone)]
pub struct AuthBanner {
    /// The message that should be displayed to the user.
    pub message: String,
    /// Language tag of the message.
    pub message_lang: String,
}

#[derive(Default)]
pub(crate) struct ClientAuthState {
    service_requested: bool,
    service_accepted: bool,
    pub(super) method: Option<Box<dyn AuthMethod + Send>>,
    pub(super) success: bool,
}

fn client_auth_st(st: &mut TransportState) -> Result<&mut ClientAuthState> {
    match &mut st.auth_st {
        AuthState::Client(auth_st) => Ok(auth_st),
        AuthState::Server(_) => Err(Error::Protocol("client authentication on the server")),
    }
}

pub(crate) fn start_method(st: &mut TransportState, method: Box<dyn AuthMethod + Send>) -> Result<()> {
    let auth_st = client_auth_st(st)?;
    if auth_st.method.is_some() {
        return Err(Error::AuthMethodPending)
    }
    auth_st.method = Some(method);
    transport::state::wakeup(st);
    Ok(())
}

pub(super) fn pump_auth(st: &mut TransportState) -> Result<Pump> {
    let is_ready = negotiate::is_ready(st);
    let AuthState::Client(auth_st) = &mut st.auth_st else { return Ok(Pump::Pending) };

    if !auth_st.service_requested && is_ready {
        let mut payload = PacketEncode::with_msg(msg::SERVICE_REQUEST);
        payload.put_str("ssh-userauth");
        st.codec.send_pipe.feed_packet(&payload.finish())?;
        log::debug!("sending SSH_MSG_SERVICE_REQUEST for 'ssh-userauth'");
        auth_st.service_requested = true;
        return Ok(Pump::Progress)
    }

    let Some(method) = auth_st.method.as_mut() else { return Ok(Pump::Pending) };
    if !auth_st.service_accepted {
        return Ok(Pump::Pending)
    }

    if auth_st.success {
        method.recv_success()?;
    } else if is_ready {
        if let Some(session_id) = st.session_id.as_deref() {
            if let Some(payload) = method.send_packet(session_id)? {
                st.codec.send_pipe.feed_packet(&payload)?;
                return Ok(Pump::Progress)
            }
        }
    }

    pump_ready!(method.poll())?;
    auth_st.method = None;
    Ok(Pump::Progress)
}

pub(super) fn recv_service_accept(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let service_name = payload.get_string()?;
    let auth_st = client_auth_st(st)?;

    if service_name != "ssh-userauth" || !auth_st.service_requested {
        log::warn!("received SSH_MSG_SERVICE_ACCEPT for unrequested service {:?}", service_name);
        return Err(Error::Protocol("received SSH_MSG_SERVICE_ACCEPT for unrequested service"))
    }

    log::debug!("received SSH_MSG_SERVICE_ACCEPT for 'ssh-userauth'");
    auth_st.service_accepted = true;
    Ok(None)
}

pub(super) fn recv_auth_packet(
    st: &mut TransportState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::USERAUTH_FAILURE => recv_auth_failure(st, payload),
        msg::USERAUTH_SUCCESS => recv_auth_success(st),
        msg::USERAUTH_BANNER => recv_auth_banner(payload),
        60..=79 => {
            match client_auth_st(st)?.method.as_mut() {
                Some(method) => {
                    method.recv_packet(msg_id, payload)?;
                    Ok(None)
                },
                None => Err(Error::PacketNotImplemented(msg_id)),
            }
        },
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

fn recv_auth_failure(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let failure = AuthFailure {
        methods_can_continue: payload.get_name_list()?,
        partial_success: payload.get_bool()?,
    };
    log::debug!("received SSH_MSG_USERAUTH_FAILURE: {:?}", failure);

    match client_auth_st(st)?.method.as_mut() {
        Some(method) => {
            method.recv_failure(failure)?;
            Ok(None)
        },
        None => Err(Error::Protocol("received unexpected SSH_MSG_USERAUTH_FAILURE")),
    }
}

fn recv_auth_success(st: &mut TransportState) -> ResultRecvState {
    let auth_st = client_auth_st(st)?;
    if auth_st.success {
        return Err(Error::Protocol("received SSH_MSG_USERAUTH_SUCCESS twice"))
    }
    auth_st.success = true;
    log::info!("authentication succeeded");
    transport::state::start_delayed_compression(st);
    Ok(None)
}

fn recv_auth_banner(payload: &mut PacketDecode) -> ResultRecvState {
    let banner = AuthBanner {
        message: payload.get_string()?,
        message_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_USERAUTH_BANNER");
    recv::send_event(Event::AuthBanner(banner))
}
