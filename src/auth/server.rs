use bytes::Bytes;
use derivative::Derivative;
use std::collections::{HashSet, VecDeque};
use std::future::Future as _;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Sleep;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use crate::pubkey::{self, Pubkey, PubkeyAlgo};
use crate::transport::{self, negotiate, Event, Pump, ResultRecvState, TransportState};
use crate::transport::recv;
use super::AuthState;
use super::method::pubkey_signed_data;

/// Authentication request of a client, received in
/// [`ServerEvent::AuthRequest`][crate::ServerEvent::AuthRequest].
///
/// Call one of the methods to decide; dropping the request rejects it.
#[derive(Debug)]
pub struct AuthRequest {
    /// The user name that the client wants to log in as.
    pub username: String,
    /// The method and its credentials.
    pub method: AuthMethodRequest,
    decision_tx: oneshot::Sender<AuthDecision>,
}

/// Method of an [`AuthRequest`].
#[derive(Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub enum AuthMethodRequest {
    /// The "none" method: should the user be let in without credentials?
    None,
    /// The "password" method with the password in plain text.
    Password(
        #[cfg_attr(not(feature = "debug_less_secure"), derivative(Debug = "ignore"))]
        String
    ),
    /// The "publickey" method without signature: would we accept this key?
    ///
    /// Accepting the probe does not authenticate the user, the client must then prove that it
    /// owns the private key.
    PubkeyProbe {
        /// The public key offered by the client.
        pubkey: Pubkey,
        /// The algorithm that the client intends to sign with.
        algo: &'static PubkeyAlgo,
    },
    /// The "publickey" method with a signature, which we have already verified: should the owner
    /// of this key be let in?
    Pubkey {
        /// The public key of the client.
        pubkey: Pubkey,
        /// The algorithm that the client signed with.
        algo: &'static PubkeyAlgo,
    },
}

/// Methods that the client must pass before we grant access.
#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Any single accepted method is enough.
    Any,
    /// Every listed method must be accepted (multi-factor authentication).
    All(Vec<String>),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AuthDecision {
    Accept,
    Partial,
    Reject,
}

impl AuthRequest {
    /// Accept the request. The user is logged in if this satisfies the [`AuthPolicy`].
    pub fn accept(self) {
        let _ = self.decision_tx.send(AuthDecision::Accept);
    }

    /// Accept the method, but require the client to continue with another method.
    pub fn accept_partial(self) {
        let _ = self.decision_tx.send(AuthDecision::Partial);
    }

    /// Reject the request.
    pub fn reject(self) {
        let _ = self.decision_tx.send(AuthDecision::Reject);
    }
}

/// Authentication settings of the server, taken from `ServerConfig`.
#[derive(Debug, Clone)]
pub(crate) struct ServerAuthConfig {
    pub methods: Vec<String>,
    pub policy: AuthPolicy,
    pub failure_delay: Duration,
    pub max_attempts: u32,
}

pub(crate) struct ServerAuthState {
    config: ServerAuthConfig,
    service_accept_pending: bool,
    service_accepted: bool,
    pub(super) success: bool,
    username: Option<String>,
    satisfied: HashSet<String>,
    attempts: u32,
    pub(super) pending: VecDeque<PendingAuth>,
}

/// Request that waits for the decision of the application. Replies are sent in the order of
/// requests.
pub(super) struct PendingAuth {
    method_name: &'static str,
    probe: Option<(String, Bytes)>,
    decision_rx: Option<oneshot::Receiver<AuthDecision>>,
    decision: Option<AuthDecision>,
    /// Rejection counts as a failed attempt and is delayed.
    penalized: bool,
    reply: Option<Reply>,
    delay: Option<Pin<Box<Sleep>>>,
}

#[derive(Debug)]
enum Reply {
    Success,
    Failure { partial_success: bool },
    PkOk { algo_name: String, pubkey_blob: Bytes },
}

impl ServerAuthState {
    pub fn new(config: ServerAuthConfig) -> Self {
        Self {
            config,
            service_accept_pending: false,
            service_accepted: false,
            success: false,
            username: None,
            satisfied: HashSet::new(),
            attempts: 0,
            pending: VecDeque::new(),
        }
    }

    fn is_policy_satisfied(&self) -> bool {
        match &self.config.policy {
            AuthPolicy::Any => !self.satisfied.is_empty(),
            AuthPolicy::All(methods) => methods.iter().all(|method| self.satisfied.contains(method)),
        }
    }

    fn methods_can_continue(&self) -> Vec<&str> {
        self.config.methods.iter()
            .map(|method| method.as_str())
            .filter(|method| *method != "none" && !self.satisfied.contains(*method))
            .collect()
    }
}

fn server_auth_st(st: &mut TransportState) -> Result<&mut ServerAuthState> {
    match &mut st.auth_st {
        AuthState::Server(auth_st) => Ok(auth_st),
        AuthState::Client(_) => Err(Error::Protocol("server authentication on the client")),
    }
}

pub(super) fn pump_auth(st: &mut TransportState, cx: &mut Context) -> Result<Pump> {
    let is_ready = negotiate::is_ready(st);
    let AuthState::Server(auth_st) = &mut st.auth_st else { return Ok(Pump::Pending) };

    if auth_st.service_accept_pending && is_ready {
        let mut payload = PacketEncode::with_msg(msg::SERVICE_ACCEPT);
        payload.put_str("ssh-userauth");
        st.codec.send_pipe.feed_packet(&payload.finish())?;
        log::debug!("sending SSH_MSG_SERVICE_ACCEPT for 'ssh-userauth'");
        auth_st.service_accept_pending = false;
        auth_st.service_accepted = true;
        return Ok(Pump::Progress)
    }

    let Some(pending) = auth_st.pending.front_mut() else { return Ok(Pump::Pending) };

    if pending.decision.is_none() {
        let decision = match pending.decision_rx.as_mut() {
            Some(decision_rx) => match Pin::new(decision_rx).poll(cx) {
                Poll::Ready(res) => res.unwrap_or(AuthDecision::Reject),
                Poll::Pending => return Ok(Pump::Pending),
            },
            None => AuthDecision::Reject,
        };
        pending.decision = Some(decision);
        pending.decision_rx = None;
    }

    if pending.reply.is_none() {
        let reply = decide(auth_st)?;
        if let Some(pending) = auth_st.pending.front_mut() {
            pending.reply = Some(reply);
        }
        return Ok(Pump::Progress)
    }

    if let Some(delay) = pending.delay.as_mut() {
        pump_ready!(delay.as_mut().poll(cx));
        pending.delay = None;
    }

    if !is_ready {
        return Ok(Pump::Pending)
    }

    let Some(pending) = auth_st.pending.pop_front() else { return Ok(Pump::Pending) };
    let Some(reply) = pending.reply else { return Ok(Pump::Pending) };
    send_reply(st, reply)?;
    Ok(Pump::Progress)
}

/// Applies the decision of the application to the request at the head of the queue.
fn decide(auth_st: &mut ServerAuthState) -> Result<Reply> {
    let Some(pending) = auth_st.pending.front_mut() else {
        return Err(Error::Protocol("no pending authentication request"))
    };
    let decision = pending.decision.unwrap_or(AuthDecision::Reject);
    let method_name = pending.method_name;
    log::debug!("authentication method {:?} decided: {:?}", method_name, decision);

    if let Some((algo_name, pubkey_blob)) = pending.probe.take() {
        return Ok(match decision {
            AuthDecision::Accept | AuthDecision::Partial => Reply::PkOk { algo_name, pubkey_blob },
            AuthDecision::Reject => Reply::Failure { partial_success: false },
        })
    }

    if decision == AuthDecision::Reject && pending.penalized {
        if !auth_st.config.failure_delay.is_zero() {
            pending.delay = Some(Box::pin(tokio::time::sleep(auth_st.config.failure_delay)));
        }
        auth_st.attempts += 1;
        if auth_st.attempts >= auth_st.config.max_attempts {
            log::info!("client failed to authenticate {} times", auth_st.attempts);
            return Err(Error::AuthAttempts)
        }
    }

    Ok(match decision {
        AuthDecision::Accept => {
            auth_st.satisfied.insert(method_name.into());
            match auth_st.is_policy_satisfied() {
                true => Reply::Success,
                false => Reply::Failure { partial_success: true },
            }
        },
        AuthDecision::Partial => {
            auth_st.satisfied.insert(method_name.into());
            Reply::Failure { partial_success: true }
        },
        AuthDecision::Reject => Reply::Failure { partial_success: false },
    })
}

fn send_reply(st: &mut TransportState, reply: Reply) -> Result<()> {
    let auth_st = server_auth_st(st)?;
    let payload = match &reply {
        Reply::Success => PacketEncode::with_msg(msg::USERAUTH_SUCCESS),
        Reply::Failure { partial_success } => {
            let mut payload = PacketEncode::with_msg(msg::USERAUTH_FAILURE);
            payload.put_name_list(&auth_st.methods_can_continue());
            payload.put_bool(*partial_success);
            payload
        },
        Reply::PkOk { algo_name, pubkey_blob } => {
            let mut payload = PacketEncode::with_msg(msg::USERAUTH_PK_OK);
            payload.put_str(algo_name);
            payload.put_bytes(pubkey_blob);
            payload
        },
    };
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending authentication reply {:?}", reply);

    if let Reply::Success = reply {
        let auth_st = server_auth_st(st)?;
        auth_st.success = true;
        auth_st.pending.clear();
        log::info!("user {:?} authenticated", auth_st.username.as_deref().unwrap_or_default());
        transport::state::start_delayed_compression(st);
    }
    Ok(())
}

pub(super) fn recv_service_request(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let service_name = payload.get_string()?;
    let auth_st = server_auth_st(st)?;
    if service_name != "ssh-userauth" {
        log::debug!("client requested unknown service {:?}", service_name);
        return Err(Error::ServiceNotAvailable(service_name))
    }

    log::debug!("received SSH_MSG_SERVICE_REQUEST for 'ssh-userauth'");
    if !auth_st.service_accepted {
        auth_st.service_accept_pending = true;
    }
    Ok(None)
}

pub(super) fn recv_auth_packet(
    st: &mut TransportState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::USERAUTH_REQUEST => recv_auth_request(st, payload),
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

fn recv_auth_request(st: &mut TransportState, payload: &mut PacketDecode) -> ResultRecvState {
    let session_id = st.session_id.clone().unwrap_or_default();
    let auth_st = server_auth_st(st)?;
    if !auth_st.service_accepted {
        return Err(Error::Protocol("received SSH_MSG_USERAUTH_REQUEST before service was accepted"))
    }
    if auth_st.success {
        log::debug!("ignoring SSH_MSG_USERAUTH_REQUEST after successful authentication");
        return Ok(None)
    }

    let username = payload.get_string()?;
    let service_name = payload.get_string()?;
    let method_name = payload.get_string()?;
    log::debug!("received SSH_MSG_USERAUTH_REQUEST for user {:?}, method {:?}", username, method_name);

    if service_name != "ssh-connection" {
        return Err(Error::ServiceNotAvailable(service_name))
    }

    // RFC 4252, section 5: the server may reset the state when the user name changes
    if auth_st.username.as_deref() != Some(username.as_str()) {
        auth_st.satisfied.clear();
        auth_st.username = Some(username.clone());
    }

    if !auth_st.config.methods.contains(&method_name) {
        return reject_now(auth_st, false)
    }

    let (method_name, method, probe) = match method_name.as_str() {
        "none" => ("none", AuthMethodRequest::None, None),
        "password" => {
            if payload.get_bool()? {
                log::debug!("client wants to change the password, which we do not support");
                return reject_now(auth_st, false)
            }
            ("password", AuthMethodRequest::Password(payload.get_string()?), None)
        },
        "publickey" => {
            let signed = payload.get_bool()?;
            let algo_name = payload.get_string()?;
            let pubkey_blob = payload.get_bytes()?;
            let Some(algo) = pubkey::by_name(&algo_name) else {
                log::debug!("client offered unknown public key algorithm {:?}", algo_name);
                return reject_now(auth_st, false)
            };
            let pubkey = match Pubkey::decode(pubkey_blob.clone()) {
                Ok(pubkey) if pubkey.supports_algo(algo) => pubkey,
                _ => {
                    log::debug!("client offered public key that we cannot use with {:?}", algo_name);
                    return reject_now(auth_st, false)
                },
            };

            if !signed {
                ("publickey", AuthMethodRequest::PubkeyProbe { pubkey, algo }, Some((algo_name, pubkey_blob)))
            } else {
                let signature = payload.get_bytes()?;
                let signed_data = pubkey_signed_data(&session_id, &username, &service_name, &algo_name, &pubkey_blob);
                if let Err(err) = (algo.verify)(&pubkey, &signed_data, signature) {
                    log::warn!("client sent invalid public key signature: {}", err);
                    return reject_now(auth_st, true)
                }
                ("publickey", AuthMethodRequest::Pubkey { pubkey, algo }, None)
            }
        },
        _ => return reject_now(auth_st, false),
    };

    let penalized = matches!(method, AuthMethodRequest::Password(_) | AuthMethodRequest::Pubkey { .. });
    let (decision_tx, decision_rx) = oneshot::channel();
    auth_st.pending.push_back(PendingAuth {
        method_name,
        probe,
        decision_rx: Some(decision_rx),
        decision: None,
        penalized,
        reply: None,
        delay: None,
    });

    let request = AuthRequest { username, method, decision_tx };
    recv::send_event(Event::AuthRequest(request))
}

/// Queues a rejection that does not wait for the application.
fn reject_now(auth_st: &mut ServerAuthState, penalized: bool) -> ResultRecvState {
    auth_st.pending.push_back(PendingAuth {
        method_name: "",
        probe: None,
        decision_rx: None,
        decision: Some(AuthDecision::Reject),
        penalized,
        reply: None,
        delay: None,
    });
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_st(policy: AuthPolicy) -> ServerAuthState {
        ServerAuthState::new(ServerAuthConfig {
            methods: vec!["none".into(), "password".into(), "publickey".into()],
            policy,
            failure_delay: Duration::ZERO,
            max_attempts: 3,
        })
    }

    fn push(auth_st: &mut ServerAuthState, method_name: &'static str, decision: AuthDecision, penalized: bool) {
        auth_st.pending.push_back(PendingAuth {
            method_name,
            probe: None,
            decision_rx: None,
            decision: Some(decision),
            penalized,
            reply: None,
            delay: None,
        });
    }

    fn decide_next(auth_st: &mut ServerAuthState) -> Result<Reply> {
        let reply = decide(auth_st);
        auth_st.pending.pop_front();
        reply
    }

    #[test]
    fn test_policy_all_requires_every_method() {
        let mut auth_st = auth_st(AuthPolicy::All(vec!["password".into(), "publickey".into()]));

        push(&mut auth_st, "password", AuthDecision::Accept, true);
        assert!(matches!(decide_next(&mut auth_st).unwrap(), Reply::Failure { partial_success: true }));
        assert_eq!(auth_st.methods_can_continue(), vec!["publickey"]);

        push(&mut auth_st, "publickey", AuthDecision::Accept, true);
        assert!(matches!(decide_next(&mut auth_st).unwrap(), Reply::Success));
    }

    #[test]
    fn test_partial_never_succeeds() {
        let mut auth_st = auth_st(AuthPolicy::Any);
        push(&mut auth_st, "password", AuthDecision::Partial, true);
        assert!(matches!(decide_next(&mut auth_st).unwrap(), Reply::Failure { partial_success: true }));
        assert!(auth_st.is_policy_satisfied());
    }

    #[test]
    fn test_probe_is_answered_with_pk_ok() {
        let mut auth_st = auth_st(AuthPolicy::Any);
        push(&mut auth_st, "publickey", AuthDecision::Accept, false);
        auth_st.pending[0].probe = Some(("ssh-ed25519".into(), Bytes::from_static(b"blob")));
        assert!(matches!(decide_next(&mut auth_st).unwrap(), Reply::PkOk { .. }));
        assert!(auth_st.satisfied.is_empty());
    }

    #[test]
    fn test_max_attempts() {
        let mut auth_st = auth_st(AuthPolicy::Any);
        push(&mut auth_st, "none", AuthDecision::Reject, false);
        decide_next(&mut auth_st).unwrap();
        for _ in 0..2 {
            push(&mut auth_st, "password", AuthDecision::Reject, true);
            decide_next(&mut auth_st).unwrap();
        }
        push(&mut auth_st, "password", AuthDecision::Reject, true);
        assert!(matches!(decide_next(&mut auth_st), Err(Error::AuthAttempts)));
    }

    #[test]
    fn test_methods_can_continue_omits_none() {
        let auth_st = auth_st(AuthPolicy::Any);
        assert_eq!(auth_st.methods_can_continue(), vec!["password", "publickey"]);
    }
}
