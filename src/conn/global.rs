use bytes::Bytes;
use tokio::sync::oneshot;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};

/// Global request (`SSH_MSG_GLOBAL_REQUEST`, RFC 4254, section 4).
///
/// Global requests are not tied to any channel. The only requests defined by SSH are used for
/// remote port forwarding (RFC 4254, section 7.1); all other requests are passed through as
/// [`GlobalRequest::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GlobalRequest {
    /// Ask the peer to listen on an address and forward connections back to us
    /// (`"tcpip-forward"`).
    ///
    /// If `bind_port` is 0, the peer picks a port and returns it in the reply.
    TcpipForward {
        /// Address to bind, such as `"localhost"` or `""` for all addresses.
        bind_address: String,
        /// Port to bind.
        bind_port: u32,
    },

    /// Stop a previous `"tcpip-forward"` (`"cancel-tcpip-forward"`).
    CancelTcpipForward {
        /// Address that was bound.
        bind_address: String,
        /// Port that was bound.
        bind_port: u32,
    },

    /// Request that we don't know.
    Other {
        /// Name of the request.
        request_type: String,
        /// Raw request-specific data.
        payload: Bytes,
    },
}

impl GlobalRequest {
    /// Name of the request as sent on the wire.
    pub fn request_type(&self) -> &str {
        match self {
            Self::TcpipForward { .. } => "tcpip-forward",
            Self::CancelTcpipForward { .. } => "cancel-tcpip-forward",
            Self::Other { request_type, .. } => request_type,
        }
    }

    pub(crate) fn encode_payload(&self) -> Bytes {
        match self {
            Self::TcpipForward { bind_address, bind_port } |
            Self::CancelTcpipForward { bind_address, bind_port } => {
                let mut payload = PacketEncode::new();
                payload.put_str(bind_address);
                payload.put_u32(*bind_port);
                payload.finish()
            },
            Self::Other { payload, .. } => payload.clone(),
        }
    }

    pub(crate) fn decode(request_type: String, payload: Bytes) -> Result<GlobalRequest> {
        let mut decode = PacketDecode::new(payload.clone());
        Ok(match request_type.as_str() {
            "tcpip-forward" => Self::TcpipForward {
                bind_address: decode.get_string()?,
                bind_port: decode.get_u32()?,
            },
            "cancel-tcpip-forward" => Self::CancelTcpipForward {
                bind_address: decode.get_string()?,
                bind_port: decode.get_u32()?,
            },
            _ => Self::Other { request_type, payload },
        })
    }
}

/// Reply to a [`GlobalRequest`] (`SSH_MSG_REQUEST_SUCCESS` or `SSH_MSG_REQUEST_FAILURE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalReply {
    /// The request succeeded; the bytes are the request-specific response data.
    Success(Bytes),
    /// The request failed.
    Failure,
}

impl GlobalReply {
    /// Successful reply to `"tcpip-forward"` that tells the client which port we bound.
    ///
    /// RFC 4254, section 7.1 requires this reply when the client asked for port 0.
    pub fn bound_port(port: u32) -> GlobalReply {
        let mut payload = PacketEncode::new();
        payload.put_u32(port);
        GlobalReply::Success(payload.finish())
    }

    /// Returns `Ok` with the response data on success, [`Error::GlobalReq`] otherwise.
    pub fn success_or_error(self) -> Result<Bytes> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure => Err(Error::GlobalReq),
        }
    }
}

/// Global request received from the peer.
///
/// If the peer wants a reply, send it to `reply_tx`. Replies are delivered in the order of the
/// requests; dropping `reply_tx` replies with a failure.
#[derive(Debug)]
pub struct GlobalRequestEvent {
    /// The request.
    pub request: GlobalRequest,
    /// Where to send the reply, if the peer wants one.
    pub reply_tx: Option<oneshot::Sender<GlobalReply>>,
}

impl GlobalRequestEvent {
    /// Reply with `reply` (if the peer wants a reply).
    pub fn reply(self, reply: GlobalReply) {
        if let Some(reply_tx) = self.reply_tx {
            let _ = reply_tx.send(reply);
        }
    }
}

/// Global request queued for sending.
#[derive(Debug)]
pub(crate) struct GlobalReq {
    pub request_type: String,
    pub payload: Bytes,
    pub reply_tx: Option<oneshot::Sender<GlobalReply>>,
}
