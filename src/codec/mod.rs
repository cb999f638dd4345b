//! Wire format of SSH: primitive data types and the binary packet protocol.
pub use self::packet_encode::PacketEncode;
pub use self::packet_decode::PacketDecode;
pub(crate) use self::recv_pipe::{RecvPipe, RecvPacket};
pub(crate) use self::send_pipe::SendPipe;

/// Hard ceiling on `packet_length` of a received packet.
pub(crate) const MAX_PACKET_LEN: usize = 1024 * 1024;

/// Minimal size of a packet on the wire, without the MAC.
pub(crate) const MIN_PACKET_LEN: usize = 16;

pub(crate) struct Codec {
    pub recv_pipe: RecvPipe,
    pub send_pipe: SendPipe,
}

mod packet_encode;
mod packet_decode;
mod recv_pipe;
mod send_pipe;
