use bytes::Bytes;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::terminal_mode;
use crate::error::Result;

/// Request on a `"session"` channel (RFC 4254, section 6).
///
/// The client sends most of these requests, the server sends `ExitStatus` and `ExitSignal`.
/// Requests that we don't model (such as `"x11-req"` or `"xon-xoff"`) are passed through as
/// [`SessionRequest::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionRequest {
    /// Allocate a pseudo-terminal (`"pty-req"`).
    Pty(PtyRequest),
    /// Set an environment variable (`"env"`).
    Env {
        /// Name of the variable.
        name: Bytes,
        /// Value of the variable.
        value: Bytes,
    },
    /// Start the default shell of the user (`"shell"`).
    Shell,
    /// Execute a command (`"exec"`).
    Exec {
        /// The command, usually interpreted by the shell of the user.
        command: Bytes,
    },
    /// Start a subsystem such as `"sftp"` (`"subsystem"`).
    Subsystem {
        /// Name of the subsystem.
        name: String,
    },
    /// The terminal size changed (`"window-change"`).
    WindowChange(WindowChange),
    /// Deliver a signal to the process (`"signal"`).
    ///
    /// See [`codes::signal`][crate::codes::signal] for the signal names.
    Signal {
        /// Name of the signal, without the `"SIG"` prefix.
        signal_name: String,
    },
    /// The process exited with the given status (`"exit-status"`).
    ExitStatus(u32),
    /// The process was killed by a signal (`"exit-signal"`).
    ExitSignal(ExitSignal),
    /// Request that we don't know.
    Other {
        /// Name of the request.
        request_type: String,
        /// Raw request-specific data.
        payload: Bytes,
    },
}

/// Parameters of a `"pty-req"` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    /// Value of the `TERM` environment variable, such as `"xterm-256color"`.
    pub term: String,
    /// Width in characters.
    pub width: u32,
    /// Height in rows.
    pub height: u32,
    /// Width in pixels.
    pub width_px: u32,
    /// Height in pixels.
    pub height_px: u32,
    /// Terminal modes.
    pub modes: PtyTerminalModes,
}

/// Terminal modes of a pseudo-terminal (RFC 4254, section 8).
///
/// The opcodes are listed in [`codes::terminal_mode`][crate::codes::terminal_mode].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtyTerminalModes {
    modes: Vec<(u8, u32)>,
}

impl PtyTerminalModes {
    /// Empty set of modes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode `opcode` to `value`, replacing the previous value.
    ///
    /// Only opcodes from 1 to 159 carry a value; other opcodes are ignored.
    pub fn set(&mut self, opcode: u8, value: u32) {
        if opcode == terminal_mode::TTY_OP_END || opcode >= 160 {
            return
        }
        match self.modes.iter_mut().find(|(op, _)| *op == opcode) {
            Some(mode) => mode.1 = value,
            None => self.modes.push((opcode, value)),
        }
    }

    /// Returns the value of mode `opcode`, if it is set.
    pub fn get(&self, opcode: u8) -> Option<u32> {
        self.modes.iter().find(|(op, _)| *op == opcode).map(|(_, value)| *value)
    }

    /// Iterate over the modes in the order in which they were set.
    pub fn iter(&self) -> impl Iterator<Item = (u8, u32)> + '_ {
        self.modes.iter().copied()
    }

    fn encode(&self) -> Bytes {
        let mut encoded = PacketEncode::new();
        for &(opcode, value) in self.modes.iter() {
            encoded.put_u8(opcode);
            encoded.put_u32(value);
        }
        encoded.put_u8(terminal_mode::TTY_OP_END);
        encoded.finish()
    }

    fn decode(encoded: Bytes) -> Result<Self> {
        let mut decode = PacketDecode::new(encoded);
        let mut modes = Self::new();
        // a missing TTY_OP_END is tolerated, some clients send an empty string
        while decode.remaining_len() > 0 {
            let opcode = decode.get_u8()?;
            if opcode == terminal_mode::TTY_OP_END || opcode >= 160 {
                break
            }
            let value = decode.get_u32()?;
            modes.set(opcode, value);
        }
        Ok(modes)
    }
}

/// Parameters of a `"window-change"` request.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WindowChange {
    /// Width in characters.
    pub width: u32,
    /// Height in rows.
    pub height: u32,
    /// Width in pixels.
    pub width_px: u32,
    /// Height in pixels.
    pub height_px: u32,
}

/// Information about a process that terminated due to a signal (`"exit-signal"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSignal {
    /// Name of the signal that terminated the process.
    ///
    /// Signal names are described in RFC 4254, section 6.10.
    /// [`codes::signal`][crate::codes::signal] lists the signal names defined by SSH.
    pub signal_name: String,
    /// True if the process produced a core dump.
    pub core_dumped: bool,
    /// Error message.
    pub message: String,
    /// Language tag of `message` (per RFC 3066).
    pub message_lang: String,
}

impl SessionRequest {
    /// Name of the request as sent on the wire.
    pub fn request_type(&self) -> &str {
        match self {
            Self::Pty(_) => "pty-req",
            Self::Env { .. } => "env",
            Self::Shell => "shell",
            Self::Exec { .. } => "exec",
            Self::Subsystem { .. } => "subsystem",
            Self::WindowChange(_) => "window-change",
            Self::Signal { .. } => "signal",
            Self::ExitStatus(_) => "exit-status",
            Self::ExitSignal(_) => "exit-signal",
            Self::Other { request_type, .. } => request_type,
        }
    }

    /// Requests that the peer is not allowed to answer (RFC 4254 sets `want reply` to false).
    pub(crate) fn is_notification(&self) -> bool {
        matches!(self,
            Self::WindowChange(_) | Self::Signal { .. } | Self::ExitStatus(_) | Self::ExitSignal(_))
    }

    pub(crate) fn encode_payload(&self) -> Bytes {
        let mut payload = PacketEncode::new();
        match self {
            Self::Pty(pty) => {
                payload.put_str(&pty.term);
                payload.put_u32(pty.width);
                payload.put_u32(pty.height);
                payload.put_u32(pty.width_px);
                payload.put_u32(pty.height_px);
                payload.put_bytes(&pty.modes.encode());
            },
            Self::Env { name, value } => {
                payload.put_bytes(name);
                payload.put_bytes(value);
            },
            Self::Shell => {},
            Self::Exec { command } => payload.put_bytes(command),
            Self::Subsystem { name } => payload.put_str(name),
            Self::WindowChange(change) => {
                payload.put_u32(change.width);
                payload.put_u32(change.height);
                payload.put_u32(change.width_px);
                payload.put_u32(change.height_px);
            },
            Self::Signal { signal_name } => payload.put_str(signal_name),
            Self::ExitStatus(status) => payload.put_u32(*status),
            Self::ExitSignal(signal) => {
                payload.put_str(&signal.signal_name);
                payload.put_bool(signal.core_dumped);
                payload.put_str(&signal.message);
                payload.put_str(&signal.message_lang);
            },
            Self::Other { payload: raw, .. } => return raw.clone(),
        }
        payload.finish()
    }

    pub(crate) fn decode(request_type: String, payload: Bytes) -> Result<SessionRequest> {
        let mut decode = PacketDecode::new(payload.clone());
        let request = match request_type.as_str() {
            "pty-req" => Self::Pty(PtyRequest {
                term: decode.get_string()?,
                width: decode.get_u32()?,
                height: decode.get_u32()?,
                width_px: decode.get_u32()?,
                height_px: decode.get_u32()?,
                modes: PtyTerminalModes::decode(decode.get_bytes()?)?,
            }),
            "env" => Self::Env {
                name: decode.get_bytes()?,
                value: decode.get_bytes()?,
            },
            "shell" => Self::Shell,
            "exec" => Self::Exec { command: decode.get_bytes()? },
            "subsystem" => Self::Subsystem { name: decode.get_string()? },
            "window-change" => Self::WindowChange(WindowChange {
                width: decode.get_u32()?,
                height: decode.get_u32()?,
                width_px: decode.get_u32()?,
                height_px: decode.get_u32()?,
            }),
            "signal" => Self::Signal { signal_name: decode.get_string()? },
            "exit-status" => Self::ExitStatus(decode.get_u32()?),
            "exit-signal" => Self::ExitSignal(ExitSignal {
                signal_name: decode.get_string()?,
                core_dumped: decode.get_bool()?,
                message: decode.get_string()?,
                message_lang: decode.get_string()?,
            }),
            _ => return Ok(Self::Other { request_type, payload }),
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pty() {
        let mut modes = PtyTerminalModes::new();
        modes.set(terminal_mode::VINTR, 3);
        modes.set(terminal_mode::VEOF, 4);
        let pty = SessionRequest::Pty(PtyRequest {
            term: "xterm".into(),
            width: 80,
            height: 24,
            width_px: 0,
            height_px: 0,
            modes,
        });
        let payload = pty.encode_payload();
        let decoded = SessionRequest::decode("pty-req".into(), payload).unwrap();
        assert_eq!(decoded, pty);
        let SessionRequest::Pty(decoded) = decoded else { unreachable!() };
        assert_eq!(decoded.modes.get(terminal_mode::VEOF), Some(4));
        assert_eq!(decoded.modes.get(terminal_mode::VKILL), None);
    }

    #[test]
    fn test_decode_modes_without_end() {
        let modes = PtyTerminalModes::decode(Bytes::from_static(b"\x01\x00\x00\x00\x03")).unwrap();
        assert_eq!(modes.iter().collect::<Vec<_>>(), vec![(1, 3)]);
        assert_eq!(PtyTerminalModes::decode(Bytes::new()).unwrap(), PtyTerminalModes::new());
    }

    #[test]
    fn test_decode_exit_signal() {
        let mut payload = PacketEncode::new();
        payload.put_str("KILL");
        payload.put_bool(true);
        payload.put_str("killed");
        payload.put_str("");
        let request = SessionRequest::decode("exit-signal".into(), payload.finish()).unwrap();
        assert_eq!(request, SessionRequest::ExitSignal(ExitSignal {
            signal_name: "KILL".into(),
            core_dumped: true,
            message: "killed".into(),
            message_lang: "".into(),
        }));
        assert!(request.is_notification());
    }

    #[test]
    fn test_decode_unknown() {
        let payload = Bytes::from_static(b"\x01");
        let request = SessionRequest::decode("xon-xoff".into(), payload.clone()).unwrap();
        assert_eq!(request, SessionRequest::Other { request_type: "xon-xoff".into(), payload });
        assert!(!request.is_notification());
    }

    #[test]
    fn test_decode_truncated_exec() {
        let payload = Bytes::from_static(b"\x00\x00\x00\x10ls");
        assert!(SessionRequest::decode("exec".into(), payload).is_err());
    }
}
