//! Transport addressing for outbound commands and inbound status lines.
//!
//! A protocol command reaches the target either directly over a
//! point-to-point UART, or wrapped in a `send` command addressed to a node
//! on a shared multi-drop bus. On the way back a status line may be
//! prefixed by the forwarding bus module and, behind an expander, by the
//! expander's own name:
//!
//! ```text
//! <expander>: <bus>[<sender>]: __OTA_ACK__:1:174@2b
//! ```
//!
//! Any subset of those prefixes may be absent, so inbound unwrapping is
//! anchored on the reserved status marker rather than on a fixed position.

use crate::protocol::status::{self, ChunkEncoding};

/// Addressing wrapper applied around protocol commands for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// The target is attached directly; commands pass through unchanged.
    Direct,
    /// The target is a node on a shared serial bus reached through a
    /// coordinator; commands are wrapped as `<module>.send(<target>,"...")`.
    Bus {
        /// Name of the coordinator's bus module.
        module: String,
        /// Bus id of the target node.
        target: u8,
    },
    /// Like [`Envelope::Bus`], but traffic passes through a broadcast
    /// expander whose own traffic is paused for the transfer's duration.
    Relayed {
        /// Name of the coordinator's bus module.
        module: String,
        /// Bus id of the target node.
        target: u8,
        /// Name of the expander module to pause.
        expander: String,
    },
}

impl Envelope {
    /// Wrap an outbound protocol command for delivery to the target.
    pub fn wrap_outbound(&self, command: &[u8]) -> Vec<u8> {
        match self {
            Self::Direct => command.to_vec(),
            Self::Bus { module, target } | Self::Relayed { module, target, .. } => {
                let mut wrapped = format!("{module}.send({target},\"").into_bytes();
                wrapped.extend_from_slice(command);
                wrapped.extend_from_slice(b"\")");
                wrapped
            },
        }
    }

    /// Strip relay and bus prefixes from an inbound line.
    ///
    /// Returns the substring starting at the first status marker, or `None`
    /// when the line carries no protocol status at all.
    pub fn unwrap_inbound<'a>(&self, line: &'a str) -> Option<&'a str> {
        line.find(status::MARKER).map(|start| &line[start..])
    }

    /// How chunk payloads must be encoded for this transport.
    ///
    /// Bus-wrapped chunks travel inside a quoted command argument and must
    /// be base64; a direct UART line carries raw bytes.
    pub fn chunk_encoding(&self) -> ChunkEncoding {
        match self {
            Self::Direct => ChunkEncoding::Raw,
            Self::Bus { .. } | Self::Relayed { .. } => ChunkEncoding::Base64,
        }
    }

    /// Command pausing the expander's broadcast traffic, if any.
    pub fn pause_command(&self) -> Option<String> {
        match self {
            Self::Relayed { expander, .. } => Some(format!("{expander}.pause_broadcasts()")),
            _ => None,
        }
    }

    /// Command resuming the expander's broadcast traffic, if any.
    pub fn resume_command(&self) -> Option<String> {
        match self {
            Self::Relayed { expander, .. } => Some(format!("{expander}.resume_broadcasts()")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Envelope {
        Envelope::Bus {
            module: "bus".to_string(),
            target: 7,
        }
    }

    fn relayed() -> Envelope {
        Envelope::Relayed {
            module: "bus".to_string(),
            target: 7,
            expander: "p0".to_string(),
        }
    }

    #[test]
    fn test_direct_wrap_is_identity() {
        assert_eq!(Envelope::Direct.wrap_outbound(b"__OTA_COMMIT__"), b"__OTA_COMMIT__");
    }

    #[test]
    fn test_bus_wrap_quotes_command() {
        assert_eq!(
            bus().wrap_outbound(b"__OTA_BEGIN__:1000"),
            b"bus.send(7,\"__OTA_BEGIN__:1000\")"
        );
    }

    #[test]
    fn test_relayed_wrap_matches_bus_wrap() {
        assert_eq!(
            relayed().wrap_outbound(b"__OTA_COMMIT__"),
            bus().wrap_outbound(b"__OTA_COMMIT__")
        );
    }

    #[test]
    fn test_unwrap_bare_status() {
        assert_eq!(bus().unwrap_inbound("__OTA_DONE__"), Some("__OTA_DONE__"));
    }

    #[test]
    fn test_unwrap_strips_bus_prefix() {
        assert_eq!(
            bus().unwrap_inbound("bus[7]: __OTA_ACK__:1:174"),
            Some("__OTA_ACK__:1:174")
        );
    }

    #[test]
    fn test_unwrap_strips_relay_and_bus_prefix() {
        assert_eq!(
            relayed().unwrap_inbound("p0: bus[7]: __OTA_READY__:0:100"),
            Some("__OTA_READY__:0:100")
        );
    }

    #[test]
    fn test_unwrap_rejects_plain_log_line() {
        assert_eq!(bus().unwrap_inbound("bus[3]: hello from node 3"), None);
    }

    #[test]
    fn test_pause_resume_only_for_relayed() {
        assert_eq!(Envelope::Direct.pause_command(), None);
        assert_eq!(bus().pause_command(), None);
        assert_eq!(relayed().pause_command().as_deref(), Some("p0.pause_broadcasts()"));
        assert_eq!(relayed().resume_command().as_deref(), Some("p0.resume_broadcasts()"));
    }

    #[test]
    fn test_chunk_encoding_per_transport() {
        assert_eq!(Envelope::Direct.chunk_encoding(), ChunkEncoding::Raw);
        assert_eq!(bus().chunk_encoding(), ChunkEncoding::Base64);
        assert_eq!(relayed().chunk_encoding(), ChunkEncoding::Base64);
    }
}
