//! OTA status vocabulary: outbound command builders and inbound
//! classification.
//!
//! All protocol messages share the reserved `__OTA_` marker so they can be
//! told apart from ordinary device log output:
//!
//! - `__OTA_BEGIN__:<size>` (outbound): announce a transfer of `<size>` bytes
//! - `__OTA_READY__:<ack>:<chunk_size>` (inbound): device accepts; the
//!   optional chunk size caps the sender's chunk size
//! - `__OTA_CHUNK__:<seq>:<payload>` (outbound)
//! - `__OTA_ACK__:<seq>:<cumulative_bytes>` (inbound)
//! - `__OTA_COMMIT__` (outbound), `__OTA_DONE__` (inbound)
//! - `__OTA_ERROR__:<reason>` (inbound, any phase)
//! - `__OTA_ABORT__` (outbound)

use crate::protocol::envelope::Envelope;
use crate::protocol::framing;
use base64::Engine;
use log::{debug, trace};
use std::fmt;

/// Reserved marker that opens every protocol status line.
pub const MARKER: &str = "__OTA_";

pub(crate) const BEGIN: &str = "__OTA_BEGIN__";
pub(crate) const READY: &str = "__OTA_READY__";
pub(crate) const CHUNK: &str = "__OTA_CHUNK__";
pub(crate) const ACK: &str = "__OTA_ACK__";
pub(crate) const COMMIT: &str = "__OTA_COMMIT__";
pub(crate) const DONE: &str = "__OTA_DONE__";
pub(crate) const ERROR: &str = "__OTA_ERROR__";
pub(crate) const ABORT: &str = "__OTA_ABORT__";

/// How chunk payloads are rendered on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEncoding {
    /// Base64 text, required when the chunk travels inside a quoted bus
    /// command argument.
    Base64,
    /// Raw bytes, usable on a point-to-point UART line.
    Raw,
}

/// A classified status line from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMessage {
    /// Device accepted the transfer, optionally capping the chunk size.
    Ready {
        /// Chunk size negotiated by the device, if it sent one it can parse.
        negotiated_chunk_size: Option<usize>,
    },
    /// Device acknowledged one chunk.
    Ack {
        /// Sequence number being acknowledged.
        seq: u32,
        /// Cumulative bytes the device reports written, if parseable.
        bytes: Option<u64>,
    },
    /// Device persisted the committed image.
    Done,
    /// Device rejected or aborted the transfer.
    Error {
        /// Reason string from the device.
        reason: String,
    },
    /// Marker-prefixed line with an unrecognized or malformed kind.
    Unknown {
        /// The unwrapped status text.
        raw: String,
    },
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready {
                negotiated_chunk_size,
            } => match negotiated_chunk_size {
                Some(size) => write!(f, "READY (chunk size {size})"),
                None => write!(f, "READY"),
            },
            Self::Ack { seq, .. } => write!(f, "ACK {seq}"),
            Self::Done => write!(f, "DONE"),
            Self::Error { reason } => write!(f, "ERROR: {reason}"),
            Self::Unknown { raw } => write!(f, "unknown status {raw:?}"),
        }
    }
}

/// Build the BEGIN command announcing `image_size` bytes.
pub fn begin_command(image_size: u64) -> String {
    format!("{BEGIN}:{image_size}")
}

/// Build the CHUNK command for one sequence-numbered slice of the image.
pub fn chunk_command(seq: u32, data: &[u8], encoding: ChunkEncoding) -> Vec<u8> {
    let mut command = format!("{CHUNK}:{seq}:").into_bytes();
    match encoding {
        ChunkEncoding::Base64 => {
            let engine = base64::engine::general_purpose::STANDARD;
            command.extend_from_slice(engine.encode(data).as_bytes());
        },
        ChunkEncoding::Raw => command.extend_from_slice(data),
    }
    command
}

/// The COMMIT command: no further chunks follow.
pub fn commit_command() -> &'static str {
    COMMIT
}

/// The ABORT command: sender-initiated cancellation.
pub fn abort_command() -> &'static str {
    ABORT
}

/// Classify a raw received line (terminator already stripped).
///
/// Runs checksum validation, strips transport and relay prefixes through
/// the envelope, and parses the remaining status. Returns `None` for lines
/// that are not protocol traffic: corrupt lines (dropped, logged) and
/// ordinary device log output (ignored without affecting the transfer).
pub fn classify(raw_line: &str, envelope: &Envelope) -> Option<StatusMessage> {
    let (payload, checksum_ok) = framing::decode(raw_line);
    if !checksum_ok {
        debug!("dropping line with checksum mismatch: {raw_line:?}");
        return None;
    }

    let status = envelope.unwrap_inbound(payload)?;
    trace!("status line: {status}");
    Some(parse_status(status))
}

/// Parse an unwrapped status line that is known to start with [`MARKER`].
fn parse_status(status: &str) -> StatusMessage {
    let mut fields = status.split(':');
    let kind = fields.next().unwrap_or_default();

    match kind {
        READY => StatusMessage::Ready {
            // __OTA_READY__:<ack>:<chunk_size>; the size is field two and
            // older firmware omits it entirely.
            negotiated_chunk_size: fields.nth(1).and_then(|size| size.trim().parse().ok()),
        },
        ACK => {
            let seq = fields.next().and_then(|seq| seq.trim().parse().ok());
            match seq {
                Some(seq) => StatusMessage::Ack {
                    seq,
                    bytes: fields.next().and_then(|bytes| bytes.trim().parse().ok()),
                },
                None => StatusMessage::Unknown {
                    raw: status.to_string(),
                },
            }
        },
        DONE => StatusMessage::Done,
        ERROR => StatusMessage::Error {
            reason: fields.collect::<Vec<_>>().join(":").trim().to_string(),
        },
        _ => StatusMessage::Unknown {
            raw: status.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct() -> Envelope {
        Envelope::Direct
    }

    #[test]
    fn test_begin_command_format() {
        assert_eq!(begin_command(1000), "__OTA_BEGIN__:1000");
    }

    #[test]
    fn test_chunk_command_base64() {
        let command = chunk_command(1, b"abc", ChunkEncoding::Base64);
        assert_eq!(command, b"__OTA_CHUNK__:1:YWJj");
    }

    #[test]
    fn test_chunk_command_raw() {
        let command = chunk_command(7, &[0x00, 0xFF], ChunkEncoding::Raw);
        assert_eq!(command, b"__OTA_CHUNK__:7:\x00\xff");
    }

    #[test]
    fn test_classify_ready_with_size() {
        let status = classify("__OTA_READY__:0:100", &direct()).unwrap();
        assert_eq!(
            status,
            StatusMessage::Ready {
                negotiated_chunk_size: Some(100)
            }
        );
    }

    #[test]
    fn test_classify_ready_without_size() {
        let status = classify("__OTA_READY__", &direct()).unwrap();
        assert_eq!(
            status,
            StatusMessage::Ready {
                negotiated_chunk_size: None
            }
        );
    }

    #[test]
    fn test_classify_ack() {
        let status = classify("__OTA_ACK__:3:522", &direct()).unwrap();
        assert_eq!(
            status,
            StatusMessage::Ack {
                seq: 3,
                bytes: Some(522)
            }
        );
    }

    #[test]
    fn test_classify_ack_without_byte_count() {
        let status = classify("__OTA_ACK__:3", &direct()).unwrap();
        assert_eq!(status, StatusMessage::Ack { seq: 3, bytes: None });
    }

    #[test]
    fn test_classify_malformed_ack_is_unknown() {
        let status = classify("__OTA_ACK__:three", &direct()).unwrap();
        assert!(matches!(status, StatusMessage::Unknown { .. }));
    }

    #[test]
    fn test_classify_error_keeps_full_reason() {
        let status = classify("__OTA_ERROR__:flash:begin_failed", &direct()).unwrap();
        assert_eq!(
            status,
            StatusMessage::Error {
                reason: "flash:begin_failed".to_string()
            }
        );
    }

    #[test]
    fn test_classify_done() {
        assert_eq!(classify("__OTA_DONE__", &direct()), Some(StatusMessage::Done));
    }

    #[test]
    fn test_classify_ignores_device_logs() {
        assert_eq!(classify("boot: chip revision v1.0", &direct()), None);
        assert_eq!(classify("", &direct()), None);
    }

    #[test]
    fn test_classify_drops_corrupt_lines() {
        // Valid status with a deliberately wrong checksum tag.
        assert_eq!(classify("__OTA_DONE__@00", &direct()), None);
    }

    #[test]
    fn test_classify_checksummed_status() {
        let mut line = String::from_utf8(framing::encode(b"__OTA_DONE__")).unwrap();
        line.pop();
        assert_eq!(classify(&line, &direct()), Some(StatusMessage::Done));
    }

    #[test]
    fn test_classify_unknown_marker_kind() {
        let status = classify("__OTA_RESET__:1", &direct()).unwrap();
        assert!(matches!(status, StatusMessage::Unknown { .. }));
    }
}
