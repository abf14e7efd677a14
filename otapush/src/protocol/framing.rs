//! Line framing with trailing XOR checksum tags.
//!
//! Every line of wire traffic may carry a checksum tag appended to the
//! payload:
//!
//! ```text
//! <payload>@<2-hex-digit-XOR-checksum>\n
//! ```
//!
//! The checksum is the XOR of all payload bytes, rendered as two lowercase
//! hex digits. Outbound commands always carry the tag; inbound lines may
//! omit it (bare status and log lines from the device are valid as-is).

/// XOR checksum over a payload.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0, |acc, byte| acc ^ byte)
}

/// Encode a payload as a wire line: payload, checksum tag, line terminator.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(payload.len() + 4);
    line.extend_from_slice(payload);
    line.extend_from_slice(format!("@{:02x}\n", checksum(payload)).as_bytes());
    line
}

/// Decode a received line (terminator already stripped) into its payload
/// and a checksum verdict.
///
/// A line too short for a tag, or without `@` at the expected trailing
/// position, is returned whole with `checksum_ok = true`: the tag is
/// optional on inbound traffic. When a tag is present, the XOR of the
/// stripped payload is compared against it; a mismatched line must be
/// discarded by the caller, never corrected.
pub fn decode(line: &str) -> (&str, bool) {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || bytes[bytes.len() - 3] != b'@' {
        return (line, true);
    }

    let (payload, tag) = line.split_at(line.len() - 3);
    let Ok(expected) = u8::from_str_radix(&tag[1..], 16) else {
        // Trailing "@xy" that is not hex is ordinary payload text.
        return (line, true);
    };

    (payload, checksum(payload.as_bytes()) == expected)
}
