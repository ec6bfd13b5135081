//! Wire format shared with the echo agent.
//!
//! A packet is one UTF-8 JSON line (`{"seq":..,"testId":..,"sentAt":..}\n`)
//! followed by zero bytes up to the requested packet size.

use crate::error::ProbeResult;
use net_lab_abstract::ProbeEnvelope;

/// Serialize `envelope` and zero-pad it to `packet_size`. The header is
/// never truncated, so the result may be longer than `packet_size`.
pub fn encode(envelope: &ProbeEnvelope, packet_size: usize) -> ProbeResult<Vec<u8>> {
    let mut buf = serde_json::to_vec(envelope)?;
    buf.push(b'\n');
    if buf.len() < packet_size {
        buf.resize(packet_size, 0);
    }
    Ok(buf)
}

/// Parse the header line of a received buffer. Anything that is not one of
/// our envelopes yields `None`.
pub fn decode(buf: &[u8]) -> Option<ProbeEnvelope> {
    let line = match buf.iter().position(|b| *b == b'\n') {
        Some(idx) => &buf[..idx],
        None => buf,
    };
    let text = std::str::from_utf8(line).ok()?;
    serde_json::from_str(text).ok()
}

/// On-wire length of a packet whose header line (including `\n`) is
/// `header_len` bytes long.
pub fn frame_len(header_len: usize, packet_size: usize) -> usize {
    header_len.max(packet_size)
}
