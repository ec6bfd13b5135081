use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Probe metadata carried on the wire as the first line of every packet.
///
/// `sent_at` is only there for correlation when looking at captures; round
/// trip times are always measured against the sender's local clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEnvelope {
    pub seq: u32,
    #[serde(rename = "testId")]
    pub test_id: String,
    #[serde(rename = "sentAt", with = "iso_millis")]
    pub sent_at: DateTime<Utc>,
}

impl ProbeEnvelope {
    /// Build an envelope. The timestamp is cut to millisecond precision so
    /// it survives the trip through its textual form unchanged.
    pub fn new(seq: u32, test_id: impl Into<String>, sent_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            test_id: test_id.into(),
            sent_at: sent_at.trunc_subsecs(3),
        }
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix, e.g.
/// `2025-03-01T12:00:00.250Z`.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketStatus {
    /// Progress only. Never a packet's final state.
    Sent,
    Received,
    Lost,
}

impl PacketStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PacketStatus::Sent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PacketStatus::Sent => "sent",
            PacketStatus::Received => "received",
            PacketStatus::Lost => "lost",
        }
    }
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketOutcome {
    pub seq: u32,
    pub status: PacketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<f64>,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

impl PacketOutcome {
    pub fn sent(seq: u32, sent_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            status: PacketStatus::Sent,
            rtt_ms: None,
            sent_at,
            received_at: None,
        }
    }

    /// `received_at` is derived from the send wall-clock plus the measured
    /// round trip, so both timestamps share one clock.
    pub fn received(seq: u32, sent_at: DateTime<Utc>, rtt_ms: f64) -> Self {
        let rtt = chrono::Duration::microseconds((rtt_ms * 1000.0).round() as i64);
        Self {
            seq,
            status: PacketStatus::Received,
            rtt_ms: Some(rtt_ms),
            sent_at,
            received_at: Some(sent_at + rtt),
        }
    }

    pub fn lost(seq: u32, sent_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            status: PacketStatus::Lost,
            rtt_ms: None,
            sent_at,
            received_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_envelope_wire_keys() {
        let sent_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let env = ProbeEnvelope::new(7, "run-a", sent_at);
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(
            json,
            r#"{"seq":7,"testId":"run-a","sentAt":"2025-03-01T12:00:00.000Z"}"#
        );
    }

    #[test]
    fn test_received_at_follows_rtt() {
        let sent_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let outcome = PacketOutcome::received(1, sent_at, 12.5);
        assert_eq!(outcome.status, PacketStatus::Received);
        assert_eq!(
            outcome.received_at.unwrap() - sent_at,
            chrono::Duration::microseconds(12_500)
        );

        let lost = PacketOutcome::lost(2, sent_at);
        assert!(lost.rtt_ms.is_none());
        assert!(lost.received_at.is_none());
        assert!(lost.status.is_terminal());
        assert!(!PacketStatus::Sent.is_terminal());
    }
}
