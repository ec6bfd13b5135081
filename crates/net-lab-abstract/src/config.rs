use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Port the echo agent listens on for UDP probes unless told otherwise.
pub const DEFAULT_UDP_PORT: u16 = 40000;
/// Port the echo agent listens on for TCP probes unless told otherwise.
pub const DEFAULT_TCP_PORT: u16 = 5050;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Udp,
    Tcp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Udp => DEFAULT_UDP_PORT,
            Protocol::Tcp => DEFAULT_TCP_PORT,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => f.write_str("UDP"),
            Protocol::Tcp => f.write_str("TCP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("udp") {
            Ok(Protocol::Udp)
        } else if s.eq_ignore_ascii_case("tcp") {
            Ok(Protocol::Tcp)
        } else {
            Err(format!("unknown protocol '{s}', expected UDP or TCP"))
        }
    }
}

/// Where the echo agent sits relative to the controller. Pure metadata,
/// it never changes how a run is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkMode {
    Lan,
    Remote,
}

impl FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("lan") {
            Ok(NetworkMode::Lan)
        } else if s.eq_ignore_ascii_case("remote") {
            Ok(NetworkMode::Remote)
        } else {
            Err(format!("unknown network mode '{s}', expected LAN or REMOTE"))
        }
    }
}

/// Parameters of a single probe run. Built once by the caller and never
/// mutated while the run is in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub name: Option<String>,
    pub mode: Option<NetworkMode>,
    pub protocol: Protocol,
    pub target_host: String,
    /// `None` (or 0) falls back to the protocol's default port.
    pub target_port: Option<u16>,
    /// Requested on-wire size in bytes. Smaller than the header is allowed;
    /// the header is never truncated.
    pub packet_size: usize,
    pub packet_count: u32,
    pub interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            name: None,
            mode: None,
            protocol: Protocol::Udp,
            target_host: "127.0.0.1".to_string(),
            target_port: None,
            packet_size: 64,
            packet_count: 10,
            interval_ms: 100,
        }
    }
}

impl ProbeConfig {
    pub fn resolved_port(&self) -> u16 {
        match self.target_port {
            Some(port) if port != 0 => port,
            _ => self.protocol.default_port(),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.packet_count == 0 {
            return Err("packet_count must be at least 1".to_string());
        }
        if self.target_host.trim().is_empty() {
            return Err("target_host must not be empty".to_string());
        }
        Ok(())
    }
}

/// Knobs for loss detection and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeTimings {
    pub timeout_multiplier: u32,
    pub timeout_floor_ms: u64,
    pub drain_grace_ms: u64,
}

impl Default for ProbeTimings {
    fn default() -> Self {
        Self {
            timeout_multiplier: 4,
            timeout_floor_ms: 2000,
            drain_grace_ms: 500,
        }
    }
}

impl ProbeTimings {
    /// How long a packet may stay unanswered before it counts as lost.
    pub fn timeout_for(&self, interval_ms: u64) -> Duration {
        let scaled = interval_ms.saturating_mul(u64::from(self.timeout_multiplier));
        Duration::from_millis(scaled.max(self.timeout_floor_ms))
    }

    /// How long the transport stays open after the last packet settles.
    pub fn drain_for(&self, interval_ms: u64) -> Duration {
        self.timeout_for(interval_ms) + Duration::from_millis(self.drain_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_falls_back_to_protocol_default() {
        let mut config = ProbeConfig::default();
        assert_eq!(config.resolved_port(), DEFAULT_UDP_PORT);

        config.protocol = Protocol::Tcp;
        config.target_port = Some(0);
        assert_eq!(config.resolved_port(), DEFAULT_TCP_PORT);

        config.target_port = Some(7000);
        assert_eq!(config.resolved_port(), 7000);
    }

    #[test]
    fn test_validate_rejects_empty_run() {
        let config = ProbeConfig {
            packet_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ProbeConfig {
            target_host: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ProbeConfig {
            packet_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timeout_has_floor() {
        let timings = ProbeTimings::default();
        assert_eq!(timings.timeout_for(0), Duration::from_millis(2000));
        assert_eq!(timings.timeout_for(100), Duration::from_millis(2000));
        assert_eq!(timings.timeout_for(1000), Duration::from_millis(4000));
        assert_eq!(timings.drain_for(1000), Duration::from_millis(4500));
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("udp".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!("TCP".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert!("icmp".parse::<Protocol>().is_err());
        assert_eq!("remote".parse::<NetworkMode>().unwrap(), NetworkMode::Remote);
    }
}
