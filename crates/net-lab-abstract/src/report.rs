use crate::config::ProbeConfig;
use crate::packet::PacketOutcome;
use serde::{Deserialize, Serialize};

/// Aggregate figures for one finished run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
    pub min_latency_ms: f64,
    pub jitter_ms: f64,
    pub throughput_mbps: f64,
    pub packet_loss_percent: f64,
    pub total_duration_seconds: f64,
}

impl RunSummary {
    /// Stand-in for runs that failed before producing statistics: everything
    /// counts as lost and no other figure is meaningful.
    pub fn total_loss() -> Self {
        Self {
            packet_loss_percent: 100.0,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Serializable record of a run, suitable for `--trace-out` style dumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub config: ProbeConfig,
    pub status: RunStatus,
    pub summary: RunSummary,
    /// Terminal outcomes ordered by sequence number.
    pub packets: Vec<PacketOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn failed(run_id: impl Into<String>, config: ProbeConfig, error: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            status: RunStatus::Failed,
            summary: RunSummary::total_loss(),
            packets: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn received_count(&self) -> usize {
        self.packets
            .iter()
            .filter(|p| p.status == crate::packet::PacketStatus::Received)
            .count()
    }
}
