use net_lab_abstract::RunSummary;
use std::time::Duration;

/// Inputs for the end-of-run statistics.
#[derive(Debug, Clone, Copy)]
pub struct RunTally<'a> {
    /// Round trips in the order the replies were recorded.
    pub rtts_ms: &'a [f64],
    pub lost: usize,
    pub packet_count: u32,
    pub packet_size: usize,
    /// Wall-clock time from run start until the last packet settled.
    pub elapsed: Duration,
}

pub fn summarize(tally: RunTally<'_>) -> RunSummary {
    let rtts = tally.rtts_ms;
    let received = rtts.len();

    let (average, max, min) = if received == 0 {
        (0.0, 0.0, 0.0)
    } else {
        let sum: f64 = rtts.iter().sum();
        let max = rtts.iter().copied().fold(f64::MIN, f64::max);
        let min = rtts.iter().copied().fold(f64::MAX, f64::min);
        (sum / received as f64, max, min)
    };

    let duration_ms = (tally.elapsed.as_secs_f64() * 1000.0).max(1.0);
    let duration_s = duration_ms / 1000.0;
    let bits = (received * tally.packet_size * 8) as f64;

    RunSummary {
        average_latency_ms: average,
        max_latency_ms: max,
        min_latency_ms: min,
        jitter_ms: jitter(rtts),
        throughput_mbps: bits / duration_s / 1_000_000.0,
        packet_loss_percent: tally.lost as f64 / f64::from(tally.packet_count.max(1)) * 100.0,
        total_duration_seconds: duration_s,
    }
}

/// Mean absolute difference between successive samples. Not RFC 3550 jitter.
pub fn jitter(rtts_ms: &[f64]) -> f64 {
    if rtts_ms.len() < 2 {
        return 0.0;
    }
    let total: f64 = rtts_ms.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    total / (rtts_ms.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(rtts_ms: &[f64], lost: usize, packet_count: u32) -> RunTally<'_> {
        RunTally {
            rtts_ms,
            lost,
            packet_count,
            packet_size: 64,
            elapsed: Duration::from_secs(1),
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_latency_and_jitter() {
        let summary = summarize(tally(&[10.0, 20.0, 15.0], 0, 3));
        assert!(close(summary.average_latency_ms, 15.0));
        assert!(close(summary.max_latency_ms, 20.0));
        assert!(close(summary.min_latency_ms, 10.0));
        assert!(close(summary.jitter_ms, 7.5));
        assert!(close(summary.packet_loss_percent, 0.0));
    }

    #[test]
    fn test_loss_percent() {
        let rtts = [1.0; 7];
        let summary = summarize(tally(&rtts, 3, 10));
        assert!(close(summary.packet_loss_percent, 30.0));
    }

    #[test]
    fn test_nothing_received() {
        let summary = summarize(tally(&[], 4, 4));
        assert_eq!(summary.average_latency_ms, 0.0);
        assert_eq!(summary.max_latency_ms, 0.0);
        assert_eq!(summary.min_latency_ms, 0.0);
        assert_eq!(summary.jitter_ms, 0.0);
        assert_eq!(summary.throughput_mbps, 0.0);
        assert!(close(summary.packet_loss_percent, 100.0));
    }

    #[test]
    fn test_single_sample_has_no_jitter() {
        assert_eq!(jitter(&[42.0]), 0.0);
        let summary = summarize(tally(&[42.0], 0, 1));
        assert!(close(summary.min_latency_ms, 42.0));
        assert!(close(summary.max_latency_ms, 42.0));
    }

    #[test]
    fn test_throughput_uses_wall_clock() {
        let rtts = [5.0; 5];
        let summary = summarize(RunTally {
            rtts_ms: &rtts,
            lost: 0,
            packet_count: 5,
            packet_size: 512,
            elapsed: Duration::from_secs(2),
        });
        assert!(close(summary.throughput_mbps, 0.01024));
        assert!(close(summary.total_duration_seconds, 2.0));
    }

    #[test]
    fn test_duration_floor() {
        let summary = summarize(RunTally {
            rtts_ms: &[0.1],
            lost: 0,
            packet_count: 1,
            packet_size: 100,
            elapsed: Duration::ZERO,
        });
        assert!(close(summary.total_duration_seconds, 0.001));
        assert!(summary.throughput_mbps.is_finite());
        assert!(close(summary.throughput_mbps, 0.8));
    }
}
