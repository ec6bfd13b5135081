use net_lab_abstract::{PacketOutcome, PacketStatus, ResultReporter};

/// Prints one line per settled packet and a running tally.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    quiet: bool,
    received: u32,
    lost: u32,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            ..Default::default()
        }
    }
}

impl ResultReporter for ConsoleReporter {
    fn on_packet_event(&mut self, outcome: &PacketOutcome, progress: f64) {
        match outcome.status {
            PacketStatus::Sent => return,
            PacketStatus::Received => self.received += 1,
            PacketStatus::Lost => self.lost += 1,
        }
        if self.quiet {
            return;
        }
        let rtt = outcome
            .rtt_ms
            .map(|rtt| format!("{rtt:.2} ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{:>5.1}%] seq={:<5} {:<8} rtt={:<10} ok={} lost={}",
            progress * 100.0,
            outcome.seq,
            outcome.status,
            rtt,
            self.received,
            self.lost
        );
    }

    fn on_log(&mut self, message: &str) {
        eprintln!("{message}");
    }
}
