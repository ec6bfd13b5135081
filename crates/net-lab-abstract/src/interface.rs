use crate::packet::PacketOutcome;

/// Sink for everything a probe run reports while it executes.
///
/// The engine calls these from the task driving the run, one call at a time.
/// Implementations decide what to do with the data (persist it, push it to a
/// UI, print it).
pub trait ResultReporter {
    /// Called once per `sent` progress event and exactly once per packet when
    /// it settles as `received` or `lost`.
    ///
    /// `progress` is in `0.0..=1.0`. For `sent` events it follows send order,
    /// for terminal events it is the fraction of packets settled so far.
    fn on_packet_event(&mut self, outcome: &PacketOutcome, progress: f64);

    /// Transport warnings that do not abort the run, and the error text of a
    /// failed run.
    fn on_log(&mut self, _message: &str) {
        // Default no-op so headless callers can ignore logs.
    }
}

/// Reporter that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ResultReporter for NullReporter {
    fn on_packet_event(&mut self, _outcome: &PacketOutcome, _progress: f64) {}
}
