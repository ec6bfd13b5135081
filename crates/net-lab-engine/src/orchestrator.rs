//! Run lifecycle: `Idle -> Running -> Completed | Failed`.
//!
//! The orchestrator owns the paced send loop and is the only place that
//! talks to the [`ResultReporter`]. Everything else (receive tasks, loss
//! timers) reports back through one event channel, so outcomes are
//! recorded one at a time in the order they were settled.

use crate::codec;
use crate::error::{ProbeError, ProbeResult};
use crate::stats::{self, RunTally};
use crate::tracker::{PendingTracker, ProbeEvent};
use crate::transport::{self, DriverContext, ProbeTransport, TcpDriver, UdpDriver};
use chrono::Utc;
use net_lab_abstract::{
    PacketOutcome, PacketStatus, ProbeConfig, ProbeEnvelope, ProbeTimings, Protocol,
    ResultReporter, RunReport, RunStatus,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Terminal outcomes collected so far, indexed by sequence number.
struct RunLedger {
    outcomes: Vec<Option<PacketOutcome>>,
    /// Round trips in the order they were recorded, for jitter.
    rtts_ms: Vec<f64>,
    lost: usize,
    completed: usize,
}

impl RunLedger {
    fn new(packet_count: u32) -> Self {
        Self {
            outcomes: vec![None; packet_count as usize],
            rtts_ms: Vec::new(),
            lost: 0,
            completed: 0,
        }
    }

    /// Store a terminal outcome. Out-of-range or already recorded sequences
    /// are refused.
    fn record(&mut self, outcome: &PacketOutcome) -> bool {
        if !outcome.status.is_terminal() {
            return false;
        }
        let Some(slot) = (outcome.seq as usize)
            .checked_sub(1)
            .and_then(|idx| self.outcomes.get_mut(idx))
        else {
            return false;
        };
        if slot.is_some() {
            return false;
        }
        match (outcome.status, outcome.rtt_ms) {
            (PacketStatus::Received, Some(rtt)) => self.rtts_ms.push(rtt),
            (PacketStatus::Lost, _) => self.lost += 1,
            _ => {}
        }
        *slot = Some(outcome.clone());
        self.completed += 1;
        true
    }

    fn progress(&self) -> f64 {
        self.completed as f64 / self.outcomes.len() as f64
    }

    fn is_complete(&self) -> bool {
        self.completed >= self.outcomes.len()
    }

    fn into_packets(self) -> Vec<PacketOutcome> {
        self.outcomes.into_iter().flatten().collect()
    }
}

pub struct ProbeOrchestrator {
    run_id: String,
    config: ProbeConfig,
    timings: ProbeTimings,
    state: RunState,
}

impl ProbeOrchestrator {
    pub fn new(run_id: impl Into<String>, config: ProbeConfig) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            timings: ProbeTimings::default(),
            state: RunState::Idle,
        }
    }

    pub fn with_timings(mut self, timings: ProbeTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute the run over the transport named in the config.
    pub async fn run(&mut self, reporter: &mut (dyn ResultReporter + Send)) -> ProbeResult<RunReport> {
        match self.config.protocol {
            Protocol::Udp => self.run_with::<UdpDriver>(reporter).await,
            Protocol::Tcp => self.run_with::<TcpDriver>(reporter).await,
        }
    }

    /// Execute the run over an explicit transport implementation.
    ///
    /// A failed run yields no summary; the error text is also passed to
    /// [`ResultReporter::on_log`].
    pub async fn run_with<T: ProbeTransport>(
        &mut self,
        reporter: &mut (dyn ResultReporter + Send),
    ) -> ProbeResult<RunReport> {
        if self.state != RunState::Idle {
            return Err(ProbeError::AlreadyStarted(self.run_id.clone()));
        }
        self.state = RunState::Running;

        match self.execute::<T>(reporter).await {
            Ok(report) => {
                self.state = RunState::Completed;
                Ok(report)
            }
            Err(err) => {
                self.state = RunState::Failed;
                warn!("run {} failed: {}", self.run_id, err);
                reporter.on_log(&format!("Error while running test: {err}"));
                Err(err)
            }
        }
    }

    async fn execute<T: ProbeTransport>(
        &self,
        reporter: &mut (dyn ResultReporter + Send),
    ) -> ProbeResult<RunReport> {
        let config = &self.config;
        config.validate().map_err(ProbeError::InvalidConfig)?;

        let started = Instant::now();
        let target = transport::resolve_target(&config.target_host, config.resolved_port()).await?;

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let tracker = PendingTracker::new(events_tx.clone());
        let ctx = DriverContext {
            run_id: self.run_id.clone(),
            packet_size: config.packet_size,
            tracker: tracker.clone(),
            events: events_tx.clone(),
        };
        let mut transport = T::start(target, ctx).await?;
        info!(
            "run {} started: {} x {} bytes every {} ms over {} to {}",
            self.run_id, config.packet_count, config.packet_size, config.interval_ms, config.protocol, target
        );

        let timeout = self.timings.timeout_for(config.interval_ms);
        let mut ledger = RunLedger::new(config.packet_count);

        let finished = {
            let send_loop = send_loop(
                config,
                &self.run_id,
                timeout,
                &tracker,
                &mut transport,
                events_tx,
            );
            tokio::pin!(send_loop);
            let mut sending = true;

            let settled: ProbeResult<Instant> = loop {
                tokio::select! {
                    result = &mut send_loop, if sending => {
                        sending = false;
                        if let Err(err) = result {
                            break Err(err);
                        }
                    }
                    Some(event) = events.recv() => {
                        if let Some(at) = handle_event(event, &mut ledger, config.packet_count, reporter) {
                            break Ok(at);
                        }
                    }
                    else => {
                        break Err(ProbeError::Io(io::Error::other("probe event channel closed")));
                    }
                }
            };
            // A packet can settle before its own send call has returned.
            match settled {
                Ok(at) if sending => send_loop.as_mut().await.map(|_| at),
                other => other,
            }
        };

        let finished_at = match finished {
            Ok(at) => at,
            Err(err) => {
                tracker.cancel_all();
                transport.stop().await;
                // Transport warnings raised before the failure still reach the
                // reporter ahead of the error itself.
                while let Ok(event) = events.try_recv() {
                    if let ProbeEvent::Warning(message) = event {
                        reporter.on_log(&message);
                    }
                }
                return Err(err);
            }
        };

        // Progress events still queued behind the last settlement.
        while let Ok(event) = events.try_recv() {
            handle_event(event, &mut ledger, config.packet_count, reporter);
        }

        let summary = stats::summarize(RunTally {
            rtts_ms: &ledger.rtts_ms,
            lost: ledger.lost,
            packet_count: config.packet_count,
            packet_size: config.packet_size,
            elapsed: finished_at.saturating_duration_since(started),
        });
        info!(
            "run {} completed: avg {:.2} ms, jitter {:.2} ms, loss {:.2}%, {:.3} Mbps",
            self.run_id,
            summary.average_latency_ms,
            summary.jitter_ms,
            summary.packet_loss_percent,
            summary.throughput_mbps
        );

        // Keep the socket open a little longer for replies already in flight;
        // the tracker turns them away since every packet is settled.
        let drain = self.timings.drain_for(config.interval_ms);
        tokio::spawn(async move {
            tokio::time::sleep(drain).await;
            transport.stop().await;
        });

        Ok(RunReport {
            run_id: self.run_id.clone(),
            config: config.clone(),
            status: RunStatus::Completed,
            summary,
            packets: ledger.into_packets(),
            error: None,
        })
    }
}

/// Forward one event to the reporter. Returns the completion instant once the
/// last packet has settled.
fn handle_event(
    event: ProbeEvent,
    ledger: &mut RunLedger,
    packet_count: u32,
    reporter: &mut (dyn ResultReporter + Send),
) -> Option<Instant> {
    match event {
        ProbeEvent::Sent(outcome) => {
            let progress = f64::from(outcome.seq) / f64::from(packet_count);
            reporter.on_packet_event(&outcome, progress);
            None
        }
        ProbeEvent::Settled(outcome) => {
            if !ledger.record(&outcome) {
                debug!("seq {} settled twice, ignoring", outcome.seq);
                return None;
            }
            reporter.on_packet_event(&outcome, ledger.progress());
            ledger.is_complete().then(Instant::now)
        }
        ProbeEvent::Warning(message) => {
            reporter.on_log(&message);
            None
        }
    }
}

async fn send_loop<T: ProbeTransport>(
    config: &ProbeConfig,
    run_id: &str,
    timeout: Duration,
    tracker: &Arc<PendingTracker>,
    transport: &mut T,
    events: mpsc::UnboundedSender<ProbeEvent>,
) -> ProbeResult<()> {
    let interval = config.interval();
    for seq in 1..=config.packet_count {
        if seq > 1 {
            tokio::time::sleep(interval).await;
        }
        let envelope = ProbeEnvelope::new(seq, run_id, Utc::now());
        let frame = codec::encode(&envelope, config.packet_size)?;

        tracker.register(seq, Instant::now(), envelope.sent_at, timeout);
        transport.send_packet(seq, &frame).await?;
        debug!("sent seq {} ({} bytes)", seq, frame.len());

        let _ = events.send(ProbeEvent::Sent(PacketOutcome::sent(seq, envelope.sent_at)));
    }
    Ok(())
}
