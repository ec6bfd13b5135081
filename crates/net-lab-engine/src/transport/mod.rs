//! Socket plumbing for probe runs.
//!
//! Both drivers share the same contract: `start` opens the socket and spawns
//! a receive task that feeds decoded echoes into the [`PendingTracker`],
//! `send_packet` writes one encoded frame, `stop` tears everything down.

pub mod tcp;
pub mod udp;

use crate::codec;
use crate::error::{ProbeError, ProbeResult};
use crate::tracker::{PendingTracker, ProbeEvent};
use net_lab_abstract::PacketStatus;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use tcp::TcpDriver;
pub use udp::UdpDriver;

/// What a driver's receive task needs to match echoes to the active run.
#[derive(Clone)]
pub struct DriverContext {
    pub run_id: String,
    pub packet_size: usize,
    pub tracker: Arc<PendingTracker>,
    pub events: mpsc::UnboundedSender<ProbeEvent>,
}

impl DriverContext {
    /// Hand one received frame to the tracker. Frames that do not decode or
    /// belong to another run are dropped silently; returns whether the frame
    /// settled a pending packet.
    pub fn accept_echo(&self, frame: &[u8]) -> bool {
        let Some(envelope) = codec::decode(frame) else {
            debug!("dropping {} byte frame that is not a probe envelope", frame.len());
            return false;
        };
        if envelope.test_id != self.run_id {
            debug!(
                "dropping echo seq={} for foreign run {}",
                envelope.seq, envelope.test_id
            );
            return false;
        }
        self.tracker.resolve(envelope.seq, PacketStatus::Received)
    }

    pub fn warn(&self, message: String) {
        warn!("{}", message);
        let _ = self.events.send(ProbeEvent::Warning(message));
    }
}

/// One way of getting probe frames to the echo agent and back.
pub trait ProbeTransport: Sized + Send + 'static {
    /// Open the transport towards `target`. Once this returns, replies can
    /// no longer be missed.
    fn start(target: SocketAddr, ctx: DriverContext) -> impl Future<Output = ProbeResult<Self>> + Send;

    /// Write one already-encoded frame for sequence `seq`.
    fn send_packet(&mut self, seq: u32, frame: &[u8]) -> impl Future<Output = ProbeResult<()>> + Send;

    /// Close the socket and stop the receive task.
    fn stop(self) -> impl Future<Output = ()> + Send;
}

/// Resolve `host:port`, preferring IPv4 like the echo agent does.
pub async fn resolve_target(host: &str, port: u16) -> ProbeResult<SocketAddr> {
    let unresolved = || ProbeError::Resolve {
        host: host.to_string(),
        port,
    };
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| unresolved())?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(unresolved)
}
