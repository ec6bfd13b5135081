pub mod config;
pub mod interface;
pub mod packet;
pub mod report;

pub use config::{DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, NetworkMode, ProbeConfig, ProbeTimings, Protocol};
pub use interface::{NullReporter, ResultReporter};
pub use packet::{PacketOutcome, PacketStatus, ProbeEnvelope};
pub use report::{RunReport, RunStatus, RunSummary};
