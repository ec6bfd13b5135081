pub mod agent;
pub mod codec;
pub mod error;
pub mod orchestrator;
pub mod stats;
pub mod tracker;
pub mod transport;

pub use agent::EchoAgent;
pub use error::{ProbeError, ProbeResult};
pub use orchestrator::{ProbeOrchestrator, RunState};
pub use stats::{RunTally, summarize};
pub use tracker::{PendingTracker, ProbeEvent};
pub use transport::{DriverContext, ProbeTransport, TcpDriver, UdpDriver};
