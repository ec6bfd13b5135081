use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::env;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use net_lab_abstract::{
    DEFAULT_TCP_PORT, DEFAULT_UDP_PORT, NetworkMode, ProbeConfig, Protocol, RunReport,
};
use net_lab_engine::{EchoAgent, ProbeOrchestrator, ProbeResult};

mod reporter;

use reporter::ConsoleReporter;

const UDP_PORT_ENV: &str = "UDP_PROBE_PORT";
const TCP_PORT_ENV: &str = "TCP_PROBE_PORT";

#[derive(Parser, Debug)]
#[command(author, version, about = "Round-trip latency, jitter and loss probes over UDP or TCP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one probe against an echo agent.
    Probe(ProbeArgs),
    /// Host an echo agent for other controllers to probe.
    Agent(AgentArgs),
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Base config in TOML; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    protocol: Option<Protocol>,

    #[arg(long)]
    host: Option<String>,

    /// Defaults to $UDP_PROBE_PORT / $TCP_PROBE_PORT, then 40000 / 5050.
    #[arg(long)]
    port: Option<u16>,

    /// Packet size in bytes.
    #[arg(long)]
    size: Option<usize>,

    #[arg(long)]
    count: Option<u32>,

    /// Gap between sends in milliseconds.
    #[arg(long)]
    interval: Option<u64>,

    #[arg(long)]
    name: Option<String>,

    /// LAN or REMOTE, recorded in the report only.
    #[arg(long)]
    mode: Option<NetworkMode>,

    /// Identifier stamped on every packet. Random when omitted.
    #[arg(long)]
    run_id: Option<String>,

    /// Write a JSON report of the finished (or failed) run.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Only print the summary.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct AgentArgs {
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    #[arg(long)]
    udp_port: Option<u16>,

    #[arg(long)]
    tcp_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Command::Probe(args) => run_probe(args).await,
        Command::Agent(args) => run_agent(args).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_probe(args: ProbeArgs) -> Result<()> {
    let config = args.build_config()?;
    let run_id = args.run_id.clone().unwrap_or_else(random_run_id);
    info!(
        "probing {}:{} over {} as run {}",
        config.target_host,
        config.resolved_port(),
        config.protocol,
        run_id
    );

    let mut reporter = ConsoleReporter::new(args.quiet);
    let mut orchestrator = ProbeOrchestrator::new(run_id, config);
    let outcome = orchestrator.run(&mut reporter).await;
    finish_probe(&orchestrator, outcome, args.trace_out.as_deref())
}

/// Print and persist the result of a run. A failed run is recorded as a total
/// loss and turned into an error.
fn finish_probe(
    orchestrator: &ProbeOrchestrator,
    outcome: ProbeResult<RunReport>,
    trace_out: Option<&Path>,
) -> Result<()> {
    match outcome {
        Ok(report) => {
            print_summary(&report);
            if let Some(path) = trace_out {
                write_trace(path, &report)?;
            }
            Ok(())
        }
        Err(err) => {
            let run_id = orchestrator.run_id();
            if let Some(path) = trace_out {
                let failed = RunReport::failed(run_id, orchestrator.config().clone(), err.to_string());
                write_trace(path, &failed)?;
            }
            Err(anyhow::Error::new(err).context(format!("Probe run {run_id} failed")))
        }
    }
}

async fn run_agent(args: AgentArgs) -> Result<()> {
    let udp_port = match args.udp_port {
        Some(port) => port,
        None => port_from_env(UDP_PORT_ENV)?.unwrap_or(DEFAULT_UDP_PORT),
    };
    let tcp_port = match args.tcp_port {
        Some(port) => port,
        None => port_from_env(TCP_PORT_ENV)?.unwrap_or(DEFAULT_TCP_PORT),
    };

    let agent = EchoAgent::bind(
        SocketAddr::new(args.bind, udp_port),
        SocketAddr::new(args.bind, tcp_port),
    )
    .await
    .context("Failed to bind echo agent")?;
    agent.serve().await.context("Echo agent stopped")?;
    Ok(())
}

impl ProbeArgs {
    fn build_config(&self) -> Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProbeConfig::default(),
        };

        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(host) = &self.host {
            config.target_host = host.clone();
        }
        if let Some(port) = self.port {
            config.target_port = Some(port);
        }
        if let Some(size) = self.size {
            config.packet_size = size;
        }
        if let Some(count) = self.count {
            config.packet_count = count;
        }
        if let Some(interval) = self.interval {
            config.interval_ms = interval;
        }
        if self.name.is_some() {
            config.name = self.name.clone();
        }
        if self.mode.is_some() {
            config.mode = self.mode;
        }

        if matches!(config.target_port, None | Some(0)) {
            let var = match config.protocol {
                Protocol::Udp => UDP_PORT_ENV,
                Protocol::Tcp => TCP_PORT_ENV,
            };
            if let Some(port) = port_from_env(var)? {
                config.target_port = Some(port);
            }
        }

        config
            .validate()
            .map_err(anyhow::Error::msg)
            .context("Invalid probe config")?;
        Ok(config)
    }
}

fn port_from_env(var: &str) -> Result<Option<u16>> {
    match env::var(var) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{var} is not a valid port: {raw}")),
        _ => Ok(None),
    }
}

fn random_run_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;
    println!(
        "received    : {} / {}",
        report.received_count(),
        report.config.packet_count
    );
    println!("avg latency : {:.2} ms", summary.average_latency_ms);
    println!("min / max   : {:.2} / {:.2} ms", summary.min_latency_ms, summary.max_latency_ms);
    println!("jitter      : {:.2} ms", summary.jitter_ms);
    println!("throughput  : {:.3} Mbps", summary.throughput_mbps);
    println!("packet loss : {:.2} %", summary.packet_loss_percent);
    println!("duration    : {:.3} s", summary.total_duration_seconds);
}

fn load_config(path: &Path) -> Result<ProbeConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read probe config {}", path.display()))?;
    let config: ProbeConfig = toml::from_str(&content).context("Failed to parse probe config")?;
    Ok(config)
}

fn write_trace(path: &Path, report: &RunReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize run report")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
