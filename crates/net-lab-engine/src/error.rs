use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe config: {0}")]
    InvalidConfig(String),

    #[error("probe run {0} was already started")]
    AlreadyStarted(String),

    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    #[error("failed to bind local socket: {0}")]
    Bind(#[source] io::Error),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to send packet {seq}: {source}")]
    Send {
        seq: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode probe envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ProbeResult<T> = Result<T, ProbeError>;
