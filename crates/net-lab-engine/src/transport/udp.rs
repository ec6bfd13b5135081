use super::{DriverContext, ProbeTransport};
use crate::error::{ProbeError, ProbeResult};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Largest datagram we are prepared to read back.
const MAX_DATAGRAM: usize = 65_535;

/// Connectionless driver: one ephemeral socket sends every probe and
/// listens for the echoes.
pub struct UdpDriver {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    receiver: JoinHandle<()>,
}

impl UdpDriver {
    pub fn local_addr(&self) -> ProbeResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// Errors a connectionless socket can report for a single datagram (for
/// instance an ICMP port unreachable surfacing on the next read) that say
/// nothing about the socket itself.
pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

async fn receive_loop(socket: Arc<UdpSocket>, ctx: DriverContext) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                if !ctx.accept_echo(&buf[..len]) {
                    debug!("ignored {} byte datagram from {}", len, from);
                }
            }
            Err(e) if is_transient(&e) => {
                ctx.warn(format!("UDP socket error: {e}"));
            }
            Err(e) => {
                ctx.warn(format!("UDP socket error, receive loop stopped: {e}"));
                break;
            }
        }
    }
}

impl ProbeTransport for UdpDriver {
    async fn start(target: SocketAddr, ctx: DriverContext) -> ProbeResult<Self> {
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        // Bound before the first send so no early echo can be missed.
        let socket = Arc::new(UdpSocket::bind(local).await.map_err(ProbeError::Bind)?);
        info!(
            "UDP probe socket listening on {} -> {}",
            socket.local_addr()?,
            target
        );
        let receiver = tokio::spawn(receive_loop(socket.clone(), ctx));
        Ok(Self {
            socket,
            target,
            receiver,
        })
    }

    async fn send_packet(&mut self, seq: u32, frame: &[u8]) -> ProbeResult<()> {
        self.socket
            .send_to(frame, self.target)
            .await
            .map_err(|source| ProbeError::Send { seq, source })?;
        Ok(())
    }

    async fn stop(self) {
        self.receiver.abort();
        debug!("UDP probe socket towards {} closed", self.target);
    }
}
