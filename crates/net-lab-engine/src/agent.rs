//! Stateless echo agent: every UDP datagram goes back to its sender and every
//! TCP chunk goes back down the connection it came from, byte for byte.

use crate::error::{ProbeError, ProbeResult};
use crate::transport::udp::is_transient;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct EchoAgent {
    udp: UdpSocket,
    tcp: TcpListener,
}

impl EchoAgent {
    pub async fn bind(udp_addr: SocketAddr, tcp_addr: SocketAddr) -> ProbeResult<Self> {
        let udp = UdpSocket::bind(udp_addr).await.map_err(ProbeError::Bind)?;
        let tcp = TcpListener::bind(tcp_addr).await.map_err(ProbeError::Bind)?;
        Ok(Self { udp, tcp })
    }

    pub fn udp_addr(&self) -> ProbeResult<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn tcp_addr(&self) -> ProbeResult<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Echo until an unrecoverable socket error.
    pub async fn serve(self) -> ProbeResult<()> {
        info!(
            "echo agent listening on udp {} / tcp {}",
            self.udp_addr()?,
            self.tcp_addr()?
        );
        tokio::try_join!(serve_udp(self.udp), serve_tcp(self.tcp))?;
        Ok(())
    }

    pub fn spawn(self) -> JoinHandle<ProbeResult<()>> {
        tokio::spawn(self.serve())
    }
}

async fn serve_udp(socket: UdpSocket) -> ProbeResult<()> {
    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                udp_receive_error(e)?;
                continue;
            }
        };
        if let Err(e) = socket.send_to(&buf[..len], from).await {
            warn!("udp echo to {} failed: {}", from, e);
        }
    }
}

/// Errors tied to one earlier datagram (an ICMP unreachable for a reply)
/// are skipped; anything else means the socket itself is broken.
fn udp_receive_error(e: io::Error) -> ProbeResult<()> {
    if is_transient(&e) {
        debug!("udp echo receive error: {}", e);
        Ok(())
    } else {
        warn!("udp echo socket failed: {}", e);
        Err(ProbeError::Io(e))
    }
}

async fn serve_tcp(listener: TcpListener) -> ProbeResult<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("tcp echo connection from {}", peer);
        tokio::spawn(async move {
            if let Err(e) = echo_stream(stream).await {
                debug!("tcp echo connection {} ended: {}", peer, e);
            }
        });
    }
}

async fn echo_stream(mut stream: TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n]).await?;
    }
}
