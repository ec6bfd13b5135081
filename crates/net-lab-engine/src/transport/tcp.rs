use super::{DriverContext, ProbeTransport};
use crate::codec;
use crate::error::{ProbeError, ProbeResult};
use bytes::{Buf, Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A header line longer than this without a newline cannot be ours.
const MAX_HEADER_LEN: usize = 4096;

/// Cuts the echoed byte stream back into the frames we wrote.
///
/// A frame is a header line followed by zero padding, `max(packet_size,
/// header_len)` bytes in total. Lines that do not decode are skipped through
/// their newline and stray padding is dropped, so the stream resynchronises
/// after garbage.
pub struct FrameAssembler {
    buf: BytesMut,
    packet_size: usize,
}

impl FrameAssembler {
    pub fn new(packet_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(packet_size.max(MAX_HEADER_LEN)),
            packet_size,
        }
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete frame, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            let padding = self.buf.iter().take_while(|b| **b == 0).count();
            self.buf.advance(padding);

            let Some(newline) = self.buf.iter().position(|b| *b == b'\n') else {
                if self.buf.len() > MAX_HEADER_LEN {
                    debug!("discarding {} bytes without a header line", self.buf.len());
                    self.buf.clear();
                }
                return None;
            };
            let header_len = newline + 1;
            if codec::decode(&self.buf[..newline]).is_none() {
                debug!("skipping {} byte line that is not a probe header", header_len);
                self.buf.advance(header_len);
                continue;
            }

            let frame_len = codec::frame_len(header_len, self.packet_size);
            if self.buf.len() < frame_len {
                return None;
            }
            return Some(self.buf.split_to(frame_len).freeze());
        }
    }
}

/// Connection-oriented driver: a single stream to the echo agent carries
/// every probe of the run.
pub struct TcpDriver {
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    receiver: JoinHandle<()>,
}

async fn receive_loop(mut reader: OwnedReadHalf, ctx: DriverContext) {
    let mut assembler = FrameAssembler::new(ctx.packet_size);
    loop {
        match reader.read_buf(assembler.buffer_mut()).await {
            Ok(0) => {
                ctx.warn("TCP connection closed by echo agent".to_string());
                break;
            }
            Ok(_) => {
                while let Some(frame) = assembler.next_frame() {
                    ctx.accept_echo(&frame);
                }
            }
            Err(e) => {
                ctx.warn(format!("TCP socket error: {e}"));
                break;
            }
        }
    }
}

impl ProbeTransport for TcpDriver {
    async fn start(target: SocketAddr, ctx: DriverContext) -> ProbeResult<Self> {
        let stream = TcpStream::connect(target)
            .await
            .map_err(|source| ProbeError::Connect {
                addr: target,
                source,
            })?;
        // Pacing must not be distorted by Nagle coalescing.
        stream.set_nodelay(true)?;
        info!("TCP probe connection established {} -> {}", stream.local_addr()?, target);

        let (reader, writer) = stream.into_split();
        let receiver = tokio::spawn(receive_loop(reader, ctx));
        Ok(Self {
            writer,
            peer: target,
            receiver,
        })
    }

    async fn send_packet(&mut self, seq: u32, frame: &[u8]) -> ProbeResult<()> {
        self.writer
            .write_all(frame)
            .await
            .map_err(|source| ProbeError::Send { seq, source })
    }

    async fn stop(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!("TCP shutdown towards {} failed: {}", self.peer, e);
        }
        self.receiver.abort();
        debug!("TCP probe connection to {} closed", self.peer);
    }
}
