//! UDP ingest loop feeding the jitter buffer.
//!
//! Runs for the whole process, across calls. At the start of every call it
//! drains whatever the socket still holds from the previous one, then resets
//! the buffer. It exits when an `END_RECEPTION` datagram arrives, which
//! [`MediaReceiver::stop`] sends to itself over loopback.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use vidlink_core::{FrameCodec, MediaError};

use crate::jitter::{JitterBuffer, PushOutcome, VideoPacket};
use crate::packet::{MediaHeader, END_RECEPTION, MAX_DATAGRAM};

pub struct MediaReceiver {
    socket: Arc<UdpSocket>,
    buffer: Arc<JitterBuffer>,
    codec: Arc<dyn FrameCodec>,
    call_started: Notify,
}

impl MediaReceiver {
    pub fn new(socket: Arc<UdpSocket>, buffer: Arc<JitterBuffer>, codec: Arc<dyn FrameCodec>) -> Arc<Self> {
        Arc::new(Self { socket, buffer, codec, call_started: Notify::new() })
    }

    pub fn buffer(&self) -> &Arc<JitterBuffer> {
        &self.buffer
    }

    /// Ask the ingest loop to purge stale datagrams and start priming.
    pub fn begin_call(&self) {
        self.call_started.notify_one();
    }

    pub fn end_call(&self) {
        self.buffer.end_call();
    }

    /// Wake the ingest loop with the sentinel datagram.
    pub async fn stop(&self) -> io::Result<()> {
        let port = self.socket.local_addr()?.port();
        let nudge = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        nudge.send_to(END_RECEPTION, (Ipv4Addr::LOCALHOST, port)).await?;
        Ok(())
    }

    pub async fn run(self: Arc<Self>) {
        match self.socket.local_addr() {
            Ok(addr) => info!("Media receiver listening on {}", addr),
            Err(e) => warn!("Media socket address unavailable: {}", e),
        }
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let received = tokio::select! {
                biased;
                _ = self.call_started.notified() => {
                    if self.purge() {
                        break;
                    }
                    self.buffer.begin_call();
                    continue;
                }
                res = self.socket.recv_from(&mut buf) => res,
            };

            let (len, from) = match received {
                Ok(r) => r,
                Err(e) => {
                    warn!("Media receive error: {}", e);
                    continue;
                }
            };
            let datagram = &buf[..len];
            if datagram == END_RECEPTION {
                break;
            }
            if let Err(e) = self.ingest(datagram, from) {
                debug!("Dropping datagram from {}: {}", from, e);
            }
        }
        info!("Media receiver stopped");
    }

    fn ingest(&self, datagram: &[u8], from: SocketAddr) -> Result<(), MediaError> {
        let (header, payload) = MediaHeader::parse(datagram)?;
        let frame = self.codec.decompress(payload)?;
        match self.buffer.push(VideoPacket::new(header, frame)) {
            PushOutcome::Queued | PushOutcome::NotInCall => {}
            other => debug!("Frame seq={} from {} not queued: {:?}", header.seq, from, other),
        }
        Ok(())
    }

    /// Non-blocking drain. Returns `true` if the stop sentinel was among the
    /// purged datagrams.
    fn purge(&self) -> bool {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut purged = 0usize;
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((len, _)) => {
                    if &buf[..len] == END_RECEPTION {
                        return true;
                    }
                    purged += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("Media purge error: {}", e);
                    break;
                }
            }
        }
        if purged > 0 {
            debug!("Purged {} stale datagrams", purged);
        }
        false
    }
}
