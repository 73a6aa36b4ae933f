//! UDP video **sender**.
//!
//! One compressed frame per datagram, prefixed with the textual media header
//! (see [`crate::packet`]). Frames that do not fit in a datagram are
//! rejected, not fragmented; the QoS controller lowers quality and
//! resolution until they fit.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::debug;
use vidlink_core::{unix_now, FrameCodec, MediaError, Resolution, VideoFrame};

use crate::packet::{MediaHeader, MAX_DATAGRAM};
use crate::qos::AdaptiveSettings;

// ── VideoSender ───────────────────────────────────────────────────────────────

/// `VideoSender` is `Clone`: the socket, codec and sequence counter are shared.
#[derive(Clone)]
pub struct VideoSender {
    socket: Arc<UdpSocket>,
    codec: Arc<dyn FrameCodec>,
    next_seq: Arc<AtomicU64>,
}

impl VideoSender {
    pub fn new(socket: Arc<UdpSocket>, codec: Arc<dyn FrameCodec>) -> Self {
        Self { socket, codec, next_seq: Arc::new(AtomicU64::new(0)) }
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Compress `frame` at `quality` and send it to `dest` as one datagram.
    ///
    /// Returns the datagram size.
    pub async fn send_frame(
        &self,
        dest: SocketAddr,
        frame: &VideoFrame,
        seq: u64,
        quality: u8,
        resolution: Resolution,
        fps: u32,
    ) -> Result<usize, MediaError> {
        let payload = self.codec.compress(frame, quality)?;
        let header = MediaHeader { seq, sent_at: unix_now(), resolution, fps };
        let datagram = header.encode(&payload);
        if datagram.len() > MAX_DATAGRAM {
            return Err(MediaError::DatagramTooLarge { len: datagram.len() });
        }

        let sent = self.socket.send_to(&datagram, dest).await?;
        if sent != datagram.len() {
            return Err(MediaError::PartialSend { sent, expected: datagram.len() });
        }
        debug!("Sent frame seq={} bytes={} q={} res={} fps={} → {}", seq, sent, quality, resolution, fps, dest);
        Ok(sent)
    }

    /// Send with the next sequence number and the current adaptive settings.
    /// The sequence number is consumed even if the send fails.
    pub async fn send_next(
        &self,
        dest: SocketAddr,
        frame: &VideoFrame,
        settings: &AdaptiveSettings,
    ) -> Result<u64, MediaError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.send_frame(dest, frame, seq, settings.quality(), settings.resolution(), settings.fps())
            .await?;
        Ok(seq)
    }

    /// Start the sequence space over for a new call.
    pub fn reset_sequence(&self) {
        self.next_seq.store(0, Ordering::Relaxed);
    }

    // ── Diagnostics ───────────────────────────────────────────────────────────

    /// Sequence numbers handed out since the last reset.
    pub fn frames_attempted(&self) -> u64 {
        self.next_seq.load(Ordering::Relaxed)
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use vidlink_core::RawCodec;

    use super::*;

    async fn pair() -> (VideoSender, UdpSocket) {
        let tx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let rx = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        (VideoSender::new(Arc::new(tx), Arc::new(RawCodec)), rx)
    }

    #[tokio::test]
    async fn frame_arrives_with_header() {
        let (sender, rx) = pair().await;
        let frame = VideoFrame::new(vec![1u8, 2, 3, 4], 2, 2);
        let dest = rx.local_addr().unwrap();
        sender.send_frame(dest, &frame, 9, 50, Resolution::QQVGA, 15).await.unwrap();

        let mut buf = vec![0u8; 2048];
        let (n, _) = rx.recv_from(&mut buf).await.unwrap();
        let (header, payload) = MediaHeader::parse(&buf[..n]).unwrap();
        assert_eq!((header.seq, header.fps, header.resolution), (9, 15, Resolution::QQVGA));
        assert_eq!(RawCodec.decompress(payload).unwrap(), frame);
    }

    #[tokio::test]
    async fn oversized_frame_still_consumes_sequence() {
        let (sender, rx) = pair().await;
        let dest = rx.local_addr().unwrap();
        let settings = AdaptiveSettings::new(30);
        let huge = VideoFrame::new(vec![0u8; MAX_DATAGRAM], 640, 480);

        assert!(matches!(
            sender.send_next(dest, &huge, &settings).await,
            Err(MediaError::DatagramTooLarge { .. })
        ));
        let small = VideoFrame::new(vec![0u8; 16], 4, 4);
        assert_eq!(sender.send_next(dest, &small, &settings).await.unwrap(), 1);
        assert_eq!(sender.frames_attempted(), 2);
    }
}
