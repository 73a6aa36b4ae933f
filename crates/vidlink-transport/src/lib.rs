//! vidlink-transport: the UDP media path.
//!
//! # Architecture
//!
//! ```text
//!  outbound pacing ── VideoSender ───── UDP ─────► peer
//!        ▲ quality / fps / resolution
//!        │
//!  AdaptiveSettings ◄── JitterBuffer (QoS on pop) ◄── MediaReceiver ◄── UDP ── peer
//!                            │
//!                            └── loss count ──► LOSS_REPORT (call control)
//! ```

pub mod jitter;
pub mod packet;
pub mod qos;
pub mod receiver;
pub mod sender;

pub use jitter::{BufferStats, JitterBuffer, LossCounters, Phase, PoppedFrame, PushOutcome, VideoPacket};
pub use packet::{MediaHeader, END_RECEPTION, MAX_DATAGRAM};
pub use qos::{AdaptiveSettings, LossTier};
pub use receiver::MediaReceiver;
pub use sender::VideoSender;
