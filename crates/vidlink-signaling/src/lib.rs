//! vidlink-signaling: the call-control state machine.
//!
//! One control connection at a time, shared between two long-lived tasks and
//! the caller-facing operations.
//!
//! ```text
//!   peer ── TCP ──► listener loop ──┐
//!                                   ├─► ControlSession (Mutex) ◄── connect_to / set_hold /
//!   peer ◄─ TCP ─── command loop ◄──┘          │                  end_call / disconnect
//!                        ▲                     │
//!                        └── ConnectionBarrier ┘
//! ```
//!
//! `LOSS_REPORT` messages are handed to a [`MediaFeedback`](vidlink_core::MediaFeedback)
//! sink; the user is reached through [`CallUi`].

pub mod barrier;
mod commands;
pub mod control;
pub mod directory;
pub mod link;
mod listener;
pub mod protocol;
pub mod session;
pub mod ui;

pub use barrier::ConnectionBarrier;
pub use control::{CallControl, LocalIdentity, SessionSnapshot, CONNECT_TIMEOUT, HANDSHAKE_TIMEOUT};
pub use directory::PeerDirectory;
pub use link::ControlLink;
pub use protocol::ControlMessage;
pub use session::{CallState, ControlSession, MediaPeer};
pub use ui::{AutoAnswer, CallUi};
