//! Call control: outgoing calls, hold, end, disconnect.
//!
//! # Barrier accounting
//!
//! ```text
//! connect_to ── reply read ──► release ──► (failure) disconnect ──► acquire
//! listener   ── attach     ──► release
//! command loop: acquire ─► recv ─► dispatch ─► release   (token circulates)
//!               EOF     ─► release ─► teardown(epoch) ─► acquire
//! disconnect:   close ─► reset ─► acquire                (token retired)
//! shutdown:     stop flag ─► release ─► loop acquires and exits
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vidlink_core::{unix_now, CallError, CallStatus, DirectoryError, MediaFeedback};

use crate::barrier::ConnectionBarrier;
use crate::directory::PeerDirectory;
use crate::link::ControlLink;
use crate::protocol::ControlMessage;
use crate::session::{CallState, ControlSession, MediaPeer};
use crate::ui::CallUi;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// How long an accepted socket has to send its `CALLING` line.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Who we are on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub nick: String,
    /// UDP port peers should send video to.
    pub video_port: u16,
}

/// Point-in-time copy of the session, for status displays and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub peer_name: Option<String>,
    pub has_link: bool,
    pub media_peer: MediaPeer,
    pub local_hold: bool,
    pub peer_hold: bool,
    pub state: CallState,
}

impl SessionSnapshot {
    pub fn invariants_hold(&self) -> bool {
        self.has_link == self.peer_name.is_some() && (!self.media_peer.is_set() || self.has_link)
    }
}

// ── CallControl ───────────────────────────────────────────────────────────────

pub struct CallControl {
    pub(crate) identity: LocalIdentity,
    call_timeout: Duration,
    pub(crate) session: Mutex<ControlSession>,
    pub(crate) barrier: ConnectionBarrier,
    epochs: AtomicU64,
    calls: watch::Sender<Option<u64>>,
    pub(crate) stop_listener: Notify,
    pub(crate) directory: Arc<dyn PeerDirectory>,
    pub(crate) ui: Arc<dyn CallUi>,
    pub(crate) feedback: Arc<dyn MediaFeedback>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl CallControl {
    pub fn new(
        identity: LocalIdentity,
        call_timeout: Duration,
        directory: Arc<dyn PeerDirectory>,
        ui: Arc<dyn CallUi>,
        feedback: Arc<dyn MediaFeedback>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            call_timeout,
            session: Mutex::new(ControlSession::default()),
            barrier: ConnectionBarrier::new(),
            epochs: AtomicU64::new(0),
            calls: watch::channel(None).0,
            stop_listener: Notify::new(),
            directory,
            ui,
            feedback,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn barrier(&self) -> &ConnectionBarrier {
        &self.barrier
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Epoch of the link carrying the current call, `None` between calls.
    ///
    /// A back-to-back redial changes the value even if no `None` is ever
    /// observed, so media loops can reset per call without polling races.
    pub fn watch_calls(&self) -> watch::Receiver<Option<u64>> {
        self.calls.subscribe()
    }

    /// Call with the session lock held, after any change to the link or the
    /// media peer.
    pub(crate) fn publish_call(&self, session: &ControlSession) {
        let epoch = session.call_epoch();
        self.calls.send_if_modified(|current| {
            let changed = *current != epoch;
            *current = epoch;
            changed
        });
    }

    // ── Background loops ─────────────────────────────────────────────────────

    /// Start the listener and command loops. Call once per process.
    pub fn spawn_loops(self: &Arc<Self>, listener: TcpListener) {
        let listen = tokio::spawn(self.clone().run_listener(listener));
        let commands = tokio::spawn(self.clone().run_command_loop());
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(listen);
            tasks.push(commands);
        }
    }

    /// Hang up, stop both loops and wait for them.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        {
            let mut session = self.session.lock().await;
            session.listener_active = false;
            session.incoming_active = false;
        }
        self.stop_listener.notify_one();
        self.barrier.release();

        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Control loop ended abnormally: {}", e);
            }
        }
        info!("Call control stopped");
    }

    // ── Outgoing call ────────────────────────────────────────────────────────

    /// Call `nick`. Returns the peer's video port once it accepts.
    pub async fn connect_to(&self, nick: &str) -> Result<u16, CallError> {
        {
            let mut session = self.session.lock().await;
            if let Some(peer) = session.busy_with() {
                return Err(CallError::AlreadyConnected { peer: peer.to_owned() });
            }
            session.dialing = Some(nick.to_owned());
        }

        let link = match self.dial(nick).await {
            Ok(link) => link,
            Err(e) => {
                self.session.lock().await.dialing = None;
                return Err(e);
            }
        };

        // The command loop must not read the socket before the answer is in,
        // so the barrier is released only after this read.
        let answer = tokio::time::timeout(self.call_timeout, link.recv()).await;
        self.barrier.release();

        let text = match answer {
            Err(_) => {
                info!("{} did not answer within {:?}", nick, self.call_timeout);
                self.disconnect().await;
                return Err(CallError::NoAnswer { secs: self.call_timeout.as_secs() });
            }
            Ok(Err(e)) => {
                self.disconnect().await;
                return Err(e.into());
            }
            Ok(Ok(None)) => {
                self.disconnect().await;
                return Err(CallError::PeerClosed);
            }
            Ok(Ok(Some(text))) => text,
        };

        match ControlMessage::parse(&text) {
            Ok(ControlMessage::CallAccepted { port, .. }) => {
                let mut session = self.session.lock().await;
                if session.control_link.as_ref().map(ControlLink::epoch) != Some(link.epoch()) {
                    // torn down while we were waiting
                    return Err(CallError::PeerClosed);
                }
                session.media_peer = MediaPeer { ip: Some(link.peer_addr().ip()), port: Some(port) };
                session.dialing = None;
                self.publish_call(&session);
                debug_assert!(session.invariants_hold());
                info!("Call with {} established (video → {}:{})", nick, link.peer_addr().ip(), port);
                Ok(port)
            }
            Ok(ControlMessage::CallDenied { .. }) => {
                info!("{} denied the call", nick);
                self.disconnect().await;
                Err(CallError::Denied)
            }
            Ok(ControlMessage::CallBusy) => {
                info!("{} is busy", nick);
                self.disconnect().await;
                Err(CallError::Busy)
            }
            Ok(other) => {
                self.disconnect().await;
                Err(CallError::Malformed { response: other.to_string() })
            }
            Err(e) => {
                self.disconnect().await;
                Err(e)
            }
        }
    }

    /// Resolve, connect, attach and send `CALLING`. On a send failure the
    /// link is already attached, so this balances the barrier itself.
    async fn dial(&self, nick: &str) -> Result<ControlLink, CallError> {
        let peer = self.directory.lookup(nick).await.map_err(|e| match e {
            DirectoryError::UserUnknown => CallError::PeerNotFound { nick: nick.to_owned() },
            other => CallError::Directory(other),
        })?;
        let addr = peer.control_addr();

        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(CallError::Unreachable { addr, reason: e.to_string() }),
            Err(_) => {
                return Err(CallError::Unreachable { addr, reason: "connect timed out".to_owned() })
            }
        };
        let link = ControlLink::new(stream, self.next_epoch())?;

        let calling =
            ControlMessage::Calling { nick: self.identity.nick.clone(), port: self.identity.video_port };
        let sent = {
            let mut session = self.session.lock().await;
            session.attach(link.clone(), nick, MediaPeer::default(), peer.supports_loss_reports());
            self.feedback.set_peer_supports_loss_reports(peer.supports_loss_reports());
            link.send(&calling.to_string()).await
        };
        if let Err(e) = sent {
            self.barrier.release();
            self.disconnect().await;
            return Err(e.into());
        }
        debug!("Calling {} at {}", nick, addr);
        Ok(link)
    }

    // ── In-call operations ───────────────────────────────────────────────────

    /// Put the call on hold (`true`) or resume it (`false`).
    pub async fn set_hold(&self, hold: bool) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        let link = match &session.control_link {
            Some(link) if session.in_call() => link.clone(),
            _ => return Err(CallError::NotInCall),
        };
        if session.local_hold == hold {
            return Err(CallError::AlreadyInState { held: hold });
        }
        let nick = self.identity.nick.clone();
        let msg = if hold { ControlMessage::CallHold { nick } } else { ControlMessage::CallResume { nick } };
        link.send(&msg.to_string()).await?;
        session.local_hold = hold;
        info!("Call {}", if hold { "on hold" } else { "resumed" });
        Ok(())
    }

    /// Send `CALL_END` and stop sending media. The link stays up until the
    /// peer closes it.
    pub async fn end_call(&self) -> Result<(), CallError> {
        let mut session = self.session.lock().await;
        let link = match &session.control_link {
            Some(link) if session.in_call() => link.clone(),
            _ => return Err(CallError::NotInCall),
        };
        link.send(&ControlMessage::CallEnd.to_string()).await?;
        session.media_peer.port = None;
        self.publish_call(&session);
        info!("Ended call with {}", session.peer_name.as_deref().unwrap_or("?"));
        Ok(())
    }

    /// `LOSS_REPORT <count> <now>` to the current peer.
    pub async fn send_loss_report(&self, count: u64) -> Result<(), CallError> {
        let session = self.session.lock().await;
        let link = match &session.control_link {
            Some(link) if session.in_call() => link.clone(),
            _ => return Err(CallError::NotInCall),
        };
        let msg = ControlMessage::LossReport { count, timestamp: unix_now() };
        link.send(&msg.to_string()).await?;
        Ok(())
    }

    /// Close the current link and reset the session. A no-op when idle.
    pub async fn disconnect(&self) {
        let link = {
            let mut session = self.session.lock().await;
            let link = session.reset();
            self.publish_call(&session);
            debug_assert!(session.invariants_hold());
            link
        };
        let Some(link) = link else {
            return;
        };
        link.close();
        self.feedback.set_peer_supports_loss_reports(false);
        info!("Disconnected from {}", link.peer_addr());
        self.barrier.acquire().await;
    }

    /// Command-loop teardown: only acts if `epoch` is still current.
    pub(crate) async fn teardown_link(&self, epoch: u64) {
        let link = {
            let mut session = self.session.lock().await;
            if session.control_link.as_ref().map(ControlLink::epoch) != Some(epoch) {
                return;
            }
            let link = session.reset();
            self.publish_call(&session);
            link
        };
        if let Some(link) = link {
            link.close();
            self.feedback.set_peer_supports_loss_reports(false);
            info!("Control link to {} closed", link.peer_addr());
            self.barrier.acquire().await;
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub async fn call_status(&self) -> CallStatus {
        self.session.lock().await.status()
    }

    pub async fn call_state(&self) -> CallState {
        self.session.lock().await.state()
    }

    pub async fn connected_peer(&self) -> Option<String> {
        self.session.lock().await.peer_name.clone()
    }

    pub async fn media_peer(&self) -> Option<SocketAddr> {
        self.session.lock().await.media_peer.addr()
    }

    pub async fn peer_supports_loss_reports(&self) -> bool {
        self.session.lock().await.peer_supports_loss_reports
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let s = self.session.lock().await;
        SessionSnapshot {
            peer_name: s.peer_name.clone(),
            has_link: s.control_link.is_some(),
            media_peer: s.media_peer,
            local_hold: s.local_hold,
            peer_hold: s.peer_hold,
            state: s.state(),
        }
    }
}
