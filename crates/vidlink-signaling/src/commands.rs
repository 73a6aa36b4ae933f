//! Command loop: reads the current control link, one message per barrier
//! pass.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::control::CallControl;
use crate::link::ControlLink;
use crate::protocol::ControlMessage;

impl CallControl {
    pub(crate) async fn run_command_loop(self: Arc<Self>) {
        info!("Command loop started");
        loop {
            self.barrier.acquire().await;
            let link = {
                let session = self.session.lock().await;
                if !session.incoming_active {
                    break;
                }
                session.control_link.clone()
            };
            let Some(link) = link else {
                // nothing to read; hand the pass to the pending disconnect
                self.barrier.release();
                tokio::task::yield_now().await;
                continue;
            };

            match link.recv().await {
                Ok(Some(text)) => self.dispatch(&link, &text).await,
                Ok(None) => {
                    debug!("Peer {} closed the control link", link.peer_addr());
                    self.barrier.release();
                    self.teardown_link(link.epoch()).await;
                }
                Err(e) => {
                    warn!("Control receive error from {}: {}", link.peer_addr(), e);
                    self.barrier.release();
                    self.teardown_link(link.epoch()).await;
                }
            }
        }
        info!("Command loop stopped");
    }

    async fn dispatch(&self, link: &ControlLink, text: &str) {
        let msg = match ControlMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("{}", e);
                self.barrier.release();
                return;
            }
        };

        match msg {
            ControlMessage::CallHold { nick } => {
                self.set_peer_hold(link, true).await;
                info!("{} put the call on hold", nick);
            }
            ControlMessage::CallResume { nick } => {
                self.set_peer_hold(link, false).await;
                info!("{} resumed the call", nick);
            }
            ControlMessage::LossReport { count, timestamp } => {
                debug!("Peer reports {} lost packets at {}", count, timestamp);
                self.feedback.record_peer_loss_report(count, timestamp);
            }
            ControlMessage::CallEnd => {
                let peer = self.session.lock().await.peer_name.clone().unwrap_or_default();
                // teardown acquires, so give the pass back first
                self.barrier.release();
                self.teardown_link(link.epoch()).await;
                info!("{} ended the call", peer);

                let ui = self.ui.clone();
                let message = format!("{peer} ended the call");
                let _ = tokio::task::spawn_blocking(move || ui.notify("Call ended", &message)).await;
                return;
            }
            other => debug!("Ignoring {:?} on an established link", other),
        }
        self.barrier.release();
    }

    async fn set_peer_hold(&self, link: &ControlLink, held: bool) {
        let mut session = self.session.lock().await;
        if session.control_link.as_ref().map(ControlLink::epoch) == Some(link.epoch()) {
            session.peer_hold = held;
        }
    }
}
