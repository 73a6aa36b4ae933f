//! Accept loop for incoming calls.
//!
//! ```text
//! accept ─► read CALLING (2 s) ─┬─ timeout / EOF ─► close
//!                               ├─ malformed     ─► CALL_DENIED, close
//!                               ├─ occupied      ─► CALL_BUSY, close
//!                               └─ ask UI ─┬─ no     ─► CALL_DENIED, close
//!                                          └─ yes    ─► attach, release, CALL_ACCEPTED
//! ```

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use vidlink_core::CallError;

use crate::control::{CallControl, HANDSHAKE_TIMEOUT};
use crate::link::ControlLink;
use crate::protocol::ControlMessage;
use crate::session::MediaPeer;

impl CallControl {
    pub(crate) async fn run_listener(self: Arc<Self>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("Listening for calls on {}", addr),
            Err(e) => warn!("Listener address unavailable: {}", e),
        }

        loop {
            let accepted = tokio::select! {
                res = listener.accept() => res,
                _ = self.stop_listener.notified() => break,
            };
            if !self.session.lock().await.listener_active {
                break;
            }
            match accepted {
                Ok((stream, addr)) => {
                    debug!("Control connection from {}", addr);
                    if let Err(e) = self.handle_incoming(stream).await {
                        warn!("Incoming call from {} failed: {}", addr, e);
                    }
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }
        info!("Listener stopped");
    }

    async fn handle_incoming(self: &Arc<Self>, stream: TcpStream) -> Result<(), CallError> {
        let link = ControlLink::new(stream, self.next_epoch())?;
        let own_nick = self.identity.nick.clone();

        let request = tokio::time::timeout(HANDSHAKE_TIMEOUT, link.recv()).await;
        let (nick, port) = match request {
            Ok(Ok(Some(text))) => match ControlMessage::parse(&text) {
                Ok(ControlMessage::Calling { nick, port }) => (nick, port),
                _ => {
                    warn!("Rejecting handshake {:?} from {}", text, link.peer_addr());
                    return reject(&link, ControlMessage::CallDenied { nick: own_nick }).await;
                }
            },
            Ok(Ok(None)) | Ok(Err(_)) => {
                debug!("{} hung up before CALLING", link.peer_addr());
                link.close();
                return Ok(());
            }
            Err(_) => {
                warn!("No CALLING from {} within {:?}", link.peer_addr(), HANDSHAKE_TIMEOUT);
                link.close();
                return Ok(());
            }
        };

        if self.session.lock().await.is_occupied() {
            info!("Busy; turning away {}", nick);
            return reject(&link, ControlMessage::CallBusy).await;
        }

        let ui = self.ui.clone();
        let caller = nick.clone();
        let accepted = tokio::task::spawn_blocking(move || ui.confirm_incoming(&caller))
            .await
            .unwrap_or(false);
        if !accepted {
            info!("Declined call from {}", nick);
            return reject(&link, ControlMessage::CallDenied { nick: own_nick }).await;
        }

        let supports_v1 = match self.directory.lookup(&nick).await {
            Ok(peer) => peer.supports_loss_reports(),
            Err(e) => {
                debug!("Could not look up {} for protocol tags: {}", nick, e);
                false
            }
        };

        let mut session = self.session.lock().await;
        // a call may have started while the user was deciding
        if session.is_occupied() {
            drop(session);
            info!("Busy after prompt; turning away {}", nick);
            return reject(&link, ControlMessage::CallBusy).await;
        }
        let media_peer = MediaPeer { ip: Some(link.peer_addr().ip()), port: Some(port) };
        session.attach(link.clone(), &nick, media_peer, supports_v1);
        self.publish_call(&session);
        self.feedback.set_peer_supports_loss_reports(supports_v1);
        self.barrier.release();

        let reply = ControlMessage::CallAccepted { nick: own_nick, port: self.identity.video_port };
        if let Err(e) = link.send(&reply.to_string()).await {
            drop(session);
            self.disconnect().await;
            return Err(e.into());
        }
        info!("Accepted call from {} (video → {}:{})", nick, link.peer_addr().ip(), port);
        Ok(())
    }
}

async fn reject(link: &ControlLink, reply: ControlMessage) -> Result<(), CallError> {
    let sent = link.send(&reply.to_string()).await;
    link.close();
    sent.map_err(CallError::from)
}
