//! The single control-session state block.
//!
//! Lives behind `CallControl`'s mutex; every field change happens with the
//! lock held. Invariants:
//!
//! ```text
//! control_link.is_some()  <=>  peer_name.is_some()
//! media_peer.is_set()      =>  control_link.is_some()
//! ```

use std::net::{IpAddr, SocketAddr};

use vidlink_core::CallStatus;

use crate::link::ControlLink;

/// Where outgoing video goes. Both halves are set only while a call is up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaPeer {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
}

impl MediaPeer {
    pub fn addr(&self) -> Option<SocketAddr> {
        Some(SocketAddr::new(self.ip?, self.port?))
    }

    pub fn is_set(&self) -> bool {
        self.ip.is_some() || self.port.is_some()
    }
}

/// Diagnostic view of the call, richer than [`CallStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Outgoing call waiting for the peer's answer.
    Ringing,
    Active,
    LocalHold,
    PeerHold,
    BothHold,
    /// `CALL_END` sent; waiting for the peer to close the link.
    Ended,
}

#[derive(Debug)]
pub struct ControlSession {
    pub peer_name: Option<String>,
    pub control_link: Option<ControlLink>,
    pub media_peer: MediaPeer,
    pub local_hold: bool,
    pub peer_hold: bool,
    pub peer_supports_loss_reports: bool,
    /// Nick being dialled while an outgoing call is in setup.
    pub dialing: Option<String>,
    pub listener_active: bool,
    pub incoming_active: bool,
}

impl Default for ControlSession {
    fn default() -> Self {
        Self {
            peer_name: None,
            control_link: None,
            media_peer: MediaPeer::default(),
            local_hold: false,
            peer_hold: false,
            peer_supports_loss_reports: false,
            dialing: None,
            listener_active: true,
            incoming_active: true,
        }
    }
}

impl ControlSession {
    /// Someone is connected, or we are dialling out.
    pub fn is_occupied(&self) -> bool {
        self.peer_name.is_some() || self.dialing.is_some()
    }

    /// Nick to report in `AlreadyConnected`.
    pub fn busy_with(&self) -> Option<&str> {
        self.peer_name.as_deref().or(self.dialing.as_deref())
    }

    pub fn in_call(&self) -> bool {
        self.control_link.is_some() && self.media_peer.addr().is_some()
    }

    /// Epoch of the link carrying the current call; `None` outside a call.
    pub fn call_epoch(&self) -> Option<u64> {
        if !self.in_call() {
            return None;
        }
        self.control_link.as_ref().map(ControlLink::epoch)
    }

    /// Make `link` the current connection. Hold flags start cleared.
    pub fn attach(&mut self, link: ControlLink, peer: &str, media_peer: MediaPeer, supports_v1: bool) {
        self.control_link = Some(link);
        self.peer_name = Some(peer.to_owned());
        self.media_peer = media_peer;
        self.local_hold = false;
        self.peer_hold = false;
        self.peer_supports_loss_reports = supports_v1;
        debug_assert!(self.invariants_hold());
    }

    /// Drop the current connection and reset every call field. The stop
    /// flags survive.
    pub fn reset(&mut self) -> Option<ControlLink> {
        let link = self.control_link.take();
        self.peer_name = None;
        self.media_peer = MediaPeer::default();
        self.local_hold = false;
        self.peer_hold = false;
        self.peer_supports_loss_reports = false;
        self.dialing = None;
        link
    }

    pub fn invariants_hold(&self) -> bool {
        self.control_link.is_some() == self.peer_name.is_some()
            && (!self.media_peer.is_set() || self.control_link.is_some())
    }

    pub fn status(&self) -> CallStatus {
        let Some(media_peer) = self.media_peer.addr() else {
            return CallStatus::Idle;
        };
        if self.control_link.is_none() {
            return CallStatus::Idle;
        }
        if self.local_hold {
            CallStatus::LocalHold
        } else if self.peer_hold {
            CallStatus::PeerHold
        } else {
            CallStatus::Active { media_peer }
        }
    }

    pub fn state(&self) -> CallState {
        if self.dialing.is_some() {
            return CallState::Ringing;
        }
        if self.control_link.is_none() {
            return CallState::Idle;
        }
        if self.media_peer.port.is_none() {
            return CallState::Ended;
        }
        match (self.local_hold, self.peer_hold) {
            (false, false) => CallState::Active,
            (true, false) => CallState::LocalHold,
            (false, true) => CallState::PeerHold,
            (true, true) => CallState::BothHold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_session() {
        let s = ControlSession::default();
        assert!(s.invariants_hold());
        assert!(!s.is_occupied());
        assert_eq!(s.status(), CallStatus::Idle);
        assert_eq!(s.state(), CallState::Idle);
        assert!(s.listener_active && s.incoming_active);
    }

    #[test]
    fn dialing_counts_as_occupied() {
        let s = ControlSession { dialing: Some("bob".into()), ..Default::default() };
        assert!(s.is_occupied());
        assert_eq!(s.busy_with(), Some("bob"));
        assert_eq!(s.state(), CallState::Ringing);
        assert_eq!(s.status(), CallStatus::Idle);
    }

    #[test]
    fn media_peer_needs_both_halves() {
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(MediaPeer { ip: Some(ip), port: None }.addr(), None);
        assert_eq!(
            MediaPeer { ip: Some(ip), port: Some(9000) }.addr(),
            Some(SocketAddr::new(ip, 9000))
        );
        assert!(MediaPeer { ip: None, port: Some(1) }.is_set());
    }

    #[test]
    fn orphan_media_peer_breaks_invariant() {
        let s = ControlSession {
            media_peer: MediaPeer { ip: None, port: Some(9000) },
            ..Default::default()
        };
        assert!(!s.invariants_hold());
    }
}
