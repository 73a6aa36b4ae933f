use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// MARK: - Resolution

/// Capture resolution. Travels on the wire as `"<width>x<height>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const VGA: Self = Self { width: 640, height: 480 };
    pub const QVGA: Self = Self { width: 320, height: 240 };
    pub const QQVGA: Self = Self { width: 160, height: 120 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::VGA
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| format!("resolution {s:?} is not <width>x<height>"))?;
        let width = w.parse().map_err(|_| format!("bad width in {s:?}"))?;
        let height = h.parse().map_err(|_| format!("bad height in {s:?}"))?;
        Ok(Self { width, height })
    }
}

// MARK: - VideoFrame

/// Decoded bitmap as handed to / produced by the codec. The pixel layout is
/// opaque to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl VideoFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self { data: data.into(), width, height }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

// MARK: - Protocol tags

pub const PROTOCOL_V0: &str = "V0";
/// Loss-report extension.
pub const PROTOCOL_V1: &str = "V1";
/// Tags this client registers with.
pub const LOCAL_PROTOCOLS: &[&str] = &[PROTOCOL_V0, PROTOCOL_V1];

// MARK: - PeerRecord

/// Result of a directory `QUERY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub nick: String,
    pub ip: String,
    pub port: u16,
    pub protocols: Vec<String>,
}

impl PeerRecord {
    pub fn supports_loss_reports(&self) -> bool {
        self.protocols.iter().any(|p| p == PROTOCOL_V1)
    }

    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

// MARK: - UserRecord

/// One row of a directory `LIST_USERS` reply. Fields are kept verbatim; the
/// server does not validate what other clients register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub nick: String,
    pub ip: String,
    pub port: String,
    pub timestamp: String,
}

// MARK: - CallStatus

/// What the media layer should do right now.
///
/// Local hold wins over peer hold when both are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// No media destination: either idle or the call was ended.
    Idle,
    /// We put the call on hold.
    LocalHold,
    /// The peer put the call on hold.
    PeerHold,
    /// Send video to `media_peer`.
    Active { media_peer: SocketAddr },
}

impl CallStatus {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// True for every state that still has a negotiated media destination.
    pub fn in_call(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

// MARK: - Time

/// Wall-clock seconds since the Unix epoch, as carried in media headers and
/// loss reports.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_label_roundtrip() {
        assert_eq!(Resolution::QVGA.to_string(), "320x240");
        assert_eq!("160x120".parse::<Resolution>(), Ok(Resolution::QQVGA));
        assert!("640*480".parse::<Resolution>().is_err());
        assert!("x480".parse::<Resolution>().is_err());
    }

    #[test]
    fn v1_tag_enables_loss_reports() {
        let mut peer = PeerRecord {
            nick: "bob".into(),
            ip: "10.0.0.2".into(),
            port: 9000,
            protocols: vec!["V0".into()],
        };
        assert!(!peer.supports_loss_reports());
        peer.protocols.push("V1".into());
        assert!(peer.supports_loss_reports());
        assert_eq!(peer.control_addr(), "10.0.0.2:9000");
    }

    #[test]
    fn call_status_predicates() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert!(CallStatus::Active { media_peer: addr }.is_streaming());
        assert!(CallStatus::PeerHold.in_call());
        assert!(!CallStatus::LocalHold.is_streaming());
        assert!(!CallStatus::Idle.in_call());
    }
}
