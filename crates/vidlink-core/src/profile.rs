use serde::{Deserialize, Deserializer, Serialize};

/// Local identity: nickname plus the control (TCP) and video (UDP) ports.
///
/// Profiles written by older clients store the ports as strings, so both
/// `"10000"` and `10000` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    #[serde(deserialize_with = "port_from_str_or_int")]
    pub tcp_port: u16,
    #[serde(deserialize_with = "port_from_str_or_int")]
    pub udp_port: u16,
}

impl UserProfile {
    pub fn new(username: impl Into<String>, tcp_port: u16, udp_port: u16) -> Self {
        Self { username: username.into(), tcp_port, udp_port }
    }
}

fn port_from_str_or_int<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Int(u16),
        Str(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Int(p) => Ok(p),
        Port::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::UserProfile;

    #[test]
    fn accepts_string_ports() {
        let json = r#"{"username": "alice", "tcp_port": "10000", "udp_port": "10001"}"#;
        let p: UserProfile = serde_json::from_str(json).expect("string ports");
        assert_eq!(p, UserProfile::new("alice", 10000, 10001));
    }

    #[test]
    fn accepts_numeric_ports() {
        let json = r#"{"username": "bob", "tcp_port": 9000, "udp_port": 9001}"#;
        let p: UserProfile = serde_json::from_str(json).expect("numeric ports");
        assert_eq!(p.tcp_port, 9000);
        assert_eq!(p.udp_port, 9001);
    }

    #[test]
    fn rejects_out_of_range_port() {
        let json = r#"{"username": "eve", "tcp_port": "70000", "udp_port": 1}"#;
        assert!(serde_json::from_str::<UserProfile>(json).is_err());
    }
}
