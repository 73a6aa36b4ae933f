use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Detect the primary LAN IPv4 address by connecting a UDP socket
/// towards a public address.
///
/// No packets are sent; connect() on UDP only consults the routing table.
/// Falls back to loopback when no route exists (offline host).
pub fn detect_local_ip() -> IpAddr {
    UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
    use super::detect_local_ip;

    #[test]
    fn local_ip_is_ipv4() {
        assert!(detect_local_ip().is_ipv4());
    }
}
