//! Directory-server client.
//!
//! One persistent TCP connection, one request per send, one reply per read.
//! Nothing here retries: wrong passwords and unknown users come back as
//! distinct [`DirectoryError`] variants and the caller decides what to do.
//!
//! ```text
//! DirectoryClient::connect(addr)
//!   ├─ register(nick, password, ip, port, tags) → timestamp
//!   ├─ query(nick)                              → PeerRecord
//!   ├─ list_users()                             → Vec<UserRecord>
//!   └─ quit()                                   (always closes)
//! ```

pub mod local_ip;
pub mod protocol;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use vidlink_core::{DirectoryError, PeerRecord, UserRecord};

pub use local_ip::detect_local_ip;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

const READ_CHUNK: usize = 1024;
/// Upper bound on an accumulated `LIST_USERS` reply.
const MAX_LIST_REPLY: usize = 1 << 20;

// ── DirectoryClient ───────────────────────────────────────────────────────────

pub struct DirectoryClient {
    stream: Option<TcpStream>,
    reply_timeout: Duration,
}

impl DirectoryClient {
    /// Open the connection to the discovery server (`host:port`).
    pub async fn connect(addr: &str) -> Result<Self, DirectoryError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| DirectoryError::Timeout { ms: CONNECT_TIMEOUT.as_millis() as u64 })??;
        stream.set_nodelay(true)?;
        info!("Directory connected to {}", addr);
        Ok(Self { stream: Some(stream), reply_timeout: REPLY_TIMEOUT })
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    /// `REGISTER`; returns the server's registration timestamp.
    pub async fn register(
        &mut self,
        nick: &str,
        password: &str,
        ip: &str,
        port: u16,
        protocols: &[&str],
    ) -> Result<String, DirectoryError> {
        let request = protocol::register_request(nick, ip, port, password, protocols);
        let reply = self.exchange(&request).await?;
        let ts = protocol::parse_register_reply(&reply)?;
        info!("Registered as {} ({}:{}, ts={})", nick, ip, port, ts);
        Ok(ts)
    }

    /// `QUERY`; `UserUnknown` when the nick is not registered.
    pub async fn query(&mut self, nick: &str) -> Result<PeerRecord, DirectoryError> {
        let reply = self.exchange(&protocol::query_request(nick)).await?;
        let peer = protocol::parse_query_reply(&reply)?;
        debug!("Query {} → {} {:?}", nick, peer.control_addr(), peer.protocols);
        Ok(peer)
    }

    /// `LIST_USERS`; keeps reading until the advertised number of records
    /// has arrived.
    pub async fn list_users(&mut self) -> Result<Vec<UserRecord>, DirectoryError> {
        let timeout = self.reply_timeout;
        let stream = self.stream.as_mut().ok_or(DirectoryError::NotConnected)?;
        stream.write_all(protocol::LIST_USERS_REQUEST.as_bytes()).await?;

        let mut reply = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = read_with_timeout(stream, &mut chunk, timeout).await?;
            if n == 0 {
                return Err(if reply.is_empty() {
                    DirectoryError::NoResponse
                } else {
                    DirectoryError::Malformed { response: String::from_utf8_lossy(&reply).into_owned() }
                });
            }
            reply.extend_from_slice(&chunk[..n]);
            if reply.len() > MAX_LIST_REPLY {
                return Err(DirectoryError::Malformed {
                    response: format!("user list exceeds {} bytes", MAX_LIST_REPLY),
                });
            }

            let text = String::from_utf8_lossy(&reply);
            if let Some(users) = protocol::parse_user_list(&text)? {
                debug!("Listed {} users ({} bytes)", users.len(), reply.len());
                return Ok(users);
            }
        }
    }

    /// `QUIT`. The socket is closed whatever the server answers.
    pub async fn quit(&mut self) -> Result<(), DirectoryError> {
        let result = match self.exchange(protocol::QUIT_REQUEST).await {
            Ok(reply) if reply.trim() == protocol::QUIT_REPLY => Ok(()),
            Ok(reply) => Err(DirectoryError::Malformed { response: reply }),
            Err(e) => Err(e),
        };
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        if let Err(e) = &result {
            warn!("Directory quit: {}", e);
        } else {
            info!("Directory session closed");
        }
        result
    }

    // ── Framing ──────────────────────────────────────────────────────────────

    async fn exchange(&mut self, request: &str) -> Result<String, DirectoryError> {
        let timeout = self.reply_timeout;
        let stream = self.stream.as_mut().ok_or(DirectoryError::NotConnected)?;
        stream.write_all(request.as_bytes()).await?;

        let mut buf = [0u8; READ_CHUNK];
        let n = read_with_timeout(stream, &mut buf, timeout).await?;
        if n == 0 {
            return Err(DirectoryError::NoResponse);
        }
        Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
    }
}

async fn read_with_timeout(
    stream: &mut TcpStream,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<usize, DirectoryError> {
    tokio::time::timeout(timeout, stream.read(buf))
        .await
        .map_err(|_| DirectoryError::Timeout { ms: timeout.as_millis() as u64 })?
        .map_err(DirectoryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one connection: for every request read, write the next scripted
    /// reply (each reply may be split into several writes).
    async fn scripted_server(script: Vec<Vec<&'static str>>) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            for reply in script {
                let mut buf = [0u8; 1024];
                let n = sock.read(&mut buf).await.unwrap();
                seen.push(String::from_utf8_lossy(&buf[..n]).into_owned());
                for part in reply {
                    sock.write_all(part.as_bytes()).await.unwrap();
                    sock.flush().await.unwrap();
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
            }
            seen
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn register_then_query() {
        let (addr, server) = scripted_server(vec![
            vec!["OK WELCOME alice 1589000000.25"],
            vec!["OK USER_FOUND bob 10.0.0.2 9000 V0#V1"],
        ])
        .await;
        let mut client = DirectoryClient::connect(&addr).await.unwrap();

        let ts = client.register("alice", "pw", "10.0.0.1", 8000, &["V0", "V1"]).await.unwrap();
        assert_eq!(ts, "1589000000.25");
        let peer = client.query("bob").await.unwrap();
        assert_eq!(peer.control_addr(), "10.0.0.2:9000");
        assert!(peer.supports_loss_reports());

        let seen = server.await.unwrap();
        assert_eq!(seen[0], "REGISTER alice 10.0.0.1 8000 pw V0#V1");
        assert_eq!(seen[1], "QUERY bob");
    }

    #[tokio::test]
    async fn wrong_password_is_distinct() {
        let (addr, _server) = scripted_server(vec![vec!["NOK WRONG_PASS"]]).await;
        let mut client = DirectoryClient::connect(&addr).await.unwrap();
        let err = client.register("alice", "bad", "10.0.0.1", 8000, &["V0"]).await.unwrap_err();
        assert!(matches!(err, DirectoryError::WrongPassword));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn list_users_across_fragments() {
        let (addr, _server) = scripted_server(vec![vec![
            "OK USERS_LIST 3 a#b 1.1.1.1 10 1.0#carol 2.2.2",
            ".2 20 2.0#dave 3.3.3.3 30 3",
            ".0#",
        ]])
        .await;
        let mut client = DirectoryClient::connect(&addr).await.unwrap();
        let users = client.list_users().await.unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(users[0].nick, "a#b");
        assert_eq!(users[1].ip, "2.2.2.2");
        assert_eq!(users[2].timestamp, "3.0");
    }

    #[tokio::test]
    async fn quit_closes_even_on_bad_reply() {
        let (addr, _server) = scripted_server(vec![vec!["WHAT"]]).await;
        let mut client = DirectoryClient::connect(&addr).await.unwrap();
        assert!(client.quit().await.is_err());
        assert!(!client.is_connected());
        assert!(matches!(client.query("x").await, Err(DirectoryError::NotConnected)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(sock);
        });
        let mut client = DirectoryClient::connect(&addr)
            .await
            .unwrap()
            .with_reply_timeout(Duration::from_millis(100));
        assert!(matches!(client.query("bob").await, Err(DirectoryError::Timeout { ms: 100 })));
    }
}
