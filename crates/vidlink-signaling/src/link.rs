//! Shared handle to the active control connection.
//!
//! The command loop reads while call-control operations write, so the
//! stream is shared behind an `Arc` and driven with `readable()/try_read`
//! and `writable()/try_write` instead of being split. Closing shuts the
//! socket down in both directions, which wakes a parked reader with EOF.

use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use socket2::SockRef;
use tokio::net::TcpStream;
use tracing::debug;

/// Largest control message read in one go.
pub const MAX_CONTROL_MESSAGE: usize = 1024;

#[derive(Debug, Clone)]
pub struct ControlLink {
    stream: Arc<TcpStream>,
    epoch: u64,
    peer_addr: SocketAddr,
}

impl ControlLink {
    pub fn new(stream: TcpStream, epoch: u64) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self { stream: Arc::new(stream), epoch, peer_addr })
    }

    /// Identifies which connection this is; bumps on every new link.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn send(&self, msg: &str) -> io::Result<()> {
        let mut remaining = msg.as_bytes();
        while !remaining.is_empty() {
            self.stream.writable().await?;
            match self.stream.try_write(remaining) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
        debug!("→ {} [{}]: {}", self.peer_addr, self.epoch, msg);
        Ok(())
    }

    /// One message, or `None` once the peer (or [`close`](Self::close)) shut
    /// the stream.
    pub async fn recv(&self) -> io::Result<Option<String>> {
        let mut buf = [0u8; MAX_CONTROL_MESSAGE];
        loop {
            self.stream.readable().await?;
            match self.stream.try_read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    let msg = String::from_utf8_lossy(&buf[..n]).into_owned();
                    debug!("← {} [{}]: {}", self.peer_addr, self.epoch, msg);
                    return Ok(Some(msg));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn close(&self) {
        // NotConnected just means the peer got there first.
        let _ = SockRef::from(&*self.stream).shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    async fn pair() -> (ControlLink, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (ControlLink::new(client.unwrap(), 7).unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn send_and_recv() {
        let (link, mut remote) = pair().await;
        link.send("CALL_HOLD alice").await.unwrap();
        let mut buf = [0u8; 64];
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"CALL_HOLD alice");

        remote.write_all(b"CALL_END").await.unwrap();
        assert_eq!(link.recv().await.unwrap().as_deref(), Some("CALL_END"));
        assert_eq!(link.epoch(), 7);
    }

    #[tokio::test]
    async fn close_wakes_a_parked_reader() {
        let (link, _remote) = pair().await;
        let reader = {
            let link = link.clone();
            tokio::spawn(async move { link.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        link.close();
        let got = tokio::time::timeout(Duration::from_secs(2), reader).await.unwrap().unwrap();
        assert!(matches!(got, Ok(None)));
    }

    #[tokio::test]
    async fn peer_close_reads_as_none() {
        let (link, remote) = pair().await;
        drop(remote);
        assert!(link.recv().await.unwrap().is_none());
    }
}
