use async_trait::async_trait;
use tokio::sync::Mutex;
use vidlink_core::{DirectoryError, PeerRecord};
use vidlink_discovery::DirectoryClient;

/// Resolves a nick to its control address and protocol tags.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn lookup(&self, nick: &str) -> Result<PeerRecord, DirectoryError>;
}

#[async_trait]
impl PeerDirectory for Mutex<DirectoryClient> {
    async fn lookup(&self, nick: &str) -> Result<PeerRecord, DirectoryError> {
        self.lock().await.query(nick).await
    }
}
