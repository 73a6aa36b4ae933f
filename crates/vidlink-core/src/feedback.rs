/// What call control tells the media layer about the current peer.
///
/// Implemented by the jitter buffer; call control only sees this trait so the
/// two crates stay independent.
pub trait MediaFeedback: Send + Sync {
    /// Whether the connected peer speaks the loss-report extension (`V1`).
    fn set_peer_supports_loss_reports(&self, supported: bool);

    /// A `LOSS_REPORT <count> <timestamp>` arrived on the control channel.
    fn record_peer_loss_report(&self, count: u64, timestamp: f64);
}
