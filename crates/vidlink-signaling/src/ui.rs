/// The user-facing side of call control.
///
/// Both calls block until the user answers; network tasks invoke them through
/// `tokio::task::spawn_blocking`.
pub trait CallUi: Send + Sync + 'static {
    /// Ask whether to take a call from `nick`.
    fn confirm_incoming(&self, nick: &str) -> bool;

    /// Informational notice, e.g. the peer hung up.
    fn notify(&self, title: &str, message: &str);
}

/// Accepts every call and logs notices. Used by headless deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoAnswer;

impl CallUi for AutoAnswer {
    fn confirm_incoming(&self, nick: &str) -> bool {
        tracing::info!("Auto-accepting call from {}", nick);
        true
    }

    fn notify(&self, title: &str, message: &str) {
        tracing::info!("{}: {}", title, message);
    }
}
