// Push notifications from the engine to the UI layer.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Which buttons and status text the connection dialog shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialogMode {
    Connect,
    Status,
    ConnectionLost,
}

/// Aggregate download progress across all tracked requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    /// -1 when no tracked request declared a length.
    pub total_bytes: i64,
    pub is_loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogCommand {
    Show,
    Hide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserCommand {
    Open,
    Hide,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum UiEvent {
    ModeChanged(DialogMode),
    DownloadProgress(DownloadProgress),
    Dialog(DialogCommand),
    Browser(BrowserCommand),
}

/// Broadcast fan-out of [`UiEvent`]s. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            trace!("ui event dropped, no subscribers: {:?}", event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }
}
