use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Something the debugger of a content view reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// A protocol event such as `Network.dataReceived`.
    Protocol { method: String, params: Value },
    /// The view was destroyed (window closed, webview removed).
    Destroyed,
}

/// An embedded content view whose network traffic can be instrumented through
/// a DevTools-style debugger.
#[async_trait]
pub trait ContentView: Send + Sync {
    /// Stable identifier of the view for logging and bookkeeping.
    fn id(&self) -> String;

    fn is_attached(&self) -> bool;

    async fn attach(&self, protocol_version: &str) -> Result<()>;

    async fn send_command(&self, method: &str, params: Value) -> Result<Value>;

    async fn detach(&self) -> Result<()>;

    /// Stream of debugger events. A closed stream means the view is gone.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ViewEvent>;
}
