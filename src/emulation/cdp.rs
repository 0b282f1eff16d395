use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use super::traits::{ContentView, ViewEvent};

/// How long a command may wait for its response.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of the DevTools `/json/list` endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    pub web_socket_debugger_url: Option<String>,
}

/// List debuggable targets from a DevTools HTTP endpoint such as `http://127.0.0.1:9222`.
pub async fn discover_targets(http_base: &str) -> Result<Vec<TargetInfo>> {
    let url = format!("{}/json/list", http_base.trim_end_matches('/'));
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("fetch {}", url))?;
    if !resp.status().is_success() {
        bail!("target discovery failed: HTTP {}", resp.status().as_u16());
    }
    let targets: Vec<TargetInfo> = resp.json().await.context("decode target list")?;
    debug!("discovered {} devtools targets at {}", targets.len(), http_base);
    Ok(targets)
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

#[derive(Default)]
struct Shared {
    attached: AtomicBool,
    next_id: AtomicU64,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: Mutex<PendingMap>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ViewEvent>>>,
}

impl Shared {
    fn fail_pending(&self, reason: &str) {
        let pending: PendingMap = std::mem::take(&mut *self.pending.lock());
        for (_, tx) in pending {
            let _ = tx.send(Err(anyhow!("{}", reason)));
        }
    }

    fn publish(&self, event: ViewEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn dispatch(&self, text: &str) {
        let msg: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                trace!("unparseable devtools message dropped: {}", e);
                return;
            }
        };

        if let Some(id) = msg.get("id").and_then(Value::as_u64) {
            let Some(tx) = self.pending.lock().remove(&id) else {
                trace!("response for unknown command id {}", id);
                return;
            };
            let result = match msg.get("error") {
                Some(err) => Err(anyhow!(
                    "devtools error {}: {}",
                    err.get("code").and_then(Value::as_i64).unwrap_or(0),
                    err.get("message").and_then(Value::as_str).unwrap_or("unknown")
                )),
                None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = tx.send(result);
            return;
        }

        if let Some(method) = msg.get("method").and_then(Value::as_str) {
            let params = msg.get("params").cloned().unwrap_or(Value::Null);
            self.publish(ViewEvent::Protocol {
                method: method.to_string(),
                params,
            });
        }
    }
}

/// A page target driven over the Chrome DevTools Protocol WebSocket.
pub struct CdpView {
    id: String,
    ws_url: String,
    shared: Arc<Shared>,
}

impl CdpView {
    pub fn new(id: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ws_url: ws_url.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn from_target(target: &TargetInfo) -> Result<Self> {
        let ws_url = target
            .web_socket_debugger_url
            .as_deref()
            .ok_or_else(|| anyhow!("target {} has no debugger url (already attached?)", target.id))?;
        Ok(Self::new(target.id.clone(), ws_url))
    }

    /// First `page` target at `http_base` that still accepts a debugger.
    pub async fn first_page(http_base: &str) -> Result<Self> {
        let targets = discover_targets(http_base).await?;
        let target = targets
            .iter()
            .find(|t| t.kind == "page" && t.web_socket_debugger_url.is_some())
            .ok_or_else(|| anyhow!("no attachable page target at {}", http_base))?;
        Self::from_target(target)
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }
}

#[async_trait]
impl ContentView for CdpView {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_attached(&self) -> bool {
        self.shared.attached.load(Ordering::Acquire)
    }

    async fn attach(&self, protocol_version: &str) -> Result<()> {
        if self.is_attached() {
            bail!("debugger already attached to {}", self.id);
        }
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .with_context(|| format!("connect {}", self.ws_url))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *self.shared.outgoing.lock() = Some(out_tx);
        self.shared.attached.store(true, Ordering::Release);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    debug!("devtools write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let shared = Arc::clone(&self.shared);
        let view_id = self.id.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => shared.dispatch(text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("devtools read failed for {}: {}", view_id, e);
                        break;
                    }
                }
            }
            shared.fail_pending("devtools connection closed");
            // A close we did not ask for means the target is gone.
            if shared.attached.swap(false, Ordering::AcqRel) {
                shared.outgoing.lock().take();
                info!("devtools target {} went away", view_id);
                shared.publish(ViewEvent::Destroyed);
                shared.subscribers.lock().clear();
            }
        });

        info!("debugger attached to {} (protocol {})", self.id, protocol_version);
        Ok(())
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        let sent = match self.shared.outgoing.lock().as_ref() {
            Some(out) => out.send(Message::Text(frame.into())).is_ok(),
            None => false,
        };
        if !sent {
            self.shared.pending.lock().remove(&id);
            bail!("debugger not attached to {}", self.id);
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(anyhow!("{} dropped without response", method)),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(anyhow!("{} timed out after {:?}", method, COMMAND_TIMEOUT))
            }
        }
    }

    async fn detach(&self) -> Result<()> {
        if !self.shared.attached.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(out) = self.shared.outgoing.lock().take() {
            if out.send(Message::Close(None)).is_err() {
                warn!("devtools writer for {} already gone", self.id);
            }
        }
        self.shared.fail_pending("debugger detached");
        debug!("debugger detached from {}", self.id);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ViewEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_routes_responses_and_events() {
        let shared = Shared::default();
        let (tx, mut rx) = oneshot::channel();
        shared.pending.lock().insert(7, tx);
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        shared.subscribers.lock().push(ev_tx);

        shared.dispatch(r#"{"id":7,"result":{"ok":true}}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({ "ok": true }));

        shared.dispatch(r#"{"method":"Network.dataReceived","params":{"requestId":"1","dataLength":5}}"#);
        assert_eq!(
            ev_rx.try_recv().unwrap(),
            ViewEvent::Protocol {
                method: "Network.dataReceived".to_string(),
                params: json!({ "requestId": "1", "dataLength": 5 }),
            }
        );

        shared.dispatch("garbage");
        assert!(ev_rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_error_response() {
        let shared = Shared::default();
        let (tx, mut rx) = oneshot::channel();
        shared.pending.lock().insert(1, tx);
        shared.dispatch(r#"{"id":1,"error":{"code":-32601,"message":"method not found"}}"#);
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(err.to_string().contains("method not found"));
    }

    #[test]
    fn test_target_without_debugger_url() {
        let target: TargetInfo = serde_json::from_str(
            r#"{"id":"A","type":"page","title":"t","url":"about:blank"}"#,
        )
        .unwrap();
        assert!(CdpView::from_target(&target).is_err());
    }
}
