// Shared test doubles.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use dialup_engine::emulation::traits::{ContentView, ViewEvent};

/// In-memory content view that records every debugger command.
pub struct FakeView {
    id: String,
    attached: AtomicBool,
    detaches: AtomicU32,
    fail_method: Option<String>,
    gate_method: Option<String>,
    gate_reached: Notify,
    gate_open: Notify,
    commands: Mutex<Vec<(String, Value)>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ViewEvent>>>,
}

impl FakeView {
    fn build(
        id: &str,
        attached: bool,
        fail_method: Option<&str>,
        gate_method: Option<&str>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            attached: AtomicBool::new(attached),
            detaches: AtomicU32::new(0),
            fail_method: fail_method.map(str::to_string),
            gate_method: gate_method.map(str::to_string),
            gate_reached: Notify::new(),
            gate_open: Notify::new(),
            commands: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn new(id: &str) -> Arc<Self> {
        Self::build(id, false, None, None)
    }

    /// A view someone else already attached a debugger to.
    pub fn pre_attached(id: &str) -> Arc<Self> {
        Self::build(id, true, None, None)
    }

    /// A view whose debugger rejects `method`.
    pub fn failing_on(id: &str, method: &str) -> Arc<Self> {
        Self::build(id, false, Some(method), None)
    }

    /// A view whose debugger holds `method` until [`open_gate`](Self::open_gate).
    pub fn gated_on(id: &str, method: &str) -> Arc<Self> {
        Self::build(id, false, None, Some(method))
    }

    /// Wait until a command is parked at the gate.
    pub async fn wait_at_gate(&self) {
        self.gate_reached.notified().await;
    }

    pub fn open_gate(&self) {
        self.gate_open.notify_one();
    }

    pub fn emit(&self, method: &str, params: Value) {
        for tx in self.subscribers.lock().iter() {
            let _ = tx.send(ViewEvent::Protocol {
                method: method.to_string(),
                params: params.clone(),
            });
        }
    }

    pub fn response(&self, request_id: &str, content_length: Option<u64>) {
        let headers = match content_length {
            Some(len) => json!({ "content-length": len.to_string() }),
            None => json!({}),
        };
        self.emit(
            "Network.responseReceived",
            json!({ "requestId": request_id, "response": { "headers": headers } }),
        );
    }

    pub fn data(&self, request_id: &str, len: u64) {
        self.emit(
            "Network.dataReceived",
            json!({ "requestId": request_id, "dataLength": len }),
        );
    }

    pub fn finished(&self, request_id: &str) {
        self.emit("Network.loadingFinished", json!({ "requestId": request_id }));
    }

    pub fn destroy(&self) {
        for tx in self.subscribers.lock().iter() {
            let _ = tx.send(ViewEvent::Destroyed);
        }
    }

    /// Drop every event stream without a `Destroyed` notice.
    pub fn crash(&self) {
        self.subscribers.lock().clear();
    }

    pub fn detach_count(&self) -> u32 {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.commands.lock().clone()
    }

    pub fn command(&self, method: &str) -> Option<Value> {
        self.commands
            .lock()
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl ContentView for FakeView {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    async fn attach(&self, _protocol_version: &str) -> Result<()> {
        if self.attached.swap(true, Ordering::SeqCst) {
            bail!("already attached");
        }
        Ok(())
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_attached() {
            bail!("not attached");
        }
        if self.fail_method.as_deref() == Some(method) {
            return Err(anyhow!("{} rejected", method));
        }
        if self.gate_method.as_deref() == Some(method) {
            self.gate_reached.notify_one();
            self.gate_open.notified().await;
        }
        self.commands.lock().push((method.to_string(), params));
        Ok(json!({}))
    }

    async fn detach(&self) -> Result<()> {
        self.attached.store(false, Ordering::SeqCst);
        self.detaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ViewEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}
