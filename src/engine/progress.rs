// In-flight request tracking and debounced download progress aggregation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::events::{DownloadProgress, EventBus, UiEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightRequest {
    pub id: String,
    pub bytes_received: u64,
    /// -1 if the response declared no usable content length.
    pub total_bytes_expected: i64,
}

/// What a network event did to the tracked set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    Started,
    Progressed,
    Finished,
    Ignored,
}

impl TrackOutcome {
    /// Whether the change should be reported to the UI.
    pub fn should_emit(&self) -> bool {
        matches!(self, TrackOutcome::Progressed | TrackOutcome::Finished)
    }
}

/// Requests observed through the `Network` domain, keyed by request id.
#[derive(Debug, Default)]
pub struct RequestTracker {
    requests: HashMap<String, InFlightRequest>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one DevTools event. Malformed events are dropped.
    pub fn apply(&mut self, method: &str, params: &Value) -> TrackOutcome {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            trace!("network event {} without requestId dropped", method);
            return TrackOutcome::Ignored;
        };

        match method {
            "Network.responseReceived" => {
                let total = content_length(params).unwrap_or(-1);
                self.requests.insert(
                    request_id.to_string(),
                    InFlightRequest {
                        id: request_id.to_string(),
                        bytes_received: 0,
                        total_bytes_expected: total,
                    },
                );
                TrackOutcome::Started
            }
            "Network.dataReceived" => {
                let Some(len) = params.get("dataLength").and_then(data_length) else {
                    trace!("dataReceived for {} with bad dataLength dropped", request_id);
                    return TrackOutcome::Ignored;
                };
                match self.requests.get_mut(request_id) {
                    Some(req) => {
                        req.bytes_received = req.bytes_received.saturating_add(len);
                        TrackOutcome::Progressed
                    }
                    None => TrackOutcome::Ignored,
                }
            }
            "Network.loadingFinished" | "Network.loadingFailed" => {
                self.requests.remove(request_id);
                TrackOutcome::Finished
            }
            _ => TrackOutcome::Ignored,
        }
    }

    pub fn aggregate(&self) -> DownloadProgress {
        let mut bytes_downloaded = 0u64;
        let mut total_bytes = 0i64;
        for req in self.requests.values() {
            bytes_downloaded = bytes_downloaded.saturating_add(req.bytes_received);
            if req.total_bytes_expected > 0 {
                total_bytes = total_bytes.saturating_add(req.total_bytes_expected);
            }
        }
        DownloadProgress {
            bytes_downloaded,
            total_bytes: if total_bytes > 0 { total_bytes } else { -1 },
            is_loading: !self.requests.is_empty(),
        }
    }

    pub fn get(&self, request_id: &str) -> Option<&InFlightRequest> {
        self.requests.get(request_id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }
}

fn content_length(params: &Value) -> Option<i64> {
    let headers = params.get("response")?.get("headers")?;
    let raw = headers
        .get("content-length")
        .or_else(|| headers.get("Content-Length"))?
        .as_str()?
        .trim_start();
    // Leading digits only, so "10abc" still declares 10 bytes.
    let end = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    raw[..end].parse::<i64>().ok()
}

fn data_length(v: &Value) -> Option<u64> {
    v.as_u64()
        .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
}

/// Coalesces bursts of progress triggers into one emission after a fixed delay.
pub struct ProgressAggregator {
    tracker: Arc<Mutex<RequestTracker>>,
    events: EventBus,
    delay: Duration,
    pending: Arc<Mutex<Option<CancellationToken>>>,
}

impl ProgressAggregator {
    pub fn new(tracker: Arc<Mutex<RequestTracker>>, events: EventBus, delay: Duration) -> Self {
        Self {
            tracker,
            events,
            delay,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Schedule an emission unless one is already pending.
    pub fn trigger(&self) {
        let token = {
            let mut pending = self.pending.lock();
            if pending.is_some() {
                return;
            }
            let token = CancellationToken::new();
            *pending = Some(token.clone());
            token
        };

        let tracker = Arc::clone(&self.tracker);
        let pending = Arc::clone(&self.pending);
        let events = self.events.clone();
        let delay = self.delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
            {
                let mut slot = pending.lock();
                if token.is_cancelled() {
                    return;
                }
                *slot = None;
            }
            let progress = tracker.lock().aggregate();
            trace!(
                "progress bytes={} total={} loading={}",
                progress.bytes_downloaded,
                progress.total_bytes,
                progress.is_loading
            );
            events.emit(UiEvent::DownloadProgress(progress));
        });
    }

    /// Drop a pending emission without sending it.
    pub fn cancel(&self) {
        if let Some(token) = self.pending.lock().take() {
            token.cancel();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}
