// Throttle coordinator — binds modem network conditions to the active content view
// and turns its Network domain events into download progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{DownloadProgress, EventBus};
use super::profile::ModemProfile;
use super::progress::{ProgressAggregator, RequestTracker};
use crate::config::DEBUGGER_PROTOCOL_VERSION;
use crate::emulation::traits::{ContentView, ViewEvent};

/// Parameters of `Network.emulateNetworkConditions`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConditions {
    pub offline: bool,
    pub latency: u64,
    pub download_throughput: u64,
    pub upload_throughput: u64,
}

impl From<&ModemProfile> for NetworkConditions {
    fn from(profile: &ModemProfile) -> Self {
        Self {
            offline: false,
            latency: profile.latency_ms,
            download_throughput: profile.download_throughput,
            upload_throughput: profile.upload_throughput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachOutcome {
    Attached,
    /// The view's debugger was already attached; nothing was changed.
    AlreadyAttached,
    /// Emulation could not be applied; the view runs unthrottled.
    Failed,
    /// A detach or a newer attach arrived while emulation was being applied.
    /// The view was released again.
    Superseded,
}

struct Attachment {
    generation: u64,
    view: Arc<dyn ContentView>,
    view_id: String,
    stop: CancellationToken,
    tracker: Arc<Mutex<RequestTracker>>,
    aggregator: Arc<ProgressAggregator>,
}

struct Inner {
    events: EventBus,
    debounce: Duration,
    active: Mutex<Option<Attachment>>,
    next_generation: AtomicU64,
    /// Generation allowed to install; bumped by every attach and detach.
    wanted: AtomicU64,
}

#[derive(Clone)]
pub struct ThrottleCoordinator {
    inner: Arc<Inner>,
}

impl ThrottleCoordinator {
    pub fn new(events: EventBus, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                events,
                debounce,
                active: Mutex::new(None),
                next_generation: AtomicU64::new(1),
                wanted: AtomicU64::new(0),
            }),
        }
    }

    /// Attach the debugger to `view` and apply `profile`. Never fails the caller:
    /// errors are logged and leave the view unthrottled.
    pub async fn attach(&self, view: Arc<dyn ContentView>, profile: &ModemProfile) -> AttachOutcome {
        self.attach_while(view, profile, || true).await
    }

    /// Like [`attach`](Self::attach), but `still_wanted` is checked under the
    /// attachment lock right before the result is installed. If it says no, or a
    /// detach or newer attach ran in the meantime, the view is released again.
    pub async fn attach_while<F>(
        &self,
        view: Arc<dyn ContentView>,
        profile: &ModemProfile,
        still_wanted: F,
    ) -> AttachOutcome
    where
        F: FnOnce() -> bool + Send,
    {
        let view_id = view.id();
        if view.is_attached() {
            info!("debugger already attached to view {}, skipping", view_id);
            return AttachOutcome::AlreadyAttached;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.wanted.fetch_max(generation, Ordering::SeqCst);

        // One throttled view at a time.
        let previous = self.inner.active.lock().take();
        if let Some(prev) = previous {
            Self::teardown(prev, "replaced by a new view").await;
        }

        let events = view.subscribe();
        if let Err(e) = Self::apply(view.as_ref(), profile).await {
            warn!("failed to apply network throttling to view {}: {:#}", view_id, e);
            if view.is_attached() {
                if let Err(e) = view.detach().await {
                    debug!("detach after failed throttling: {:#}", e);
                }
            }
            return AttachOutcome::Failed;
        }

        let tracker = Arc::new(Mutex::new(RequestTracker::new()));
        let aggregator = Arc::new(ProgressAggregator::new(
            Arc::clone(&tracker),
            self.inner.events.clone(),
            self.inner.debounce,
        ));
        let stop = CancellationToken::new();
        let attachment = Attachment {
            generation,
            view,
            view_id: view_id.clone(),
            stop: stop.clone(),
            tracker: Arc::clone(&tracker),
            aggregator: Arc::clone(&aggregator),
        };

        let installed = {
            let mut active = self.inner.active.lock();
            if self.inner.wanted.load(Ordering::SeqCst) == generation && still_wanted() {
                Ok(active.replace(attachment))
            } else {
                Err(attachment)
            }
        };
        let displaced = match installed {
            Ok(displaced) => displaced,
            Err(stale) => {
                Self::teardown(stale, "superseded while attaching").await;
                return AttachOutcome::Superseded;
            }
        };
        if let Some(prev) = displaced {
            Self::teardown(prev, "replaced by a new view").await;
        }
        info!(
            "network throttling applied view={} profile={} down={}B/s up={}B/s latency={}ms",
            view_id,
            profile.name,
            profile.download_throughput,
            profile.upload_throughput,
            profile.latency_ms
        );

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .monitor(generation, events, stop, tracker, aggregator)
                .await;
        });

        AttachOutcome::Attached
    }

    async fn apply(view: &dyn ContentView, profile: &ModemProfile) -> Result<()> {
        view.attach(DEBUGGER_PROTOCOL_VERSION)
            .await
            .context("attach debugger")?;
        view.send_command("Network.enable", serde_json::json!({}))
            .await
            .context("Network.enable")?;
        let conditions = serde_json::to_value(NetworkConditions::from(profile))?;
        view.send_command("Network.emulateNetworkConditions", conditions)
            .await
            .context("Network.emulateNetworkConditions")?;
        Ok(())
    }

    async fn monitor(
        &self,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<ViewEvent>,
        stop: CancellationToken,
        tracker: Arc<Mutex<RequestTracker>>,
        aggregator: Arc<ProgressAggregator>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                ev = events.recv() => ev,
            };
            match event {
                Some(ViewEvent::Protocol { method, params }) => {
                    let outcome = tracker.lock().apply(&method, &params);
                    if outcome.should_emit() {
                        aggregator.trigger();
                    }
                }
                Some(ViewEvent::Destroyed) => {
                    self.teardown_generation(generation, "view destroyed").await;
                    return;
                }
                None => {
                    self.teardown_generation(generation, "debugger event stream closed")
                        .await;
                    return;
                }
            }
        }
    }

    /// Stop throttling the active view, if any. Returns whether anything was torn down.
    /// An attach still in flight will not install afterwards.
    pub async fn detach(&self) -> bool {
        let active = {
            let mut active = self.inner.active.lock();
            let fence = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
            self.inner.wanted.fetch_max(fence, Ordering::SeqCst);
            active.take()
        };
        match active {
            Some(attachment) => {
                Self::teardown(attachment, "detached").await;
                true
            }
            None => false,
        }
    }

    async fn teardown_generation(&self, generation: u64, reason: &str) {
        let attachment = {
            let mut active = self.inner.active.lock();
            match active.as_ref() {
                Some(a) if a.generation == generation => active.take(),
                _ => None,
            }
        };
        if let Some(attachment) = attachment {
            Self::teardown(attachment, reason).await;
        }
    }

    /// Runs once per attachment: whoever takes it out of `active` owns the teardown.
    async fn teardown(attachment: Attachment, reason: &str) {
        attachment.stop.cancel();
        attachment.aggregator.cancel();
        attachment.tracker.lock().clear();

        if attachment.view.is_attached() {
            match attachment.view.detach().await {
                Ok(()) => debug!("debugger detached from view {}", attachment.view_id),
                Err(e) => warn!("error detaching debugger from view {}: {:#}", attachment.view_id, e),
            }
        }
        info!("throttling ended for view {} ({})", attachment.view_id, reason);
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    pub fn active_view_id(&self) -> Option<String> {
        self.inner.active.lock().as_ref().map(|a| a.view_id.clone())
    }

    /// Current aggregate without waiting for the debounce.
    pub fn progress(&self) -> Option<DownloadProgress> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|a| a.tracker.lock().aggregate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::profile::{ModemSpeed, ProfileTable};

    #[test]
    fn test_conditions_from_profile() {
        let table = ProfileTable::default();
        let json = serde_json::to_value(NetworkConditions::from(table.get(ModemSpeed::K56))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "offline": false,
                "latency": 300,
                "downloadThroughput": 6800,
                "uploadThroughput": 4200
            })
        );
    }
}
