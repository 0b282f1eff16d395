// Dial-up engine — drives session, scheduler and throttling from UI requests and
// window lifecycle callbacks.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{BrowserCommand, DialogCommand, DialogMode, DownloadProgress, EventBus, UiEvent};
use super::profile::{ModemProfile, ModemSpeed, ProfileTable};
use super::scheduler::DisconnectScheduler;
use super::session::{ConnectionStatus, Session, SessionError, SessionSnapshot};
use super::throttle::{AttachOutcome, ThrottleCoordinator};
use crate::config::{DialupConfig, EVENT_CHANNEL_CAPACITY};
use crate::emulation::traits::ContentView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The user pressed Disconnect.
    User,
    /// The random disconnect timer fired.
    Random,
    /// The browser window was closed while connected.
    BrowserClosed,
}

/// What the host should do with a close request on the dial-up dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseDecision {
    /// Keep the dialog alive but hidden; a connection is up.
    Hide,
    /// Let the dialog close; the host may quit.
    Close,
}

struct EngineInner {
    profiles: ProfileTable,
    session: Session,
    throttle: ThrottleCoordinator,
    events: EventBus,
}

/// Cloneable handle to one dial-up engine.
#[derive(Clone)]
pub struct DialupEngine {
    inner: Arc<EngineInner>,
}

impl DialupEngine {
    pub fn new(config: &DialupConfig) -> Self {
        let events = EventBus::new(EVENT_CHANNEL_CAPACITY);
        let throttle = ThrottleCoordinator::new(
            events.clone(),
            Duration::from_millis(config.progress_debounce_ms),
        );
        let session = Session::new(
            DisconnectScheduler::new(config.disconnect_delay),
            config.default_profile,
            config.random_disconnect_default,
        );
        Self {
            inner: Arc::new(EngineInner {
                profiles: config.profile_table(),
                session,
                throttle,
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.inner.events.subscribe()
    }

    pub fn connect_start(
        &self,
        speed: ModemSpeed,
        random_disconnect_enabled: bool,
    ) -> Result<(), SessionError> {
        self.inner
            .session
            .start_connecting(speed, random_disconnect_enabled)?;
        info!(
            "dialing profile={} random_disconnect={}",
            speed, random_disconnect_enabled
        );
        Ok(())
    }

    /// Called once the UI's dialing sequence has finished.
    pub fn connect_complete(&self) -> Result<(), SessionError> {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .session
            .complete_connecting(move || on_disconnect_timer(weak))?;

        self.inner.events.emit(UiEvent::Dialog(DialogCommand::Hide));
        self.inner.events.emit(UiEvent::Browser(BrowserCommand::Open));
        Ok(())
    }

    /// The host attached a content view inside the browser window.
    pub async fn content_view_attached(&self, view: Arc<dyn ContentView>) -> Option<AttachOutcome> {
        if self.inner.session.status() != ConnectionStatus::Connected {
            debug!("content view {} attached while not connected, not throttling", view.id());
            return None;
        }
        let profile = self.current_profile().clone();
        let session = &self.inner.session;
        let outcome = self
            .inner
            .throttle
            .attach_while(view, &profile, || session.status() == ConnectionStatus::Connected)
            .await;
        Some(outcome)
    }

    pub async fn disconnect(&self, cause: DisconnectCause) {
        self.inner.session.reset();
        self.inner.finish_disconnect(cause).await;
    }

    /// The browser window went away on its own.
    pub async fn browser_window_closed(&self) {
        if self.inner.session.status() == ConnectionStatus::Connected {
            self.disconnect(DisconnectCause::BrowserClosed).await;
        }
    }

    pub fn dialog_close_requested(&self) -> CloseDecision {
        if self.inner.session.status() == ConnectionStatus::Connected {
            self.inner.events.emit(UiEvent::Dialog(DialogCommand::Hide));
            CloseDecision::Hide
        } else {
            CloseDecision::Close
        }
    }

    pub fn show_connection_status(&self) {
        self.inner
            .events
            .emit(UiEvent::ModeChanged(DialogMode::Status));
        self.inner.events.emit(UiEvent::Dialog(DialogCommand::Show));
    }

    pub fn hide_dialup_window(&self) {
        self.inner.events.emit(UiEvent::Dialog(DialogCommand::Hide));
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.inner.session.elapsed_seconds()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.session.status()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.session.snapshot()
    }

    pub fn current_profile(&self) -> &ModemProfile {
        self.inner.profiles.get(self.inner.session.selected_profile())
    }

    pub fn profiles(&self) -> &ProfileTable {
        &self.inner.profiles
    }

    pub fn download_progress(&self) -> Option<DownloadProgress> {
        self.inner.throttle.progress()
    }

    pub fn throttle(&self) -> &ThrottleCoordinator {
        &self.inner.throttle
    }
}

impl EngineInner {
    async fn finish_disconnect(&self, cause: DisconnectCause) {
        self.throttle.detach().await;

        match cause {
            DisconnectCause::User => self.events.emit(UiEvent::Browser(BrowserCommand::Close)),
            DisconnectCause::Random => self.events.emit(UiEvent::Browser(BrowserCommand::Hide)),
            DisconnectCause::BrowserClosed => {}
        }

        let mode = if cause == DisconnectCause::Random {
            DialogMode::ConnectionLost
        } else {
            DialogMode::Connect
        };
        self.events.emit(UiEvent::ModeChanged(mode));
        self.events.emit(UiEvent::Dialog(DialogCommand::Show));
        info!("disconnected cause={:?}", cause);
    }

    /// Random disconnect, only if nothing else disconnected first.
    async fn random_disconnect(&self) {
        if !self.session.reset_if_connected() {
            debug!("stale random disconnect timer ignored");
            return;
        }
        warn!("random disconnect triggered");
        self.finish_disconnect(DisconnectCause::Random).await;
    }
}

async fn on_disconnect_timer(engine: Weak<EngineInner>) {
    match engine.upgrade() {
        Some(inner) => inner.random_disconnect().await,
        None => debug!("engine dropped before random disconnect fired"),
    }
}
