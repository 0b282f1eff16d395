// Connection session state machine — status, timestamps, selected profile and disconnect timer.

use std::fmt;
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use super::profile::ModemSpeed;
use super::scheduler::{DisconnectScheduler, DisconnectTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {op} while {from}")]
    InvalidTransition {
        op: &'static str,
        from: ConnectionStatus,
    },
}

struct SessionState {
    status: ConnectionStatus,
    connected_at: Option<Instant>,
    connected_at_epoch_ms: Option<u64>,
    selected_profile: ModemSpeed,
    random_disconnect_enabled: bool,
    /// Only `Some` while connected with random disconnects enabled.
    disconnect_timer: Option<DisconnectTimer>,
}

/// Observable copy of the session fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub connected_at_epoch_ms: Option<u64>,
    pub selected_profile: ModemSpeed,
    pub random_disconnect_enabled: bool,
    pub disconnect_timer_armed: bool,
    pub elapsed_seconds: u64,
}

/// Owned connection context. Every transition is a single assignment under the lock.
pub struct Session {
    state: Mutex<SessionState>,
    scheduler: DisconnectScheduler,
}

impl Session {
    pub fn new(
        scheduler: DisconnectScheduler,
        default_profile: ModemSpeed,
        random_disconnect_enabled: bool,
    ) -> Self {
        Self {
            state: Mutex::new(SessionState {
                status: ConnectionStatus::Disconnected,
                connected_at: None,
                connected_at_epoch_ms: None,
                selected_profile: default_profile,
                random_disconnect_enabled,
                disconnect_timer: None,
            }),
            scheduler,
        }
    }

    pub fn start_connecting(
        &self,
        profile: ModemSpeed,
        random_disconnect_enabled: bool,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.status != ConnectionStatus::Disconnected {
            return Err(SessionError::InvalidTransition {
                op: "start connecting",
                from: state.status,
            });
        }
        state.status = ConnectionStatus::Connecting;
        state.selected_profile = profile;
        state.random_disconnect_enabled = random_disconnect_enabled;
        debug!(
            "session connecting profile={} random_disconnect={}",
            profile, random_disconnect_enabled
        );
        Ok(())
    }

    /// Mark the connection established and arm the random disconnect timer if enabled.
    pub fn complete_connecting<F, Fut>(&self, on_fire: F) -> Result<(), SessionError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.status != ConnectionStatus::Connecting {
            return Err(SessionError::InvalidTransition {
                op: "complete connecting",
                from: state.status,
            });
        }
        state.status = ConnectionStatus::Connected;
        state.connected_at = Some(Instant::now());
        state.connected_at_epoch_ms = Some(epoch_ms());

        if state.random_disconnect_enabled {
            self.scheduler.arm(&mut state.disconnect_timer, on_fire);
        }
        info!("session connected profile={}", state.selected_profile);
        Ok(())
    }

    /// Return to `Disconnected`. Profile and random-disconnect preference survive.
    pub fn reset(&self) -> ConnectionStatus {
        let mut state = self.state.lock();
        let previous = state.status;
        Self::reset_locked(&mut state);
        previous
    }

    /// Reset only if still connected. Used to ignore timers that lost a race.
    pub fn reset_if_connected(&self) -> bool {
        let mut state = self.state.lock();
        if state.status != ConnectionStatus::Connected {
            return false;
        }
        Self::reset_locked(&mut state);
        true
    }

    fn reset_locked(state: &mut SessionState) {
        state.status = ConnectionStatus::Disconnected;
        state.connected_at = None;
        state.connected_at_epoch_ms = None;
        DisconnectScheduler::disarm(&mut state.disconnect_timer);
    }

    pub fn elapsed_seconds(&self) -> u64 {
        let state = self.state.lock();
        Self::elapsed_locked(&state)
    }

    fn elapsed_locked(state: &SessionState) -> u64 {
        match state.connected_at {
            Some(at) => Instant::now().saturating_duration_since(at).as_secs(),
            None => 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn selected_profile(&self) -> ModemSpeed {
        self.state.lock().selected_profile
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            status: state.status,
            connected_at_epoch_ms: state.connected_at_epoch_ms,
            selected_profile: state.selected_profile,
            random_disconnect_enabled: state.random_disconnect_enabled,
            disconnect_timer_armed: state
                .disconnect_timer
                .as_ref()
                .is_some_and(|t| !t.is_cancelled()),
            elapsed_seconds: Self::elapsed_locked(&state),
        }
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
