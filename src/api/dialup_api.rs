use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::DialupConfig;
use crate::emulation::traits::ContentView;
use crate::engine::dialer::{CloseDecision, DialupEngine, DisconnectCause};
use crate::engine::events::UiEvent;
use crate::engine::profile::ModemSpeed;
use crate::engine::session::SessionSnapshot;
use crate::engine::throttle::AttachOutcome;

/// Options sent by the dialog when the user presses Connect.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    pub modem_profile_key: String,
    #[serde(default = "default_true")]
    pub random_disconnect_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpResult {
    pub success: bool,
}

impl OpResult {
    pub const OK: OpResult = OpResult { success: true };
    pub const FAILED: OpResult = OpResult { success: false };
}

/// Request/response operations the dialog and browser controllers call.
#[derive(Clone)]
pub struct DialupApi {
    engine: DialupEngine,
}

impl DialupApi {
    pub fn new(config: &DialupConfig) -> Self {
        Self {
            engine: DialupEngine::new(config),
        }
    }

    pub fn from_engine(engine: DialupEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &DialupEngine {
        &self.engine
    }

    pub fn connect_start(&self, options: ConnectOptions) -> OpResult {
        let speed = match options.modem_profile_key.parse::<ModemSpeed>() {
            Ok(speed) => speed,
            Err(e) => {
                warn!("connect_start rejected: {}", e);
                return OpResult::FAILED;
            }
        };
        match self
            .engine
            .connect_start(speed, options.random_disconnect_enabled)
        {
            Ok(()) => OpResult::OK,
            Err(e) => {
                warn!("connect_start rejected: {}", e);
                OpResult::FAILED
            }
        }
    }

    pub fn connect_complete(&self) -> OpResult {
        match self.engine.connect_complete() {
            Ok(()) => OpResult::OK,
            Err(e) => {
                warn!("connect_complete rejected: {}", e);
                OpResult::FAILED
            }
        }
    }

    pub async fn disconnect(&self) -> OpResult {
        self.engine.disconnect(DisconnectCause::User).await;
        OpResult::OK
    }

    pub fn show_connection_status(&self) -> OpResult {
        self.engine.show_connection_status();
        OpResult::OK
    }

    pub fn hide_dialup_window(&self) -> OpResult {
        self.engine.hide_dialup_window();
        OpResult::OK
    }

    pub fn get_connection_elapsed_seconds(&self) -> u64 {
        self.engine.elapsed_seconds()
    }

    pub fn connection_state(&self) -> SessionSnapshot {
        self.engine.snapshot()
    }

    /// `modeChanged`, `downloadProgress` and window commands.
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.engine.subscribe()
    }

    pub async fn content_view_attached(&self, view: Arc<dyn ContentView>) -> Option<AttachOutcome> {
        self.engine.content_view_attached(view).await
    }

    pub async fn browser_window_closed(&self) {
        self.engine.browser_window_closed().await;
    }

    pub fn dialog_close_requested(&self) -> CloseDecision {
        self.engine.dialog_close_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(key: &str) -> ConnectOptions {
        ConnectOptions {
            modem_profile_key: key.to_string(),
            random_disconnect_enabled: false,
        }
    }

    #[tokio::test]
    async fn test_unknown_profile_key_fails() {
        let api = DialupApi::new(&DialupConfig::default());
        assert_eq!(api.connect_start(options("2400")), OpResult::FAILED);
        assert_eq!(api.connect_complete(), OpResult::FAILED);
        assert_eq!(api.connect_start(options("14.4k")), OpResult::OK);
        assert_eq!(api.connect_start(options("14.4k")), OpResult::FAILED);
        assert_eq!(api.connect_complete(), OpResult::OK);
        assert_eq!(api.disconnect().await, OpResult::OK);
        assert_eq!(api.get_connection_elapsed_seconds(), 0);
    }

    #[test]
    fn test_connect_options_json() {
        let opts: ConnectOptions =
            serde_json::from_str(r#"{ "modemProfileKey": "33.6k" }"#).unwrap();
        assert_eq!(opts.modem_profile_key, "33.6k");
        assert!(opts.random_disconnect_enabled);
    }
}
