use serde::Deserialize;

use crate::engine::profile::{ModemProfile, ModemSpeed, ProfileTable};

/// Delay before aggregated download progress is pushed to the UI.
pub const PROGRESS_DEBOUNCE_MS: u64 = 100;

/// DevTools protocol version requested when attaching a debugger.
pub const DEBUGGER_PROTOCOL_VERSION: &str = "1.3";

/// Lower bound of the default random-disconnect window (2 minutes).
pub const DEFAULT_DISCONNECT_MIN_MS: u64 = 2 * 60 * 1000;

/// Upper bound of the default random-disconnect window (3 minutes).
pub const DEFAULT_DISCONNECT_MAX_MS: u64 = 3 * 60 * 1000;

/// Capacity of the UI event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Inclusive window, in milliseconds, from which random-disconnect delays are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DelayWindow {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayWindow {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// A window that always yields the same delay.
    pub fn fixed(ms: u64) -> Self {
        Self {
            min_ms: ms,
            max_ms: ms,
        }
    }
}

impl Default for DelayWindow {
    fn default() -> Self {
        Self {
            min_ms: DEFAULT_DISCONNECT_MIN_MS,
            max_ms: DEFAULT_DISCONNECT_MAX_MS,
        }
    }
}

/// Top-level configuration for the dial-up engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DialupConfig {
    /// Window the random-disconnect timer draws its delay from.
    pub disconnect_delay: DelayWindow,
    /// Debounce applied to download progress updates.
    pub progress_debounce_ms: u64,
    /// Whether random disconnects are on before the UI says otherwise.
    pub random_disconnect_default: bool,
    /// Profile preselected when the engine starts.
    pub default_profile: ModemSpeed,
    /// Per-speed overrides of the built-in modem profiles.
    pub profiles: Vec<ProfileOverride>,
}

/// Replacement parameters for one entry of the profile table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileOverride {
    pub speed: ModemSpeed,
    #[serde(flatten)]
    pub profile: ModemProfile,
}

impl Default for DialupConfig {
    fn default() -> Self {
        Self {
            disconnect_delay: DelayWindow::default(),
            progress_debounce_ms: PROGRESS_DEBOUNCE_MS,
            random_disconnect_default: true,
            default_profile: ModemSpeed::default(),
            profiles: Vec::new(),
        }
    }
}

impl DialupConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let cfg: DialupConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.disconnect_delay.min_ms > self.disconnect_delay.max_ms {
            return Err(ConfigError::InvertedWindow {
                min_ms: self.disconnect_delay.min_ms,
                max_ms: self.disconnect_delay.max_ms,
            });
        }
        if self.progress_debounce_ms == 0 {
            return Err(ConfigError::ZeroDebounce);
        }
        Ok(())
    }

    /// Build the profile table: built-in defaults with any overrides applied.
    pub fn profile_table(&self) -> ProfileTable {
        let mut table = ProfileTable::default();
        for o in &self.profiles {
            table.set(o.speed, o.profile.clone());
        }
        table
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("disconnect window is inverted: min {min_ms}ms > max {max_ms}ms")]
    InvertedWindow { min_ms: u64, max_ms: u64 },
    #[error("progress debounce must be > 0")]
    ZeroDebounce,
}
