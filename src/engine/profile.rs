// Modem profile table — simulated throughput/latency per historical connection speed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Key into the profile table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModemSpeed {
    #[serde(rename = "14.4k")]
    K14_4,
    #[serde(rename = "28.8k")]
    K28_8,
    #[serde(rename = "33.6k")]
    K33_6,
    #[default]
    #[serde(rename = "56k")]
    K56,
}

impl ModemSpeed {
    pub const ALL: [ModemSpeed; 4] = [
        ModemSpeed::K14_4,
        ModemSpeed::K28_8,
        ModemSpeed::K33_6,
        ModemSpeed::K56,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModemSpeed::K14_4 => "14.4k",
            ModemSpeed::K28_8 => "28.8k",
            ModemSpeed::K33_6 => "33.6k",
            ModemSpeed::K56 => "56k",
        }
    }

    fn index(&self) -> usize {
        match self {
            ModemSpeed::K14_4 => 0,
            ModemSpeed::K28_8 => 1,
            ModemSpeed::K33_6 => 2,
            ModemSpeed::K56 => 3,
        }
    }
}

impl fmt::Display for ModemSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown modem speed: {0:?}")]
pub struct UnknownSpeed(pub String);

impl FromStr for ModemSpeed {
    type Err = UnknownSpeed;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModemSpeed::ALL
            .into_iter()
            .find(|speed| speed.as_str() == s.trim())
            .ok_or_else(|| UnknownSpeed(s.to_string()))
    }
}

/// Network conditions emulated for one modem speed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModemProfile {
    pub name: String,
    /// Bytes per second.
    pub download_throughput: u64,
    /// Bytes per second.
    pub upload_throughput: u64,
    pub latency_ms: u64,
    /// Speed shown in "Connected at ... bps." status text.
    pub display_label: String,
}

impl ModemProfile {
    fn builtin(speed: ModemSpeed) -> Self {
        let (name, down, up, latency, label) = match speed {
            ModemSpeed::K14_4 => ("14.4k Modem", 1800, 1800, 500, "14,400"),
            ModemSpeed::K28_8 => ("28.8k Modem", 3600, 3600, 400, "28,800"),
            ModemSpeed::K33_6 => ("33.6k Modem", 4200, 3600, 350, "33,600"),
            ModemSpeed::K56 => ("56k Modem", 6800, 4200, 300, "56,000"),
        };
        Self {
            name: name.to_string(),
            download_throughput: down,
            upload_throughput: up,
            latency_ms: latency,
            display_label: label.to_string(),
        }
    }
}

/// Fixed table of the four modem profiles.
#[derive(Debug, Clone)]
pub struct ProfileTable {
    entries: [ModemProfile; 4],
}

impl ProfileTable {
    pub fn get(&self, speed: ModemSpeed) -> &ModemProfile {
        &self.entries[speed.index()]
    }

    pub fn set(&mut self, speed: ModemSpeed, profile: ModemProfile) {
        self.entries[speed.index()] = profile;
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModemSpeed, &ModemProfile)> {
        ModemSpeed::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            entries: ModemSpeed::ALL.map(ModemProfile::builtin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_speed_keys() {
        assert_eq!("14.4k".parse::<ModemSpeed>(), Ok(ModemSpeed::K14_4));
        assert_eq!(" 56k ".parse::<ModemSpeed>(), Ok(ModemSpeed::K56));
        assert!("9600".parse::<ModemSpeed>().is_err());
        for speed in ModemSpeed::ALL {
            assert_eq!(speed.to_string().parse::<ModemSpeed>(), Ok(speed));
        }
    }

    #[test]
    fn test_builtin_56k() {
        let table = ProfileTable::default();
        let p = table.get(ModemSpeed::K56);
        assert_eq!(p.download_throughput, 6800);
        assert_eq!(p.latency_ms, 300);
        assert_eq!(p.display_label, "56,000");
    }

    #[test]
    fn test_table_is_ordered_by_speed() {
        let table = ProfileTable::default();
        let downs: Vec<u64> = table.iter().map(|(_, p)| p.download_throughput).collect();
        assert_eq!(downs.len(), 4);
        assert!(downs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_serde_key() {
        let json = serde_json::to_string(&ModemSpeed::K33_6).unwrap();
        assert_eq!(json, "\"33.6k\"");
        let back: ModemSpeed = serde_json::from_str("\"28.8k\"").unwrap();
        assert_eq!(back, ModemSpeed::K28_8);
    }
}
