//! Engine Configuration
//!
//! Loaded from an optional JSON file, then overridden from `PARK_LOCKSTEP_*`
//! environment variables. Every section has defaults, so an empty file (or
//! none at all) yields a working single-player setup.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::game::command::CommandFlags;
use crate::game::tick::{AutosaveFrequency, SchedulerConfig};
use crate::network::sync::NetworkConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PARK_LOCKSTEP_";

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Tick scheduling
    pub scheduler: SchedulerConfig,
    /// Multiplayer settings
    pub network: NetworkConfig,
    /// Autosave interval
    pub autosave: AutosaveFrequency,
    /// Caller flags that bypass the affordability check
    pub privileged_flags: CommandFlags,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            network: NetworkConfig::default(),
            autosave: AutosaveFrequency::default(),
            privileged_flags: CommandFlags::PRIVILEGED,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Parse JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from `lookup`, which maps an unprefixed key such as
    /// `PLAYER_NAME` to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("PLAYER_NAME") {
            self.network.player_name = name;
        }
        if let Some(path) = lookup("SERVER_LOG") {
            self.network.server_log_path = Some(PathBuf::from(path));
        }
        override_parsed(&lookup, "LOG_SERVER_ACTIONS", &mut self.network.log_server_actions)?;
        override_parsed(&lookup, "STAY_CONNECTED", &mut self.network.stay_connected)?;
        override_parsed(&lookup, "MAX_PLAYERS", &mut self.network.max_players)?;
        override_parsed(&lookup, "TICK_CHECKSUM_INTERVAL", &mut self.network.tick_checksum_interval)?;
        override_parsed(&lookup, "PING_INTERVAL_MS", &mut self.network.ping_interval_ms)?;
        override_parsed(&lookup, "MAX_UPDATES_PER_FRAME", &mut self.scheduler.max_updates_per_frame)?;

        if let Some(value) = lookup("AUTOSAVE") {
            self.autosave = serde_json::from_value(serde_json::Value::String(value.clone()))
                .with_context(|| format!("{ENV_PREFIX}AUTOSAVE: unknown frequency {value:?}"))?;
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("{ENV_PREFIX}{key}: invalid value {raw:?}"))?;
        debug!(key, value = %raw, "config override");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler.max_updates_per_frame, 16);
        assert_eq!(config.network.tick_checksum_interval, 100);
        assert_eq!(config.network.demolish_ride_cooldown_ms, 1000);
        assert_eq!(config.autosave, AutosaveFrequency::Every5Minutes);
        assert_eq!(config.privileged_flags, CommandFlags::PRIVILEGED);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "network": { "player_name": "Ann", "stay_connected": true }, "autosave": "every_minute" }"#,
        )
        .unwrap();
        assert_eq!(config.network.player_name, "Ann");
        assert!(config.network.stay_connected);
        assert_eq!(config.network.max_players, 16);
        assert_eq!(config.autosave, AutosaveFrequency::EveryMinute);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = EngineConfig::default();
        config.privileged_flags = CommandFlags::BIT5;
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(EngineConfig::from_json_str(&text).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(env(&[
                ("PLAYER_NAME", "Bob"),
                ("MAX_PLAYERS", " 4 "),
                ("LOG_SERVER_ACTIONS", "true"),
                ("AUTOSAVE", "never"),
                ("SERVER_LOG", "/tmp/park.log"),
            ]))
            .unwrap();
        assert_eq!(config.network.player_name, "Bob");
        assert_eq!(config.network.max_players, 4);
        assert!(config.network.log_server_actions);
        assert_eq!(config.autosave, AutosaveFrequency::Never);
        assert_eq!(config.network.server_log_path, Some(PathBuf::from("/tmp/park.log")));
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = EngineConfig::default();
        let err = config.apply_overrides(env(&[("MAX_PLAYERS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("PARK_LOCKSTEP_MAX_PLAYERS"));
        assert!(config.apply_overrides(env(&[("AUTOSAVE", "hourly-ish")])).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(EngineConfig::from_json_file("/nonexistent/park.json").is_err());
    }
}
