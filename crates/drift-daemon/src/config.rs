//! Daemon settings file.
//!
//! The runtime keys mirror the deployed configuration surface verbatim
//! (camelCase names on disk). Every runtime key is required: a missing key
//! is a hard startup abort, not a silent default. `Default` carries the
//! documented values for tests and `--write-default-config`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use drift_types::config::{BlePolicy, ExchangePolicy, RetentionPolicy, SchedulerPolicy};

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file does not exist or cannot be read.
    #[error("config file {0}: {1}")]
    Unreadable(PathBuf, std::io::Error),

    /// A required key is missing or a value has the wrong type.
    #[error("config invalid: {0}")]
    Missing(String),

    /// A value is out of its valid range.
    #[error("config value out of range: {0}")]
    OutOfRange(String),
}

/// The complete settings surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    // Scheduling
    pub exchange_cooldown_seconds: u64,
    pub exchange_session_timeout_ms: u64,
    pub inbound_session_grace_ms: u64,
    pub max_messages_per_exchange: usize,

    // BLE framing/timing
    pub ble_mtu: u32,
    pub gatt_max_attribute_length: u32,
    pub gatt_read_fallback_delay_ms: u64,
    pub initial_write_delay_ms: u64,

    // PSI / trust policy
    pub use_trust: bool,
    pub min_shared_contacts_for_exchange: u32,
    pub trust_noise_variance: f64,

    // Backoff schedule
    pub use_backoff: bool,
    pub backoff_attempt_millis: u64,
    pub backoff_max_millis: u64,

    // Selection
    pub random_exchange: bool,

    // Outgoing envelope toggles
    pub include_pseudonym: bool,
    pub share_location: bool,

    // Retention
    pub autodelete_enabled: bool,
    pub autodelete_trust_threshold: f64,
    pub autodelete_age_days: u32,
    pub timebound_period_days: u32,

    // Daemon-local knobs (defaulted; not part of the shared surface)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_exchange_interval_ms")]
    pub exchange_interval_ms: u64,
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Identity string for initiator election. Empty = derive from the
    /// public id.
    #[serde(default)]
    pub device_identity: String,
    /// LAN peers to dial without discovery (host:port). The standalone
    /// daemon has no radio discovery, so this is how test meshes and
    /// fixed installations find each other.
    #[serde(default)]
    pub static_peers: Vec<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:7487".to_string()
}

fn default_exchange_interval_ms() -> u64 {
    15_000
}

fn default_max_concurrent_sessions() -> usize {
    4
}

impl Default for Settings {
    fn default() -> Self {
        let exchange = ExchangePolicy::default();
        let scheduler = SchedulerPolicy::default();
        let ble = BlePolicy::default();
        let retention = RetentionPolicy::default();
        Self {
            exchange_cooldown_seconds: scheduler.exchange_cooldown_seconds,
            exchange_session_timeout_ms: exchange.exchange_session_timeout_ms,
            inbound_session_grace_ms: scheduler.inbound_session_grace_ms,
            max_messages_per_exchange: exchange.max_messages_per_exchange,
            ble_mtu: ble.ble_mtu,
            gatt_max_attribute_length: ble.gatt_max_attribute_length,
            gatt_read_fallback_delay_ms: ble.gatt_read_fallback_delay_ms,
            initial_write_delay_ms: ble.initial_write_delay_ms,
            use_trust: exchange.use_trust,
            min_shared_contacts_for_exchange: exchange.min_shared_contacts_for_exchange,
            trust_noise_variance: exchange.trust_noise_variance,
            use_backoff: scheduler.use_backoff,
            backoff_attempt_millis: scheduler.backoff_attempt_millis,
            backoff_max_millis: scheduler.backoff_max_millis,
            random_exchange: scheduler.random_exchange,
            include_pseudonym: exchange.include_pseudonym,
            share_location: exchange.share_location,
            autodelete_enabled: retention.autodelete_enabled,
            autodelete_trust_threshold: retention.autodelete_trust_threshold,
            autodelete_age_days: retention.autodelete_age_days,
            timebound_period_days: retention.timebound_period_days,
            listen_addr: default_listen_addr(),
            data_dir: String::new(),
            exchange_interval_ms: default_exchange_interval_ms(),
            max_concurrent_sessions: default_max_concurrent_sessions(),
            device_identity: String::new(),
            static_peers: Vec::new(),
        }
    }
}

impl Settings {
    /// Load and validate the settings file. Any missing runtime key
    /// aborts.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Unreadable(path.to_path_buf(), e))?;
        let settings: Settings =
            toml::from_str(&content).map_err(|e| ConfigError::Missing(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write the default settings as a starting point.
    pub fn write_default(path: &Path) -> Result<(), ConfigError> {
        let rendered = toml::to_string_pretty(&Settings::default())
            .map_err(|e| ConfigError::Missing(e.to_string()))?;
        std::fs::write(path, rendered)
            .map_err(|e| ConfigError::Unreadable(path.to_path_buf(), e))?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange_session_timeout_ms == 0 {
            return Err(ConfigError::OutOfRange(
                "exchangeSessionTimeoutMs must be positive".into(),
            ));
        }
        if self.backoff_attempt_millis > self.backoff_max_millis {
            return Err(ConfigError::OutOfRange(
                "backoffAttemptMillis exceeds backoffMaxMillis".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.autodelete_trust_threshold) {
            return Err(ConfigError::OutOfRange(
                "autodeleteTrustThreshold must be in [0, 1]".into(),
            ));
        }
        if self.ble_mtu < 23 {
            return Err(ConfigError::OutOfRange("bleMtu below the GATT minimum".into()));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.data_dir.is_empty() {
            std::env::var("DRIFT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".drift"))
        } else {
            PathBuf::from(&self.data_dir)
        }
    }

    pub fn exchange_policy(&self) -> ExchangePolicy {
        ExchangePolicy {
            use_trust: self.use_trust,
            min_shared_contacts_for_exchange: self.min_shared_contacts_for_exchange,
            trust_noise_variance: self.trust_noise_variance,
            max_messages_per_exchange: self.max_messages_per_exchange,
            include_pseudonym: self.include_pseudonym,
            share_location: self.share_location,
            exchange_session_timeout_ms: self.exchange_session_timeout_ms,
        }
    }

    pub fn scheduler_policy(&self) -> SchedulerPolicy {
        SchedulerPolicy {
            exchange_interval_ms: self.exchange_interval_ms,
            exchange_cooldown_seconds: self.exchange_cooldown_seconds,
            inbound_session_grace_ms: self.inbound_session_grace_ms,
            use_backoff: self.use_backoff,
            backoff_attempt_millis: self.backoff_attempt_millis,
            backoff_max_millis: self.backoff_max_millis,
            random_exchange: self.random_exchange,
            max_concurrent_sessions: self.max_concurrent_sessions,
        }
    }

    pub fn ble_policy(&self) -> BlePolicy {
        BlePolicy {
            ble_mtu: self.ble_mtu,
            gatt_max_attribute_length: self.gatt_max_attribute_length,
            gatt_read_fallback_delay_ms: self.gatt_read_fallback_delay_ms,
            initial_write_delay_ms: self.initial_write_delay_ms,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            autodelete_enabled: self.autodelete_enabled,
            autodelete_trust_threshold: self.autodelete_trust_threshold,
            autodelete_age_days: self.autodelete_age_days,
            timebound_period_days: self.timebound_period_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrips_through_toml() {
        let rendered = toml::to_string_pretty(&Settings::default()).expect("render");
        let parsed: Settings = toml::from_str(&rendered).expect("parse");
        assert_eq!(parsed.exchange_cooldown_seconds, 60);
        assert_eq!(parsed.ble_mtu, 247);
        assert!(parsed.use_trust);
    }

    #[test]
    fn test_keys_are_camel_case_on_disk() {
        let rendered = toml::to_string_pretty(&Settings::default()).expect("render");
        for key in [
            "exchangeCooldownSeconds",
            "exchangeSessionTimeoutMs",
            "inboundSessionGraceMs",
            "maxMessagesPerExchange",
            "bleMtu",
            "gattMaxAttributeLength",
            "gattReadFallbackDelayMs",
            "initialWriteDelayMs",
            "useTrust",
            "minSharedContactsForExchange",
            "trustNoiseVariance",
            "useBackoff",
            "backoffAttemptMillis",
            "backoffMaxMillis",
            "randomExchange",
            "includePseudonym",
            "shareLocation",
            "autodeleteEnabled",
            "autodeleteTrustThreshold",
            "autodeleteAgeDays",
            "timeboundPeriodDays",
        ] {
            assert!(rendered.contains(key), "missing settings key {key}");
        }
    }

    #[test]
    fn test_missing_required_key_aborts() {
        // Everything except exchangeCooldownSeconds.
        let rendered = toml::to_string_pretty(&Settings::default()).expect("render");
        let without: String = rendered
            .lines()
            .filter(|l| !l.starts_with("exchangeCooldownSeconds"))
            .collect::<Vec<_>>()
            .join("\n");
        let result: Result<Settings, _> = toml::from_str(&without);
        assert!(result.is_err(), "a missing runtime key must not default");
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut settings = Settings::default();
        settings.backoff_attempt_millis = 10_000;
        settings.backoff_max_millis = 1_000;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_policy_projection() {
        let settings = Settings::default();
        let exchange = settings.exchange_policy();
        assert_eq!(
            exchange.exchange_session_timeout_ms,
            settings.exchange_session_timeout_ms
        );
        let scheduler = settings.scheduler_policy();
        assert_eq!(scheduler.exchange_interval_ms, 15_000);
    }
}
