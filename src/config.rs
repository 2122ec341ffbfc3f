use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crl::{CrlExtensionConfig, CrlExtensionKind, EntryExtensionKind, default_extensions};
use crate::signing::SigningAlgorithm;

pub const DEFAULT_ISSUING_POINT: &str = "MasterCRL";

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("update_schema must be at least 1")]
    ZeroUpdateSchema,

    #[error("Interval updates are enabled but auto_update_interval_ms is 0")]
    ZeroUpdateInterval,

    #[error("min_update_interval_ms ({min} ms) exceeds auto_update_interval_ms ({interval} ms)")]
    MinIntervalTooLarge { min: u64, interval: u64 },

    #[error("Daily updates are enabled but no update time is configured")]
    NoDailyUpdates,

    #[error("Invalid daily update time {0:?}, expected HH:MM")]
    InvalidDailyTime(String),

    #[error("Unknown signing algorithm: {0}")]
    UnknownSigningAlgorithm(String),

    #[error("CRL extension {0:?} is configured more than once")]
    DuplicateExtension(CrlExtensionKind),

    #[error("Delta CRL indicator requires the CRL number extension")]
    DeltaWithoutCrlNumber,

    #[error("profile_certs_only is set but profile_list is empty")]
    EmptyProfileList,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ca: CaConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub issuing_points: BTreeMap<String, IssuingPointConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaConfig {
    /// CA certificate (PEM or DER). Without it the issuer is built from `common_name`.
    pub certificate_path: Option<PathBuf>,
    /// PKCS#8 signing key (PEM or DER). Without it an ephemeral key is generated.
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_common_name")]
    pub common_name: String,
    pub signing_algorithm: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON issuing point store. Kept in memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingConfig {
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub pem: bool,
    pub http_url: Option<String>,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            pem: false,
            http_url: None,
            http_timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl PublishingConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// Settings of one CRL issuing point. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuingPointConfig {
    pub enabled: bool,
    pub description: String,
    /// Automatic generation; manual updates are allowed either way.
    pub enable_crl_updates: bool,
    /// Regenerate after every revocation change, subject to the throttle.
    pub always_update: bool,
    pub enable_update_interval: bool,
    pub auto_update_interval_ms: u64,
    pub enable_daily_updates: bool,
    /// `HH:MM` times, UTC.
    pub daily_updates: Vec<String>,
    pub min_update_interval_ms: u64,
    pub next_update_grace_period_ms: u64,
    pub publish_on_start: bool,
    /// A full CRL every `update_schema` updates, delta CRLs in between.
    pub update_schema: u32,
    pub include_expired_certs: bool,
    pub ca_certs_only: bool,
    pub profile_certs_only: bool,
    pub profile_list: Vec<String>,
    pub signing_algorithm: Option<String>,
    pub entry_extensions: Vec<EntryExtensionKind>,
    pub extensions: Vec<CrlExtensionConfig>,
    pub scan_timeout_ms: u64,
    pub manual_update_wait_ms: u64,
    pub failure_retry_wait_ms: u64,
    pub enable_cache_recovery: bool,
}

impl Default for IssuingPointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            description: "CA's complete Certificate Revocation List".to_string(),
            enable_crl_updates: true,
            always_update: false,
            enable_update_interval: true,
            auto_update_interval_ms: 4 * 60 * 60 * 1000,
            enable_daily_updates: false,
            daily_updates: Vec::new(),
            min_update_interval_ms: 0,
            next_update_grace_period_ms: 0,
            publish_on_start: false,
            update_schema: 1,
            include_expired_certs: false,
            ca_certs_only: false,
            profile_certs_only: false,
            profile_list: Vec::new(),
            signing_algorithm: None,
            entry_extensions: vec![
                EntryExtensionKind::CrlReason,
                EntryExtensionKind::InvalidityDate,
            ],
            extensions: default_extensions(),
            scan_timeout_ms: 30_000,
            manual_update_wait_ms: 60_000,
            failure_retry_wait_ms: 60_000,
            enable_cache_recovery: true,
        }
    }
}

impl IssuingPointConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.update_schema == 0 {
            return Err(ConfigurationError::ZeroUpdateSchema);
        }
        if self.enable_update_interval {
            if self.auto_update_interval_ms == 0 {
                return Err(ConfigurationError::ZeroUpdateInterval);
            }
            if self.min_update_interval_ms > self.auto_update_interval_ms {
                return Err(ConfigurationError::MinIntervalTooLarge {
                    min: self.min_update_interval_ms,
                    interval: self.auto_update_interval_ms,
                });
            }
        }
        if self.enable_daily_updates {
            if self.daily_updates.is_empty() {
                return Err(ConfigurationError::NoDailyUpdates);
            }
            for time in &self.daily_updates {
                parse_daily_time(time)?;
            }
        }
        self.signing_algorithm()?;

        let mut seen = Vec::with_capacity(self.extensions.len());
        for extension in &self.extensions {
            if seen.contains(&extension.kind) {
                return Err(ConfigurationError::DuplicateExtension(extension.kind));
            }
            seen.push(extension.kind);
        }
        let enabled = |kind: CrlExtensionKind| {
            self.extensions
                .iter()
                .any(|e| e.kind == kind && e.enabled)
        };
        if enabled(CrlExtensionKind::DeltaCrlIndicator) && !enabled(CrlExtensionKind::CrlNumber) {
            return Err(ConfigurationError::DeltaWithoutCrlNumber);
        }

        if self.profile_certs_only && self.profile_list.is_empty() {
            return Err(ConfigurationError::EmptyProfileList);
        }
        Ok(())
    }

    pub fn signing_algorithm(&self) -> Result<Option<SigningAlgorithm>, ConfigurationError> {
        self.signing_algorithm
            .as_deref()
            .map(|name| {
                name.parse()
                    .map_err(|_| ConfigurationError::UnknownSigningAlgorithm(name.to_string()))
            })
            .transpose()
    }

    /// Parsed `daily_updates`, as (hour, minute) pairs.
    pub fn daily_times(&self) -> Result<Vec<(u32, u32)>, ConfigurationError> {
        if !self.enable_daily_updates {
            return Ok(Vec::new());
        }
        self.daily_updates
            .iter()
            .map(|time| parse_daily_time(time))
            .collect()
    }

    pub fn auto_update_interval(&self) -> Option<Duration> {
        self.enable_update_interval
            .then(|| Duration::from_millis(self.auto_update_interval_ms))
    }

    pub fn min_update_interval(&self) -> Duration {
        Duration::from_millis(self.min_update_interval_ms)
    }

    pub fn next_update_grace_period(&self) -> Duration {
        Duration::from_millis(self.next_update_grace_period_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn manual_update_wait(&self) -> Duration {
        Duration::from_millis(self.manual_update_wait_ms)
    }

    pub fn failure_retry_wait(&self) -> Duration {
        Duration::from_millis(self.failure_retry_wait_ms)
    }
}

fn parse_daily_time(time: &str) -> Result<(u32, u32), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidDailyTime(time.to_string());
    let (hour, minute) = time.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

fn default_common_name() -> String {
    "CRL Issuing Authority".to_string()
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("ca.common_name", default_common_name())?
            .set_default("publishing.pem", false)?
            .add_source(File::with_name("config/settings").required(false));

        // Explicit overrides replace the process environment, keeping tests isolated
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Should be in the format APP_STORE__PATH or APP_PUBLISHING__DIRECTORY
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: Self = builder.build()?.try_deserialize()?;
        if config.issuing_points.is_empty() {
            config
                .issuing_points
                .insert(DEFAULT_ISSUING_POINT.to_string(), IssuingPointConfig::default());
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(name) = &self.ca.signing_algorithm {
            name.parse::<SigningAlgorithm>()
                .map_err(|_| ConfigurationError::UnknownSigningAlgorithm(name.clone()))?;
        }
        for issuing_point in self.issuing_points.values() {
            issuing_point.validate()?;
        }
        Ok(())
    }
}
