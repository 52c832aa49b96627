use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_SNOOZE_MINUTES: i64 = 5;
pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 5 * 60;
pub const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 15;

/// Top-level config (ringback.toml + RINGBACK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RingbackConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub callbacks: CallbacksConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Polling loop and submission rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-job scans. Bounds how late a call can fire.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How far into the future a snoozed call is rescheduled.
    #[serde(default = "default_snooze_minutes")]
    pub snooze_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            snooze_minutes: DEFAULT_SNOOZE_MINUTES,
        }
    }
}

/// Eviction thresholds for both stores. Ages are measured from `call_at` for
/// scheduled calls and from creation for active calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,
    #[serde(default = "one_hour")]
    pub claimed_max_age_secs: i64,
    #[serde(default = "one_hour")]
    pub failed_max_age_secs: i64,
    #[serde(default = "one_day")]
    pub max_age_secs: i64,
    #[serde(default = "two_hours")]
    pub active_max_age_secs: i64,
    #[serde(default = "default_max_scheduled")]
    pub max_scheduled: usize,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_RETENTION_INTERVAL_SECS,
            claimed_max_age_secs: one_hour(),
            failed_max_age_secs: one_hour(),
            max_age_secs: one_day(),
            active_max_age_secs: two_hours(),
            max_scheduled: default_max_scheduled(),
            max_active: default_max_active(),
        }
    }
}

/// Outbound telephony endpoint. When `url` is unset the gateway runs a
/// dry-run dispatcher that only logs the calls it would place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
        }
    }
}

/// How inbound dispatcher callbacks are authenticated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CallbackAuthMode {
    /// HMAC-SHA256 over the raw request body in `X-Signature-256: sha256=<hex>`.
    HmacSha256,
    /// Static bearer token in the Authorization header.
    BearerToken,
    /// No authentication. Only for trusted networks.
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallbacksConfig {
    #[serde(default)]
    pub auth_mode: CallbackAuthMode,
    /// HMAC signing secret or bearer token value.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite file, only read when `backend = "sqlite"`.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayConfig {
    /// Offset from UTC applied when rendering due-time labels.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_snooze_minutes() -> i64 {
    DEFAULT_SNOOZE_MINUTES
}
fn default_retention_interval() -> u64 {
    DEFAULT_RETENTION_INTERVAL_SECS
}
fn default_dispatch_timeout() -> u64 {
    DEFAULT_DISPATCH_TIMEOUT_SECS
}
fn one_hour() -> i64 {
    60 * 60
}
fn two_hours() -> i64 {
    2 * 60 * 60
}
fn one_day() -> i64 {
    24 * 60 * 60
}
fn default_max_scheduled() -> usize {
    1000
}
fn default_max_active() -> usize {
    500
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ringback/ringback.db", home)
}

impl RingbackConfig {
    /// Load config from a TOML file with RINGBACK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `RINGBACK_SCHEDULER__POLL_INTERVAL_SECS=10`. A missing file is not an
    /// error; every section falls back to its defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RingbackConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RINGBACK_").split("__"))
            .extract()
            .map_err(|e| crate::error::RingbackError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall the background loops.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(crate::error::RingbackError::Config(
                "scheduler.poll_interval_secs must be positive".to_string(),
            ));
        }
        if self.retention.interval_secs == 0 {
            return Err(crate::error::RingbackError::Config(
                "retention.interval_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.snooze_minutes <= 0 {
            return Err(crate::error::RingbackError::Config(
                "scheduler.snooze_minutes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.ringback/ringback.toml", home)
}
