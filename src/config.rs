use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admission::idempotency::MAX_IDEMPOTENCY_TTL;
use crate::admission::signature::MAX_SKEW_LIMIT;
use crate::admission::{AdminGuard, RateLimitSettings, SignatureValidator};
use crate::collab::Bot;
use crate::error::{Result, SentinelError};
use crate::store::{StoreOptions, MAX_RETENTION};

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "sentinel.toml";

const DAY_SECS: u64 = 24 * 60 * 60;
const MAX_TOKENS: f64 = 1e9;
const MAX_REQUEST_TIMEOUT_MS: u64 = 10 * 60 * 1000;

/// Service configuration: TOML file, then environment, then CLI flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentinelConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    #[serde(default)]
    pub signature: SignatureConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    /// Bots seeded into the in-memory directory
    #[serde(default)]
    pub bots: Vec<Bot>,
}

// ─── Server ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for each backing-store operation
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            cors_origins: Vec::new(),
        }
    }
}

// ─── Storage ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Redis,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(SentinelError::Config(format!(
                "unknown storage backend '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Alert lifetime in seconds (default: 30 days)
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Pub/sub channel for alert events
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Expired-record sweep interval; 0 disables it
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Redis
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_retention_secs() -> u64 {
    30 * 24 * 60 * 60
}

fn default_channel() -> String {
    crate::bus::DEFAULT_CHANNEL.to_string()
}

fn default_sweep_secs() -> u64 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            retention_secs: default_retention_secs(),
            channel: default_channel(),
            sweep_secs: default_sweep_secs(),
        }
    }
}

impl StorageConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

/// Build a redis URL from address, password, and database number
pub fn redis_url(addr: &str, password: Option<&str>, db: u32) -> Result<String> {
    let mut url = url::Url::parse(&format!("redis://{}/{}", addr, db))
        .map_err(|e| SentinelError::Config(format!("invalid REDIS_ADDR '{}': {}", addr, e)))?;
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|_| SentinelError::Config("cannot set redis password".to_string()))?;
    }
    Ok(url.to_string())
}

// ─── Admission ───

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens per refill period (default: 60)
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Bucket capacity (default: 30)
    #[serde(default = "default_burst")]
    pub burst: f64,

    #[serde(default = "default_refill_ms")]
    pub refill_ms: u64,

    /// Idle bucket eviction interval; 0 disables it
    #[serde(default = "default_idle_sweep_secs")]
    pub idle_sweep_secs: u64,

    /// Key clients on `X-Forwarded-For` (only behind a trusted proxy)
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

fn default_rate() -> f64 {
    60.0
}

fn default_burst() -> f64 {
    30.0
}

fn default_refill_ms() -> u64 {
    1000
}

fn default_idle_sweep_secs() -> u64 {
    600
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            burst: default_burst(),
            refill_ms: default_refill_ms(),
            idle_sweep_secs: default_idle_sweep_secs(),
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    pub fn settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            rate: self.rate,
            burst: self.burst,
            refill: Duration::from_millis(self.refill_ms),
        }
    }

    pub fn idle_sweep(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Key retention in seconds (default: 600)
    #[serde(default = "default_idempotency_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_idempotency_ttl_secs() -> u64 {
    600
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_idempotency_ttl_secs(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SignatureConfig {
    /// Require `X-Sentinel-Signature` (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shared HMAC secret
    #[serde(default)]
    pub secret: String,

    /// Bind signatures to a timestamp and nonce
    #[serde(default)]
    pub replay_protection: bool,

    #[serde(default = "default_max_skew_secs")]
    pub max_skew_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_skew_secs() -> u64 {
    300
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            secret: String::new(),
            replay_protection: false,
            max_skew_secs: default_max_skew_secs(),
        }
    }
}

impl std::fmt::Debug for SignatureConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureConfig")
            .field("enabled", &self.enabled)
            .field("secret", &if self.secret.is_empty() { "" } else { "<redacted>" })
            .field("replay_protection", &self.replay_protection)
            .field("max_skew_secs", &self.max_skew_secs)
            .finish()
    }
}

impl SignatureConfig {
    pub fn validator(&self) -> SignatureValidator {
        if !self.enabled {
            return SignatureValidator::disabled();
        }
        if self.replay_protection {
            SignatureValidator::with_replay_protection(
                self.secret.clone(),
                Duration::from_secs(self.max_skew_secs),
            )
        } else {
            SignatureValidator::enforced(self.secret.clone())
        }
    }
}

// ─── Admin ───

/// Credentials for the purge endpoints
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token; empty keeps admin routes closed
    #[serde(default)]
    pub token: String,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("token", &if self.token.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

impl AdminConfig {
    pub fn guard(&self) -> AdminGuard {
        AdminGuard::new(self.token.clone())
    }
}

// ─── Loading ───

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SentinelError::Config(format!(
            "{} must be a boolean, got '{}'",
            name, value
        ))),
    }
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SentinelError::Config(format!("{} must be a number, got '{}'", name, value)))
}

impl SentinelConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: SentinelConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path`, else `sentinel.toml` if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// Recognized: `PORT`, `REDIS_ADDR`, `REDIS_PASSWORD`, `REDIS_DB`,
    /// `WEBHOOK_SECRET`, `SENTINEL_SIGNATURE_ENABLED`, `SENTINEL_STORAGE`,
    /// `SENTINEL_ADMIN_TOKEN`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = var("PORT") {
            self.server.port = parse_num("PORT", &port)?;
        }

        let addr = var("REDIS_ADDR");
        let password = var("REDIS_PASSWORD");
        let db = var("REDIS_DB");
        if addr.is_some() || password.is_some() || db.is_some() {
            let db = match db {
                Some(db) => parse_num("REDIS_DB", &db)?,
                None => 0,
            };
            self.storage.redis_url = redis_url(
                addr.as_deref().unwrap_or("localhost:6379"),
                password.as_deref(),
                db,
            )?;
        }

        if let Some(secret) = var("WEBHOOK_SECRET") {
            self.signature.secret = secret;
        }
        if let Some(enabled) = var("SENTINEL_SIGNATURE_ENABLED") {
            self.signature.enabled = parse_bool("SENTINEL_SIGNATURE_ENABLED", &enabled)?;
        }
        if let Some(backend) = var("SENTINEL_STORAGE") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(token) = var("SENTINEL_ADMIN_TOKEN") {
            self.admin.token = token;
        }

        Ok(())
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SentinelError::Config(msg.to_string()));

        let rate = &self.rate_limit;
        if !rate.rate.is_finite() || rate.rate <= 0.0 || rate.rate > MAX_TOKENS {
            return fail("rate_limit.rate must be positive and finite");
        }
        if !rate.burst.is_finite() || rate.burst < 1.0 || rate.burst > MAX_TOKENS {
            return fail("rate_limit.burst must be at least 1 and finite");
        }
        if rate.refill_ms == 0 || rate.refill_ms > DAY_SECS * 1000 {
            return fail("rate_limit.refill_ms must be between 1 and one day");
        }
        if rate.idle_sweep_secs > DAY_SECS {
            return fail("rate_limit.idle_sweep_secs must be at most one day");
        }
        let ttl = self.idempotency.ttl_secs;
        if ttl == 0 || ttl > MAX_IDEMPOTENCY_TTL.as_secs() {
            return fail("idempotency.ttl_secs must be between 1 and 30 days");
        }
        let retention = self.storage.retention_secs;
        if retention == 0 || retention > MAX_RETENTION.as_secs() {
            return fail("storage.retention_secs must be between 1 and 10 years");
        }
        if self.storage.sweep_secs > DAY_SECS {
            return fail("storage.sweep_secs must be at most one day");
        }
        if self.storage.channel.is_empty() {
            return fail("storage.channel must not be empty");
        }
        let timeout = self.server.request_timeout_ms;
        if timeout == 0 || timeout > MAX_REQUEST_TIMEOUT_MS {
            return fail("server.request_timeout_ms must be between 1 and 10 minutes");
        }
        if self.signature.enabled && self.signature.secret.is_empty() {
            return fail(
                "signature verification is enabled but no secret is set \
                 (set WEBHOOK_SECRET, or disable it explicitly with signature.enabled = false)",
            );
        }
        let sig = &self.signature;
        if sig.enabled && sig.replay_protection && sig.max_skew_secs == 0 {
            return fail("signature.max_skew_secs must be positive with replay protection");
        }
        if sig.max_skew_secs > MAX_SKEW_LIMIT.as_secs() {
            return fail("signature.max_skew_secs must be at most one day");
        }
        Ok(())
    }

    /// Server bind address (e.g., "0.0.0.0:8080")
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            retention: Duration::from_secs(self.storage.retention_secs),
            op_timeout: self.request_timeout(),
            channel: self.storage.channel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn valid() -> SentinelConfig {
        let mut config = SentinelConfig::default();
        config.signature.secret = "s".into();
        config
    }

    #[test]
    fn test_default_config() {
        let config = SentinelConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, StorageBackend::Redis);
        assert_eq!(config.storage.retention_secs, 2_592_000);
        assert_eq!(config.storage.channel, "alert_events");
        assert_eq!(config.rate_limit.rate, 60.0);
        assert_eq!(config.rate_limit.burst, 30.0);
        assert_eq!(config.rate_limit.refill_ms, 1000);
        assert_eq!(config.idempotency.ttl_secs, 600);
        assert!(config.signature.enabled);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml_str = r#"
            [server]
            port = 9090

            [storage]
            backend = "memory"

            [signature]
            enabled = false

            [[bots]]
            name = "ops"
            token = "abc"
            chats = ["42"]
        "#;
        let config: SentinelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(!config.signature.enabled);
        assert_eq!(config.bots.len(), 1);
        assert_eq!(config.bots[0].chats, vec!["42"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rate_limit]\nburst = 5.0\n").unwrap();

        let config = SentinelConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.rate_limit.burst, 5.0);
        assert_eq!(config.rate_limit.rate, 60.0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SentinelConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport = ").unwrap();
        assert!(SentinelConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SentinelConfig::default();
        config
            .apply_env_from(env(&[
                ("PORT", "9000"),
                ("REDIS_ADDR", "redis.internal:6380"),
                ("REDIS_PASSWORD", "p@ss word"),
                ("REDIS_DB", "2"),
                ("WEBHOOK_SECRET", "topsecret"),
                ("SENTINEL_STORAGE", "memory"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.signature.secret, "topsecret");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.storage.redis_url.starts_with("redis://:"));
        assert!(config.storage.redis_url.ends_with("@redis.internal:6380/2"));
        assert!(!config.storage.redis_url.contains(' '));
    }

    #[test]
    fn test_env_empty_values_ignored() {
        let mut config = valid();
        config
            .apply_env_from(env(&[("PORT", ""), ("WEBHOOK_SECRET", "")]))
            .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.signature.secret, "s");
        assert_eq!(config.storage.redis_url, "redis://localhost:6379/0");
    }

    #[test]
    fn test_env_bad_values() {
        let mut config = SentinelConfig::default();
        assert!(config.apply_env_from(env(&[("PORT", "eighty")])).is_err());
        assert!(config
            .apply_env_from(env(&[("SENTINEL_SIGNATURE_ENABLED", "maybe")]))
            .is_err());
        assert!(config.apply_env_from(env(&[("SENTINEL_STORAGE", "etcd")])).is_err());
    }

    #[test]
    fn test_signature_disable_via_env() {
        let mut config = SentinelConfig::default();
        config
            .apply_env_from(env(&[("SENTINEL_SIGNATURE_ENABLED", "false")]))
            .unwrap();
        assert!(!config.signature.enabled);
        assert!(config.validate().is_ok());
        assert!(!config.signature.validator().is_enabled());
    }

    #[test]
    fn test_validate_requires_secret_when_enabled() {
        let config = SentinelConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("secret"));
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = valid();
        config.rate_limit.burst = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.rate_limit.refill_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.idempotency.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.rate_limit.rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_values() {
        let cases: Vec<fn(&mut SentinelConfig)> = vec![
            |c| c.rate_limit.rate = f64::INFINITY,
            |c| c.rate_limit.burst = f64::INFINITY,
            |c| c.rate_limit.refill_ms = u64::MAX,
            |c| c.rate_limit.idle_sweep_secs = u64::MAX,
            |c| c.idempotency.ttl_secs = u64::MAX,
            |c| c.storage.retention_secs = u64::MAX,
            |c| c.storage.sweep_secs = u64::MAX,
            |c| c.server.request_timeout_ms = u64::MAX,
            |c| c.signature.max_skew_secs = u64::MAX,
        ];
        for (i, apply) in cases.into_iter().enumerate() {
            let mut config = valid();
            apply(&mut config);
            assert!(config.validate().is_err(), "case {} should be rejected", i);
        }

        let mut config = valid();
        config.storage.retention_secs = MAX_RETENTION.as_secs();
        config.idempotency.ttl_secs = MAX_IDEMPOTENCY_TTL.as_secs();
        config.signature.max_skew_secs = MAX_SKEW_LIMIT.as_secs();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_admin_token_from_env_and_redacted() {
        let mut config = valid();
        assert!(!config.admin.guard().is_enabled());

        config
            .apply_env_from(env(&[("SENTINEL_ADMIN_TOKEN", "adm1n")]))
            .unwrap();
        assert_eq!(config.admin.token, "adm1n");
        assert!(config.admin.guard().is_enabled());

        let debug = format!("{:?}", config.admin);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("adm1n"));
    }

    #[test]
    fn test_signature_debug_redacts_secret() {
        let config = valid();
        let debug = format!("{:?}", config.signature);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret: \"s\""));
    }

    #[test]
    fn test_store_options() {
        let config = valid();
        let options = config.store_options();
        assert_eq!(options.retention, Duration::from_secs(2_592_000));
        assert_eq!(options.op_timeout, Duration::from_millis(5000));
        assert_eq!(options.channel, "alert_events");
        assert_eq!(config.storage.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_redis_url_builder() {
        assert_eq!(
            redis_url("localhost:6379", None, 0).unwrap(),
            "redis://localhost:6379/0"
        );
        assert_eq!(
            redis_url("cache:6379", Some("pw"), 3).unwrap(),
            "redis://:pw@cache:6379/3"
        );
    }
}
