use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::CredentialSet;
use crate::error::ConfigError;
use crate::job::DeviceKind;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Load a specific env file. Missing or unreadable files are an error.
pub fn load_env_file(path: &std::path::Path) -> Result<(), ConfigError> {
    dotenvy::from_path(path)
        .map(|_| ())
        .map_err(|e| ConfigError::Invalid {
            key: "env file",
            reason: format!("{}: {e}", path.display()),
        })
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_secs(profile: &str, key: &str, default: u64) -> Duration {
    Duration::from_secs(
        profiled_env_opt(profile, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub broker: BrokerConfig,
    pub device: DeviceConfig,
    pub api: ApiConfig,
    pub worker: WorkerConfig,
    pub log: LogConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `NETBACKUP_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("NETBACKUP_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            broker: BrokerConfig::from_env_profiled(p),
            device: DeviceConfig::from_env_profiled(p),
            api: ApiConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
            log: LogConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Check the settings the worker cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device.credentials()?;

        if self.device.banner_timeout <= self.device.connect_timeout {
            return Err(ConfigError::Invalid {
                key: "SSH_BANNER_TIMEOUT_SECS",
                reason: format!(
                    "handshake timeout ({:?}) must be longer than connect timeout ({:?})",
                    self.device.banner_timeout, self.device.connect_timeout
                ),
            });
        }
        if self.broker.queue.is_empty() {
            return Err(ConfigError::Missing("RABBITMQ_QUEUE"));
        }
        if !self.log.is_utf8() {
            return Err(ConfigError::Invalid {
                key: "LOG_ENCODING",
                reason: format!("unsupported encoding {:?}, only utf-8 is written", self.log.encoding),
            });
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  broker:  {}:{} vhost={} queue={} user={}",
            self.broker.host,
            self.broker.port,
            self.broker.vhost,
            self.broker.queue,
            self.broker.username
        );
        tracing::info!(
            "  device:  user={} candidates={} port={} remote_path={}",
            self.device.username.as_deref().unwrap_or("(none)"),
            self.device.secrets.len(),
            self.device.ssh_port,
            self.device.remote_path
        );
        tracing::info!("  backups: dir={}", self.device.backup_dir.display());
        tracing::info!("  api:     host={}", self.api.host);
        tracing::info!(
            "  worker:  process_delay={:?} reconnect_delay={:?}",
            self.worker.process_delay,
            self.worker.reconnect_delay
        );
        tracing::info!(
            "  logs:    dir={} level={} keep_days={} tz={}",
            self.log.dir.display(),
            self.log.level,
            self.log.rotation_days,
            self.log.timezone
        );
    }
}

// ── Broker (RabbitMQ) ─────────────────────────────────────────

#[derive(Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub queue: String,
    pub username: String,
    pub password: String,
    pub heartbeat_secs: u16,
}

impl BrokerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "RABBITMQ_HOST", "localhost"),
            port: profiled_env_u16(p, "RABBITMQ_PORT", 5672),
            vhost: profiled_env_or(p, "RABBITMQ_VHOST", "/"),
            queue: profiled_env_or(p, "RABBITMQ_QUEUE", "backup_queue"),
            username: profiled_env_or(p, "RABBITMQ_USER", "guest"),
            password: profiled_env_or(p, "RABBITMQ_PASS", "guest"),
            heartbeat_secs: profiled_env_u16(p, "RABBITMQ_HEARTBEAT_SECS", 600),
        }
    }
}

impl fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("vhost", &self.vhost)
            .field("queue", &self.queue)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("heartbeat_secs", &self.heartbeat_secs)
            .finish()
    }
}

// ── Devices (SSH / SCP) ───────────────────────────────────────

#[derive(Clone)]
pub struct DeviceConfig {
    pub username: Option<String>,
    /// Candidate passwords in attempt order.
    pub secrets: Vec<String>,
    pub ssh_port: u16,
    pub connect_timeout: Duration,
    /// SSH banner/handshake timeout; longer than `connect_timeout`.
    pub banner_timeout: Duration,
    pub transfer_timeout: Duration,
    pub remote_path: String,
    pub backup_dir: PathBuf,
}

impl DeviceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            username: profiled_env_opt(p, "UBNT_USERNAME"),
            secrets: profiled_env_opt(p, "UBNT_PASSWORDS")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            ssh_port: profiled_env_u16(p, "SSH_PORT", 22),
            connect_timeout: profiled_env_secs(p, "SSH_CONNECT_TIMEOUT_SECS", 10),
            banner_timeout: profiled_env_secs(p, "SSH_BANNER_TIMEOUT_SECS", 20),
            transfer_timeout: profiled_env_secs(p, "SSH_TRANSFER_TIMEOUT_SECS", 60),
            remote_path: profiled_env_or(
                p,
                "UBNT_REMOTE_PATH",
                DeviceKind::Ubnt.default_remote_path(),
            ),
            backup_dir: PathBuf::from(profiled_env_or(p, "BACKUP_DIR", "backups")),
        }
    }

    /// The account and candidate list, or why they are unusable.
    pub fn credentials(&self) -> Result<CredentialSet, ConfigError> {
        let username = self
            .username
            .as_deref()
            .ok_or(ConfigError::Missing("UBNT_USERNAME"))?;
        if self.secrets.is_empty() {
            return Err(ConfigError::Missing("UBNT_PASSWORDS"));
        }
        Ok(CredentialSet::new(username, self.secrets.clone()))
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("username", &self.username)
            .field("secrets", &format_args!("[{} redacted]", self.secrets.len()))
            .field("ssh_port", &self.ssh_port)
            .field("connect_timeout", &self.connect_timeout)
            .field("banner_timeout", &self.banner_timeout)
            .field("transfer_timeout", &self.transfer_timeout)
            .field("remote_path", &self.remote_path)
            .field("backup_dir", &self.backup_dir)
            .finish()
    }
}

// ── Control-plane API ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host (optionally `host:port` or a full `http(s)://` base).
    pub host: String,
    pub timeout: Duration,
}

impl ApiConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "FAST_API_HOST", "localhost"),
            timeout: profiled_env_secs(p, "API_TIMEOUT_SECS", 30),
        }
    }
}

// ── Worker loop ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fixed wait between receiving a job and starting it.
    pub process_delay: Duration,
    /// Fixed wait before every reconnect attempt.
    pub reconnect_delay: Duration,
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            process_delay: profiled_env_secs(p, "PROCESS_DELAY_SECS", 5),
            reconnect_delay: profiled_env_secs(p, "RECONNECT_DELAY_SECS", 5),
        }
    }
}

// ── Logging ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level name (`debug`, `info`, `warning`, ...). `RUST_LOG` overrides it.
    pub level: String,
    pub dir: PathBuf,
    /// Daily files are named `{prefix}.{YYYY-MM-DD}.log`.
    pub file_prefix: String,
    /// Rotated files kept besides the current one.
    pub rotation_days: usize,
    /// IANA zone name used for log timestamps.
    pub timezone: String,
    pub encoding: String,
}

impl LogConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            level: profiled_env_or(p, "LOG_LEVEL", "debug"),
            dir: PathBuf::from(profiled_env_or(p, "LOG_DIR", "logs")),
            file_prefix: profiled_env_or(p, "LOG_FILE_PREFIX", "server"),
            rotation_days: profiled_env_usize(p, "LOG_ROTATION_DAYS", 7),
            timezone: profiled_env_or(p, "LOG_TIMEZONE", "UTC"),
            encoding: profiled_env_or(p, "LOG_ENCODING", "utf-8"),
        }
    }

    /// Files kept on disk: the current one plus `rotation_days` older ones.
    pub fn retained_files(&self) -> usize {
        self.rotation_days.saturating_add(1)
    }

    pub fn is_utf8(&self) -> bool {
        matches!(self.encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own profile prefix so parallel tests never share keys.

    #[test]
    fn defaults_are_applied() {
        let cfg = Config::for_profile("CFGTEST_DEFAULTS_UNSET");
        assert_eq!(cfg.broker.port, 5672);
        assert_eq!(cfg.broker.heartbeat_secs, 600);
        assert_eq!(cfg.device.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.device.banner_timeout, Duration::from_secs(20));
        assert_eq!(cfg.device.remote_path, "/tmp/system.cfg");
        assert_eq!(cfg.worker.process_delay, Duration::from_secs(5));
        assert_eq!(cfg.worker.reconnect_delay, Duration::from_secs(5));
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.log.dir, PathBuf::from("logs"));
        assert_eq!(cfg.log.rotation_days, 7);
        assert_eq!(cfg.log.retained_files(), 8);
        assert_eq!(cfg.log.timezone, "UTC");
        assert!(cfg.log.is_utf8());
    }

    #[test]
    fn profile_prefix_wins_over_plain_key() {
        std::env::set_var("CFGTEST_PROF_RABBITMQ_QUEUE", "staging_backups");
        std::env::set_var("CFGTEST_PROF_UBNT_PASSWORDS", "one two  three");
        let cfg = Config::for_profile("cfgtest_prof");
        assert_eq!(cfg.profile, "CFGTEST_PROF");
        assert_eq!(cfg.broker.queue, "staging_backups");
        assert_eq!(cfg.device.secrets, ["one", "two", "three"]);
        std::env::remove_var("CFGTEST_PROF_RABBITMQ_QUEUE");
        std::env::remove_var("CFGTEST_PROF_UBNT_PASSWORDS");
    }

    #[test]
    fn validate_requires_username_and_secrets() {
        let mut cfg = Config::for_profile("CFGTEST_VALIDATE_UNSET");
        cfg.device.username = None;
        cfg.device.secrets = vec!["x".into()];
        assert_eq!(cfg.validate(), Err(ConfigError::Missing("UBNT_USERNAME")));

        cfg.device.username = Some("ubnt".into());
        cfg.device.secrets.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::Missing("UBNT_PASSWORDS")));

        cfg.device.secrets = vec!["x".into()];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_handshake_timeout() {
        let mut cfg = Config::for_profile("CFGTEST_TIMEOUTS_UNSET");
        cfg.device.username = Some("ubnt".into());
        cfg.device.secrets = vec!["x".into()];
        cfg.device.banner_timeout = cfg.device.connect_timeout;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { key: "SSH_BANNER_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn validate_rejects_non_utf8_log_encoding() {
        let mut cfg = Config::for_profile("CFGTEST_ENCODING_UNSET");
        cfg.device.username = Some("ubnt".into());
        cfg.device.secrets = vec!["x".into()];

        cfg.log.encoding = "UTF8".into();
        assert!(cfg.validate().is_ok());

        cfg.log.encoding = "cp1251".into();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { key: "LOG_ENCODING", .. })
        ));
    }

    #[test]
    fn debug_output_hides_passwords() {
        let mut cfg = Config::for_profile("CFGTEST_DEBUG_UNSET");
        cfg.broker.password = "broker-secret".into();
        cfg.device.secrets = vec!["device-secret".into()];
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("broker-secret"));
        assert!(!shown.contains("device-secret"));
    }
}
