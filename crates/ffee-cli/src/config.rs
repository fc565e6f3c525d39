//! Configuration Vault – reads/writes `~/.ffee/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffee_middleware::{ChannelKind, ServiceDescriptor, ServiceRegistry};
use ffee_runtime::{
    ConsoleConfig, DATA_DISTRIBUTION_PORT, DispatcherConfig, MonitorConfig, PollerConfig,
};
use ffee_types::{FeeError, MessageKind};

/// One entry of the optional `[[services]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub port: u16,
    /// Defaults to `dpu_host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Multi-part channel subscribed to this message kind (e.g. `0x90`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart_kind: Option<u8>,
    /// Open without subscribing; liveness only.
    #[serde(default)]
    pub unsubscribed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<f64>,
}

impl ServiceEntry {
    fn to_descriptor(&self, default_host: &str) -> Result<ServiceDescriptor, FeeError> {
        let host = self.host.as_deref().unwrap_or(default_host);
        let mut descriptor =
            ServiceDescriptor::new(&self.name, host, self.port).describe(&self.description);
        if let Some(kind) = self.multipart_kind {
            descriptor = descriptor.multipart_on(MessageKind(kind));
        }
        if self.unsubscribed {
            descriptor = descriptor.kind(ChannelKind::Other);
        }
        if let Some(secs) = self.interval_secs {
            descriptor = descriptor.interval(secs_to_duration("interval_secs", secs)?);
        }
        Ok(descriptor)
    }
}

/// Persisted console configuration stored in `~/.ffee/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Host of the DPU processor and the monitoring channels.
    #[serde(default = "default_dpu_host")]
    pub dpu_host: String,

    /// Port of the data distribution channel (register maps, housekeeping).
    #[serde(default = "default_data_port")]
    pub data_distribution_port: u16,

    #[serde(default = "default_dpu_control_url")]
    pub dpu_control_url: String,

    #[serde(default = "default_cm_control_url")]
    pub cm_control_url: String,

    /// Per-call bound on a control server reply.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_soft_timeout")]
    pub soft_timeout_secs: u64,

    #[serde(default = "default_hard_timeout")]
    pub hard_timeout_secs: u64,

    /// Wait between control server connection attempts.
    #[serde(default = "default_backoff")]
    pub reconnect_backoff_secs: u64,

    #[serde(default = "default_poll_cycle")]
    pub poll_cycle_secs: u64,

    /// Run against the in-process simulated front-end.
    #[serde(default)]
    pub simulate: bool,

    /// Replaces the default service table when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceEntry>,
}

fn default_dpu_host() -> String {
    "localhost".to_string()
}
fn default_data_port() -> u16 {
    DATA_DISTRIBUTION_PORT
}
fn default_dpu_control_url() -> String {
    "ws://localhost:6600".to_string()
}
fn default_cm_control_url() -> String {
    "ws://localhost:6000".to_string()
}
fn default_call_timeout() -> u64 {
    10
}
fn default_soft_timeout() -> u64 {
    6
}
fn default_hard_timeout() -> u64 {
    10
}
fn default_backoff() -> u64 {
    10
}
fn default_poll_cycle() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dpu_host: default_dpu_host(),
            data_distribution_port: default_data_port(),
            dpu_control_url: default_dpu_control_url(),
            cm_control_url: default_cm_control_url(),
            call_timeout_secs: default_call_timeout(),
            soft_timeout_secs: default_soft_timeout(),
            hard_timeout_secs: default_hard_timeout(),
            reconnect_backoff_secs: default_backoff(),
            poll_cycle_secs: default_poll_cycle(),
            simulate: false,
            services: Vec::new(),
        }
    }
}

fn secs_to_duration(field: &str, secs: f64) -> Result<Duration, FeeError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|e| FeeError::Config(format!("{field} = {secs}: {e}")))
}

impl Config {
    /// # Errors
    ///
    /// [`FeeError::Config`] when the soft timeout is not shorter than the
    /// hard one or a timing field is zero.
    pub fn validate(&self) -> Result<(), FeeError> {
        if self.soft_timeout_secs == 0 || self.soft_timeout_secs >= self.hard_timeout_secs {
            return Err(FeeError::Config(format!(
                "soft_timeout_secs ({}) must be positive and below hard_timeout_secs ({})",
                self.soft_timeout_secs, self.hard_timeout_secs
            )));
        }
        for (field, value) in [
            ("call_timeout_secs", self.call_timeout_secs),
            ("reconnect_backoff_secs", self.reconnect_backoff_secs),
            ("poll_cycle_secs", self.poll_cycle_secs),
        ] {
            if value == 0 {
                return Err(FeeError::Config(format!("{field} must be positive")));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn console_config(&self) -> ConsoleConfig {
        let monitor = MonitorConfig {
            soft_timeout: Duration::from_secs(self.soft_timeout_secs),
            hard_timeout: Duration::from_secs(self.hard_timeout_secs),
            ..MonitorConfig::for_host(&self.dpu_host, self.data_distribution_port)
        };
        let dispatcher = DispatcherConfig {
            backoff: Duration::from_secs(self.reconnect_backoff_secs),
            ..DispatcherConfig::default()
        };
        ConsoleConfig {
            monitor,
            dispatcher,
            ..ConsoleConfig::default()
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            cycle_sleep: Duration::from_secs(self.poll_cycle_secs),
            ..PollerConfig::default()
        }
    }

    /// The `[[services]]` table, or the default channels on `dpu_host`.
    ///
    /// # Errors
    ///
    /// [`FeeError::Config`] for a bad interval, [`FeeError::Registration`]
    /// for duplicate names.
    pub fn service_registry(&self) -> Result<ServiceRegistry, FeeError> {
        if self.services.is_empty() {
            return Ok(ServiceRegistry::default_table(&self.dpu_host));
        }
        let mut builder = ServiceRegistry::builder();
        for entry in &self.services {
            builder = builder.with(entry.to_descriptor(&self.dpu_host)?);
        }
        builder.build()
    }
}

/// Return the path to `~/.ffee/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ffee").join("config.toml")
}

/// Load the config, writing the defaults first if the file does not exist
/// yet.  The returned flag is `true` on that first run.
pub fn load_or_create() -> Result<(Config, bool), FeeError> {
    load_or_create_at(&config_path(), |key| std::env::var(key).ok())
}

pub(crate) fn load_or_create_at<F>(path: &Path, env: F) -> Result<(Config, bool), FeeError>
where
    F: Fn(&str) -> Option<String>,
{
    let (mut cfg, created) = match load_from(path)? {
        Some(cfg) => (cfg, false),
        None => {
            let cfg = Config::default();
            save_to(&cfg, path)?;
            (cfg, true)
        }
    };
    apply_env_overrides(&mut cfg, env);
    cfg.validate()?;
    Ok((cfg, created))
}

/// Load the config from a specific path.  `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, FeeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| FeeError::Config(format!("Failed to read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| FeeError::Config(format!("Failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `FFEE_*` overrides looked up through `env`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FFEE_DPU_HOST` | `dpu_host` |
/// | `FFEE_DATA_PORT` | `data_distribution_port` |
/// | `FFEE_DPU_CONTROL_URL` | `dpu_control_url` |
/// | `FFEE_CM_CONTROL_URL` | `cm_control_url` |
/// | `FFEE_SIMULATE` | `simulate` (`1`/`true`/`yes`) |
///
/// Unparsable values are ignored.
pub fn apply_env_overrides<F>(cfg: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = env("FFEE_DPU_HOST") {
        cfg.dpu_host = v;
    }
    if let Some(v) = env("FFEE_DATA_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.data_distribution_port = port;
    }
    if let Some(v) = env("FFEE_DPU_CONTROL_URL") {
        cfg.dpu_control_url = v;
    }
    if let Some(v) = env("FFEE_CM_CONTROL_URL") {
        cfg.cm_control_url = v;
    }
    if let Some(v) = env("FFEE_SIMULATE") {
        match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => cfg.simulate = true,
            "0" | "false" | "no" => cfg.simulate = false,
            _ => {}
        }
    }
}

/// Save the config to a specific path, creating the directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), FeeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| FeeError::Config(format!("Failed to create config directory: {e}")))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| FeeError::Config(format!("Failed to serialize config: {e}")))?;
    fs::write(path, raw)
        .map_err(|e| FeeError::Config(format!("Failed to write {}: {e}", path.display())))
}
