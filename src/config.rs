use crate::prelude::*;
use crate::solivia::catalog::metric_name;
use crate::solivia::{Catalog, CommandCode, CommandSchema};

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub serial: Serial,

    pub poll_interval_secs: Option<u64>,

    #[serde(default = "Vec::new")]
    pub commands: Vec<String>,

    #[serde(default = "Vec::new")]
    pub extra_commands: Vec<ExtraCommand>,

    /// Optional path to append every cycle to, one JSON object per line
    pub cycle_log: Option<String>,

    #[serde(default = "Config::default_metrics")]
    pub metrics: Metrics,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Serial {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Serial {
    pub device: String,
    pub baud_rate: Option<u32>,
    pub address: Option<u8>,
    pub read_timeout_ms: Option<u64>,
    pub write_timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}
impl Serial {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(19200)
    }

    pub fn address(&self) -> u8 {
        self.address.unwrap_or(1)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.unwrap_or(1000))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.unwrap_or(1000))
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(2)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.unwrap_or(100))
    }
} // }}}

// ExtraCommand {{{
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExtraKind {
    Scaled {
        divisor: u16,
        #[serde(default)]
        unit: String,
    },
    String {
        length: usize,
    },
}

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct ExtraCommand {
    #[serde_as(as = "DisplayFromStr")]
    pub code: CommandCode,
    pub name: String,
    #[serde(flatten)]
    pub kind: ExtraKind,
}
impl ExtraCommand {
    pub fn schema(&self) -> Result<CommandSchema> {
        // the name becomes a metric name or label key, which must start with a letter
        let key = metric_name(&self.name);
        if key.is_empty() || key.starts_with(|c: char| c.is_ascii_digit()) {
            bail!("name {:?} does not make a valid metric name", self.name);
        }

        let schema = match &self.kind {
            ExtraKind::Scaled { divisor, unit } => {
                CommandSchema::scaled(self.name.clone(), *divisor, unit.clone())?
            }
            ExtraKind::String { length } => CommandSchema::fixed_string(self.name.clone(), *length)?,
        };
        Ok(schema)
    }
} // }}}

// Metrics {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Metrics {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_metrics_namespace")]
    pub namespace: String,

    pub listen: Option<String>,
}
impl Metrics {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn listen(&self) -> &Option<String> {
        &self.listen
    }
} // }}}

/// Shared, read-only handle on the loaded configuration.
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn serial(&self) -> &Serial {
        &self.config.serial
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.poll_interval_secs.unwrap_or(30))
    }

    pub fn metrics(&self) -> &Metrics {
        &self.config.metrics
    }

    pub fn cycle_log(&self) -> Option<&str> {
        self.config.cycle_log.as_deref()
    }

    pub fn loglevel(&self) -> &str {
        &self.config.loglevel
    }

    pub fn log_settings(&self) {
        self.config.log_settings()
    }

    /// Built-in command table plus any `extra_commands`.
    pub fn catalog(&self) -> Result<Catalog> {
        let extra = self
            .config
            .extra_commands
            .iter()
            .map(|c| Ok((c.code, c.schema()?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Catalog::with_entries(extra)?)
    }

    /// Commands to poll each cycle, in configured order. Entries are command
    /// names or hex codes; an empty list polls the whole catalog.
    pub fn commands(&self, catalog: &Catalog) -> Result<Vec<CommandCode>> {
        if self.config.commands.is_empty() {
            return Ok(catalog.codes().collect());
        }

        let mut r = Vec::with_capacity(self.config.commands.len());
        for entry in &self.config.commands {
            let code = match catalog.find_by_name(entry) {
                Some(code) => code,
                None => match CommandCode::from_str(entry.trim()) {
                    Ok(code) => {
                        if !catalog.contains(code) {
                            warn!("command {} is not in the catalog, replies will be skipped", code);
                        }
                        code
                    }
                    Err(_) => bail!("unknown command {:?} in commands list", entry),
                },
            };

            if r.contains(&code) {
                warn!("command {:?} listed more than once, ignoring repeat", entry);
                continue;
            }
            r.push(code);
        }

        Ok(r)
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("config.rs:error reading {}: {}", file, err))?;

        Self::from_yaml(&content).map_err(|err| anyhow!("config.rs:error loading {}: {}", file, err))
    }

    pub fn log_settings(&self) {
        info!("Configuration loaded successfully:");
        info!("  Serial:");
        info!("    Device: {}", self.serial.device());
        info!("    Baud Rate: {}", self.serial.baud_rate());
        info!("    Address: {}", self.serial.address());
        info!("    Read Timeout: {:?}", self.serial.read_timeout());
        info!("    Write Timeout: {:?}", self.serial.write_timeout());
        info!("    Retries: {}", self.serial.retries());
        info!("    Retry Backoff: {:?}", self.serial.retry_backoff());
        info!("  Poll Interval: {}s", self.poll_interval_secs.unwrap_or(30));
        if self.commands.is_empty() {
            info!("  Commands: all");
        } else {
            info!("  Commands: {}", self.commands.join(", "));
        }
        info!("  Extra Commands: {}", self.extra_commands.len());
        for (i, c) in self.extra_commands.iter().enumerate() {
            info!("    Extra[{}]: {} {} {:?}", i, c.code, c.name, c.kind);
        }
        info!("  Cycle Log: {}", self.cycle_log.as_deref().unwrap_or("disabled"));
        info!("  Metrics: {}", if self.metrics.enabled { "enabled" } else { "disabled" });
        if self.metrics.enabled {
            info!("    Namespace: {}", self.metrics.namespace);
            if let Some(listen) = &self.metrics.listen {
                info!("    Listen: {}", listen);
            }
        }
        info!("  Log Level: {}", self.loglevel);
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.serial.device.is_empty() {
            return Err(anyhow!("config.rs:serial device cannot be empty"));
        }
        if self.serial.baud_rate() == 0 {
            bail!("serial.baud_rate must be greater than 0");
        }
        if self.serial.read_timeout_ms == Some(0) {
            return Err(anyhow!("config.rs:Invalid read timeout: 0"));
        }
        if self.serial.write_timeout_ms == Some(0) {
            return Err(anyhow!("config.rs:Invalid write timeout: 0"));
        }
        if self.serial.retries() > 10 {
            bail!("serial.retries must be at most 10, got {}", self.serial.retries());
        }
        if self.poll_interval_secs == Some(0) {
            bail!("poll_interval_secs must be greater than 0");
        }

        for c in &self.extra_commands {
            c.schema()
                .map_err(|err| anyhow!("config.rs:extra command {}: {}", c.code, err))?;
        }

        if self.metrics.enabled {
            if self.metrics.namespace.is_empty() {
                return Err(anyhow!("config.rs:metrics namespace cannot be empty"));
            }
            if let Some(listen) = &self.metrics.listen {
                listen
                    .parse::<std::net::SocketAddr>()
                    .map_err(|err| anyhow!("config.rs:Invalid metrics listen address {}: {}", listen, err))?;
            }
        }

        if let Some(path) = &self.cycle_log {
            if path.is_empty() {
                return Err(anyhow!("config.rs:cycle_log path cannot be empty"));
            }
        }

        Ok(())
    }

    fn default_metrics() -> Metrics {
        Metrics {
            enabled: Self::default_enabled(),
            namespace: Self::default_metrics_namespace(),
            listen: None,
        }
    }

    fn default_metrics_namespace() -> String {
        "solivia".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
