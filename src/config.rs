use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read from `SCHED_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub wal_path: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// SMTP relay `host:port`. Without one, notices are only logged.
    pub smtp_addr: Option<String>,
    pub mail_from: String,
    pub notify_queue: usize,
    pub gate_timeout: Option<Duration>,
    pub seed: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3165,
            wal_path: PathBuf::from("./data/sched.wal"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            smtp_addr: None,
            mail_from: "admin@localhost".into(),
            notify_queue: 1024,
            gate_timeout: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("SCHED_BIND") {
            cfg.bind = v;
        }
        if let Some(v) = lookup("SCHED_PORT") {
            cfg.port = parse("SCHED_PORT", v)?;
        }
        if let Some(v) = lookup("SCHED_WAL_PATH") {
            cfg.wal_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SCHED_MAX_CONNECTIONS") {
            cfg.max_connections = parse("SCHED_MAX_CONNECTIONS", v)?;
        }
        if let Some(v) = lookup("SCHED_COMPACT_THRESHOLD") {
            cfg.compact_threshold = parse("SCHED_COMPACT_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("SCHED_METRICS_PORT") {
            cfg.metrics_port = Some(parse("SCHED_METRICS_PORT", v)?);
        }
        cfg.smtp_addr = lookup("SCHED_SMTP_ADDR").filter(|v| !v.is_empty());
        if let Some(v) = lookup("SCHED_MAIL_FROM") {
            cfg.mail_from = v;
        }
        if let Some(v) = lookup("SCHED_NOTIFY_QUEUE") {
            cfg.notify_queue = parse("SCHED_NOTIFY_QUEUE", v)?;
        }
        if let Some(v) = lookup("SCHED_GATE_TIMEOUT_MS") {
            cfg.gate_timeout = Some(Duration::from_millis(parse("SCHED_GATE_TIMEOUT_MS", v)?));
        }
        cfg.seed = lookup("SCHED_SEED").filter(|v| !v.is_empty()).map(PathBuf::from);

        if cfg.max_connections == 0 {
            return Err(ConfigError::Invalid { var: "SCHED_MAX_CONNECTIONS", value: "0".into() });
        }
        Ok(cfg)
    }

    /// The first command-line argument, if any, names the WAL file.
    pub fn with_args(mut self, mut args: impl Iterator<Item = String>) -> Self {
        if let Some(path) = args.next() {
            self.wal_path = PathBuf::from(path);
        }
        self
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse<T: FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}
