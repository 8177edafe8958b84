use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use harness_common::{HarnessError, Result};
use serde::{Deserialize, Serialize};

/// Overrides the default server binary.
pub const SERVER_BINARY_ENV: &str = "HARNESS_SERVER_BINARY";

pub const DEFAULT_SERVER_BINARY: &str = "vllm";

/// How to launch one server.
///
/// Built in code with the builder methods, or loaded from YAML:
///
/// ```yaml
/// model: facebook/opt-125m
/// cli_args: ["--max-model-len", "2048"]
/// env:
///   CUDA_VISIBLE_DEVICES: "0"
/// startup_timeout: 240s
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    pub model: String,
    #[serde(default)]
    pub cli_args: Vec<String>,
    /// Set on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Pick a free port and append `--port` to the arguments.
    #[serde(default = "default_true")]
    pub auto_port: bool,
    #[serde(default = "default_startup_timeout", with = "duration_serde")]
    pub startup_timeout: Duration,
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            binary: default_binary(),
            model: model.into(),
            cli_args: Vec::new(),
            env: HashMap::new(),
            auto_port: true,
            startup_timeout: default_startup_timeout(),
            poll_interval: default_poll_interval(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }

    pub fn binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.cli_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cli_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn auto_port(mut self, enabled: bool) -> Self {
        self.auto_port = enabled;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Load configuration from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read server config: {}", path.as_ref().display()))?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> anyhow::Result<Self> {
        let config: ServerConfig =
            serde_yaml::from_str(content).context("Failed to parse server config YAML")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(HarnessError::configuration("server binary is empty"));
        }
        if self.model.trim().is_empty() {
            return Err(HarnessError::configuration("model is empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(HarnessError::configuration("poll_interval must be positive"));
        }
        Ok(())
    }
}

fn default_binary() -> String {
    env::var(SERVER_BINARY_ENV)
        .ok()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SERVER_BINARY.to_string())
}

fn default_true() -> bool {
    true
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(3)
}

// Durations are written as "500ms", "120s" or "2m".
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" before "s", since "ms" ends with 's'
        if let Some(num) = s.strip_suffix("ms") {
            let millis: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_millis(millis))
        } else if let Some(num) = s.strip_suffix('s') {
            let secs: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(secs))
        } else if let Some(num) = s.strip_suffix('m') {
            let mins: u64 = num.parse().map_err(|_| format!("Invalid duration: {}", s))?;
            Ok(Duration::from_secs(mins * 60))
        } else {
            Err(format!("Duration must end with 's', 'ms', or 'm': {}", s))
        }
    }
}
