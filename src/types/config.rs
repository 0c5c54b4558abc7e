//! Configuration structures.
//!
//! Configuration starts from defaults and is overlaid with `SANDBOX_*`
//! environment variables (see [`Config::from_env`]). `SANDBOX_LIMITS` carries
//! a whole [`ExecutionLimits`] as JSON; the single-limit keys apply on top.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::errors::{Error, Result};

/// Global service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Per-execution resource limits.
    #[serde(default)]
    pub limits: ExecutionLimits,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// HTTP transport configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

impl Config {
    /// Defaults overlaid with `SANDBOX_*` process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("SANDBOX_LISTEN_ADDR") {
            config.server.listen_addr = addr;
        }
        if let Some(addr) = lookup("SANDBOX_HTTP_ADDR") {
            config.http.listen_addr = addr;
        }
        if let Some(raw) = lookup("SANDBOX_LIMITS") {
            config.limits = serde_json::from_str(&raw)
                .map_err(|e| Error::config(format!("SANDBOX_LIMITS: {e}")))?;
        }
        if let Some(raw) = lookup("SANDBOX_TIMEOUT") {
            config.limits.timeout = humantime_serde::re::humantime::parse_duration(&raw)
                .map_err(|e| Error::config(format!("SANDBOX_TIMEOUT={raw}: {e}")))?;
        }
        if let Some(raw) = lookup("SANDBOX_MAX_OUTPUT_BYTES") {
            config.limits.max_output_bytes = parse_number(&raw, "SANDBOX_MAX_OUTPUT_BYTES")?;
        }
        if let Some(raw) = lookup("SANDBOX_MAX_LIVE_ELEMENTS") {
            config.limits.max_live_elements = parse_number(&raw, "SANDBOX_MAX_LIVE_ELEMENTS")?;
        }
        if let Some(raw) = lookup("SANDBOX_MAX_CONCURRENT") {
            config.limits.max_concurrent = parse_number(&raw, "SANDBOX_MAX_CONCURRENT")?;
        }
        if let Some(raw) = lookup("SANDBOX_EXECUTION_MODE") {
            config.server.execution_mode = match raw.to_ascii_lowercase().as_str() {
                "in_process" | "in-process" | "thread" => ExecutionMode::InProcess,
                "child_process" | "child-process" | "process" => ExecutionMode::ChildProcess,
                other => {
                    return Err(Error::config(format!(
                        "SANDBOX_EXECUTION_MODE: unknown mode '{other}'"
                    )))
                }
            };
        }
        if let Some(path) = lookup("SANDBOX_WORKER_PROGRAM") {
            config.server.worker_program = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("SANDBOX_LOG_FORMAT") {
            config.observability.json_logs = raw.eq_ignore_ascii_case("json");
        }

        config.limits.check()?;
        Ok(config)
    }
}

fn parse_number(raw: &str, key: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| Error::config(format!("{key}={raw}: {e}")))
}

/// How each execution is isolated from the service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Dedicated OS thread per execution inside the service process.
    #[default]
    InProcess,
    /// One `sandboxd exec` child process per execution.
    ChildProcess,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IPC server bind address (TCP).
    pub listen_addr: String,

    /// Isolation mode for executions.
    pub execution_mode: ExecutionMode,

    /// Worker binary for `ChildProcess` mode (defaults to the current executable).
    pub worker_program: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50061".to_string(),
            execution_mode: ExecutionMode::InProcess,
            worker_program: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Resource limits applied to every execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Maximum wall-clock duration of one execution.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// How long the watchdog waits for an interrupted worker to wind down.
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// Ceiling for each capture buffer (stdout and stderr), in bytes.
    pub max_output_bytes: usize,

    /// Treat a capture overflow as `ResourceExceeded` instead of truncating.
    pub output_overflow_fatal: bool,

    /// Maximum accepted script size in bytes.
    pub max_code_bytes: usize,

    /// Maximum nesting of script function calls.
    pub max_call_depth: usize,

    /// Maximum number of elements in any list, dict or string built by a script.
    pub max_collection_len: usize,

    /// Elements that all lists and dicts alive in one execution may hold
    /// together.
    pub max_live_elements: usize,

    /// Number of worker slots (concurrent executions).
    pub max_concurrent: usize,
}

impl ExecutionLimits {
    /// Reject limits that would make every execution fail.
    pub fn check(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be positive"));
        }
        if self.max_concurrent == 0 {
            return Err(Error::config("max_concurrent must be positive"));
        }
        if self.max_call_depth == 0 {
            return Err(Error::config("max_call_depth must be positive"));
        }
        Ok(())
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            grace_period: Duration::from_secs(1),
            max_output_bytes: 1024 * 1024,
            output_overflow_fatal: false,
            max_code_bytes: 64 * 1024,
            max_call_depth: 100,
            max_collection_len: 10_000_000,
            max_live_elements: 25_000_000,
            max_concurrent: 8,
        }
    }
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Maximum concurrent TCP connections. New connections beyond this limit
    /// are rejected.
    pub max_connections: usize,

    /// Read timeout in seconds per frame. Connections idle beyond this
    /// duration are dropped.
    pub read_timeout_secs: u64,

    /// Write timeout in seconds per frame.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 5 * 1024 * 1024,
            max_connections: 1000,
            read_timeout_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

/// HTTP transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP bind address.
    pub listen_addr: String,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:6004".to_string(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.limits.timeout, Duration::from_secs(5));
        assert_eq!(config.limits.max_output_bytes, 1024 * 1024);
        assert_eq!(config.server.execution_mode, ExecutionMode::InProcess);
        assert!(!config.limits.output_overflow_fatal);
    }

    #[test]
    fn test_env_overlay() {
        let config = Config::from_lookup(lookup_from(&[
            ("SANDBOX_TIMEOUT", "250ms"),
            ("SANDBOX_MAX_CONCURRENT", "2"),
            ("SANDBOX_EXECUTION_MODE", "child-process"),
            ("SANDBOX_HTTP_ADDR", "0.0.0.0:7000"),
        ]))
        .unwrap();

        assert_eq!(config.limits.timeout, Duration::from_millis(250));
        assert_eq!(config.limits.max_concurrent, 2);
        assert_eq!(config.server.execution_mode, ExecutionMode::ChildProcess);
        assert_eq!(config.http.listen_addr, "0.0.0.0:7000");
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        assert!(Config::from_lookup(lookup_from(&[("SANDBOX_TIMEOUT", "soon")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("SANDBOX_MAX_CONCURRENT", "0")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("SANDBOX_EXECUTION_MODE", "vm")])).is_err());
    }

    #[test]
    fn test_limits_json_overlay() {
        let config = Config::from_lookup(lookup_from(&[
            (
                "SANDBOX_LIMITS",
                r#"{"timeout": "2s", "output_overflow_fatal": true, "max_call_depth": 3}"#,
            ),
            ("SANDBOX_MAX_OUTPUT_BYTES", "16"),
        ]))
        .unwrap();

        assert_eq!(config.limits.timeout, Duration::from_secs(2));
        assert!(config.limits.output_overflow_fatal);
        assert_eq!(config.limits.max_call_depth, 3);
        assert_eq!(config.limits.max_output_bytes, 16);
        assert_eq!(config.limits.max_code_bytes, ExecutionLimits::default().max_code_bytes);
        assert!(Config::from_lookup(lookup_from(&[("SANDBOX_LIMITS", "{")])).is_err());
    }

    #[test]
    fn test_limits_serde_uses_humantime() {
        let json = serde_json::to_value(ExecutionLimits::default()).unwrap();
        assert_eq!(json["timeout"], "5s");
        let parsed: ExecutionLimits = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ExecutionLimits::default());
    }
}
