//! Server configuration stored in a TOML file (default `instruction-executor.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::interruption::AutoConfirmPolicy;

/// Server configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields default to
/// the values a local stdio deployment expects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Step ceiling for `run_full_execution`.
    pub max_steps: usize,

    /// Pause between steps of a full run, in milliseconds.
    pub step_delay_ms: u64,

    /// Explicit step source. When unset the server searches for `instructions.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions_path: Option<PathBuf>,

    /// Diagnostic log file, relative to the working directory.
    pub log_path: PathBuf,

    pub auto_confirm: AutoConfirmConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutoConfirmConfig {
    pub enabled: bool,
    pub response_text: String,
    pub idle_timeout_secs: u64,
}

/// Bot relay endpoint. Absent means no relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelayConfig {
    /// `host:port` of the relay socket.
    pub addr: String,
    /// Session identifier sent as `build_id`. Generated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Default for AutoConfirmConfig {
    fn default() -> Self {
        let policy = AutoConfirmPolicy::default();
        Self {
            enabled: policy.enabled,
            response_text: policy.response_text,
            idle_timeout_secs: policy.idle_timeout.as_secs(),
        }
    }
}

impl AutoConfirmConfig {
    pub fn policy(&self) -> AutoConfirmPolicy {
        AutoConfirmPolicy {
            enabled: self.enabled,
            response_text: self.response_text.clone(),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            step_delay_ms: 100,
            instructions_path: None,
            log_path: PathBuf::from("execution.log"),
            auto_confirm: AutoConfirmConfig::default(),
            relay: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(anyhow!("log_path must not be empty"));
        }
        if self.auto_confirm.response_text.is_empty() {
            return Err(anyhow!("auto_confirm.response_text must not be empty"));
        }
        if let Some(relay) = &self.relay
            && relay.addr.trim().is_empty()
        {
            return Err(anyhow!("relay.addr must not be empty"));
        }
        Ok(())
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ServerConfig::default()`.
pub fn load_config(path: &Path) -> Result<ServerConfig> {
    if !path.exists() {
        let cfg = ServerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ServerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.auto_confirm.policy(), AutoConfirmPolicy::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = ServerConfig {
            max_steps: 4,
            instructions_path: Some(PathBuf::from("tasks/instructions.json")),
            relay: Some(RelayConfig {
                addr: "127.0.0.1:5000".to_string(),
                session_id: None,
            }),
            ..ServerConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "max_steps = 3\n\n[auto_confirm]\nenabled = false\nidle_timeout_secs = 5\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_steps, 3);
        assert_eq!(cfg.step_delay_ms, 100);
        let policy = cfg.auto_confirm.policy();
        assert!(!policy.enabled);
        assert_eq!(policy.response_text, "y\n");
        assert_eq!(policy.idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn zero_max_steps_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_steps = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_steps"));
    }
}
