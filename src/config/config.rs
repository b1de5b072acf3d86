use crate::device::DeviceConfig;
use crate::server::socket::protocol::{MAX_SAMPLES_READ_BUFFER, SOCKET_HOST, SOCKET_PORT};
use crate::server::worker::DEFAULT_POLL_INTERVAL;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("default.toml");

/// 服务器配置部分
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerSection {
  #[serde(default = "default_host")]
  pub host: String,
  #[serde(default = "default_port")]
  pub port: u16,
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
}

fn default_host() -> String {
  SOCKET_HOST.to_string()
}

fn default_port() -> u16 {
  SOCKET_PORT
}

fn default_poll_interval_ms() -> u64 {
  DEFAULT_POLL_INTERVAL.as_millis() as u64
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      host: default_host(),
      port: default_port(),
      poll_interval_ms: default_poll_interval_ms(),
    }
  }
}

/// 设备配置部分
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeviceSection {
  /// 秒
  #[serde(default)]
  pub reply_latency: f64,
  #[serde(default = "default_max_samples")]
  pub max_samples: usize,
}

fn default_max_samples() -> usize {
  MAX_SAMPLES_READ_BUFFER
}

impl Default for DeviceSection {
  fn default() -> Self {
    Self {
      reply_latency: 0.0,
      max_samples: default_max_samples(),
    }
  }
}

/// 日志配置部分
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoggingSection {
  #[serde(default)]
  pub quiet: bool,
  #[serde(default)]
  pub trace_file: String,
}

/// 统一的应用配置
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub device: DeviceSection,
  #[serde(default)]
  pub logging: LoggingSection,
}

impl AppConfig {
  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.server.host, self.server.port)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.server.poll_interval_ms)
  }

  /// Latency falls back to zero if it was never validated.
  pub fn device_config(&self) -> DeviceConfig {
    DeviceConfig {
      max_samples: self.device.max_samples,
      reply_latency: Duration::try_from_secs_f64(self.device.reply_latency).unwrap_or_default(),
    }
  }

  pub fn trace_path(&self) -> Option<PathBuf> {
    if self.logging.trace_file.trim().is_empty() {
      None
    } else {
      Some(PathBuf::from(&self.logging.trace_file))
    }
  }
}

/// CLI 覆写项
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
  pub host: Option<String>,
  pub port: Option<u16>,
  pub poll_interval_ms: Option<u64>,
  pub reply_latency: Option<f64>,
  pub max_samples: Option<usize>,
  pub quiet: bool,
  pub trace_file: Option<String>,
}

/// 加载内置默认配置
pub fn load_default_config() -> io::Result<AppConfig> {
  parse_config(DEFAULT_CONFIG)
}

/// 从指定文件加载配置
pub fn load_config_file(path: &Path) -> io::Result<AppConfig> {
  let content = fs::read_to_string(path)
    .map_err(|e| io::Error::new(io::ErrorKind::NotFound, format!("cannot read config file {:?}: {}", path, e)))?;

  parse_config(&content)
}

pub fn parse_config(content: &str) -> io::Result<AppConfig> {
  toml::from_str::<AppConfig>(content)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("failed to parse TOML config: {}", e)))
}

/// 合并两个配置（后者覆盖前者中非默认的字段）
pub fn merge_config(mut base: AppConfig, override_config: AppConfig) -> AppConfig {
  let defaults = AppConfig::default();

  // 合并server部分
  if override_config.server.host != defaults.server.host {
    base.server.host = override_config.server.host;
  }
  if override_config.server.port != defaults.server.port {
    base.server.port = override_config.server.port;
  }
  if override_config.server.poll_interval_ms != defaults.server.poll_interval_ms {
    base.server.poll_interval_ms = override_config.server.poll_interval_ms;
  }

  // 合并device部分
  if override_config.device.reply_latency != defaults.device.reply_latency {
    base.device.reply_latency = override_config.device.reply_latency;
  }
  if override_config.device.max_samples != defaults.device.max_samples {
    base.device.max_samples = override_config.device.max_samples;
  }

  // 合并logging部分
  if override_config.logging.quiet {
    base.logging.quiet = true;
  }
  if !override_config.logging.trace_file.is_empty() {
    base.logging.trace_file = override_config.logging.trace_file;
  }

  base
}

/// 应用CLI参数覆写配置
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &CliOverrides) {
  if let Some(host) = &cli.host {
    config.server.host = host.clone();
  }
  if let Some(port) = cli.port {
    config.server.port = port;
  }
  if let Some(ms) = cli.poll_interval_ms {
    config.server.poll_interval_ms = ms;
  }
  if let Some(latency) = cli.reply_latency {
    config.device.reply_latency = latency;
  }
  if let Some(n) = cli.max_samples {
    config.device.max_samples = n;
  }
  if cli.quiet {
    config.logging.quiet = true;
  }
  if let Some(file) = &cli.trace_file {
    config.logging.trace_file = file.clone();
  }
}

/// 验证配置
pub fn validate_config(config: &AppConfig) -> io::Result<()> {
  if config.server.host.trim().is_empty() {
    return Err(io::Error::new(io::ErrorKind::InvalidData, "host cannot be empty"));
  }

  if config.server.poll_interval_ms == 0 {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      "poll_interval_ms must be greater than 0",
    ));
  }

  let latency = config.device.reply_latency;
  if Duration::try_from_secs_f64(latency).is_err() {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      format!("reply_latency must be a non-negative number of seconds, got {}", latency),
    ));
  }

  if config.device.max_samples == 0 {
    return Err(io::Error::new(
      io::ErrorKind::InvalidData,
      "max_samples must be greater than 0",
    ));
  }

  Ok(())
}

/// 加载并合并配置
///
/// 流程：
/// 1. 加载默认配置
/// 2. 如果提供了自定义配置文件，加载并合并
/// 3. 应用CLI参数覆写
/// 4. 验证配置
pub fn load_and_merge_configs(custom_config_path: Option<&Path>, cli: &CliOverrides) -> io::Result<AppConfig> {
  let mut config = load_default_config()?;

  if let Some(custom_path) = custom_config_path {
    let custom_config = load_config_file(custom_path)?;
    config = merge_config(config, custom_config);
  }

  apply_cli_overrides(&mut config, cli);

  validate_config(&config)?;

  Ok(config)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_toml_matches_struct_defaults() {
    assert_eq!(load_default_config().unwrap(), AppConfig::default());
  }

  #[test]
  fn partial_file_keeps_other_defaults() {
    let config = parse_config("[device]\nreply_latency = 1.0\n").unwrap();
    assert_eq!(config.device.reply_latency, 1.0);
    assert_eq!(config.device.max_samples, MAX_SAMPLES_READ_BUFFER);
    assert_eq!(config.server.port, SOCKET_PORT);
  }

  #[test]
  fn merge_takes_non_default_fields() {
    let base = AppConfig::default();
    let custom = parse_config("[server]\nport = 6000\n[logging]\ntrace_file = \"t.jsonl\"\n").unwrap();
    let merged = merge_config(base, custom);
    assert_eq!(merged.server.port, 6000);
    assert_eq!(merged.server.host, SOCKET_HOST);
    assert_eq!(merged.trace_path(), Some(PathBuf::from("t.jsonl")));
  }

  #[test]
  fn cli_overrides_win() {
    let mut config = AppConfig::default();
    apply_cli_overrides(
      &mut config,
      &CliOverrides {
        port: Some(0),
        reply_latency: Some(0.25),
        quiet: true,
        ..Default::default()
      },
    );
    assert_eq!(config.server.port, 0);
    assert!(config.logging.quiet);
    assert_eq!(config.device_config().reply_latency, Duration::from_millis(250));
  }

  #[test]
  fn rejects_bad_values() {
    let mut config = AppConfig::default();
    config.device.reply_latency = -1.0;
    assert!(validate_config(&config).is_err());

    let mut config = AppConfig::default();
    config.device.reply_latency = f64::NAN;
    assert!(validate_config(&config).is_err());

    let mut config = AppConfig::default();
    config.device.max_samples = 0;
    assert!(validate_config(&config).is_err());

    let mut config = AppConfig::default();
    config.server.poll_interval_ms = 0;
    assert!(validate_config(&config).is_err());

    assert!(validate_config(&AppConfig::default()).is_ok());
  }

  #[test]
  fn unreadable_file_is_not_found() {
    let err = load_and_merge_configs(Some(Path::new("/nonexistent/monitor-mock.toml")), &CliOverrides::default())
      .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
  }
}
