use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
  Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(
  Serialize, Deserialize, Debug, Clone, Copy, Default, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl From<LogLevel> for tracing::Level {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Trace => tracing::Level::TRACE,
      LogLevel::Debug => tracing::Level::DEBUG,
      LogLevel::Info => tracing::Level::INFO,
      LogLevel::Warn => tracing::Level::WARN,
      LogLevel::Error => tracing::Level::ERROR,
    }
  }
}

#[derive(
  Serialize, Deserialize, Debug, Clone, Copy, Default, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LogConfig {
  /// The logging verbosity. Default: `info`
  #[serde(default)]
  pub level: LogLevel,

  /// Whether to log to stdout in standard or json format,
  /// or not at all. Default: `standard`
  #[serde(default)]
  pub stdio: StdioLogMode,

  /// Use pretty (multi-line) stdio logging.
  #[serde(default)]
  pub pretty: bool,

  /// Whether to emit ansi colors in the logs.
  #[serde(default = "default_ansi")]
  pub ansi: bool,

  /// Include the event target (module path) in the logs.
  #[serde(default)]
  pub location: bool,
}

fn default_ansi() -> bool {
  true
}

pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let log_level: tracing::Level = config.level.into();

  let registry =
    Registry::default().with(LevelFilter::from(log_level));

  match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false)
          .with_target(config.location)
          .with_ansi(config.ansi),
      )
      .try_init(),
    (StdioLogMode::Standard, false) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false)
          .with_target(config.location)
          .with_ansi(config.ansi),
      )
      .try_init(),
    (StdioLogMode::Json, _) => registry
      .with(tracing_subscriber::fmt::layer().json())
      .try_init(),
    (StdioLogMode::None, _) => Ok(()),
  }
  .context("failed to init logger")
}
