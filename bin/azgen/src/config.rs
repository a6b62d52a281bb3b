//! # Azgen configuration
//!
//! Configuration comes from command line args ([CliArgs]) with
//! environment variable fallbacks ([Env]) for the logging knobs.
//! Args have priority over the environment.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use logger::{LogConfig, LogLevel, StdioLogMode};
use serde::Deserialize;

/// Generate typed Azure API bindings from OpenAPI specs.
///
/// Example command:
/// ```sh
/// azgen \
///   https://raw.githubusercontent.com/Azure/azure-rest-api-specs/main/ \
///   specification/authorization/resource-manager/Microsoft.Authorization/stable/2022-04-01/authorization-RoleAssignmentsCalls.json \
///   generated/src \
///   --package crate::generated
/// ```
#[derive(Parser)]
#[command(name = "azgen", about, version)]
pub struct CliArgs {
  /// Uri of the root the spec files live under.
  /// `http(s)://`, `file://`, or a bare directory.
  pub root: String,

  /// Comma or semicolon separated list of spec files,
  /// relative to the root.
  pub specs: String,

  /// Directory the generated modules are written into.
  pub output: PathBuf,

  /// Rust path prefix used for cross-module imports in the
  /// generated code.
  #[arg(long, short = 'p', default_value = "crate")]
  pub package: String,

  /// Configure the logging level: error, warn, info, debug,
  /// trace. If passed, will override AZGEN_LOG_LEVEL.
  #[arg(long, value_enum)]
  pub log_level: Option<LogLevel>,

  /// Log to stdout in json format.
  #[arg(long)]
  pub json_logs: bool,
}

/// Environment fallbacks for the logging knobs.
#[derive(Deserialize)]
pub struct Env {
  #[serde(default)]
  pub azgen_log_level: Option<LogLevel>,
}

pub struct AzgenConfig {
  pub root: String,
  pub specs: String,
  pub output: PathBuf,
  pub package: String,
  pub logging: LogConfig,
}

pub fn load() -> anyhow::Result<AzgenConfig> {
  let args = CliArgs::parse();
  let env: Env = envy::from_env()
    .context("failed to parse environment")?;
  let logging = LogConfig {
    level: args
      .log_level
      .or(env.azgen_log_level)
      .unwrap_or_default(),
    stdio: if args.json_logs {
      StdioLogMode::Json
    } else {
      StdioLogMode::Standard
    },
    ..Default::default()
  };
  Ok(AzgenConfig {
    root: args.root,
    specs: args.specs,
    output: args.output,
    package: args.package,
    logging,
  })
}
