//! CLI interface module
//!
//! This module provides command-line interface functionality for geolocator.

pub mod commands;

use std::fmt;
use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::config::{StaticConfig, init_config};
use crate::errors::GeoLocationError;
use crate::runtime::lifetime::startup::{StartupContext, prepare_startup};
use crate::system::logging::init_logging;
use commands::{config_management, invalidate_ips, refresh_ip, resolve_ips, validate_ips};

#[derive(Debug)]
pub enum CliError {
    ConfigError(String),
    StartupError(String),
    /// 至少一个 IP 解析失败（详情已输出）
    ResolveFailed { failed: usize, total: usize },
    CommandError(String),
}

impl CliError {
    /// Format as simple output
    pub fn format_simple(&self) -> String {
        match self {
            CliError::ConfigError(msg) => format!("Config error: {}", msg),
            CliError::StartupError(msg) => format!("Startup error: {}", msg),
            CliError::ResolveFailed { failed, total } => {
                format!("{} of {} resolutions failed", failed, total)
            }
            CliError::CommandError(msg) => format!("Command error: {}", msg),
        }
    }

    /// Format as colored output
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        match self {
            CliError::ConfigError(msg) => {
                format!("{} {}", "Config error:".yellow().bold(), msg.white())
            }
            CliError::StartupError(msg) => {
                format!("{} {}", "Startup error:".red().bold(), msg.white())
            }
            CliError::ResolveFailed { failed, total } => format!(
                "{} {} of {} resolutions failed",
                "✗".red().bold(),
                failed.to_string().red(),
                total
            ),
            CliError::CommandError(msg) => {
                format!("{} {}", "Command error:".red().bold(), msg.white())
            }
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for CliError {}

impl From<GeoLocationError> for CliError {
    fn from(err: GeoLocationError) -> Self {
        CliError::CommandError(err.format_simple())
    }
}

/// Run a CLI command from clap-parsed input
pub async fn run_cli(cli: Cli) -> Result<(), CliError> {
    let Cli { config, command } = cli;

    match command {
        // Generate / validate don't need configuration
        Commands::Config {
            action: ConfigCommands::Generate { output_path, force },
        } => config_management::config_generate(output_path, force).await,
        Commands::Validate { ips } => validate_ips(&ips),

        Commands::Config {
            action: ConfigCommands::Show,
        } => config_management::config_show(&*load_config(&config)?),

        Commands::Resolve {
            ips,
            force_refresh,
            json,
        } => {
            let (ctx, _guard) = start(&config).await?;
            resolve_ips(&ctx.resolver, &ips, force_refresh, json).await
        }

        Commands::Refresh { ip, no_force } => {
            let (ctx, _guard) = start(&config).await?;
            refresh_ip(&ctx.refresh, &ip, !no_force).await
        }

        Commands::Invalidate { ips } => {
            let (ctx, _guard) = start(&config).await?;
            invalidate_ips(&ctx.resolver, &ips).await
        }
    }
}

fn load_config(path: &str) -> Result<Arc<StaticConfig>, CliError> {
    init_config(path).map_err(|e| CliError::ConfigError(format!("{:#}", e)))
}

/// 加载配置、初始化日志并组装解析器；guard 需要活到命令结束
async fn start(path: &str) -> Result<(StartupContext, WorkerGuard), CliError> {
    let static_config = load_config(path)?;

    let guard = init_logging(&static_config.logging)
        .map_err(|e| CliError::StartupError(format!("{:#}", e)))?;

    let ctx = prepare_startup(&static_config)
        .await
        .map_err(|e| CliError::StartupError(format!("{:#}", e)))?;

    Ok((ctx, guard))
}
