//! Command-line interface definitions using clap
//!
//! This module defines the CLI structure for geolocator using clap's derive macros.

use clap::{Parser, Subcommand};

/// Geolocator - IP geolocation resolver
#[derive(Parser)]
#[command(name = "geolocator")]
#[command(version)]
#[command(about = "Resolve geographic metadata for public IP addresses", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short = 'c', global = true, default_value = "config.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve one or more IP addresses
    Resolve {
        /// IP addresses to resolve
        #[arg(required = true)]
        ips: Vec<String>,

        /// Skip the cache and query the provider
        #[arg(long)]
        force_refresh: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-resolve an IP with the refresh retry schedule
    Refresh {
        /// IP address to refresh
        ip: String,

        /// Reuse a fresh cache entry instead of forcing a provider lookup
        #[arg(long)]
        no_force: bool,
    },

    /// Drop cached results
    Invalidate {
        /// IP addresses to invalidate
        #[arg(required = true)]
        ips: Vec<String>,
    },

    /// Check whether addresses are public and resolvable (no network access)
    Validate {
        #[arg(required = true)]
        ips: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Configuration management commands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Generate {
        /// Output path (default: config.example.toml)
        output_path: Option<String>,

        /// Force overwrite without confirmation
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration (file + environment)
    Show,
}

impl Commands {
    /// Whether the command needs a resolver (and therefore logging + cache backend)
    pub fn needs_resolver(&self) -> bool {
        matches!(
            self,
            Commands::Resolve { .. } | Commands::Refresh { .. } | Commands::Invalidate { .. }
        )
    }
}
