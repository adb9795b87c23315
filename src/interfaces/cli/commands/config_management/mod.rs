//! Configuration CLI commands

mod config_gen;
mod show;

pub use config_gen::config_generate;
pub use show::config_show;
