//! Validate command (offline)

use colored::Colorize;

use crate::interfaces::cli::CliError;
use crate::utils::ip;

pub fn validate_ips(ips: &[String]) -> Result<(), CliError> {
    let mut rejected = 0;

    for input in ips {
        match ip::validate(input) {
            Ok(valid) => {
                let family = if valid.is_ipv6() { "IPv6" } else { "IPv4" };
                println!(
                    "{} {} {}",
                    "✓".bold().green(),
                    valid.to_string().cyan(),
                    format!("(public {})", family).dimmed()
                );
            }
            Err(e) => {
                rejected += 1;
                println!(
                    "{} {} {}",
                    "✗".bold().red(),
                    input.cyan(),
                    format!("({})", e.reason().describe()).yellow()
                );
            }
        }
    }

    if rejected > 0 {
        return Err(CliError::CommandError(format!(
            "{} of {} addresses are not resolvable",
            rejected,
            ips.len()
        )));
    }
    Ok(())
}
