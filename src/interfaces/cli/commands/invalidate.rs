//! Invalidate command

use colored::Colorize;

use crate::interfaces::cli::CliError;
use crate::services::geoip::GeoLocationResolver;

pub async fn invalidate_ips(resolver: &GeoLocationResolver, ips: &[String]) -> Result<(), CliError> {
    let mut rejected = 0;

    for ip in ips {
        match resolver.invalidate(ip).await {
            Ok(()) => println!("{} Invalidated {}", "✓".bold().green(), ip.cyan()),
            Err(e) => {
                rejected += 1;
                println!("{} {} -> {}", "✗".bold().red(), ip.cyan(), e.format_colored());
            }
        }
    }

    if rejected > 0 {
        return Err(CliError::CommandError(format!(
            "{} of {} addresses rejected",
            rejected,
            ips.len()
        )));
    }
    Ok(())
}
