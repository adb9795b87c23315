//! Resolve command

use colored::Colorize;

use super::output::{print_failure, print_record, result_json};
use crate::interfaces::cli::CliError;
use crate::services::geoip::GeoLocationResolver;

pub async fn resolve_ips(
    resolver: &GeoLocationResolver,
    ips: &[String],
    force_refresh: bool,
    json: bool,
) -> Result<(), CliError> {
    let results = resolver.resolve_many(ips, force_refresh).await;
    let failed = results.iter().filter(|r| r.is_err()).count();

    if json {
        let values: Vec<_> = ips
            .iter()
            .zip(&results)
            .map(|(ip, result)| result_json(ip, result))
            .collect();
        let rendered = serde_json::to_string_pretty(&values)
            .map_err(|e| CliError::CommandError(format!("Failed to render JSON: {}", e)))?;
        println!("{}", rendered);
    } else {
        for (ip, result) in ips.iter().zip(&results) {
            match result {
                Ok(record) => print_record(record),
                Err(e) => print_failure(ip, e),
            }
        }

        let stats = resolver.stats();
        println!();
        println!(
            "{} {} resolved ({} from cache, {} provider calls)",
            "ℹ".bold().blue(),
            (results.len() - failed).to_string().green(),
            stats.cache_hits,
            stats.outbound_calls
        );
    }

    if failed > 0 {
        return Err(CliError::ResolveFailed {
            failed,
            total: results.len(),
        });
    }
    Ok(())
}
