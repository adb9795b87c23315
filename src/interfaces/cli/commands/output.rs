//! 命令输出格式

use colored::Colorize;
use serde_json::{Value, json};

use crate::errors::GeoLocationError;
use crate::services::geoip::GeoLocationRecord;

pub(super) fn print_record(record: &GeoLocationRecord) {
    println!(
        "{} {} -> {}",
        "✓".bold().green(),
        record.ip.cyan(),
        record.formatted_location().bold()
    );

    let mut details = Vec::new();
    if let Some(ref code) = record.country_code {
        details.push(format!("country code: {}", code));
    }
    if let (Some(lat), Some(lon)) = (record.latitude, record.longitude) {
        details.push(format!("coords: {:.4}, {:.4}", lat, lon));
    }
    if let Some(ref tz) = record.timezone {
        details.push(format!("timezone: {}", tz));
    }
    if let Some(ref isp) = record.isp {
        details.push(format!("isp: {}", isp));
    }
    if let Some(ref asn) = record.as_number {
        details.push(format!("as: {}", asn));
    }
    if !details.is_empty() {
        println!("    {}", details.join("  ").dimmed());
    }
    if !record.is_complete() {
        println!("    {}", "(incomplete: country or city missing)".yellow());
    }
}

pub(super) fn print_failure(ip: &str, err: &GeoLocationError) {
    println!("{} {} -> {}", "✗".bold().red(), ip.cyan(), err.format_colored());
}

pub(super) fn result_json(
    ip: &str,
    result: &Result<GeoLocationRecord, GeoLocationError>,
) -> Value {
    match result {
        Ok(record) => json!({
            "ip": ip,
            "ok": true,
            "location": record.formatted_location(),
            "complete": record.is_complete(),
            "record": record,
        }),
        Err(e) => json!({
            "ip": ip,
            "ok": false,
            "error": {
                "code": e.code(),
                "type": e.error_type(),
                "message": e.message(),
                "status": e.http_status(),
            },
        }),
    }
}
