//! Refresh command

use super::output::{print_failure, print_record};
use crate::interfaces::cli::CliError;
use crate::services::geoip::RefreshTask;

pub async fn refresh_ip(task: &RefreshTask, ip: &str, force_refresh: bool) -> Result<(), CliError> {
    match task.run(ip, force_refresh).await {
        Ok(record) => {
            print_record(&record);
            Ok(())
        }
        Err(e) => {
            print_failure(ip, &e);
            Err(CliError::ResolveFailed {
                failed: 1,
                total: 1,
            })
        }
    }
}
