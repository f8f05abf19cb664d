use serde::Serialize;

use crate::commands::{block_on_command, open_runtime, CommandFailure, CommandResult};

#[derive(Debug, Serialize)]
struct PurgeSummary {
    days: u32,
    purged: u64,
}

/// `days` defaults to `bus.retention_days`. Unprocessed events survive.
pub fn run(days: Option<u32>) -> CommandResult {
    let outcome = block_on_command("purge", |config| async move {
        let days = days.unwrap_or(config.bus.retention_days);
        let (runtime, pool) = open_runtime(&config).await?;
        let purged = runtime.bus().purge_older_than(days).await;
        pool.close().await;
        purged
            .map(|purged| PurgeSummary { days, purged })
            .map_err(|error| CommandFailure::query(error.to_string()))
    });

    match outcome {
        Ok(summary) => CommandResult::success_with(
            "purge",
            format!(
                "purged {} processed event(s) older than {} day(s)",
                summary.purged, summary.days
            ),
            summary,
        ),
        Err(result) => result,
    }
}
