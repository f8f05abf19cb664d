use crate::commands::{block_on_command, open_runtime, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    let outcome = block_on_command("stats", |config| async move {
        let (runtime, pool) = open_runtime(&config).await?;
        let stats = runtime.bus().stats().await;
        pool.close().await;
        stats.map_err(|error| CommandFailure::query(error.to_string()))
    });

    match outcome {
        Ok(stats) => CommandResult::success_with(
            "stats",
            format!("{} events, {} unprocessed", stats.total, stats.unprocessed),
            stats,
        ),
        Err(result) => result,
    }
}
