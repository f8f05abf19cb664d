use crate::commands::{block_on_command, open_runtime, CommandFailure, CommandResult};

pub fn run(limit: u32) -> CommandResult {
    if limit == 0 {
        return CommandResult::failure("pending", "invalid_argument", "--limit must be >= 1", 7);
    }

    let outcome = block_on_command("pending", |config| async move {
        let (runtime, pool) = open_runtime(&config).await?;
        let actions = runtime.pending_actions(limit).await;
        pool.close().await;
        actions.map_err(|error| CommandFailure::query(error.to_string()))
    });

    match outcome {
        Ok(actions) => CommandResult::success_with(
            "pending",
            format!("{} action(s) awaiting approval", actions.len()),
            actions,
        ),
        Err(result) => result,
    }
}
