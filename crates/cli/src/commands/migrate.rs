use rapport_db::migrations;

use crate::commands::{block_on_command, open_database, CommandFailure, CommandResult};

pub fn run() -> CommandResult {
    let outcome = block_on_command("migrate", |config| async move {
        let pool = open_database(&config).await?;
        let pending = migrations::pending_versions(&pool)
            .await
            .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;
        pool.close().await;

        if pending.is_empty() {
            Ok(())
        } else {
            Err(CommandFailure::new(
                "migration",
                format!("migrations still pending after run: {pending:?}"),
                5,
            ))
        }
    });

    match outcome {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(result) => result,
    }
}
