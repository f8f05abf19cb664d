use rapport_core::domain::graph::EntityRef;

use crate::commands::{block_on_command, open_runtime, CommandFailure, CommandResult};

pub fn run(entity_type: &str, entity_id: &str, depth: Option<u32>) -> CommandResult {
    if entity_type.trim().is_empty() || entity_id.trim().is_empty() {
        return CommandResult::failure(
            "why",
            "invalid_argument",
            "entity type and id must be non-empty",
            7,
        );
    }

    let entity = EntityRef::new(entity_type.trim(), entity_id.trim());
    let outcome = block_on_command("why", |config| async move {
        let (runtime, pool) = open_runtime(&config).await?;
        let chain = runtime.reasoning_chain(&entity, depth).await;
        pool.close().await;
        chain
            .map(|chain| (entity, chain))
            .map_err(|error| CommandFailure::query(error.to_string()))
    });

    match outcome {
        Ok((entity, chain)) => {
            let message = if chain.is_empty() {
                format!("no provenance recorded for {entity}")
            } else {
                format!(
                    "{} trace(s) and {} connected node(s) for {entity}",
                    chain.traces.len(),
                    chain.connected_nodes.len()
                )
            };
            CommandResult::success_with("why", message, chain)
        }
        Err(result) => result,
    }
}
