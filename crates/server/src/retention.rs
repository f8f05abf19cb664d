use std::sync::Arc;
use std::time::Duration;

use rapport_agent::AgentRuntime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Periodically deletes processed events older than `retention_days`.
/// The first sweep runs one full interval after start.
pub fn spawn(
    runtime: Arc<AgentRuntime>,
    retention_days: u32,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep(&runtime, retention_days).await;
                }
                _ = async { let _ = shutdown.wait_for(|stopping| *stopping).await; } => break,
            }
        }

        info!(
            event_name = "system.retention.stopped",
            correlation_id = "shutdown",
            "retention sweeper stopped"
        );
    })
}

async fn sweep(runtime: &AgentRuntime, retention_days: u32) -> Option<u64> {
    match runtime.bus().purge_older_than(retention_days).await {
        Ok(purged) => Some(purged),
        Err(error) => {
            warn!(
                event_name = "system.retention.failed",
                correlation_id = "retention",
                retention_days,
                error = %error,
                "retention sweep failed"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use rapport_agent::{AgentRuntime, LoggingExecutor, RuntimeRepositories};
    use rapport_core::chrono::{Duration as ChronoDuration, Utc};
    use rapport_core::config::AppConfig;
    use rapport_core::domain::event::{
        EventId, EventPayload, SegmentChangedPayload, SourceEntity, SystemEvent,
    };
    use rapport_db::EventRepository;
    use tokio::sync::watch;

    use super::{spawn, sweep};

    fn runtime() -> Arc<AgentRuntime> {
        Arc::new(AgentRuntime::new(
            RuntimeRepositories::in_memory(),
            Arc::new(LoggingExecutor),
            &AppConfig::default(),
        ))
    }

    async fn store_event(runtime: &AgentRuntime, id: &str, age_days: i64, processed: bool) {
        let mut event = SystemEvent::new(
            EventPayload::SegmentChanged(SegmentChangedPayload {
                old_segment: Some("acquaintance".to_string()),
                new_segment: Some("friend".to_string()),
            }),
            SourceEntity::new("segmenter", "weekly"),
            None,
        )
        .expect("valid event");
        event.id = EventId(id.to_string());
        event.created_at = Utc::now() - ChronoDuration::days(age_days);

        let events = &runtime.repositories().events;
        events.insert(&event).await.expect("insert event");
        if processed {
            events.mark_processed(&event.id).await.expect("mark processed");
        }
    }

    #[tokio::test]
    async fn sweep_keeps_recent_and_unprocessed_events() {
        let runtime = runtime();
        store_event(&runtime, "evt-old", 120, true).await;
        store_event(&runtime, "evt-old-pending", 120, false).await;
        store_event(&runtime, "evt-fresh", 2, true).await;

        assert_eq!(sweep(&runtime, 90).await, Some(1));

        let stats = runtime.bus().stats().await.expect("stats");
        assert_eq!(stats.total, 2);
        assert_eq!(stats.unprocessed, 1);
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown_signal() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn(runtime(), 90, Duration::from_secs(3_600), shutdown_rx);

        shutdown_tx.send(true).expect("send shutdown");

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper should stop promptly")
            .expect("sweeper task should not panic");
    }
}
