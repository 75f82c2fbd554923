//! Background loops: mailbox polling and the response-timeout sweep.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use turnover_core::MailSource;

use crate::intake::Intake;
use crate::workflow::CoordinationWorkflow;

/// Sweep loop: expires overdue cleaner requests on every tick.
/// A failing sweep is logged and retried on the next tick.
pub async fn spawn_sweeper(workflow: Arc<CoordinationWorkflow>, interval_secs: u64) {
    let interval_secs = interval_secs.max(1);
    tracing::info!("⏰ Sweeper started (check every {}s)", interval_secs);

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match workflow.expire_overdue(Utc::now()).await {
            Ok(report) => {
                for error in &report.errors {
                    tracing::warn!("⚠️ Sweep: {error}");
                }
            }
            Err(e) => tracing::error!("❌ Sweep failed: {e}"),
        }
    }
}

/// Polling loop: one intake run per tick.
pub async fn spawn_intake(intake: Arc<Intake>, source: Arc<dyn MailSource>, every_secs: u64) {
    let every_secs = every_secs.max(1);
    tracing::info!("📬 Intake polling started (every {}s)", every_secs);

    let mut interval = tokio::time::interval(Duration::from_secs(every_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if let Err(e) = intake.run(source.as_ref()).await {
            tracing::error!("❌ Intake run failed: {e}");
        }
    }
}
