//! Periodic housekeeping. Runs outside any tenant scope.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::AppError;
use crate::services::session::SessionService;
use crate::services::transient::TransientStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub expired_sessions: usize,
    pub purged_credentials: u64,
    pub purged_transient: u64,
}

pub async fn run_maintenance(
    sessions: &SessionService,
    transient: &dyn TransientStore,
) -> Result<MaintenanceReport, AppError> {
    let sweep = sessions.sweep_expired().await?;
    let purged_transient = transient.purge_expired().await.map_err(AppError::Storage)?;
    Ok(MaintenanceReport {
        expired_sessions: sweep.expired_sessions,
        purged_credentials: sweep.purged_credentials,
        purged_transient,
    })
}

/// Spawns the sweep loop. The first pass runs one full period after start.
pub fn spawn_maintenance(
    sessions: Arc<SessionService>,
    transient: Arc<dyn TransientStore>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match run_maintenance(&sessions, transient.as_ref()).await {
                Ok(report) => {
                    if report != MaintenanceReport::default() {
                        tracing::info!(
                            expired_sessions = report.expired_sessions,
                            purged_credentials = report.purged_credentials,
                            purged_transient = report.purged_transient,
                            "Maintenance sweep completed"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Maintenance sweep failed");
                }
            }
        }
    })
}
