use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::state::SharedState;

const SWEEP_EVERY: Duration = Duration::from_secs(30);

/// Drop sessions that were created but never had their progress stream
/// opened, until `cancel` fires.
pub async fn run_session_sweeper(state: SharedState, cancel: CancellationToken) {
    let ttl = chrono::Duration::from_std(state.config.pending_session_ttl)
        .unwrap_or_else(|_| chrono::Duration::seconds(300));
    info!(ttl_secs = ttl.num_seconds(), "session_sweeper: started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(SWEEP_EVERY.min(state.config.pending_session_ttl)) => {
                let dropped = state.sweep_older_than(Utc::now() - ttl).await;
                if dropped > 0 {
                    let pending = state.pending_sessions().await;
                    info!(dropped, pending, "session_sweeper: expired pending sessions");
                }
            }
        }
    }

    info!("session_sweeper: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use crate::test_support::{deps, session, FakeFetcher, FakeTrigger};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweeper_expires_and_stops() {
        let cfg = AppConfig {
            pending_session_ttl: Duration::from_millis(50),
            ..AppConfig::default()
        };
        let state = Arc::new(AppState::new(
            cfg,
            deps(FakeFetcher::missing(), Arc::new(FakeTrigger::ok())),
        ));
        state.insert_session(session()).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session_sweeper(state.clone(), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(state.pending_sessions().await, 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
