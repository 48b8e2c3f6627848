use tracing::instrument;

use crate::app_state::SharedAppState;

pub async fn setup_scheduler(
    app_state: SharedAppState,
) -> anyhow::Result<tokio::task::JoinHandle<anyhow::Result<()>>> {
    let stop_flag = app_state.stop_flag.clone();
    let mut scheduler = clokwerk::AsyncScheduler::new();

    {
        // Evict idle buckets.
        let app_state = app_state.clone();
        scheduler
            .every(
                app_state
                    .settings
                    .rate_limiting
                    .sweep_interval
                    .clone()
                    .into(),
            )
            .run(move || {
                let app_state = app_state.clone();
                async move {
                    sweep_buckets(app_state).await;
                }
            });
    }
    {
        // Sample the bucket gauge between sweeps.
        let app_state = app_state.clone();
        scheduler
            .every(clokwerk::Interval::Seconds(30))
            .run(move || {
                let app_state = app_state.clone();
                async move {
                    crate::metrics::record_bucket_count(app_state.engine.store().len());
                }
            });
    }

    let handle = tokio::spawn(async move {
        while !stop_flag.is_stopped() {
            scheduler.run_pending().await;
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        Ok(())
    });

    Ok(handle)
}

#[instrument(skip(app_state))]
pub async fn sweep_buckets(app_state: SharedAppState) -> usize {
    let removed = app_state.sweeper.run_once();
    let remaining = app_state.engine.store().len();
    if removed > 0 {
        tracing::info!("Evicted {} idle buckets, {} left", removed, remaining);
    }
    crate::metrics::record_sweep(removed, remaining);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::AppState;
    use crate::settings::config::Settings;
    use crate::stop_flag::StopFlag;
    use axum::http::Method;
    use std::sync::Arc;
    use std::time::Duration;
    use tollgate_core::clock::MockClock;
    use tollgate_core::RequestContext;

    #[tokio::test]
    async fn test_sweep_buckets_evicts_idle_buckets() {
        let clock = MockClock::default();
        let state =
            AppState::from_settings(Settings::default(), StopFlag::new(), Arc::new(clock.clone()))
                .unwrap();

        let ctx = RequestContext::new("10.0.0.1", Method::GET, "/api/items", "api");
        assert!(state.engine.admit(&ctx).allowed);
        assert_eq!(state.engine.store().len(), 2);

        assert_eq!(sweep_buckets(state.clone()).await, 0);

        // Both tiers refill over one minute, retention is two intervals.
        clock.advance(Duration::from_secs(121));
        assert_eq!(sweep_buckets(state.clone()).await, 2);
        assert!(state.engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_stops_with_flag() {
        let state = AppState::from_settings(
            Settings::default(),
            StopFlag::new(),
            Arc::new(MockClock::default()),
        )
        .unwrap();

        let handle = setup_scheduler(state.clone()).await.unwrap();
        state.stop_flag.stop();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler should stop")
            .unwrap()
            .unwrap();
    }
}
