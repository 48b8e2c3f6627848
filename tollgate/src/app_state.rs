use std::sync::Arc;
use std::time::Duration;

use tollgate_core::clock::{Clock, SystemClock};
use tollgate_core::reporter::ViolationReporter;
use tollgate_core::settings::rate_limiting::RateLimitingConfig;
use tollgate_core::store::{InMemoryStore, Store};
use tollgate_core::sweeper::Sweeper;
use tollgate_core::{AdmissionEngine, ContextBuilder, TierRegistry};
use tracing::{info, warn};

use crate::notification::build_sinks;
use crate::settings::config::Settings;
use crate::stop_flag;

#[derive(Debug, Clone)]
pub struct AppState {
    pub settings: Settings,
    pub stop_flag: stop_flag::StopFlag,
    pub engine: Arc<AdmissionEngine>,
    pub context_builder: Arc<ContextBuilder>,
    pub reporter: ViolationReporter,
    pub sweeper: Sweeper,
}

pub type SharedAppState = Arc<AppState>;

impl AppState {
    /// Server state for already loaded settings. Tracing should be set up
    /// before, the registry logs its outcome.
    pub async fn new(settings: Settings) -> anyhow::Result<SharedAppState> {
        let stop_flag = stop_flag::StopFlag::new();
        stop_flag::register_signal_handler(&stop_flag);

        Self::from_settings(settings, stop_flag, Arc::new(SystemClock::new()))
    }

    /// Assemble the gate from settings. Spawns the violation reporter, so it
    /// has to run inside a tokio runtime.
    pub fn from_settings(
        settings: Settings,
        stop_flag: stop_flag::StopFlag,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<SharedAppState> {
        let rate_limiting = &settings.rate_limiting;

        let registry = match TierRegistry::from_settings(rate_limiting) {
            Ok(registry) => registry,
            Err(e) if !rate_limiting.enabled => {
                warn!("Ignoring invalid tiers while rate limiting is disabled: {}", e);
                TierRegistry::from_settings(&RateLimitingConfig::default())?
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            "Rate limiting {} with {} tiers",
            if rate_limiting.enabled {
                "enabled"
            } else {
                "disabled"
            },
            registry.len()
        );

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let engine = AdmissionEngine::new(store.clone(), Arc::new(registry), clock.clone())
            .with_charge_policy(rate_limiting.charge_policy);
        let sweeper = Sweeper::new(store, clock, rate_limiting.retention_factor);

        let reporting = &rate_limiting.reporting;
        let sinks = build_sinks(reporting);
        let reporter = if reporting.enabled && !sinks.is_empty() {
            // The delivery task ends with the last reporter clone.
            let (reporter, _handle) = ViolationReporter::spawn(
                sinks,
                reporting.queue_size,
                Duration::from_millis(reporting.timeout_ms),
            );
            reporter
        } else {
            ViolationReporter::disabled()
        };

        Ok(Arc::new(AppState {
            context_builder: Arc::new(ContextBuilder::from_settings(rate_limiting)),
            settings,
            stop_flag,
            engine: Arc::new(engine),
            reporter,
            sweeper,
        }))
    }
}
