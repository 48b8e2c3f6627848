pub mod webhook;

use std::sync::Arc;

use tollgate_core::reporter::{LogSink, ViolationSink};
use tollgate_core::settings::rate_limiting::ReportingSettings;

use webhook::WebhookSink;

/// Sinks violation events are delivered to, as configured.
pub fn build_sinks(settings: &ReportingSettings) -> Vec<Arc<dyn ViolationSink>> {
    let mut sinks: Vec<Arc<dyn ViolationSink>> = vec![];
    if settings.log {
        sinks.push(Arc::new(LogSink::new()));
    }
    if let Some(webhook) = &settings.webhook {
        sinks.push(Arc::new(WebhookSink::new(webhook)));
    }
    sinks
}
