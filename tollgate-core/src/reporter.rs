//! Out-of-band delivery of denied requests to audit sinks.
//!
//! `report` only enqueues; a background task fans each event out to the
//! configured sinks. Sink failures end in a log line and nowhere else.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::engine::{AdmissionDecision, DecisionReason};
use crate::error::ReportError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ViolationEvent {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub tier: String,
    pub identity: String,
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub method: String,
    pub path: String,
    pub resource_type: String,
    pub remaining: u64,
    pub retry_after_ms: u64,
    pub reason: DecisionReason,
    pub user_agent: Option<String>,
}

impl ViolationEvent {
    pub fn new(ctx: &RequestContext, decision: &AdmissionDecision) -> Self {
        ViolationEvent {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            tier: decision
                .limiting_tier
                .clone()
                .unwrap_or_else(|| decision.resource_tier.clone()),
            identity: ctx.identity.clone(),
            ip: ctx.ip.map(|ip| ip.to_string()),
            user_id: ctx.user_id.clone(),
            method: ctx.method.to_string(),
            path: ctx.path.clone(),
            resource_type: ctx.resource_type.clone(),
            remaining: decision.remaining,
            retry_after_ms: decision.retry_after_ms,
            reason: decision.reason,
            user_agent: ctx.header("user-agent").map(str::to_string),
        }
    }
}

/// Destination for violation events.
#[async_trait]
pub trait ViolationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn emit(&self, event: &ViolationEvent) -> anyhow::Result<()>;
}

/// Writes violations to the `tollgate::audit` tracing target.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        LogSink
    }
}

#[async_trait]
impl ViolationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, event: &ViolationEvent) -> anyhow::Result<()> {
        warn!(
            target: "tollgate::audit",
            event_id = %event.id,
            tier = %event.tier,
            identity = %event.identity,
            ip = event.ip.as_deref().unwrap_or("unknown"),
            method = %event.method,
            path = %event.path,
            reason = ?event.reason,
            retry_after_ms = event.retry_after_ms,
            "Rate limit violation"
        );
        Ok(())
    }
}

/// Handle used on the request path to hand violations to the sink task.
#[derive(Debug, Clone)]
pub struct ViolationReporter {
    sender: Option<mpsc::Sender<ViolationEvent>>,
}

impl ViolationReporter {
    /// Spawn the delivery task. It ends once every reporter clone is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        sinks: Vec<Arc<dyn ViolationSink>>,
        queue_size: usize,
        sink_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let handle = tokio::spawn(deliver(receiver, sinks, sink_timeout));
        (
            ViolationReporter {
                sender: Some(sender),
            },
            handle,
        )
    }

    /// A reporter that drops everything.
    pub fn disabled() -> Self {
        ViolationReporter { sender: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queue a violation for delivery. Never blocks; when the queue is full
    /// the event is dropped and `false` returned.
    pub fn report(&self, ctx: &RequestContext, decision: &AdmissionDecision) -> bool {
        if decision.allowed {
            return false;
        }
        let Some(sender) = &self.sender else {
            return false;
        };

        match sender.try_send(ViolationEvent::new(ctx, decision)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                debug!(event_id = %event.id, "Violation queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Violation reporter stopped, dropping event");
                false
            }
        }
    }
}

async fn deliver(
    mut receiver: mpsc::Receiver<ViolationEvent>,
    sinks: Vec<Arc<dyn ViolationSink>>,
    sink_timeout: Duration,
) {
    while let Some(event) = receiver.recv().await {
        let results = futures_util::future::join_all(
            sinks
                .iter()
                .map(|sink| emit_with_timeout(sink.as_ref(), &event, sink_timeout)),
        )
        .await;

        for err in results.into_iter().filter_map(Result::err) {
            warn!(event_id = %event.id, "Error reporting violation: {}", err);
        }
    }
    debug!("Violation reporter finished");
}

async fn emit_with_timeout(
    sink: &dyn ViolationSink,
    event: &ViolationEvent,
    timeout: Duration,
) -> Result<(), ReportError> {
    let emit = AssertUnwindSafe(sink.emit(event)).catch_unwind();
    match tokio::time::timeout(timeout, emit).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(source))) => Err(ReportError::Sink {
            sink: sink.name().to_string(),
            source,
        }),
        // A panicking sink must not take the delivery task down with it.
        Ok(Err(_)) => Err(ReportError::Panicked {
            sink: sink.name().to_string(),
        }),
        Err(_) => Err(ReportError::Timeout {
            sink: sink.name().to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ViolationEvent>>,
        notify: Notify,
    }

    #[async_trait]
    impl ViolationSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn emit(&self, event: &ViolationEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            self.notify.notify_one();
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ViolationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn emit(&self, _event: &ViolationEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink unavailable")
        }
    }

    #[derive(Default)]
    struct SlowSink {
        started: Notify,
    }

    #[async_trait]
    impl ViolationSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn emit(&self, _event: &ViolationEvent) -> anyhow::Result<()> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[derive(Default)]
    struct PanicOnceSink {
        calls: AtomicUsize,
        delivered: Notify,
    }

    #[async_trait]
    impl ViolationSink for PanicOnceSink {
        fn name(&self) -> &str {
            "panic-once"
        }

        async fn emit(&self, _event: &ViolationEvent) -> anyhow::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("sink blew up");
            }
            self.delivered.notify_one();
            Ok(())
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("10.0.0.1", Method::POST, "/api/login", "auth")
            .with_header("user-agent", "curl/8.0")
    }

    fn denied() -> AdmissionDecision {
        AdmissionDecision {
            allowed: false,
            remaining: 0,
            limit: 5,
            retry_after_ms: 180_000,
            reset_after_ms: 900_000,
            limiting_tier: Some("auth".to_string()),
            resource_tier: "auth".to_string(),
            reason: DecisionReason::LimitExceeded,
        }
    }

    #[test]
    fn test_event_from_decision() {
        let event = ViolationEvent::new(&ctx(), &denied());
        assert_eq!(event.tier, "auth");
        assert_eq!(event.method, "POST");
        assert_eq!(event.user_agent.as_deref(), Some("curl/8.0"));
        assert_eq!(event.retry_after_ms, 180_000);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"], "limit_exceeded");
    }

    #[tokio::test]
    async fn test_events_reach_every_sink_despite_failures() {
        let recording = Arc::new(RecordingSink::default());
        let (reporter, _handle) = ViolationReporter::spawn(
            vec![
                Arc::new(FailingSink),
                Arc::new(SlowSink::default()),
                recording.clone(),
            ],
            16,
            Duration::from_millis(50),
        );

        assert!(reporter.report(&ctx(), &denied()));
        recording.notify.notified().await;

        let events = recording.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, "/api/login");
    }

    #[tokio::test]
    async fn test_allowed_decisions_are_not_reported() {
        let recording = Arc::new(RecordingSink::default());
        let (reporter, _handle) =
            ViolationReporter::spawn(vec![recording.clone()], 16, Duration::from_secs(1));

        let allowed = AdmissionDecision {
            allowed: true,
            reason: DecisionReason::Admitted,
            limiting_tier: None,
            ..denied()
        };
        assert!(!reporter.report(&ctx(), &allowed));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let slow = Arc::new(SlowSink::default());
        let (reporter, handle) =
            ViolationReporter::spawn(vec![slow.clone()], 1, Duration::from_secs(3600));

        // The first event is taken by the delivery task and blocks in the
        // slow sink, the second fills the queue.
        assert!(reporter.report(&ctx(), &denied()));
        slow.started.notified().await;
        assert!(reporter.report(&ctx(), &denied()));
        assert!(!reporter.report(&ctx(), &denied()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_sink_panic_keeps_delivery_running() {
        let sink = Arc::new(PanicOnceSink::default());
        let (reporter, handle) =
            ViolationReporter::spawn(vec![sink.clone()], 16, Duration::from_secs(1));

        assert!(reporter.report(&ctx(), &denied()));
        assert!(reporter.report(&ctx(), &denied()));
        tokio::time::timeout(Duration::from_secs(2), sink.delivered.notified())
            .await
            .expect("second event should be delivered");

        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());
        assert!(reporter.report(&ctx(), &denied()));
    }

    #[tokio::test]
    async fn test_sink_panic_maps_to_report_error() {
        let sink = PanicOnceSink::default();
        let err = emit_with_timeout(
            &sink,
            &ViolationEvent::new(&ctx(), &denied()),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(&err, ReportError::Panicked { sink } if sink == "panic-once"));
        assert_eq!(err.to_string(), "sink panic-once panicked");
    }

    #[tokio::test]
    async fn test_delivery_task_ends_when_reporter_dropped() {
        let (reporter, handle) = ViolationReporter::spawn(vec![], 4, Duration::from_secs(1));
        drop(reporter);
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_reporter() {
        let reporter = ViolationReporter::disabled();
        assert!(!reporter.is_enabled());
        assert!(!reporter.report(&ctx(), &denied()));
    }
}
