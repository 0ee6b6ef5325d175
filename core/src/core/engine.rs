use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::{stream, StreamExt};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::result_aggregator::{ResultAggregator, ScanReport, SourceOutcome, SourceRun};
use crate::core::target::ValidatedRequest;
use crate::error::SourceError;
use crate::modules::{IntelSource, ScanContext, SourceRegistry};
use crate::SinkRef;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub concurrency: usize,
    pub source_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            source_timeout: config.source_timeout(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            source_timeout: Duration::from_secs(600),
        }
    }
}

/// Fans a validated request out to every requested source and folds the
/// outcomes into one report.
///
/// A source that is missing, errors, overruns its deadline or is cancelled
/// never fails the scan; it only shows up in its `SourceOutcome`.
pub struct ScanEngine {
    registry: SourceRegistry,
    settings: EngineSettings,
}

impl ScanEngine {
    pub fn new(registry: SourceRegistry, settings: EngineSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        request: &ValidatedRequest,
        cancel: &CancellationToken,
        sink: SinkRef,
    ) -> ScanReport {
        let started_at = Utc::now();
        let mut runs = Vec::with_capacity(request.services.len());
        let mut runnable: Vec<Arc<dyn IntelSource>> = Vec::new();

        for &service in &request.services {
            match self.registry.get(service) {
                None => {
                    debug!("{} not configured, skipping", service.label());
                    runs.push(SourceRun::without_findings(SourceOutcome::skipped(service, "not configured")));
                }
                Some(source) if !source.supports(&request.target) => {
                    runs.push(SourceRun::without_findings(SourceOutcome::skipped(
                        service,
                        "target type not supported",
                    )));
                }
                Some(source) => runnable.push(source),
            }
        }

        let total = runnable.len();
        sink.on_log(
            "phase",
            &format!("[*] Querying {} source(s) for {}", total, request.target),
        );

        let ctx = ScanContext {
            cancel: cancel.clone(),
            sink: Arc::clone(&sink),
        };
        let deadline = self.settings.source_timeout;

        // Collected eagerly: the future returned by `run` must stay `Send` for axum handlers.
        let tasks: Vec<BoxFuture<'_, SourceRun>> = runnable
            .into_iter()
            .map(|source| run_source(source, request, ctx.clone(), deadline).boxed())
            .collect();
        let mut pending = stream::iter(tasks).buffer_unordered(self.settings.concurrency.max(1));

        let mut done = 0;
        while let Some(run) = pending.next().await {
            done += 1;
            let o = &run.outcome;
            match &o.message {
                None => sink.on_log(
                    "success",
                    &format!("[+] {}: {} finding(s)", o.service, run.findings.len()),
                ),
                Some(msg) => sink.on_log("warn", &format!("[!] {}: {}", o.service, msg)),
            }
            for finding in &run.findings {
                sink.on_finding(finding);
            }
            sink.on_progress("Sources", done, total);
            runs.push(run);
        }

        ResultAggregator::merge(&request.target.to_string(), &request.services, started_at, runs)
    }
}

async fn run_source(
    source: Arc<dyn IntelSource>,
    request: &ValidatedRequest,
    ctx: ScanContext,
    deadline: Duration,
) -> SourceRun {
    let service = source.service();
    let started = Instant::now();

    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => None,
        r = tokio::time::timeout(deadline, source.collect(request, &ctx)) => Some(r),
    };
    let elapsed = started.elapsed().as_millis() as u64;

    match result {
        None | Some(Ok(Err(SourceError::Cancelled))) => {
            SourceRun::without_findings(SourceOutcome::cancelled(service, elapsed))
        }
        Some(Ok(Ok(report))) => SourceRun::completed(service, report, elapsed),
        Some(Ok(Err(e))) => {
            warn!("{} failed for {}: {}", service.label(), request.target, e);
            let message = e.to_string();
            SourceRun::without_findings(SourceOutcome::failed(service, e, message, elapsed))
        }
        Some(Err(_)) => {
            warn!("{} exceeded its {}s deadline", service.label(), deadline.as_secs());
            SourceRun::without_findings(SourceOutcome::failed(
                service,
                SourceError::Timeout {
                    provider: service.label().to_string(),
                },
                format!("timed out after {}s", deadline.as_secs()),
                elapsed,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::finding::{Finding, FindingKind, Severity};
    use crate::core::result_aggregator::OutcomeStatus;
    use crate::core::target::{ScanRequest, Target};
    use crate::core::Service;
    use crate::modules::SourceReport;
    use crate::{LogSink, ScanEventSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Findings(Vec<Severity>),
        Fail(SourceError),
        Sleep(Duration),
    }

    struct FakeSource {
        service: Service,
        behaviour: Behaviour,
        ip_only: bool,
    }

    impl FakeSource {
        fn new(service: Service, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self { service, behaviour, ip_only: false })
        }
    }

    #[async_trait]
    impl IntelSource for FakeSource {
        fn service(&self) -> Service {
            self.service
        }

        fn supports(&self, target: &Target) -> bool {
            !self.ip_only || target.is_ip()
        }

        async fn collect(
            &self,
            _request: &ValidatedRequest,
            _ctx: &ScanContext,
        ) -> Result<SourceReport, SourceError> {
            match &self.behaviour {
                Behaviour::Findings(severities) => Ok(SourceReport::with_findings(
                    self.service,
                    severities
                        .iter()
                        .enumerate()
                        .map(|(i, s)| {
                            Finding::new(self.service, FindingKind::OpenPort, "open", *s, format!("h:{}", i))
                        })
                        .collect(),
                )),
                Behaviour::Fail(e) => Err(e.clone()),
                Behaviour::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok(SourceReport::empty(self.service))
                }
            }
        }
    }

    #[derive(Default)]
    struct CountingSink {
        findings: AtomicUsize,
    }

    impl ScanEventSink for CountingSink {
        fn on_log(&self, _level: &str, _message: &str) {}
        fn on_finding(&self, _finding: &Finding) {
            self.findings.fetch_add(1, Ordering::SeqCst);
        }
        fn on_progress(&self, _phase: &str, _current: usize, _total: usize) {}
    }

    fn engine(sources: Vec<Arc<FakeSource>>, timeout: Duration) -> ScanEngine {
        let mut registry = SourceRegistry::new();
        for s in sources {
            registry.register(s);
        }
        ScanEngine::new(registry, EngineSettings { concurrency: 2, source_timeout: timeout })
    }

    #[tokio::test]
    async fn test_partial_failure_still_reports() {
        let engine = engine(
            vec![
                FakeSource::new(Service::Host, Behaviour::Findings(vec![Severity::High, Severity::Info])),
                FakeSource::new(
                    Service::Leaks,
                    Behaviour::Fail(SourceError::RateLimited { provider: "leaks".into(), retry_after: None }),
                ),
            ],
            Duration::from_secs(5),
        );
        let request = ScanRequest::new("example.com").validate().unwrap();
        let sink = Arc::new(CountingSink::default());

        let report = engine.run(&request, &CancellationToken::new(), sink.clone()).await;

        assert_eq!(report.sources.len(), 4);
        assert_eq!(report.outcome(Service::Host).unwrap().status, OutcomeStatus::Completed);
        let leaks = report.outcome(Service::Leaks).unwrap();
        assert_eq!(leaks.status, OutcomeStatus::Failed);
        assert!(leaks.message.as_ref().unwrap().contains("rate limited"));
        assert_eq!(report.outcome(Service::Ports).unwrap().status, OutcomeStatus::Skipped);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(sink.findings.load(Ordering::SeqCst), 2);
        assert!(!report.all_failed());
    }

    #[tokio::test]
    async fn test_deadline_fails_slow_source() {
        let engine = engine(
            vec![FakeSource::new(Service::Ports, Behaviour::Sleep(Duration::from_secs(30)))],
            Duration::from_millis(20),
        );
        let request = ScanRequest::new("10.0.0.1").with_services(vec![Service::Ports]).validate().unwrap();

        let report = engine.run(&request, &CancellationToken::new(), Arc::new(LogSink)).await;
        let ports = report.outcome(Service::Ports).unwrap();
        assert_eq!(ports.status, OutcomeStatus::Failed);
        assert!(ports.message.as_ref().unwrap().starts_with("timed out"));
        assert!(matches!(ports.error, Some(SourceError::Timeout { .. })));
        assert!(report.all_failed());
    }

    #[tokio::test]
    async fn test_cancelled_scan_marks_sources() {
        let engine = engine(
            vec![FakeSource::new(Service::WebVuln, Behaviour::Sleep(Duration::from_secs(30)))],
            Duration::from_secs(60),
        );
        let request = ScanRequest::new("example.com").with_services(vec![Service::WebVuln]).validate().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine.run(&request, &cancel, Arc::new(LogSink)).await;
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.sources[0].status, OutcomeStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_unsupported_target_is_skipped() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(FakeSource {
            service: Service::Host,
            behaviour: Behaviour::Findings(vec![]),
            ip_only: true,
        }));
        let engine = ScanEngine::new(registry, EngineSettings::default());
        let request = ScanRequest::new("example.com").with_services(vec![Service::Host]).validate().unwrap();

        let report = engine.run(&request, &CancellationToken::new(), Arc::new(LogSink)).await;
        let host = report.outcome(Service::Host).unwrap();
        assert_eq!(host.status, OutcomeStatus::Skipped);
        assert_eq!(host.message.as_deref(), Some("target type not supported"));
    }

    #[tokio::test]
    async fn test_run_future_can_be_spawned() {
        let engine = Arc::new(engine(
            vec![FakeSource::new(Service::Host, Behaviour::Findings(vec![Severity::Low]))],
            Duration::from_secs(5),
        ));
        let request = ScanRequest::new("example.com").with_services(vec![Service::Host]).validate().unwrap();

        let handle = tokio::spawn(async move {
            let cancel = CancellationToken::new();
            engine.run(&request, &cancel, Arc::new(LogSink)).await
        });
        let report = handle.await.unwrap();
        assert_eq!(report.findings.len(), 1);
    }
}
