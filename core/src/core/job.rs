use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::target::ValidatedRequest;
use crate::core::Service;
use crate::error::SourceError;
use crate::modules::SourceReport;
use crate::SinkRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Finished,
    Error,
}

impl JobStatus {
    /// Maps a provider's status vocabulary. Unknown words keep the job polling.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "queued" | "pending" | "waiting" | "created" | "new" => JobStatus::Pending,
            "running" | "in_progress" | "started" | "scanning" | "processing" => JobStatus::Running,
            "finished" | "done" | "completed" | "complete" | "success" | "succeeded" => {
                JobStatus::Finished
            }
            "error" | "failed" | "failure" | "aborted" | "cancelled" | "canceled" | "timeout" => {
                JobStatus::Error
            }
            other => {
                debug!("Unknown job status '{}', treating as running", other);
                JobStatus::Running
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Error)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// A long-running scan submitted to an external service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub scan_id: String,
    pub service: Service,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ScanJob {
    pub fn new(service: Service, scan_id: impl Into<String>) -> Self {
        Self {
            scan_id: scan_id.into(),
            service,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            progress: None,
            message: None,
            target: None,
        }
    }

    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Copy of this job carrying a fresh status report.
    pub fn updated(&self, status: JobStatus, progress: Option<u8>, message: Option<String>) -> Self {
        Self {
            status,
            progress: progress.map(|p| p.min(100)).or(self.progress),
            message: message.or_else(|| self.message.clone()),
            ..self.clone()
        }
    }
}

/// Submission acknowledgement; scanners disagree on the id field and its type.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmitBody {
    #[serde(alias = "id", alias = "scanId", alias = "job_id")]
    pub scan_id: serde_json::Value,
    pub status: Option<String>,
    pub created_at: serde_json::Value,
}

impl SubmitBody {
    pub fn into_job(self, service: Service) -> Result<ScanJob, SourceError> {
        let scan_id = match &self.scan_id {
            serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => {
                return Err(SourceError::Decode {
                    provider: service.label().to_string(),
                    message: "submission response carried no scan id".to_string(),
                })
            }
        };
        let mut job = ScanJob::new(service, scan_id);
        if let Some(status) = self.status.as_deref() {
            job.status = JobStatus::from_provider(status);
        }
        if let Some(created) = crate::core::finding::parse_timestamp(&self.created_at) {
            job.created_at = created;
        }
        Ok(job)
    }
}

/// Status poll body shared by the job-based scanners.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatusBody {
    #[serde(alias = "state")]
    pub status: String,
    pub progress: Option<f64>,
    #[serde(alias = "error", alias = "detail")]
    pub message: Option<String>,
}

impl StatusBody {
    pub fn apply_to(self, job: &ScanJob) -> ScanJob {
        let progress = self.progress.map(|p| p.clamp(0.0, 100.0).round() as u8);
        let message = self.message.filter(|m| !m.trim().is_empty());
        job.updated(JobStatus::from_provider(&self.status), progress, message)
    }
}

/// Submit/poll/fetch contract of a job-based scanning service.
#[async_trait]
pub trait JobProvider: Send + Sync {
    fn service(&self) -> Service;

    async fn submit(&self, request: &ValidatedRequest) -> Result<ScanJob, SourceError>;

    async fn status(&self, job: &ScanJob) -> Result<ScanJob, SourceError>;

    async fn fetch_result(&self, job: &ScanJob) -> Result<SourceReport, SourceError>;
}

/// Bounded polling schedule. Fixed interval unless `backoff_factor > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl PollPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff_factor: 1.0,
            max_interval: interval,
        }
    }

    /// Delay after the given (1-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.interval.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = scaled.min(self.max_interval.as_secs_f64().max(self.interval.as_secs_f64()));
        Duration::from_secs_f64(capped)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(30, Duration::from_secs(5))
    }
}

/// Polls `job` until it finishes, fails, runs out of attempts or is cancelled.
///
/// Each status check counts as one attempt, whether it succeeded or hit a
/// retryable error (rate limit, transport failure, upstream 5xx).
pub async fn poll_until_done(
    provider: &dyn JobProvider,
    job: ScanJob,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    sink: &SinkRef,
) -> Result<ScanJob, SourceError> {
    let service = provider.service();
    let mut current = job;

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }

        match provider.status(&current).await {
            Ok(next) => {
                current = next;
                debug!(
                    "{} scan {} is {} (check {}/{})",
                    service.label(),
                    current.scan_id,
                    current.status,
                    attempt,
                    policy.max_attempts
                );
                match current.status {
                    JobStatus::Finished => {
                        info!("{} scan {} finished after {} checks", service.label(), current.scan_id, attempt);
                        return Ok(current);
                    }
                    JobStatus::Error => {
                        return Err(SourceError::JobFailed {
                            provider: service.label().to_string(),
                            scan_id: current.scan_id.clone(),
                            message: current
                                .message
                                .clone()
                                .unwrap_or_else(|| "scanner reported an error".to_string()),
                        });
                    }
                    JobStatus::Pending | JobStatus::Running => {
                        sink.on_progress(
                            &format!("{} scan {} {}", service, current.scan_id, current.status),
                            attempt as usize,
                            policy.max_attempts as usize,
                        );
                    }
                }
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    "{} status check {}/{} for {} failed: {}",
                    service.label(),
                    attempt,
                    policy.max_attempts,
                    current.scan_id,
                    e
                );
                if e.is_rate_limited() {
                    sink.on_log("warn", &format!("[!] {}", e));
                }
            }
            Err(e) => return Err(e),
        }

        if attempt == policy.max_attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
        }
    }

    Err(SourceError::PollTimeout {
        provider: service.label().to_string(),
        scan_id: current.scan_id,
        attempts: policy.max_attempts,
    })
}

/// Full job lifecycle: submit, poll to completion, fetch the result.
pub async fn run_job(
    provider: &dyn JobProvider,
    request: &ValidatedRequest,
    policy: &PollPolicy,
    cancel: &CancellationToken,
    sink: &SinkRef,
) -> Result<SourceReport, SourceError> {
    let service = provider.service();
    let job = provider.submit(request).await?;
    sink.on_log(
        "info",
        &format!("[*] {} accepted scan {} for {}", service, job.scan_id, request.target),
    );

    let done = poll_until_done(provider, job, policy, cancel, sink).await?;
    let mut report = provider.fetch_result(&done).await?;
    report.job = Some(done);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::ScanRequest;
    use crate::LogSink;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Scripted provider: returns one queued response per status check.
    struct ScriptedProvider {
        script: Vec<Result<JobStatus, SourceError>>,
        checks: AtomicU32,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<JobStatus, SourceError>>) -> Self {
            Self { script, checks: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl JobProvider for ScriptedProvider {
        fn service(&self) -> Service {
            Service::Ports
        }

        async fn submit(&self, _request: &ValidatedRequest) -> Result<ScanJob, SourceError> {
            Ok(ScanJob::new(Service::Ports, "job-1"))
        }

        async fn status(&self, job: &ScanJob) -> Result<ScanJob, SourceError> {
            let i = self.checks.fetch_add(1, Ordering::SeqCst) as usize;
            let step = self
                .script
                .get(i)
                .cloned()
                .unwrap_or(Ok(JobStatus::Running));
            step.map(|status| job.updated(status, None, Some("scripted".to_string())))
        }

        async fn fetch_result(&self, job: &ScanJob) -> Result<SourceReport, SourceError> {
            assert_eq!(job.status, JobStatus::Finished);
            Ok(SourceReport::empty(Service::Ports))
        }
    }

    fn fast_policy(max_attempts: u32) -> PollPolicy {
        PollPolicy::fixed(max_attempts, Duration::from_millis(1))
    }

    fn sink() -> SinkRef {
        Arc::new(LogSink)
    }

    #[test]
    fn test_status_vocabulary() {
        assert_eq!(JobStatus::from_provider("Queued"), JobStatus::Pending);
        assert_eq!(JobStatus::from_provider("in-progress"), JobStatus::Running);
        assert_eq!(JobStatus::from_provider("COMPLETED"), JobStatus::Finished);
        assert_eq!(JobStatus::from_provider("canceled"), JobStatus::Error);
        assert_eq!(JobStatus::from_provider("warming up"), JobStatus::Running);
        assert!(JobStatus::Error.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }

    #[test]
    fn test_submit_and_status_bodies() {
        let body: SubmitBody = serde_json::from_str(r#"{"id": 42, "status": "queued"}"#).unwrap();
        let job = body.into_job(Service::WebVuln).unwrap();
        assert_eq!(job.scan_id, "42");
        assert_eq!(job.status, JobStatus::Pending);

        let body: SubmitBody = serde_json::from_str(r#"{"message": "ok"}"#).unwrap();
        assert!(matches!(body.into_job(Service::Ports), Err(SourceError::Decode { .. })));

        let status: StatusBody =
            serde_json::from_str(r#"{"status": "running", "progress": 47.6}"#).unwrap();
        let next = status.apply_to(&job);
        assert_eq!(next.status, JobStatus::Running);
        assert_eq!(next.progress, Some(48));
        assert_eq!(next.scan_id, "42");
    }

    #[test]
    fn test_policy_delays() {
        let fixed = PollPolicy::fixed(10, Duration::from_secs(3));
        assert_eq!(fixed.delay_for(1), Duration::from_secs(3));
        assert_eq!(fixed.delay_for(9), Duration::from_secs(3));

        let growing = PollPolicy {
            max_attempts: 10,
            interval: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(10),
        };
        assert_eq!(growing.delay_for(1), Duration::from_secs(2));
        assert_eq!(growing.delay_for(2), Duration::from_secs(4));
        assert_eq!(growing.delay_for(3), Duration::from_secs(8));
        assert_eq!(growing.delay_for(4), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_poll_finishes() {
        let provider = ScriptedProvider::new(vec![
            Ok(JobStatus::Pending),
            Ok(JobStatus::Running),
            Ok(JobStatus::Finished),
        ]);
        let job = ScanJob::new(Service::Ports, "job-1");
        let done = poll_until_done(&provider, job, &fast_policy(5), &CancellationToken::new(), &sink())
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Finished);
        assert_eq!(provider.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_exhausts_attempts() {
        let provider = ScriptedProvider::new(vec![]);
        let job = ScanJob::new(Service::Ports, "job-1");
        let err = poll_until_done(&provider, job, &fast_policy(4), &CancellationToken::new(), &sink())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SourceError::PollTimeout {
                provider: "ports".into(),
                scan_id: "job-1".into(),
                attempts: 4
            }
        );
        assert_eq!(provider.checks.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_poll_reports_job_error() {
        let provider = ScriptedProvider::new(vec![Ok(JobStatus::Running), Ok(JobStatus::Error)]);
        let job = ScanJob::new(Service::Ports, "job-1");
        let err = poll_until_done(&provider, job, &fast_policy(5), &CancellationToken::new(), &sink())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::JobFailed { ref message, .. } if message == "scripted"));
    }

    #[tokio::test]
    async fn test_rate_limit_consumes_attempt_and_continues() {
        let limited = SourceError::RateLimited { provider: "ports".into(), retry_after: None };
        let provider = ScriptedProvider::new(vec![
            Err(limited.clone()),
            Err(limited),
            Ok(JobStatus::Finished),
        ]);
        let job = ScanJob::new(Service::Ports, "job-1");
        let done = poll_until_done(&provider, job, &fast_policy(3), &CancellationToken::new(), &sink())
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_immediately() {
        let provider = ScriptedProvider::new(vec![Err(SourceError::Unauthorized { provider: "ports".into() })]);
        let job = ScanJob::new(Service::Ports, "job-1");
        let err = poll_until_done(&provider, job, &fast_policy(10), &CancellationToken::new(), &sink())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unauthorized { .. }));
        assert_eq!(provider.checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_sleep() {
        let provider = ScriptedProvider::new(vec![]);
        let job = ScanJob::new(Service::Ports, "job-1");
        let policy = PollPolicy::fixed(100, Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = poll_until_done(&provider, job, &policy, &cancel, &sink()).await.unwrap_err();
        assert_eq!(err, SourceError::Cancelled);
    }

    #[tokio::test]
    async fn test_run_job_attaches_final_job() {
        let provider = ScriptedProvider::new(vec![Ok(JobStatus::Finished)]);
        let request = ScanRequest::new("example.com").validate().unwrap();
        let report = run_job(&provider, &request, &fast_policy(2), &CancellationToken::new(), &sink())
            .await
            .unwrap();
        let job = report.job.unwrap();
        assert_eq!(job.scan_id, "job-1");
        assert_eq!(job.status, JobStatus::Finished);
    }
}
