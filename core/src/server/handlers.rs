use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::core::job::{JobProvider, JobStatus, ScanJob};
use crate::core::result_aggregator::ScanReport;
use crate::core::target::{ScanRequest, Target, ValidatedRequest};
use crate::core::Service;
use crate::error::SourceError;
use crate::modules::{ScanContext, SourceReport};
use crate::LogSink;

fn parse_body(body: Result<Json<ScanRequest>, JsonRejection>) -> ApiResult<ScanRequest> {
    body.map(|Json(req)| req)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

fn context() -> ScanContext {
    ScanContext {
        cancel: CancellationToken::new(),
        sink: Arc::new(LogSink),
    }
}

/// `vuln` or `ports`; the single-shot services have their own routes.
fn job_service(raw: &str) -> ApiResult<Service> {
    match raw.parse::<Service>() {
        Ok(service) if service.is_job_based() => Ok(service),
        _ => Err(ApiError::not_found(format!("no job-based service named '{}'", raw))),
    }
}

fn job_provider(state: &AppState, service: Service) -> ApiResult<Arc<dyn JobProvider>> {
    state
        .engine
        .registry()
        .job_provider(service)
        .ok_or_else(|| SourceError::NotConfigured(service).into())
}

/// `?target=` lets callers restore the scanned host, which the upstream
/// result body may omit.
#[derive(Debug, Default, Deserialize)]
pub struct JobQuery {
    pub target: Option<String>,
}

/// Rebuilds a job handle from the path, carrying the target the same way `submit` records it.
fn job_handle(service: Service, id: String, query: &JobQuery) -> ApiResult<ScanJob> {
    let job = ScanJob::new(service, id);
    let Some(raw) = query.target.as_deref().filter(|t| !t.trim().is_empty()) else {
        return Ok(job);
    };
    let (target, port) = Target::parse(raw)?;
    Ok(match service {
        Service::WebVuln => job.for_target(target.web_url(port)),
        _ => job.for_target(target.host_str()),
    })
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": state.engine.registry().services(),
    }))
}

pub async fn scan(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> ApiResult<Json<ScanReport>> {
    let request = parse_body(body)?.validate()?;
    info!("API scan of {} ({} service(s))", request.target, request.services.len());

    let report = state
        .engine
        .run(&request, &CancellationToken::new(), Arc::new(LogSink))
        .await;

    if report.all_failed() {
        if let Some(err) = report.first_failure() {
            return Err(err.into());
        }
    }
    Ok(Json(report))
}

async fn single_source(
    state: &AppState,
    service: Service,
    request: ValidatedRequest,
) -> ApiResult<Json<SourceReport>> {
    let source = state
        .engine
        .registry()
        .get(service)
        .ok_or(SourceError::NotConfigured(service))?;
    if !source.supports(&request.target) {
        return Err(ApiError::bad_request(format!(
            "{} cannot look up '{}'",
            service, request.target
        )));
    }

    let deadline = state.engine.settings().source_timeout;
    let report = tokio::time::timeout(deadline, source.collect(&request, &context()))
        .await
        .map_err(|_| SourceError::Timeout {
            provider: service.label().to_string(),
        })??;
    Ok(Json(report))
}

pub async fn host(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> ApiResult<Json<SourceReport>> {
    let request = parse_body(body)?.with_services(vec![Service::Host]).validate()?;
    single_source(&state, Service::Host, request).await
}

pub async fn leaks(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> ApiResult<Json<SourceReport>> {
    let request = parse_body(body)?.with_services(vec![Service::Leaks]).validate()?;
    single_source(&state, Service::Leaks, request).await
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    body: Result<Json<ScanRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ScanJob>)> {
    let service = job_service(&service)?;
    let provider = job_provider(&state, service)?;
    let request = parse_body(body)?.with_services(vec![service]).validate()?;

    let job = provider.submit(&request).await?;
    info!("API submitted {} scan {} for {}", service.label(), job.scan_id, request.target);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<ScanJob>> {
    let service = job_service(&service)?;
    let provider = job_provider(&state, service)?;
    let job = provider.status(&job_handle(service, id, &query)?).await?;
    Ok(Json(job))
}

pub async fn job_result(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
    Query(query): Query<JobQuery>,
) -> ApiResult<Json<SourceReport>> {
    let service = job_service(&service)?;
    let provider = job_provider(&state, service)?;
    let job = provider.status(&job_handle(service, id, &query)?).await?;

    match job.status {
        JobStatus::Finished => {}
        JobStatus::Error => {
            return Err(SourceError::JobFailed {
                provider: service.label().to_string(),
                scan_id: job.scan_id.clone(),
                message: job
                    .message
                    .clone()
                    .unwrap_or_else(|| "scanner reported an error".to_string()),
            }
            .into())
        }
        pending => {
            return Err(ApiError::conflict(format!(
                "scan {} is still {}",
                job.scan_id, pending
            )))
        }
    }

    let mut report = provider.fetch_result(&job).await?;
    report.job = Some(job);
    Ok(Json(report))
}
