pub mod host_lookup;
pub mod leak_index;
pub mod port_scan;
pub mod web_vuln;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::finding::Finding;
use crate::core::job::{run_job, JobProvider, PollPolicy, ScanJob};
use crate::core::target::{Target, ValidatedRequest};
use crate::core::Service;
use crate::error::SourceError;
use crate::SinkRef;

pub use host_lookup::HostLookup;
pub use leak_index::LeakIndex;
pub use port_scan::PortScanner;
pub use web_vuln::WebVulnScanner;

/// Summary of an address as seen by the host lookup service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProfile {
    pub ip: String,
    pub hostnames: Vec<String>,
    pub organization: Option<String>,
    pub isp: Option<String>,
    pub country: Option<String>,
    pub os: Option<String>,
    pub open_ports: Vec<u16>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Normalized output of one source for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub service: Service,
    pub findings: Vec<Finding>,
    pub host: Option<HostProfile>,
    pub job: Option<ScanJob>,
}

impl SourceReport {
    pub fn empty(service: Service) -> Self {
        Self {
            service,
            findings: Vec::new(),
            host: None,
            job: None,
        }
    }

    pub fn with_findings(service: Service, findings: Vec<Finding>) -> Self {
        Self {
            findings,
            ..Self::empty(service)
        }
    }
}

/// Per-scan handles passed to every source.
#[derive(Clone)]
pub struct ScanContext {
    pub cancel: CancellationToken,
    pub sink: SinkRef,
}

/// One external intelligence service, as seen by the scan engine.
#[async_trait]
pub trait IntelSource: Send + Sync {
    fn service(&self) -> Service;

    /// Whether this source can say anything about the target.
    fn supports(&self, _target: &Target) -> bool {
        true
    }

    async fn collect(
        &self,
        request: &ValidatedRequest,
        ctx: &ScanContext,
    ) -> Result<SourceReport, SourceError>;
}

/// Runs a job-based provider through the shared submit/poll/fetch lifecycle.
pub struct JobSource {
    provider: Arc<dyn JobProvider>,
    policy: PollPolicy,
}

impl JobSource {
    pub fn new(provider: Arc<dyn JobProvider>, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }
}

#[async_trait]
impl IntelSource for JobSource {
    fn service(&self) -> Service {
        self.provider.service()
    }

    async fn collect(
        &self,
        request: &ValidatedRequest,
        ctx: &ScanContext,
    ) -> Result<SourceReport, SourceError> {
        run_job(self.provider.as_ref(), request, &self.policy, &ctx.cancel, &ctx.sink).await
    }
}

/// The set of sources available to a scan, plus typed handles to the job
/// providers for the REST job endpoints.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn IntelSource>>,
    web_vuln: Option<Arc<dyn JobProvider>>,
    ports: Option<Arc<dyn JobProvider>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a client for every provider that has a base URL and an API key.
    pub fn from_config(config: &AppConfig) -> Result<Self, SourceError> {
        let mut registry = Self::new();

        if config.host.is_configured() {
            registry.register(Arc::new(HostLookup::new(&config.host, &config.http)?));
        }
        if config.leaks.is_configured() {
            registry.register(Arc::new(LeakIndex::new(&config.leaks, &config.http)?));
        }
        if config.web_vuln.is_configured() {
            let scanner = Arc::new(WebVulnScanner::new(
                &config.web_vuln,
                &config.http,
                &config.web_vuln_profile,
            )?);
            registry.register_job(scanner, config.web_vuln_poll.policy());
        }
        if config.ports.is_configured() {
            let scanner = Arc::new(PortScanner::new(&config.ports, &config.http)?);
            registry.register_job(scanner, config.ports_poll.policy());
        }

        info!(
            "Configured sources: {}",
            registry
                .services()
                .iter()
                .map(|s| s.label())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(registry)
    }

    /// Adds a source, replacing any earlier one for the same service.
    pub fn register(&mut self, source: Arc<dyn IntelSource>) {
        let service = source.service();
        self.sources.retain(|s| s.service() != service);
        self.sources.push(source);
        self.sources.sort_by_key(|s| s.service());
    }

    pub fn register_job(&mut self, provider: Arc<dyn JobProvider>, policy: PollPolicy) {
        match provider.service() {
            Service::WebVuln => self.web_vuln = Some(Arc::clone(&provider)),
            Service::Ports => self.ports = Some(Arc::clone(&provider)),
            _ => {}
        }
        self.register(Arc::new(JobSource::new(provider, policy)));
    }

    pub fn get(&self, service: Service) -> Option<Arc<dyn IntelSource>> {
        self.sources.iter().find(|s| s.service() == service).cloned()
    }

    pub fn job_provider(&self, service: Service) -> Option<Arc<dyn JobProvider>> {
        match service {
            Service::WebVuln => self.web_vuln.clone(),
            Service::Ports => self.ports.clone(),
            _ => None,
        }
    }

    pub fn services(&self) -> Vec<Service> {
        self.sources.iter().map(|s| s.service()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
