use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{HttpSettings, ProviderConfig};
use crate::core::finding::{first_cve, parse_timestamp, Finding, FindingKind, Severity};
use crate::core::job::{JobProvider, ScanJob, StatusBody, SubmitBody};
use crate::core::target::ValidatedRequest;
use crate::core::Service;
use crate::error::SourceError;
use crate::http::{encode_segment, ApiClient};
use crate::modules::SourceReport;

const SERVICE: Service = Service::WebVuln;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VulnResults {
    #[serde(alias = "results", alias = "findings")]
    pub vulnerabilities: Vec<VulnRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VulnRecord {
    #[serde(alias = "title")]
    pub name: String,
    pub severity: Option<String>,
    pub risk_level: Option<u8>,
    pub cvss: Option<f64>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub reference: Option<String>,
    pub discovered_at: Value,
}

/// Client for the web-application vulnerability scanner.
pub struct WebVulnScanner {
    client: ApiClient,
    profile: String,
}

impl WebVulnScanner {
    pub fn new(provider: &ProviderConfig, http: &HttpSettings, profile: &str) -> Result<Self, SourceError> {
        let profile = if profile.trim().is_empty() { "light" } else { profile.trim() };
        Ok(Self {
            client: ApiClient::new(SERVICE.label(), provider, http)?,
            profile: profile.to_string(),
        })
    }
}

#[async_trait]
impl JobProvider for WebVulnScanner {
    fn service(&self) -> Service {
        SERVICE
    }

    async fn submit(&self, request: &ValidatedRequest) -> Result<ScanJob, SourceError> {
        let url = request.target.web_url(request.port);
        let body = json!({ "target": url, "profile": self.profile });
        let ack: SubmitBody = self.client.post_json("/scans", &body).await?;
        let job = ack.into_job(SERVICE)?.for_target(url.clone());
        info!("Submitted web scan {} for {} ({})", job.scan_id, url, self.profile);
        Ok(job)
    }

    async fn status(&self, job: &ScanJob) -> Result<ScanJob, SourceError> {
        let path = format!("/scans/{}", encode_segment(&job.scan_id));
        let body: StatusBody = self.client.get_json(&path, &[]).await?;
        Ok(body.apply_to(job))
    }

    async fn fetch_result(&self, job: &ScanJob) -> Result<SourceReport, SourceError> {
        let path = format!("/scans/{}/results", encode_segment(&job.scan_id));
        let results: VulnResults = self.client.get_json(&path, &[]).await?;
        debug!("Web scan {} returned {} record(s)", job.scan_id, results.vulnerabilities.len());
        let fallback = job.target.clone().unwrap_or_else(|| format!("scan {}", job.scan_id));
        Ok(normalize_vulns(&fallback, &results))
    }
}

/// Label first, then numeric risk level, then CVSS.
fn vuln_severity(record: &VulnRecord) -> Severity {
    if let Some(label) = record.severity.as_deref().filter(|l| !l.trim().is_empty()) {
        return Severity::from_label(label);
    }
    if let Some(level) = record.risk_level {
        return Severity::from_risk_level(level);
    }
    record.cvss.map(Severity::from_cvss).unwrap_or_default()
}

/// `default_location` stands in for records that carry no URL.
pub fn normalize_vulns(default_location: &str, raw: &VulnResults) -> SourceReport {
    let findings = raw
        .vulnerabilities
        .iter()
        .map(|record| {
            let title = if record.name.trim().is_empty() {
                "Unnamed web vulnerability".to_string()
            } else {
                record.name.trim().to_string()
            };
            let location = record
                .url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| default_location.to_string());
            let reference = record.reference.clone().or_else(|| {
                first_cve(&title).map(|cve| format!("https://nvd.nist.gov/vuln/detail/{}", cve))
            });
            Finding::new(SERVICE, FindingKind::Vulnerability, title, vuln_severity(record), location)
                .seen(parse_timestamp(&record.discovered_at), None)
                .describe(record.description.clone())
                .reference(reference)
        })
        .collect();
    SourceReport::with_findings(SERVICE, findings)
}
