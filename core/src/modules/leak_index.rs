use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{HttpSettings, ProviderConfig};
use crate::core::finding::{parse_timestamp, Finding, FindingKind, Severity};
use crate::core::target::{Target, ValidatedRequest};
use crate::core::Service;
use crate::error::SourceError;
use crate::http::{encode_segment, ApiClient};
use crate::modules::{IntelSource, ScanContext, SourceReport};

const SERVICE: Service = Service::Leaks;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LeakResponse {
    #[serde(rename = "Services", alias = "services")]
    pub services: Option<Vec<LeakEvent>>,
    #[serde(rename = "Leaks", alias = "leaks")]
    pub leaks: Option<Vec<LeakEvent>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LeakEvent {
    pub event_source: String,
    pub host: String,
    pub ip: String,
    /// Providers send this as either a string or a number.
    pub port: Value,
    pub protocol: String,
    pub summary: Option<String>,
    pub time: Value,
    pub leak: LeakDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LeakDetail {
    pub severity: String,
    pub stage: String,
    #[serde(rename = "type")]
    pub leak_type: String,
    pub dataset: LeakDataset,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LeakDataset {
    pub rows: u64,
    pub files: u64,
    pub size: u64,
    pub infected: bool,
}

/// Leak-indexing service: one request per target, 404 means "nothing indexed".
pub struct LeakIndex {
    client: ApiClient,
}

impl LeakIndex {
    pub fn new(provider: &ProviderConfig, http: &HttpSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: ApiClient::new(SERVICE.label(), provider, http)?,
        })
    }

    pub async fn lookup(&self, target: &Target) -> Result<SourceReport, SourceError> {
        let path = match target {
            Target::Ip(ip) => format!("/host/{}", encode_segment(&ip.to_string())),
            Target::Domain(d) => format!("/domain/{}", encode_segment(d)),
        };
        // Some deployments answer "nothing found" with `null` or `[]`.
        let raw: Option<Value> = self.client.get_optional_json(&path, &[]).await?;
        let parsed = match raw {
            Some(v @ Value::Object(_)) => {
                serde_json::from_value::<LeakResponse>(v).map_err(|e| SourceError::Decode {
                    provider: SERVICE.label().to_string(),
                    message: e.to_string(),
                })?
            }
            _ => LeakResponse::default(),
        };
        Ok(normalize_leaks(&target.host_str(), &parsed))
    }
}

#[async_trait]
impl IntelSource for LeakIndex {
    fn service(&self) -> Service {
        SERVICE
    }

    async fn collect(
        &self,
        request: &ValidatedRequest,
        _ctx: &ScanContext,
    ) -> Result<SourceReport, SourceError> {
        let report = self.lookup(&request.target).await?;
        info!("Leak index for {}: {} finding(s)", request.target, report.findings.len());
        Ok(report)
    }
}

fn port_string(raw: &Value) -> Option<String> {
    match raw {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn event_location(event: &LeakEvent, fallback: &str) -> String {
    let host = [event.host.as_str(), event.ip.as_str(), fallback]
        .into_iter()
        .find(|h| !h.is_empty())
        .unwrap_or(fallback);
    match port_string(&event.port) {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn leak_title(event: &LeakEvent) -> String {
    let source = if event.event_source.is_empty() { "Leak" } else { event.event_source.as_str() };
    if event.leak.leak_type.is_empty() {
        source.to_string()
    } else {
        format!("{}: {}", source, event.leak.leak_type)
    }
}

fn leak_severity(event: &LeakEvent) -> Severity {
    let base = Severity::from_label(&event.leak.severity);
    if event.leak.dataset.infected {
        base.max(Severity::High)
    } else {
        base
    }
}

/// Maps indexed leaks and exposed services into findings.
pub fn normalize_leaks(target: &str, raw: &LeakResponse) -> SourceReport {
    let mut findings = Vec::new();

    for event in raw.leaks.iter().flatten() {
        let seen = parse_timestamp(&event.time);
        let mut description = event.summary.clone();
        let dataset = &event.leak.dataset;
        if dataset.rows > 0 || dataset.files > 0 {
            let stats = format!("dataset: {} rows, {} files, {} bytes", dataset.rows, dataset.files, dataset.size);
            description = Some(match description {
                Some(s) if !s.trim().is_empty() => format!("{} ({})", s.trim(), stats),
                _ => stats,
            });
        }
        findings.push(
            Finding::new(SERVICE, FindingKind::Leak, leak_title(event), leak_severity(event), event_location(event, target))
                .seen(seen, None)
                .describe(description),
        );
    }

    for event in raw.services.iter().flatten() {
        let title = match (event.protocol.as_str(), event.event_source.as_str()) {
            ("", "") => "Exposed service".to_string(),
            (proto, "") => format!("Exposed {} service", proto),
            ("", source) => format!("Exposed service ({})", source),
            (proto, source) => format!("Exposed {} service ({})", proto, source),
        };
        findings.push(
            Finding::new(SERVICE, FindingKind::OpenPort, title, Severity::Info, event_location(event, target))
                .seen(parse_timestamp(&event.time), None),
        );
    }

    SourceReport::with_findings(SERVICE, findings)
}
