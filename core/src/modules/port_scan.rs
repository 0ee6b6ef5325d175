use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{HttpSettings, ProviderConfig};
use crate::core::finding::{Finding, FindingKind, Severity};
use crate::core::job::{JobProvider, ScanJob, StatusBody, SubmitBody};
use crate::core::target::ValidatedRequest;
use crate::core::Service;
use crate::error::SourceError;
use crate::http::{encode_segment, ApiClient};
use crate::modules::SourceReport;

const SERVICE: Service = Service::Ports;
const DEFAULT_PORT_SET: &str = "top-1000";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PortResults {
    pub target: Option<String>,
    pub ports: Vec<PortRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PortRecord {
    pub port: u16,
    pub protocol: Option<String>,
    pub state: String,
    pub service: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
}

/// Exposure severity of an open port, by well-known service.
pub fn port_severity(port: u16) -> Severity {
    match port {
        23 => Severity::Critical,
        1433 | 1521 | 3306 | 5432 | 6379 | 9200 | 9300 | 27017 => Severity::High,
        3389 | 5900 | 5901 => Severity::High,
        21 | 139 | 445 | 5985 | 11211 => Severity::Medium,
        _ => Severity::Info,
    }
}

fn exposure_note(port: u16) -> Option<&'static str> {
    let note = match port {
        23 => "Telnet transmits credentials in cleartext",
        1433 | 1521 | 3306 | 5432 | 27017 => "Database port reachable from the internet",
        6379 | 11211 => "In-memory store usually deployed without authentication",
        9200 | 9300 => "Search cluster API exposed",
        3389 => "Remote desktop exposed to brute force",
        5900 | 5901 => "VNC remote desktop exposed",
        21 => "FTP often allows cleartext or anonymous logins",
        139 | 445 => "SMB file sharing exposed",
        5985 => "WinRM management interface exposed",
        _ => return None,
    };
    Some(note)
}

/// Client for the job-based port scanner.
pub struct PortScanner {
    client: ApiClient,
}

impl PortScanner {
    pub fn new(provider: &ProviderConfig, http: &HttpSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: ApiClient::new(SERVICE.label(), provider, http)?,
        })
    }
}

/// Port specification sent on submission: the one requested port or the default set.
pub fn port_spec(request: &ValidatedRequest) -> String {
    request
        .port
        .map(|p| p.to_string())
        .unwrap_or_else(|| DEFAULT_PORT_SET.to_string())
}

#[async_trait]
impl JobProvider for PortScanner {
    fn service(&self) -> Service {
        SERVICE
    }

    async fn submit(&self, request: &ValidatedRequest) -> Result<ScanJob, SourceError> {
        let ports = port_spec(request);
        let body = json!({ "target": request.target.host_str(), "ports": ports });
        let ack: SubmitBody = self.client.post_json("/scan", &body).await?;
        let job = ack.into_job(SERVICE)?.for_target(request.target.host_str());
        info!("Submitted port scan {} for {} ({})", job.scan_id, request.target, ports);
        Ok(job)
    }

    async fn status(&self, job: &ScanJob) -> Result<ScanJob, SourceError> {
        let path = format!("/scan/{}", encode_segment(&job.scan_id));
        let body: StatusBody = self.client.get_json(&path, &[]).await?;
        Ok(body.apply_to(job))
    }

    async fn fetch_result(&self, job: &ScanJob) -> Result<SourceReport, SourceError> {
        let path = format!("/scan/{}/result", encode_segment(&job.scan_id));
        let raw: Value = self.client.get_json(&path, &[]).await?;
        let results: PortResults = serde_json::from_value(raw).map_err(|e| SourceError::Decode {
            provider: SERVICE.label().to_string(),
            message: e.to_string(),
        })?;
        debug!("Port scan {} returned {} port record(s)", job.scan_id, results.ports.len());
        let host = results.target.as_deref().or(job.target.as_deref()).unwrap_or_default();
        Ok(normalize_ports(host, &results))
    }
}

/// Open ports only; closed and filtered records are dropped.
pub fn normalize_ports(host: &str, raw: &PortResults) -> SourceReport {
    let findings = raw
        .ports
        .iter()
        .filter(|p| p.state.trim().eq_ignore_ascii_case("open"))
        .map(|p| {
            let protocol = p.protocol.as_deref().unwrap_or("tcp");
            let label = [p.service.as_deref(), p.product.as_deref(), p.version.as_deref()]
                .into_iter()
                .flatten()
                .filter(|s| !s.trim().is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            let title = if label.is_empty() {
                format!("{}/{} open", p.port, protocol)
            } else {
                format!("{}/{} {}", p.port, protocol, label)
            };
            let location = if host.is_empty() {
                format!("port {}/{}", p.port, protocol)
            } else {
                format!("{}:{}", host, p.port)
            };
            Finding::new(SERVICE, FindingKind::OpenPort, title, port_severity(p.port), location)
                .describe(exposure_note(p.port).map(str::to_string))
        })
        .collect();
    SourceReport::with_findings(SERVICE, findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthScheme;
    use crate::core::job::JobStatus;
    use crate::core::target::ScanRequest;
    use crate::http::mock::{mock_upstream, ok_json, provider_at};

    #[test]
    fn test_port_severity_table() {
        assert_eq!(port_severity(23), Severity::Critical);
        assert_eq!(port_severity(6379), Severity::High);
        assert_eq!(port_severity(3389), Severity::High);
        assert_eq!(port_severity(5901), Severity::High);
        assert_eq!(port_severity(445), Severity::Medium);
        assert_eq!(port_severity(11211), Severity::Medium);
        assert_eq!(port_severity(443), Severity::Info);
    }

    #[test]
    fn test_port_spec() {
        let all = ScanRequest::new("10.1.2.3").validate().unwrap();
        assert_eq!(port_spec(&all), "top-1000");
        let one = ScanRequest::new("10.1.2.3:8080").validate().unwrap();
        assert_eq!(port_spec(&one), "8080");
    }

    #[test]
    fn test_normalize_ports_keeps_open_only() {
        let raw: PortResults = serde_json::from_value(json!({
            "target": "10.1.2.3",
            "ports": [
                {"port": 22, "protocol": "tcp", "state": "open", "service": "ssh", "product": "OpenSSH", "version": "8.9p1"},
                {"port": 23, "state": "OPEN"},
                {"port": 80, "protocol": "tcp", "state": "closed", "service": "http"},
                {"port": 3306, "protocol": "tcp", "state": "filtered", "service": "mysql"}
            ]
        }))
        .unwrap();

        let report = normalize_ports("10.1.2.3", &raw);
        assert_eq!(report.findings.len(), 2);

        let ssh = &report.findings[0];
        assert_eq!(ssh.title, "22/tcp ssh OpenSSH 8.9p1");
        assert_eq!(ssh.location, "10.1.2.3:22");
        assert_eq!(ssh.severity, Severity::Info);
        assert!(ssh.description.is_none());

        let telnet = &report.findings[1];
        assert_eq!(telnet.title, "23/tcp open");
        assert_eq!(telnet.severity, Severity::Critical);
        assert!(telnet.description.as_ref().unwrap().contains("Telnet"));
    }

    fn scanner_at(base: &str) -> PortScanner {
        let provider = provider_at(base, AuthScheme::Header("X-API-Key".to_string()));
        PortScanner::new(&provider, &HttpSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn test_job_lifecycle_over_http() {
        let (base, server) = mock_upstream(vec![
            ok_json(r#"{"id": 9001}"#),
            ok_json(r#"{"status": "done"}"#),
            ok_json(r#"{"ports": [{"port": 6379, "state": "open", "service": "redis"}, {"port": 80, "state": "closed"}]}"#),
        ])
        .await;
        let scanner = scanner_at(&base);
        let request = ScanRequest::new("10.1.2.3:6379").validate().unwrap();

        let job = scanner.submit(&request).await.unwrap();
        assert_eq!(job.scan_id, "9001");
        assert_eq!(job.target.as_deref(), Some("10.1.2.3"));

        let job = scanner.status(&job).await.unwrap();
        assert_eq!(job.status, JobStatus::Finished);

        // No `target` in the result body: locations come from the submitted job.
        let report = scanner.fetch_result(&job).await.unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].location, "10.1.2.3:6379");
        assert_eq!(report.findings[0].severity, Severity::High);

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /scan "));
        assert!(requests[0].contains(r#""ports":"6379""#));
        assert!(requests[0].contains(r#""target":"10.1.2.3""#));
        assert!(requests[0].to_lowercase().contains("x-api-key: secret-key"));
        assert!(requests[1].starts_with("GET /scan/9001 "));
        assert!(requests[2].starts_with("GET /scan/9001/result "));
    }

    #[tokio::test]
    async fn test_result_target_wins_over_job_target() {
        let (base, server) = mock_upstream(vec![ok_json(
            r#"{"target": "198.51.100.4", "ports": [{"port": 23, "protocol": "tcp", "state": "OPEN"}]}"#,
        )])
        .await;
        let job = ScanJob::new(Service::Ports, "7").for_target("10.1.2.3");

        let report = scanner_at(&base).fetch_result(&job).await.unwrap();
        assert_eq!(report.findings[0].location, "198.51.100.4:23");
        assert_eq!(report.findings[0].title, "23/tcp open");
        server.await.unwrap();
    }
}
