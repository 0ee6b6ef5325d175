use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use crate::config::{HttpSettings, ProviderConfig};
use crate::core::finding::{first_cve, parse_timestamp, Finding, FindingKind, Severity};
use crate::core::target::{Target, ValidatedRequest};
use crate::core::Service;
use crate::error::SourceError;
use crate::http::{encode_segment, ApiClient};
use crate::modules::{HostProfile, IntelSource, ScanContext, SourceReport};

const SERVICE: Service = Service::Host;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostResponse {
    pub ip_str: String,
    /// Numeric on Shodan-style bodies; some providers send the dotted form here instead.
    pub ip: Value,
    pub hostnames: Vec<String>,
    pub org: Option<String>,
    pub isp: Option<String>,
    #[serde(alias = "country")]
    pub country_name: Option<String>,
    pub os: Option<String>,
    pub ports: Vec<u16>,
    /// Either a list of CVE ids or a map keyed by CVE id.
    pub vulns: Value,
    pub last_update: Value,
    pub data: Vec<BannerRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BannerRecord {
    pub port: u16,
    pub transport: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub timestamp: Value,
    pub vulns: BTreeMap<String, BannerVuln>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BannerVuln {
    pub cvss: Value,
    pub summary: Option<String>,
    pub references: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DnsResponse {
    pub domain: String,
    pub subdomains: Vec<String>,
    pub data: Vec<DnsRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DnsRecord {
    pub subdomain: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: String,
    pub last_seen: Value,
}

/// Host/DNS lookup service: one request per target, no job.
pub struct HostLookup {
    client: ApiClient,
}

impl HostLookup {
    pub fn new(provider: &ProviderConfig, http: &HttpSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: ApiClient::new(SERVICE.label(), provider, http)?,
        })
    }

    pub async fn lookup(&self, target: &Target) -> Result<SourceReport, SourceError> {
        let host = target.host_str();
        match target {
            Target::Ip(_) => {
                let path = format!("/host/{}", encode_segment(&host));
                let raw: Option<HostResponse> = self.client.get_optional_json(&path, &[]).await?;
                Ok(match raw {
                    Some(raw) => normalize_host(&host, &raw),
                    None => {
                        debug!("Host lookup has no data for {}", host);
                        SourceReport::empty(SERVICE)
                    }
                })
            }
            Target::Domain(domain) => {
                let path = format!("/dns/domain/{}", encode_segment(domain));
                let raw: Option<DnsResponse> = self.client.get_optional_json(&path, &[]).await?;
                Ok(match raw {
                    Some(raw) => normalize_dns(domain, &raw),
                    None => SourceReport::empty(SERVICE),
                })
            }
        }
    }
}

#[async_trait]
impl IntelSource for HostLookup {
    fn service(&self) -> Service {
        SERVICE
    }

    async fn collect(
        &self,
        request: &ValidatedRequest,
        _ctx: &ScanContext,
    ) -> Result<SourceReport, SourceError> {
        let report = self.lookup(&request.target).await?;
        info!("Host lookup for {}: {} finding(s)", request.target, report.findings.len());
        Ok(report)
    }
}

fn cvss_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn cve_ids(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => items.iter().filter_map(|v| v.as_str()).map(str::to_string).collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

fn nvd_link(cve: &str) -> String {
    format!("https://nvd.nist.gov/vuln/detail/{}", cve)
}

fn banner_title(banner: &BannerRecord) -> String {
    let parts: Vec<&str> = [banner.product.as_deref(), banner.version.as_deref()]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    let proto = banner.transport.as_deref().unwrap_or("tcp");
    if parts.is_empty() {
        format!("{}/{}", banner.port, proto)
    } else {
        format!("{}/{} {}", banner.port, proto, parts.join(" "))
    }
}

/// Maps a host record into a profile, open-port and vulnerability findings.
pub fn normalize_host(queried_ip: &str, raw: &HostResponse) -> SourceReport {
    let ip = if !raw.ip_str.is_empty() {
        raw.ip_str.clone()
    } else {
        raw.ip.as_str().filter(|s| !s.is_empty()).unwrap_or(queried_ip).to_string()
    };
    let mut findings = Vec::new();
    let mut covered: HashSet<String> = HashSet::new();

    let mut ports: BTreeSet<u16> = raw.ports.iter().copied().collect();

    for banner in &raw.data {
        if banner.port == 0 {
            continue;
        }
        ports.insert(banner.port);
        let seen = parse_timestamp(&banner.timestamp);
        let location = format!("{}:{}", ip, banner.port);

        findings.push(
            Finding::new(SERVICE, FindingKind::OpenPort, banner_title(banner), Severity::Info, &location)
                .seen(seen, None),
        );

        for (cve, detail) in &banner.vulns {
            let id = first_cve(cve).unwrap_or_else(|| cve.clone());
            let severity = cvss_value(&detail.cvss)
                .map(Severity::from_cvss)
                .unwrap_or(Severity::Medium);
            covered.insert(id.clone());
            findings.push(
                Finding::new(SERVICE, FindingKind::Vulnerability, &id, severity, &location)
                    .seen(seen, None)
                    .describe(detail.summary.clone())
                    .reference(detail.references.first().cloned().or_else(|| Some(nvd_link(&id)))),
            );
        }
    }

    for cve in cve_ids(&raw.vulns) {
        let id = first_cve(&cve).unwrap_or(cve);
        if covered.insert(id.clone()) {
            findings.push(
                Finding::new(SERVICE, FindingKind::Vulnerability, &id, Severity::Medium, &ip)
                    .reference(Some(nvd_link(&id))),
            );
        }
    }

    let profile = HostProfile {
        ip,
        hostnames: raw.hostnames.clone(),
        organization: raw.org.clone(),
        isp: raw.isp.clone(),
        country: raw.country_name.clone(),
        os: raw.os.clone(),
        open_ports: ports.into_iter().collect(),
        last_update: parse_timestamp(&raw.last_update),
    };

    SourceReport {
        host: Some(profile),
        ..SourceReport::with_findings(SERVICE, findings)
    }
}

/// Maps DNS records and bare subdomains into findings.
pub fn normalize_dns(queried_domain: &str, raw: &DnsResponse) -> SourceReport {
    let domain = if raw.domain.is_empty() { queried_domain } else { raw.domain.as_str() };
    let fqdn = |sub: &str| {
        if sub.is_empty() { domain.to_string() } else { format!("{}.{}", sub, domain) }
    };

    let mut findings = Vec::new();
    let mut with_records: HashSet<String> = HashSet::new();

    for record in &raw.data {
        if record.value.is_empty() {
            continue;
        }
        let name = fqdn(&record.subdomain);
        let kind = if record.record_type.is_empty() { "?" } else { record.record_type.as_str() };
        findings.push(
            Finding::new(
                SERVICE,
                FindingKind::Dns,
                format!("{} {}", kind.to_uppercase(), name),
                Severity::Info,
                &record.value,
            )
            .seen(None, parse_timestamp(&record.last_seen)),
        );
        with_records.insert(record.subdomain.clone());
    }

    for sub in &raw.subdomains {
        if !with_records.contains(sub) {
            let name = fqdn(sub);
            findings.push(Finding::new(
                SERVICE,
                FindingKind::Host,
                format!("Subdomain {}", name),
                Severity::Info,
                name,
            ));
        }
    }

    SourceReport::with_findings(SERVICE, findings)
}
