use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::finding::{Finding, Severity};
use crate::core::job::ScanJob;
use crate::core::Service;
use crate::error::SourceError;
use crate::modules::{HostProfile, SourceReport};
use crate::SinkRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// What happened to one requested service during a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcome {
    pub service: Service,
    pub status: OutcomeStatus,
    pub message: Option<String>,
    pub findings: usize,
    pub elapsed_ms: u64,
    /// Host profile, when the source returned one.
    pub host: Option<HostProfile>,
    pub job: Option<ScanJob>,
    #[serde(skip)]
    pub error: Option<SourceError>,
}

impl SourceOutcome {
    fn base(service: Service, status: OutcomeStatus) -> Self {
        Self {
            service,
            status,
            message: None,
            findings: 0,
            elapsed_ms: 0,
            host: None,
            job: None,
            error: None,
        }
    }

    pub fn completed(service: Service, findings: usize, elapsed_ms: u64) -> Self {
        Self {
            findings,
            elapsed_ms,
            ..Self::base(service, OutcomeStatus::Completed)
        }
    }

    pub fn failed(service: Service, error: SourceError, message: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            message: Some(message.into()),
            elapsed_ms,
            error: Some(error),
            ..Self::base(service, OutcomeStatus::Failed)
        }
    }

    pub fn skipped(service: Service, reason: impl Into<String>) -> Self {
        Self {
            message: Some(reason.into()),
            ..Self::base(service, OutcomeStatus::Skipped)
        }
    }

    pub fn cancelled(service: Service, elapsed_ms: u64) -> Self {
        Self {
            message: Some("scan cancelled".to_string()),
            elapsed_ms,
            error: Some(SourceError::Cancelled),
            ..Self::base(service, OutcomeStatus::Cancelled)
        }
    }

    /// Skipped sources were never attempted.
    pub fn was_attempted(&self) -> bool {
        self.status != OutcomeStatus::Skipped
    }
}

/// One source's outcome together with the findings it produced.
#[derive(Debug, Clone)]
pub struct SourceRun {
    pub outcome: SourceOutcome,
    pub findings: Vec<Finding>,
}

impl SourceRun {
    pub fn without_findings(outcome: SourceOutcome) -> Self {
        Self {
            outcome,
            findings: Vec::new(),
        }
    }

    /// A completed run; host profile and job travel on the outcome.
    pub fn completed(service: Service, report: SourceReport, elapsed_ms: u64) -> Self {
        let outcome = SourceOutcome {
            host: report.host,
            job: report.job,
            ..SourceOutcome::completed(service, report.findings.len(), elapsed_ms)
        };
        Self {
            outcome,
            findings: report.findings,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
    pub sources_completed: usize,
    pub sources_failed: usize,
    pub sources_skipped: usize,
    /// 100 is a clean bill of health; each finding subtracts by severity.
    pub risk_score: u8,
}

impl Summary {
    pub fn from_parts(findings: &[Finding], outcomes: &[SourceOutcome]) -> Self {
        let mut summary = Summary {
            total: findings.len(),
            ..Summary::default()
        };
        for f in findings {
            match f.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Info => summary.info += 1,
            }
        }
        for o in outcomes {
            match o.status {
                OutcomeStatus::Completed => summary.sources_completed += 1,
                OutcomeStatus::Failed | OutcomeStatus::Cancelled => summary.sources_failed += 1,
                OutcomeStatus::Skipped => summary.sources_skipped += 1,
            }
        }
        let penalty = 20 * summary.critical + 10 * summary.high + 4 * summary.medium + summary.low;
        summary.risk_score = 100usize.saturating_sub(penalty) as u8;
        summary
    }
}

/// Aggregated, deduplicated result of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub target: String,
    pub services: Vec<Service>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceOutcome>,
    pub findings: Vec<Finding>,
    pub summary: Summary,
}

impl ScanReport {
    pub fn outcome(&self, service: Service) -> Option<&SourceOutcome> {
        self.sources.iter().find(|o| o.service == service)
    }

    /// True when at least one source ran and none of them completed.
    pub fn all_failed(&self) -> bool {
        let mut attempted = self.sources.iter().filter(|o| o.was_attempted()).peekable();
        attempted.peek().is_some() && attempted.all(|o| o.status != OutcomeStatus::Completed)
    }

    pub fn host_profiles(&self) -> impl Iterator<Item = &HostProfile> {
        self.sources.iter().filter_map(|o| o.host.as_ref())
    }

    pub fn first_failure(&self) -> Option<&SourceError> {
        self.sources.iter().find_map(|o| o.error.as_ref())
    }

    pub fn alertable(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity >= Severity::High)
    }
}

/// Collects, deduplicates, and reports scan results.
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn merge(
        target: &str,
        services: &[Service],
        started_at: DateTime<Utc>,
        runs: Vec<SourceRun>,
    ) -> ScanReport {
        let finished_at = Utc::now();
        let mut outcomes = Vec::with_capacity(runs.len());
        let mut raw = Vec::new();

        for run in runs {
            outcomes.push(run.outcome);
            raw.extend(run.findings);
        }
        outcomes.sort_by_key(|o| o.service);

        let findings = Self::dedupe(raw);
        let summary = Summary::from_parts(&findings, &outcomes);

        ScanReport {
            target: target.to_string(),
            services: services.to_vec(),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
            sources: outcomes,
            findings,
            summary,
        }
    }

    /// Keeps the most severe instance per dedup key and records who else saw it.
    pub fn dedupe(findings: Vec<Finding>) -> Vec<Finding> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<Finding> = Vec::new();

        for finding in findings {
            let key = finding.dedup_key();
            let Some(&i) = index.get(&key) else {
                index.insert(key, kept.len());
                kept.push(finding);
                continue;
            };

            let existing = &mut kept[i];
            let (mut winner, loser) = if finding.severity > existing.severity {
                (finding, existing.clone())
            } else {
                (existing.clone(), finding)
            };
            for service in std::iter::once(loser.source).chain(loser.also_reported_by) {
                if service != winner.source && !winner.also_reported_by.contains(&service) {
                    winner.also_reported_by.push(service);
                }
            }
            winner.also_reported_by.sort();
            winner.first_seen = match (winner.first_seen, loser.first_seen) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            winner.last_seen = winner.last_seen.max(loser.last_seen);
            if winner.description.is_none() {
                winner.description = loser.description;
            }
            if winner.reference.is_none() {
                winner.reference = loser.reference;
            }
            *existing = winner;
        }

        kept.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.kind.cmp(&b.kind))
                .then_with(|| a.location.cmp(&b.location))
                .then_with(|| a.title.cmp(&b.title))
        });
        kept
    }

    pub fn report_summary(report: &ScanReport, sink: &SinkRef) {
        for o in &report.sources {
            let line = match o.status {
                OutcomeStatus::Completed => format!(
                    "  {:<28} completed: {} finding(s) in {}ms",
                    o.service.to_string(),
                    o.findings,
                    o.elapsed_ms
                ),
                _ => format!(
                    "  {:<28} {}: {}",
                    o.service.to_string(),
                    format!("{:?}", o.status).to_lowercase(),
                    o.message.as_deref().unwrap_or("-")
                ),
            };
            let level = match o.status {
                OutcomeStatus::Completed => "info",
                OutcomeStatus::Skipped => "info",
                _ => "warn",
            };
            sink.on_log(level, &line);
        }

        for host in report.host_profiles() {
            let org = host.organization.as_deref().unwrap_or("unknown org");
            let country = host.country.as_deref().unwrap_or("unknown country");
            sink.on_log(
                "info",
                &format!("[*] {}: {}, {}, {} open port(s)", host.ip, org, country, host.open_ports.len()),
            );
        }

        let s = &report.summary;
        if report.findings.is_empty() {
            sink.on_log("success", &format!("[+] No findings for {}.", report.target));
        } else {
            sink.on_log(
                if s.critical + s.high > 0 { "error" } else { "warn" },
                &format!(
                    "[+] {} finding(s) for {}: {} critical, {} high, {} medium, {} low, {} info",
                    s.total, report.target, s.critical, s.high, s.medium, s.low, s.info
                ),
            );
        }
        sink.on_log("phase", &format!("[*] Risk score: {}/100", s.risk_score));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::finding::FindingKind;

    fn port(source: Service, location: &str, severity: Severity) -> Finding {
        Finding::new(source, FindingKind::OpenPort, "open", severity, location)
    }

    #[test]
    fn test_dedupe_keeps_highest_and_records_sources() {
        let findings = vec![
            port(Service::Host, "1.2.3.4:6379", Severity::Info),
            port(Service::Ports, "1.2.3.4:6379", Severity::High),
            port(Service::Leaks, "1.2.3.4:6379", Severity::Info),
            port(Service::Ports, "1.2.3.4:22", Severity::Info),
        ];
        let merged = ResultAggregator::dedupe(findings);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].source, Service::Ports);
        assert_eq!(merged[0].severity, Severity::High);
        assert_eq!(merged[0].also_reported_by, vec![Service::Host, Service::Leaks]);
        assert!(merged[1].also_reported_by.is_empty());
    }

    #[test]
    fn test_sort_order() {
        let findings = vec![
            port(Service::Ports, "b:1", Severity::Low),
            Finding::new(Service::WebVuln, FindingKind::Vulnerability, "xss", Severity::Low, "https://a"),
            port(Service::Ports, "a:1", Severity::Critical),
            port(Service::Ports, "a:2", Severity::Low),
        ];
        let merged = ResultAggregator::dedupe(findings);
        let order: Vec<&str> = merged.iter().map(|f| f.location.as_str()).collect();
        assert_eq!(order, vec!["a:1", "https://a", "a:2", "b:1"]);
    }

    #[test]
    fn test_summary_and_risk_score() {
        let findings = vec![
            port(Service::Ports, "a:1", Severity::Critical),
            port(Service::Ports, "a:2", Severity::High),
            port(Service::Ports, "a:3", Severity::Medium),
            port(Service::Ports, "a:4", Severity::Low),
            port(Service::Ports, "a:5", Severity::Info),
        ];
        let outcomes = vec![
            SourceOutcome::completed(Service::Ports, 5, 10),
            SourceOutcome::skipped(Service::Host, "not configured"),
        ];
        let s = Summary::from_parts(&findings, &outcomes);
        assert_eq!(s.total, 5);
        assert_eq!(s.risk_score, 100 - 20 - 10 - 4 - 1);
        assert_eq!(s.sources_completed, 1);
        assert_eq!(s.sources_skipped, 1);

        let many: Vec<Finding> = (0..8).map(|i| port(Service::Ports, &format!("x:{}", i), Severity::Critical)).collect();
        assert_eq!(Summary::from_parts(&many, &[]).risk_score, 0);
    }

    #[test]
    fn test_merge_orders_outcomes_and_detects_total_failure() {
        let err = SourceError::Unauthorized { provider: "leaks".into() };
        let runs = vec![
            SourceRun::without_findings(SourceOutcome::failed(Service::Leaks, err.clone(), err.to_string(), 3)),
            SourceRun::without_findings(SourceOutcome::skipped(Service::Host, "not configured")),
        ];
        let report = ResultAggregator::merge("example.com", &[Service::Host, Service::Leaks], Utc::now(), runs);
        assert_eq!(report.sources[0].service, Service::Host);
        assert!(report.all_failed());
        assert_eq!(report.first_failure(), Some(&err));

        let none_attempted = ResultAggregator::merge(
            "example.com",
            &[Service::Host],
            Utc::now(),
            vec![SourceRun::without_findings(SourceOutcome::skipped(Service::Host, "not configured"))],
        );
        assert!(!none_attempted.all_failed());
    }

    #[test]
    fn test_outcome_carries_host_profile_and_elapsed() {
        let profile = HostProfile { ip: "203.0.113.7".into(), open_ports: vec![22], ..HostProfile::default() };
        let report = SourceReport {
            host: Some(profile.clone()),
            ..SourceReport::with_findings(Service::Host, vec![port(Service::Host, "203.0.113.7:22", Severity::Info)])
        };
        let merged = ResultAggregator::merge(
            "203.0.113.7",
            &[Service::Host],
            Utc::now(),
            vec![SourceRun::completed(Service::Host, report, 42)],
        );

        assert_eq!(merged.sources[0].findings, 1);
        assert_eq!(merged.host_profiles().collect::<Vec<_>>(), vec![&profile]);

        let json = serde_json::to_value(&merged).unwrap();
        assert_eq!(json["sources"][0]["elapsedMs"], 42);
        assert_eq!(json["sources"][0]["host"]["ip"], "203.0.113.7");
        assert!(json.get("host").is_none());
    }
}
