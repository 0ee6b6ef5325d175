use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::Service;

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Maps free-form provider labels; anything unrecognised is `Info`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "critical" | "crit" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" | "med" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        }
    }

    pub fn from_cvss(score: f64) -> Self {
        if score >= 9.0 {
            Severity::Critical
        } else if score >= 7.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Medium
        } else if score > 0.0 {
            Severity::Low
        } else {
            Severity::Info
        }
    }

    pub fn from_risk_level(level: u8) -> Self {
        match level {
            0 => Severity::Info,
            1 => Severity::Low,
            2 => Severity::Medium,
            3 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FindingKind {
    Vulnerability,
    Leak,
    OpenPort,
    Dns,
    Host,
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingKind::Vulnerability => write!(f, "Vulnerability"),
            FindingKind::Leak => write!(f, "Leak"),
            FindingKind::OpenPort => write!(f, "Open port"),
            FindingKind::Dns => write!(f, "DNS"),
            FindingKind::Host => write!(f, "Host"),
        }
    }
}

/// Display-oriented result shared by every provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub source: Service,
    pub kind: FindingKind,
    pub title: String,
    pub severity: Severity,
    pub location: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also_reported_by: Vec<Service>,
}

impl Finding {
    pub fn new(
        source: Service,
        kind: FindingKind,
        title: impl Into<String>,
        severity: Severity,
        location: impl Into<String>,
    ) -> Self {
        Self {
            source,
            kind,
            title: title.into(),
            severity,
            location: location.into(),
            first_seen: None,
            last_seen: None,
            description: None,
            reference: None,
            also_reported_by: Vec::new(),
        }
    }

    pub fn seen(mut self, first: Option<DateTime<Utc>>, last: Option<DateTime<Utc>>) -> Self {
        self.first_seen = first;
        self.last_seen = last.or(first);
        self
    }

    pub fn describe(mut self, description: Option<String>) -> Self {
        self.description = description
            .map(|d| truncate_text(d.trim(), MAX_DESCRIPTION_CHARS))
            .filter(|d| !d.is_empty());
        self
    }

    pub fn reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference.filter(|r| !r.is_empty());
        self
    }

    /// Key under which findings from different sources are considered the same.
    pub fn dedup_key(&self) -> String {
        match self.kind {
            FindingKind::OpenPort => format!("{:?}|{}", self.kind, self.location.to_lowercase()),
            FindingKind::Vulnerability => {
                let id = first_cve(&self.title).unwrap_or_else(|| self.title.to_lowercase());
                format!("{:?}|{}|{}", self.kind, id, host_part(&self.location))
            }
            _ => format!(
                "{:?}|{}|{}",
                self.kind,
                self.title.to_lowercase(),
                self.location.to_lowercase()
            ),
        }
    }
}

pub const MAX_DESCRIPTION_CHARS: usize = 280;

fn cve_pattern() -> &'static Regex {
    static CVE: OnceLock<Regex> = OnceLock::new();
    CVE.get_or_init(|| Regex::new(r"(?i)CVE-\d{4}-\d{4,}").expect("valid CVE regex"))
}

pub fn first_cve(text: &str) -> Option<String> {
    cve_pattern().find(text).map(|m| m.as_str().to_uppercase())
}

/// Host component of a location such as `https://host:8443/path` or `host:22`.
fn host_part(location: &str) -> String {
    let without_scheme = location
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(location);
    let authority = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host = if authority.starts_with('[') {
        authority.split(']').next().unwrap_or(authority).trim_start_matches('[')
    } else if authority.matches(':').count() == 1 {
        authority.split(':').next().unwrap_or(authority)
    } else {
        authority
    };
    host.to_lowercase()
}

/// Shortens text to at most `max` characters, marking the cut with an ellipsis.
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Best-effort timestamp parsing for the assorted formats providers emit.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    s.parse::<i64>().ok().and_then(from_epoch)
}

fn from_epoch(raw: i64) -> Option<DateTime<Utc>> {
    // Anything past year ~2286 in seconds is really milliseconds.
    if raw > 9_999_999_999 {
        DateTime::from_timestamp_millis(raw)
    } else if raw > 0 {
        DateTime::from_timestamp(raw, 0)
    } else {
        None
    }
}
