use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::Service;
use crate::error::SourceError;

const MAX_DOMAIN_LEN: usize = 253;

fn label_pattern() -> &'static Regex {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").expect("valid label regex")
    })
}

/// A scan target: either an IP address or a DNS name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Target {
    Ip(IpAddr),
    Domain(String),
}

impl Target {
    /// Parses user input into a target plus any port embedded in it.
    ///
    /// Accepts bare addresses, `host:port`, bracketed IPv6 and full URLs;
    /// scheme, path and query are dropped.
    pub fn parse(input: &str) -> Result<(Target, Option<u16>), SourceError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(SourceError::InvalidTarget("target is empty".to_string()));
        }

        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok((Target::Ip(ip), None));
        }

        let (host, port) = if raw.contains("://") {
            split_url(raw)?
        } else {
            split_host_port(raw)?
        };

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok((Target::Ip(ip), port));
        }

        let domain = normalize_domain(host)?;
        Ok((Target::Domain(domain), port))
    }

    pub fn host_str(&self) -> String {
        match self {
            Target::Ip(ip) => ip.to_string(),
            Target::Domain(d) => d.clone(),
        }
    }

    pub fn is_ip(&self) -> bool {
        matches!(self, Target::Ip(_))
    }

    /// Base URL handed to the web scanner.
    pub fn web_url(&self, port: Option<u16>) -> String {
        let host = match self {
            Target::Ip(IpAddr::V6(v6)) => format!("[{}]", v6),
            other => other.host_str(),
        };
        match port {
            Some(443) | None => format!("https://{}", host),
            Some(p) => format!("https://{}:{}", host, p),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.host_str())
    }
}

fn split_url(raw: &str) -> Result<(String, Option<u16>), SourceError> {
    let parsed = Url::parse(raw)
        .map_err(|e| SourceError::InvalidTarget(format!("'{}' is not a valid URL: {}", raw, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| SourceError::InvalidTarget(format!("'{}' has no host", raw)))?;
    Ok((host.to_string(), parsed.port()))
}

fn split_host_port(raw: &str) -> Result<(String, Option<u16>), SourceError> {
    let without_path = raw.split(['/', '?', '#']).next().unwrap_or(raw);

    if let Some(rest) = without_path.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| SourceError::InvalidTarget(format!("unbalanced brackets in '{}'", raw)))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(parse_port(p)?),
            None => None,
        };
        return Ok((host.to_string(), port));
    }

    match without_path.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Ok((host.to_string(), Some(parse_port(port)?))),
        _ => Ok((without_path.to_string(), None)),
    }
}

fn parse_port(raw: &str) -> Result<u16, SourceError> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(SourceError::InvalidTarget(format!("'{}' is not a valid port", raw))),
        Ok(p) => Ok(p),
    }
}

fn normalize_domain(host: &str) -> Result<String, SourceError> {
    let domain = host.trim_end_matches('.').to_lowercase();

    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(SourceError::InvalidTarget(format!(
            "'{}' is not a valid domain name",
            host
        )));
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(SourceError::InvalidTarget(format!(
            "'{}' is neither an IP address nor a fully qualified domain",
            host
        )));
    }

    if let Some(bad) = labels.iter().find(|l| !label_pattern().is_match(l)) {
        return Err(SourceError::InvalidTarget(format!(
            "'{}' contains an invalid label '{}'",
            host, bad
        )));
    }

    let tld = labels[labels.len() - 1];
    if tld.chars().all(|c| c.is_ascii_digit()) {
        return Err(SourceError::InvalidTarget(format!(
            "'{}' looks like a malformed IP address",
            host
        )));
    }

    Ok(domain)
}

/// Inbound scan request as submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanRequest {
    pub target: String,
    pub services: Vec<Service>,
    pub port: Option<u16>,
}

impl ScanRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn with_services(mut self, services: Vec<Service>) -> Self {
        self.services = services;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn validate(&self) -> Result<ValidatedRequest, SourceError> {
        let (target, embedded_port) = Target::parse(&self.target)?;

        if self.port == Some(0) {
            return Err(SourceError::InvalidTarget("port 0 is not scannable".to_string()));
        }

        let services = if self.services.is_empty() {
            Service::ALL.to_vec()
        } else {
            Service::ALL
                .into_iter()
                .filter(|s| self.services.contains(s))
                .collect()
        };

        Ok(ValidatedRequest {
            target,
            services,
            port: self.port.or(embedded_port),
        })
    }
}

/// A request that passed validation; everything downstream works on this.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRequest {
    pub target: Target,
    pub services: Vec<Service>,
    pub port: Option<u16>,
}
