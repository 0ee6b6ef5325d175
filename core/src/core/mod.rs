pub mod engine;
pub mod finding;
pub mod job;
pub mod result_aggregator;
pub mod target;
pub mod target_manager;
pub mod throttle;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// External intelligence services a scan can draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Host,
    Leaks,
    #[serde(rename = "webvuln", alias = "vuln")]
    WebVuln,
    Ports,
}

impl Service {
    /// Canonical order used for reports and default selection.
    pub const ALL: [Service; 4] = [Service::Host, Service::Leaks, Service::WebVuln, Service::Ports];

    pub fn label(&self) -> &'static str {
        match self {
            Service::Host => "host",
            Service::Leaks => "leaks",
            Service::WebVuln => "webvuln",
            Service::Ports => "ports",
        }
    }

    /// Prefix of the environment variables that configure this service.
    pub fn env_key(&self) -> &'static str {
        match self {
            Service::Host => "HOST",
            Service::Leaks => "LEAKS",
            Service::WebVuln => "VULN",
            Service::Ports => "PORTS",
        }
    }

    /// Whether the service runs as a submitted, polled job.
    pub fn is_job_based(&self) -> bool {
        matches!(self, Service::WebVuln | Service::Ports)
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Host => write!(f, "Host/DNS lookup"),
            Service::Leaks => write!(f, "Leak index"),
            Service::WebVuln => write!(f, "Web vulnerability scanner"),
            Service::Ports => write!(f, "Port scanner"),
        }
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "host" | "dns" => Ok(Service::Host),
            "leaks" | "leak" => Ok(Service::Leaks),
            "webvuln" | "vuln" | "web" => Ok(Service::WebVuln),
            "ports" | "port" => Ok(Service::Ports),
            other => Err(format!(
                "unknown service '{}' (expected host, leaks, vuln or ports)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_aliases() {
        assert_eq!("dns".parse::<Service>().unwrap(), Service::Host);
        assert_eq!(" Vuln ".parse::<Service>().unwrap(), Service::WebVuln);
        assert_eq!("port".parse::<Service>().unwrap(), Service::Ports);
        assert!("smtp".parse::<Service>().is_err());
    }

    #[test]
    fn test_service_json_names() {
        let json = serde_json::to_string(&Service::ALL).unwrap();
        assert_eq!(json, r#"["host","leaks","webvuln","ports"]"#);
        let parsed: Service = serde_json::from_str(r#""vuln""#).unwrap();
        assert_eq!(parsed, Service::WebVuln);
    }
}
