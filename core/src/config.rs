use std::fs;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::job::PollPolicy;
use crate::core::Service;

pub const ENV_PREFIX: &str = "INTELSCAN";

/// How the API key travels to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `<header>: <key>`
    Header(String),
}

/// Connection details for one upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub auth: AuthScheme,
}

impl ProviderConfig {
    fn with_auth(auth: AuthScheme) -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            auth,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::with_auth(AuthScheme::Bearer)
    }
}

/// Polling knobs for job-based providers, in config-file friendly units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval_secs: u64,
    pub backoff_factor: f64,
    pub max_interval_secs: u64,
}

impl PollConfig {
    fn fixed(max_attempts: u32, interval_secs: u64) -> Self {
        Self {
            max_attempts,
            interval_secs,
            backoff_factor: 1.0,
            max_interval_secs: 60,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.max_attempts.max(1),
            interval: Duration::from_secs(self.interval_secs),
            backoff_factor: self.backoff_factor.max(1.0),
            max_interval: Duration::from_secs(self.max_interval_secs.max(self.interval_secs)),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::fixed(30, 5)
    }
}

/// Settings shared by every upstream HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpSettings {
    pub timeout: u64,
    pub proxy: String,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: 20,
            proxy: String::new(),
            user_agent: format!("intelscan/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpSettings {
    pub fn proxy_ref(&self) -> Option<&str> {
        if self.proxy.is_empty() { None } else { Some(&self.proxy) }
    }
}

/// Shared configuration used by both the CLI and the REST server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub host: ProviderConfig,
    pub leaks: ProviderConfig,
    pub web_vuln: ProviderConfig,
    pub ports: ProviderConfig,
    pub web_vuln_poll: PollConfig,
    pub ports_poll: PollConfig,
    pub web_vuln_profile: String,
    pub http: HttpSettings,
    pub concurrency: usize,
    pub source_timeout: u64,
    pub webhook_url: Option<String>,
    pub bind: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: ProviderConfig::with_auth(AuthScheme::Bearer),
            leaks: ProviderConfig::with_auth(AuthScheme::Header("api-key".to_string())),
            web_vuln: ProviderConfig::with_auth(AuthScheme::Bearer),
            ports: ProviderConfig::with_auth(AuthScheme::Header("X-API-Key".to_string())),
            web_vuln_poll: PollConfig::fixed(45, 10),
            ports_poll: PollConfig::fixed(30, 3),
            web_vuln_profile: "light".to_string(),
            http: HttpSettings::default(),
            concurrency: 4,
            source_timeout: 600,
            webhook_url: None,
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads an optional JSON file, then applies `INTELSCAN_*` overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Sections the file leaves out, or only partly fills, keep the
    /// per-service values from `AppConfig::default()`.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path))?;
        let overlay: Value =
            serde_json::from_str(&data).with_context(|| format!("invalid config file '{}'", path))?;
        let mut merged = serde_json::to_value(Self::default())?;
        merge_json(&mut merged, overlay);
        serde_json::from_value(merged).with_context(|| format!("invalid config file '{}'", path))
    }

    /// Applies overrides from a variable lookup; `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            lookup(&format!("{}_{}", ENV_PREFIX, suffix))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        for service in Service::ALL {
            let key = service.env_key();
            let provider = self.provider_mut(service);
            if let Some(v) = get(&format!("{}_API_KEY", key)) {
                provider.api_key = v;
            }
            if let Some(v) = get(&format!("{}_BASE_URL", key)) {
                provider.base_url = v;
            }
        }

        for (key, poll) in [("VULN", &mut self.web_vuln_poll), ("PORTS", &mut self.ports_poll)] {
            if let Some(v) = get(&format!("{}_POLL_ATTEMPTS", key)).and_then(|v| v.parse().ok()) {
                poll.max_attempts = v;
            }
            if let Some(v) = get(&format!("{}_POLL_INTERVAL", key)).and_then(|v| v.parse().ok()) {
                poll.interval_secs = v;
            }
        }

        if let Some(v) = get("TIMEOUT").and_then(|v| v.parse().ok()) {
            self.http.timeout = v;
        }
        if let Some(v) = get("SOURCE_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.source_timeout = v;
        }
        if let Some(v) = get("CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.concurrency = v;
        }
        if let Some(v) = get("PROXY") {
            self.http.proxy = v;
        }
        if let Some(v) = get("WEBHOOK_URL") {
            self.webhook_url = Some(v);
        }
        if let Some(v) = get("BIND") {
            self.bind = v;
        }
    }

    pub fn provider(&self, service: Service) -> &ProviderConfig {
        match service {
            Service::Host => &self.host,
            Service::Leaks => &self.leaks,
            Service::WebVuln => &self.web_vuln,
            Service::Ports => &self.ports,
        }
    }

    pub fn provider_mut(&mut self, service: Service) -> &mut ProviderConfig {
        match service {
            Service::Host => &mut self.host,
            Service::Leaks => &mut self.leaks,
            Service::WebVuln => &mut self.web_vuln,
            Service::Ports => &mut self.ports,
        }
    }

    pub fn configured_services(&self) -> Vec<Service> {
        Service::ALL
            .into_iter()
            .filter(|s| self.provider(*s).is_configured())
            .collect()
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout.max(1))
    }

    pub fn webhook_ref(&self) -> Option<&str> {
        self.webhook_url.as_deref().filter(|u| !u.is_empty())
    }
}

fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
