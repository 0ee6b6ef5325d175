use std::sync::Arc;
use std::time::Duration;

use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, Proxy, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{body_excerpt, join_url};
use crate::config::{AuthScheme, HttpSettings, ProviderConfig};
use crate::core::throttle::ThrottleController;
use crate::error::SourceError;

/// Authenticated JSON client for one upstream provider.
///
/// Carries the provider's base URL, auth header and 429 throttle, and turns
/// HTTP outcomes into `SourceError`s.
pub struct ApiClient {
    name: String,
    inner: Client,
    base_url: String,
    timeout: Duration,
    throttle: Arc<ThrottleController>,
}

impl ApiClient {
    pub fn new(
        name: &str,
        provider: &ProviderConfig,
        settings: &HttpSettings,
    ) -> Result<Self, SourceError> {
        let timeout = Duration::from_secs(settings.timeout.max(1));

        let mut default_headers = HeaderMap::new();
        let (header, value) = match &provider.auth {
            AuthScheme::Bearer => (AUTHORIZATION, format!("Bearer {}", provider.api_key.trim())),
            AuthScheme::Header(h) => (
                HeaderName::from_bytes(h.as_bytes()).map_err(|e| config_error(name, e))?,
                provider.api_key.trim().to_string(),
            ),
        };
        let mut value = HeaderValue::from_str(&value).map_err(|e| config_error(name, e))?;
        value.set_sensitive(true);
        default_headers.insert(header, value);

        let mut builder = ClientBuilder::new()
            .timeout(timeout)
            .user_agent(settings.user_agent.clone())
            .default_headers(default_headers);

        if let Some(proxy) = settings.proxy_ref() {
            builder = builder.proxy(Proxy::all(proxy).map_err(|e| config_error(name, e))?);
        }

        let inner = builder.build().map_err(|e| config_error(name, e))?;

        Ok(Self {
            name: name.to_string(),
            inner,
            base_url: provider.base_url.trim().to_string(),
            timeout,
            throttle: Arc::new(ThrottleController::new()),
        })
    }

    pub fn throttle(&self) -> &ThrottleController {
        &self.throttle
    }

    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let req = self.inner.get(self.url(path)).query(query);
        let body = self.send(req).await?;
        self.decode(&body)
    }

    /// Like `get_json`, but a 404 means "nothing known" and yields `None`.
    pub async fn get_optional_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, SourceError> {
        match self.get_json(path, query).await {
            Ok(v) => Ok(Some(v)),
            Err(SourceError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SourceError> {
        let req = self.inner.post(self.url(path)).json(body);
        let body = self.send(req).await?;
        self.decode(&body)
    }

    async fn send(&self, req: RequestBuilder) -> Result<String, SourceError> {
        self.throttle.wait().await;

        let response = req.timeout(self.timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout { provider: self.name.clone() }
            } else {
                SourceError::Transport {
                    provider: self.name.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        self.throttle.record_response(status.as_u16(), retry_after);

        let body = response.text().await.map_err(|e| SourceError::Transport {
            provider: self.name.clone(),
            message: e.to_string(),
        })?;

        debug!("{} <- HTTP {} ({} bytes)", self.name, status.as_u16(), body.len());
        map_status(&self.name, status, retry_after, &body)?;
        Ok(body)
    }

    fn decode<T: DeserializeOwned>(&self, body: &str) -> Result<T, SourceError> {
        serde_json::from_str(body).map_err(|e| SourceError::Decode {
            provider: self.name.clone(),
            message: e.to_string(),
        })
    }
}

fn config_error(name: &str, err: impl std::fmt::Display) -> SourceError {
    SourceError::Transport {
        provider: name.to_string(),
        message: format!("invalid client configuration: {}", err),
    }
}

/// Classifies a non-success upstream status.
pub fn map_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> Result<(), SourceError> {
    if status.is_success() {
        return Ok(());
    }
    let provider = provider.to_string();
    Err(match status.as_u16() {
        401 | 403 => SourceError::Unauthorized { provider },
        404 => SourceError::NotFound { provider },
        429 => SourceError::RateLimited { provider, retry_after },
        code => SourceError::Upstream {
            provider,
            status: code,
            message: body_excerpt(body),
        },
    })
}
