//! HTTP client for the remote finance API.
//!
//! Pure I/O: no caching happens here. Every call takes the scope explicitly;
//! scoped requests carry it in the [`VIEW_MODE_HEADER`] header.

mod loader;
mod resources;

use std::time::Duration;

use fireledger_api_types::Envelope;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::cache::FetchError;
use crate::config::ApiSettings;
use crate::domain::types::Scope;

pub use loader::ApiLoader;
pub use resources::paths;

/// Header identifying the active scope on scoped requests.
pub const VIEW_MODE_HEADER: &str = "X-View-Mode";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("{0}")]
    Api(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<ClientError> for FetchError {
    fn from(error: ClientError) -> Self {
        let message = error.to_string();
        match error {
            ClientError::Decode(_) => FetchError::decode(message),
            ClientError::Api(message) => FetchError::api(message),
            ClientError::Url(_)
            | ClientError::Http(_)
            | ClientError::Status { .. }
            | ClientError::InvalidInput(_) => FetchError::network(message),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    pub fn from_settings(settings: &ApiSettings) -> Result<Self, ClientError> {
        Self::new(
            settings.base_url.as_str(),
            settings.token.clone(),
            settings.timeout,
        )
    }

    pub fn user_agent() -> &'static str {
        concat!("fireledger/", env!("CARGO_PKG_VERSION"))
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn auth_header(&self) -> Result<Option<HeaderValue>, ClientError> {
        self.token
            .as_deref()
            .map(|token| {
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| ClientError::InvalidInput(e.to_string()))
            })
            .transpose()
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(ClientError::Url)
    }

    /// Send a request and return the envelope's `data`, which may be absent.
    pub async fn request_optional<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        scope: Option<Scope>,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<Option<T>, ClientError> {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            url.set_query(None);
            let mut qp = url.query_pairs_mut();
            for (k, v) in query {
                qp.append_pair(k, v);
            }
        }

        debug!(method = %method, url = %url, scope = ?scope, "API request");

        let mut req = self.client.request(method, url);
        if let Some(auth) = self.auth_header()? {
            req = req.header(AUTHORIZATION, auth);
        }
        if let Some(scope) = scope {
            req = req.header(VIEW_MODE_HEADER, scope.as_str());
        }
        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req.send().await?;
        Self::handle(resp).await
    }

    /// Send a request whose envelope must carry `data`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        scope: Option<Scope>,
        query: &[(String, String)],
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        self.request_optional(method, path, scope, query, body)
            .await?
            .ok_or_else(|| ClientError::Decode(format!("response for `{path}` carried no data")))
    }

    /// Send a request and only check that it succeeded.
    pub async fn request_unit(
        &self,
        method: Method,
        path: &str,
        scope: Option<Scope>,
        body: Option<Value>,
    ) -> Result<(), ClientError> {
        self.request_optional::<Value>(method, path, scope, &[], body)
            .await
            .map(|_| ())
    }

    async fn handle<T: DeserializeOwned>(resp: Response) -> Result<Option<T>, ClientError> {
        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        if !envelope.success {
            return Err(ClientError::Api(envelope.failure_message()));
        }
        Ok(envelope.data)
    }
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| ClientError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_trailing_slash() {
        let client = ApiClient::new("https://example.test/v1", None, Duration::from_secs(5))
            .expect("client");
        assert_eq!(client.base_url().as_str(), "https://example.test/v1/");
        assert_eq!(
            client.url("/api/ledgers").expect("url").as_str(),
            "https://example.test/v1/api/ledgers"
        );
    }

    #[test]
    fn user_agent_contains_version() {
        let ua = ApiClient::user_agent();
        assert!(ua.starts_with("fireledger/"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn client_errors_map_onto_fetch_error_kinds() {
        let api: FetchError = ClientError::Api("ledger not found".into()).into();
        assert_eq!(api, FetchError::api("ledger not found"));

        let status: FetchError = ClientError::Status {
            status: 502,
            body: "bad gateway".into(),
        }
        .into();
        assert_eq!(status.kind, crate::cache::FetchErrorKind::Network);
    }
}
