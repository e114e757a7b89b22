//! reqwest implementation of [`RemoteApi`] for an OData-flavoured REST control plane.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::query::ListQuery;
use crate::traits::RemoteApi;

/// Connection settings for [`HttpRemoteApi`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Version segment appended to the base URL (`v1.0`, `beta`). Empty for none.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Bearer token, already acquired by the caller.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Upper bound on `@odata.nextLink` pages followed by one `list` call.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

fn default_base_url() -> String {
    "https://graph.microsoft.com".into()
}
fn default_api_version() -> String {
    "v1.0".into()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_pages() -> u32 {
    50
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_version: default_api_version(),
            token: None,
            timeout_ms: default_timeout_ms(),
            max_pages: default_max_pages(),
        }
    }
}

impl HttpApiConfig {
    pub fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.base_url).map_err(|e| format!("api.base_url is invalid: {e}"))?;
        if self.timeout_ms == 0 {
            return Err("api.timeout_ms must be > 0".into());
        }
        if self.max_pages == 0 {
            return Err("api.max_pages must be > 0".into());
        }
        Ok(())
    }

    /// Root URL all collection paths are relative to.
    pub fn root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let version = self.api_version.trim_matches('/');
        if version.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{version}")
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

pub struct HttpRemoteApi {
    http: reqwest::Client,
    root: String,
    token: Option<String>,
    max_pages: u32,
}

impl HttpRemoteApi {
    pub fn new(config: &HttpApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ApiError::fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            root: config.root(),
            token: config.token.clone(),
            max_pages: config.max_pages,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.root, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut req = self.http.request(method, url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req.header("Accept", "application/json")
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<Value>, ApiError> {
        let mut items = Vec::new();
        let mut resp = self
            .request(Method::GET, &self.url(collection))
            .query(&query.to_params())
            .send()
            .await?;

        for page_no in 1..=self.max_pages {
            if resp.status() == StatusCode::NOT_FOUND {
                debug!(collection, "collection not found, treating as empty");
                return Ok(items);
            }
            if !resp.status().is_success() {
                return Err(error_from_response(resp).await);
            }
            let page: Page = resp.json().await?;
            items.extend(page.value);

            let Some(next) = page.next_link else {
                return Ok(items);
            };
            if page_no == self.max_pages {
                return Err(ApiError::fatal(format!(
                    "listing {collection} exceeded {} pages",
                    self.max_pages
                )));
            }
            resp = self.request(Method::GET, &next).send().await?;
        }
        Ok(items)
    }

    async fn read(&self, collection: &str, id: &str) -> Result<Option<Value>, ApiError> {
        let url = self.url(&format!("{collection}/{id}"));
        let resp = self.request(Method::GET, &url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_body(resp).await
    }

    async fn create(&self, collection: &str, body: &Value) -> Result<Value, ApiError> {
        let resp = self
            .request(Method::POST, &self.url(collection))
            .json(body)
            .send()
            .await?;
        Ok(read_body(resp).await?.unwrap_or(Value::Null))
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        body: &Value,
    ) -> Result<Option<Value>, ApiError> {
        let url = self.url(&format!("{collection}/{id}"));
        let resp = self.request(Method::PATCH, &url).json(body).send().await?;
        read_body(resp).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("{collection}/{id}"));
        let resp = self.request(Method::DELETE, &url).send().await?;
        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(error_from_response(resp).await)
    }
}

/// Success body as JSON, `None` when empty.
async fn read_body(resp: Response) -> Result<Option<Value>, ApiError> {
    if !resp.status().is_success() {
        return Err(error_from_response(resp).await);
    }
    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&body)?))
}

/// Builds an [`ApiError`] from a non-2xx response.
async fn error_from_response(resp: Response) -> ApiError {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    let mut err = parse_error_body(status.as_u16(), &body);
    err.retry_after = retry_after;
    err
}

/// Parses the `{error: {code, message}}` envelope, falling back to raw text.
pub fn parse_error_body(status: u16, body: &str) -> ApiError {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        let message = envelope
            .error
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.to_string());
        return ApiError::from_response(status, envelope.error.code, message);
    }
    let message = if body.trim().is_empty() {
        StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("no response body")
            .to_string()
    } else {
        body.trim().to_string()
    };
    ApiError::from_response(status, None, message)
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
