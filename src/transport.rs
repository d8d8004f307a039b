use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::multipart::Form;
use reqwest::{Client, Method, Response, StatusCode, redirect};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://renderiq.io";
pub const DEFAULT_PLATFORM: &str = "rust";
/// Ceiling applied to every call, sized for large multipart bodies.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const API_ROOT: &str = "api/plugins/";
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

pub const PLATFORM_HEADER: HeaderName = HeaderName::from_static("x-renderiq-platform");
pub const PLUGIN_VERSION_HEADER: HeaderName = HeaderName::from_static("x-renderiq-plugin-version");
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    AccessToken(String),
    ApiKey(String),
}

/// Shared, swappable credential. Sign-in and token refresh replace the held
/// value so every later request picks up the new bearer token.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    inner: Arc<RwLock<Credential>>,
}

impl CredentialStore {
    pub fn new(credential: Credential) -> Self {
        Self {
            inner: Arc::new(RwLock::new(credential)),
        }
    }

    /// An access token wins over an API key when both are given.
    pub fn from_parts(access_token: Option<String>, api_key: Option<String>) -> Result<Self> {
        let access_token = access_token.filter(|t| !t.is_empty());
        let api_key = api_key.filter(|k| !k.is_empty());

        match (access_token, api_key) {
            (Some(token), _) => Ok(Self::new(Credential::AccessToken(token))),
            (None, Some(key)) => Ok(Self::new(Credential::ApiKey(key))),
            (None, None) => Err(Error::validation(
                "either an access token or an API key must be provided",
            )),
        }
    }

    pub fn current(&self) -> Credential {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_access_token(&self, token: String) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) =
            Credential::AccessToken(token);
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: Url,
    pub platform: String,
    pub plugin_version: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            platform: DEFAULT_PLATFORM.to_string(),
            plugin_version: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub reset: Option<u64>,
}

pub enum Body {
    Empty,
    Json(Value),
    Multipart(Form),
}

pub struct Transport {
    http: Client,
    direct_http: Client,
    api_base: Url,
    platform: HeaderValue,
    plugin_version: Option<HeaderValue>,
    credentials: CredentialStore,
    rate_limit: Mutex<Option<RateLimit>>,
}

impl Transport {
    pub fn new(config: ClientConfig, credentials: CredentialStore) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("renderiq-rust/", env!("CARGO_PKG_VERSION")))
            .build()?;
        // Upload endpoints reply 308 to partial chunks; that must not be followed.
        let direct_http = Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        let platform = header_value(&config.platform, "platform")?;
        let plugin_version = config
            .plugin_version
            .as_deref()
            .map(|v| header_value(v, "plugin version"))
            .transpose()?;

        Ok(Self {
            http,
            direct_http,
            api_base: api_root(&config.base_url)?,
            platform,
            plugin_version,
            credentials,
            rate_limit: Mutex::new(None),
        })
    }

    /// Unauthenticated client for pre-signed endpoints outside the API root.
    pub fn direct_http(&self) -> &Client {
        &self.direct_http
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Rate-limit state reported by the most recent response, if any.
    pub fn rate_limit(&self) -> Option<RateLimit> {
        *self.rate_limit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::validation(format!("invalid path '{path}': {e}")))
    }

    /// URL of `segments` under the API root, each percent-encoded as one path segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::validation(format!("base URL '{}' cannot hold a path", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.request(Method::GET, path, Body::Empty, query).await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<Value> {
        let body = serde_json::to_value(body)
            .map_err(|e| Error::validation(format!("unable to encode request body: {e}")))?;
        self.request(Method::POST, path, Body::Json(body), &[]).await
    }

    pub async fn post_form(&self, path: &str, form: Form) -> Result<Value> {
        self.request(Method::POST, path, Body::Multipart(form), &[])
            .await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Body,
        query: &[(&str, String)],
    ) -> Result<Value> {
        self.execute(method, self.url(path)?, body, query).await
    }

    pub async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Body,
        query: &[(&str, String)],
    ) -> Result<Value> {
        tracing::debug!(%method, %url, "sending request");

        let mut request = self
            .http
            .request(method.clone(), url)
            .headers(self.identity_headers()?);
        if !query.is_empty() {
            request = request.query(query);
        }
        request = match body {
            Body::Empty => request,
            Body::Json(value) => request.json(&value),
            Body::Multipart(form) => request.multipart(form),
        };

        let response = request.send().await?;
        tracing::debug!(%method, status = %response.status(), "received response");
        self.handle(response).await
    }

    fn identity_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(PLATFORM_HEADER, self.platform.clone());
        if let Some(version) = &self.plugin_version {
            headers.insert(PLUGIN_VERSION_HEADER, version.clone());
        }

        match self.credentials.current() {
            Credential::AccessToken(token) => {
                let mut value = header_value(&format!("Bearer {token}"), "access token")?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Credential::ApiKey(key) => {
                let mut value = header_value(&key, "API key")?;
                value.set_sensitive(true);
                headers.insert(API_KEY_HEADER, value);
            }
        }

        Ok(headers)
    }

    async fn handle(&self, response: Response) -> Result<Value> {
        let status = response.status();
        self.record_rate_limit(response.headers());
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = response.bytes().await?;
        let body = serde_json::from_slice::<Value>(&bytes).ok();
        into_result(status, retry_after.as_deref(), body)
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        if let Some(remaining) = parse(RATE_LIMIT_REMAINING_HEADER) {
            let reset = parse(RATE_LIMIT_RESET_HEADER);
            tracing::debug!(remaining, reset, "rate limit");
            *self.rate_limit.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(RateLimit { remaining, reset });
        }
    }
}

fn header_value(value: &str, what: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::validation(format!("invalid {what} header value: {e}")))
}

fn api_root(base_url: &Url) -> Result<Url> {
    let root = format!("{}/{API_ROOT}", base_url.as_str().trim_end_matches('/'));
    Url::parse(&root).map_err(|e| Error::validation(format!("invalid base URL '{base_url}': {e}")))
}

/// Maps a status and decoded body onto the error taxonomy. A `success: false`
/// flag on a 2xx response is treated the same as a failure status.
fn into_result(status: StatusCode, retry_after: Option<&str>, body: Option<Value>) -> Result<Value> {
    let body = match body {
        Some(body) => body,
        None if status.is_success() => return Err(Error::protocol("invalid JSON response")),
        None => json!({ "success": false, "error": "Invalid JSON response" }),
    };

    if status.is_success() && body.get("success").and_then(Value::as_bool) != Some(false) {
        return Ok(body);
    }

    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .unwrap_or_else(|| {
            if status.is_success() {
                "request was not successful".to_string()
            } else {
                format!("API error: {}", status.as_u16())
            }
        });

    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication(message));
    }

    let code = body
        .get("errorCode")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let details = body.get("details").and_then(Value::as_object).cloned();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let secs = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(Error::Service {
            status,
            message: format!("Rate limit exceeded. Retry after {secs} seconds"),
            code,
            details,
            retry_after: Some(secs),
        });
    }

    Err(Error::Service {
        status,
        message,
        code,
        details,
        retry_after: None,
    })
}

/// Pulls a required field out of a response body.
pub(crate) fn extract<T: DeserializeOwned>(body: &mut Value, field: &str) -> Result<T> {
    let value = body
        .as_object_mut()
        .and_then(|obj| obj.remove(field))
        .filter(|v| !v.is_null())
        .ok_or_else(|| Error::protocol(format!("response is missing '{field}'")))?;

    serde_json::from_value(value)
        .map_err(|e| Error::protocol(format!("malformed '{field}' in response: {e}")))
}
