use std::path::Path;
use std::time::Duration;

use reqwest::Method;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::render::{ImageSource, RenderRequest};
use crate::rest_types::{
    AuthTokens, Credits, Project, ProjectPage, RefreshTokenRequest, RegisterWebhookRequest,
    Render, SignInRequest, User, Webhook,
};
use crate::transport::{Body, ClientConfig, CredentialStore, RateLimit, Transport, extract};
use crate::upload::{FinalizedUpload, ResumableUploader};
use crate::webhook;

const SIGN_IN_ROUTE: &str = "auth/signin";
const REFRESH_ROUTE: &str = "auth/refresh";
const ME_ROUTE: &str = "auth/me";
const CREDITS_ROUTE: &str = "credits";
const RENDERS_ROUTE: &str = "renders";
const WEBHOOKS_REGISTER_ROUTE: &str = "webhooks/register";
const PROJECTS_ROUTE: &str = "projects";

pub const DEFAULT_PROJECT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct RenderiqClient {
    transport: Transport,
}

impl RenderiqClient {
    pub fn new(config: ClientConfig, credentials: CredentialStore) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(config, credentials)?,
        })
    }

    pub fn with_api_key(api_key: impl Into<String>) -> Result<Self> {
        let credentials = CredentialStore::from_parts(None, Some(api_key.into()))?;
        Self::new(ClientConfig::default(), credentials)
    }

    pub fn with_access_token(access_token: impl Into<String>) -> Result<Self> {
        let credentials = CredentialStore::from_parts(Some(access_token.into()), None)?;
        Self::new(ClientConfig::default(), credentials)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn credentials(&self) -> &CredentialStore {
        self.transport.credentials()
    }

    pub fn rate_limit(&self) -> Option<RateLimit> {
        self.transport.rate_limit()
    }

    /// Exchanges email and password for tokens. The returned access token
    /// authenticates every later call made through this client.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthTokens> {
        if email.is_empty() || password.is_empty() {
            return Err(Error::validation("email and password are required"));
        }

        let request = SignInRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let body = self
            .transport
            .post_json(SIGN_IN_ROUTE, &request)
            .await
            .map_err(rejected_as_auth)?;

        self.adopt_tokens(body)
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<AuthTokens> {
        if refresh_token.is_empty() {
            return Err(Error::validation("refresh token is required"));
        }

        let request = RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        };
        let body = self
            .transport
            .post_json(REFRESH_ROUTE, &request)
            .await
            .map_err(rejected_as_auth)?;

        self.adopt_tokens(body)
    }

    fn adopt_tokens(&self, body: Value) -> Result<AuthTokens> {
        let tokens: AuthTokens = decode(body, "authentication response")?;
        self.transport
            .credentials()
            .set_access_token(tokens.access_token.clone());
        tracing::info!("access token updated");
        Ok(tokens)
    }

    pub async fn user_info(&self) -> Result<User> {
        let mut body = self.transport.get(ME_ROUTE, &[]).await?;
        extract(&mut body, "user")
    }

    pub async fn credits(&self) -> Result<Credits> {
        let mut body = self.transport.get(CREDITS_ROUTE, &[]).await?;
        extract(&mut body, "data")
    }

    /// Creates a render from the request's image source.
    ///
    /// URLs are passed through as JSON. Bytes and files are sent inline as
    /// multipart, or through a resumable upload session when
    /// `request.resumable` is set, in which case the render references the
    /// finalized asset URL.
    pub async fn create_render(&self, request: &RenderRequest) -> Result<Render> {
        match request.image_source()? {
            ImageSource::Url(url) => self.create_render_from_url(request, url).await,
            ImageSource::Bytes(_) | ImageSource::File(_) if request.resumable => {
                let uploaded = self.upload_image(request).await?;
                self.create_render_from_url(request, &uploaded.url).await
            }
            ImageSource::Bytes(_) | ImageSource::File(_) => {
                let form = request.multipart().await?;
                let mut body = self.transport.post_form(RENDERS_ROUTE, form).await?;
                extract(&mut body, "data")
            }
        }
    }

    /// Uploads the request's image through a resumable session without
    /// creating a render.
    pub async fn upload_image(&self, request: &RenderRequest) -> Result<FinalizedUpload> {
        let payload = request.upload_payload().await?;
        self.uploader(request.chunk_size)?.upload(payload).await
    }

    pub fn uploader(&self, chunk_size: u64) -> Result<ResumableUploader<'_>> {
        ResumableUploader::new(&self.transport, chunk_size)
    }

    /// Creates a render whose image is already hosted at `image_url`. All other
    /// fields come from `request`.
    pub async fn create_render_from_url(&self, request: &RenderRequest, image_url: &str) -> Result<Render> {
        let mut body = self
            .transport
            .post_json(RENDERS_ROUTE, &request.fields(Some(image_url)))
            .await?;
        extract(&mut body, "data")
    }

    pub async fn render_status(&self, render_id: &str) -> Result<Render> {
        let url = self.transport.endpoint(&[RENDERS_ROUTE, render_id])?;
        let mut body = self
            .transport
            .execute(Method::GET, url, Body::Empty, &[])
            .await?;
        extract(&mut body, "data")
    }

    /// Polls until the render completes or fails.
    pub async fn wait_for_render(&self, render_id: &str, interval: Duration) -> Result<Render> {
        loop {
            let render = self.render_status(render_id).await?;
            if render.status.is_terminal() {
                return Ok(render);
            }
            tracing::debug!(render_id, status = %render.status, progress = render.progress, "render in progress");
            tokio::time::sleep(interval).await;
        }
    }

    pub async fn register_webhook(
        &self,
        url: &str,
        events: Vec<String>,
        secret: Option<String>,
    ) -> Result<Webhook> {
        if events.is_empty() {
            return Err(Error::validation("at least one webhook event is required"));
        }

        let request = RegisterWebhookRequest {
            url: url.to_string(),
            events,
            secret,
        };
        let mut body = self
            .transport
            .post_json(WEBHOOKS_REGISTER_ROUTE, &request)
            .await?;
        extract(&mut body, "data")
    }

    pub fn verify_webhook_signature(&self, payload: &str, signature: &str, secret: &str) -> bool {
        webhook::verify_signature(payload, signature, secret)
    }

    pub async fn list_projects(
        &self,
        limit: u32,
        offset: u32,
        platform: Option<&str>,
    ) -> Result<ProjectPage> {
        let mut query = vec![("limit", limit.to_string()), ("offset", offset.to_string())];
        if let Some(platform) = platform {
            query.push(("platform", platform.to_string()));
        }

        let mut body = self.transport.get(PROJECTS_ROUTE, &query).await?;
        extract(&mut body, "data")
    }

    pub async fn project(&self, project_id: &str) -> Result<Project> {
        let url = self.transport.endpoint(&[PROJECTS_ROUTE, project_id])?;
        let mut body = self
            .transport
            .execute(Method::GET, url, Body::Empty, &[])
            .await?;
        extract(&mut body, "data")
    }

    pub async fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        image: Option<&Path>,
    ) -> Result<Project> {
        if name.is_empty() {
            return Err(Error::validation("project name is required"));
        }

        let mut form = Form::new().text("name", name.to_string());
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            form = form.text("description", description.to_string());
        }
        if let Some(path) = image {
            let part = Part::file(path).await.map_err(|e| {
                Error::validation(format!("unable to read image '{}': {e}", path.display()))
            })?;
            form = form.part("image", part);
        }

        let mut body = self.transport.post_form(PROJECTS_ROUTE, form).await?;
        extract(&mut body, "data")
    }
}

/// Sign-in and refresh report bad credentials as `success: false`.
fn rejected_as_auth(err: Error) -> Error {
    match err {
        Error::Service {
            status, message, ..
        } if status.is_success() => Error::Authentication(message),
        other => other,
    }
}

fn decode<T: DeserializeOwned>(body: Value, what: &str) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::protocol(format!("malformed {what}: {e}")))
}
