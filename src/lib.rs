//! Client for the Renderiq plugin API.
//!
//! [`RenderiqClient`] wraps every plugin endpoint. Large images can be sent
//! through a resumable upload session (see [`upload`]) before the render is
//! created.

pub mod client;
pub mod error;
pub mod render;
pub mod rest_types;
pub mod transport;
pub mod upload;
pub mod webhook;

pub use client::{DEFAULT_POLL_INTERVAL, DEFAULT_PROJECT_PAGE_SIZE, RenderiqClient};
pub use error::{Error, Result};
pub use render::{ImageSource, RenderRequest};
pub use rest_types::{AuthTokens, Credits, Project, ProjectPage, Render, RenderStatus, User, Webhook};
pub use transport::{ClientConfig, Credential, CredentialStore, RateLimit};
pub use upload::{
    ChunkRange, ChunkedUploadProgress, DEFAULT_CHUNK_SIZE, FinalizedUpload, ResumableUploader,
    UploadEvent, UploadPayload,
};
