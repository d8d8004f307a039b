use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use reqwest::Method;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE};
use url::Url;

use crate::error::{Error, Result};
use crate::rest_types::{
    FinalizeResumableUploadResponse, InitResumableUploadRequest, InitResumableUploadResponse,
};
use crate::transport::{Body, Transport, extract};

const MEGABYTE: u64 = 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * MEGABYTE;

const INIT_RESUMABLE_UPLOAD_ROUTE: &str = "uploads/resumable/init";

/// An inclusive byte range `start..=end` of an upload of `total` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ChunkRange {
    /// The chunk beginning at `offset`, or `None` once nothing remains.
    fn at(offset: u64, total: u64, chunk_size: u64) -> Option<Self> {
        let len = chunk_size.min(total.saturating_sub(offset));
        if len == 0 {
            return None;
        }
        Some(Self {
            start: offset,
            end: offset + len - 1,
            total,
        })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

#[derive(Clone, Debug)]
pub struct UploadSession {
    pub session_id: String,
    pub upload_url: Url,
    pub total_size: u64,
    pub uploaded_bytes: u64,
}

impl UploadSession {
    pub fn next_chunk(&self, chunk_size: u64) -> Option<ChunkRange> {
        ChunkRange::at(self.uploaded_bytes, self.total_size, chunk_size)
    }

    fn advance(&mut self, chunk: &ChunkRange) {
        debug_assert_eq!(chunk.start, self.uploaded_bytes);
        self.uploaded_bytes += chunk.len();
    }

    pub fn is_complete(&self) -> bool {
        self.uploaded_bytes == self.total_size
    }
}

#[derive(Clone, Debug)]
pub struct UploadPayload {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkedUploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizedUpload {
    pub session_id: String,
    pub url: String,
    pub key: Option<String>,
}

#[derive(Debug)]
pub enum UploadEvent {
    Progress(ChunkedUploadProgress),
    Complete(FinalizedUpload),
}

/// Drives one upload through init, sequential chunk PUTs and finalize.
///
/// Chunks go straight to the session's upload URL without API credentials.
/// A failed chunk abandons the session: nothing is finalized and the remote
/// side is left to expire it.
#[derive(Clone, Copy)]
pub struct ResumableUploader<'a> {
    transport: &'a Transport,
    chunk_size: u64,
}

impl<'a> ResumableUploader<'a> {
    pub fn new(transport: &'a Transport, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::validation("chunk size must be greater than zero"));
        }
        Ok(Self {
            transport,
            chunk_size,
        })
    }

    pub fn upload_events(self, payload: UploadPayload) -> Result<BoxStream<'a, Result<UploadEvent>>> {
        if payload.data.is_empty() {
            return Err(Error::validation("cannot upload an empty payload"));
        }

        let stream = async_stream::try_stream! {
            let mut session = self.init(&payload).await?;

            yield UploadEvent::Progress(ChunkedUploadProgress {
                bytes_uploaded: 0,
                total_bytes: session.total_size,
            });

            while let Some(chunk) = session.next_chunk(self.chunk_size) {
                let body = payload
                    .data
                    .slice(chunk.start as usize..=chunk.end as usize);
                self.put_chunk(&session, &chunk, body).await?;
                session.advance(&chunk);

                yield UploadEvent::Progress(ChunkedUploadProgress {
                    bytes_uploaded: session.uploaded_bytes,
                    total_bytes: session.total_size,
                });
            }

            let finalized = self.finalize(&session).await?;
            yield UploadEvent::Complete(finalized);
        };

        Ok(Box::pin(stream))
    }

    pub async fn upload(self, payload: UploadPayload) -> Result<FinalizedUpload> {
        let mut events = self.upload_events(payload)?;
        while let Some(event) = events.next().await {
            if let UploadEvent::Complete(finalized) = event? {
                return Ok(finalized);
            }
        }
        Err(Error::protocol("upload ended without being finalized"))
    }

    async fn init(&self, payload: &UploadPayload) -> Result<UploadSession> {
        let total_size = payload.data.len() as u64;
        let request = InitResumableUploadRequest {
            file_name: payload.file_name.clone(),
            content_type: payload.content_type.clone(),
            total_size,
        };

        let mut body = self
            .transport
            .post_json(INIT_RESUMABLE_UPLOAD_ROUTE, &request)
            .await?;
        let init: InitResumableUploadResponse = extract(&mut body, "data")?;

        let session_id = init
            .session_id
            .ok_or_else(|| Error::protocol("upload session is missing 'sessionId'"))?;
        let upload_url = init
            .upload_url
            .ok_or_else(|| Error::protocol("upload session is missing 'uploadUrl'"))?;
        let upload_url = Url::parse(&upload_url)
            .map_err(|e| Error::protocol(format!("invalid upload URL '{upload_url}': {e}")))?;

        tracing::info!(%session_id, total_size, "opened resumable upload session");

        Ok(UploadSession {
            session_id,
            upload_url,
            total_size,
            uploaded_bytes: 0,
        })
    }

    async fn put_chunk(&self, session: &UploadSession, chunk: &ChunkRange, body: Bytes) -> Result<()> {
        let content_range = chunk.content_range();
        tracing::debug!(session_id = %session.session_id, %content_range, "uploading chunk");

        let response = self
            .transport
            .direct_http()
            .put(session.upload_url.clone())
            .header(CONTENT_LENGTH, chunk.len())
            .header(CONTENT_RANGE, &content_range)
            .body(body)
            .send()
            .await?;

        // Storage backends answer intermediate chunks with 308, so anything
        // below 400 counts as acknowledged.
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            // An unreadable body only shortens the message.
            let message = match response.text().await.ok().filter(|t| !t.is_empty()) {
                Some(text) => format!("failed to upload chunk {content_range}: {text}"),
                None => format!("failed to upload chunk {content_range}"),
            };
            return Err(Error::Service {
                status,
                message,
                code: None,
                details: None,
                retry_after: None,
            });
        }

        Ok(())
    }

    async fn finalize(&self, session: &UploadSession) -> Result<FinalizedUpload> {
        debug_assert!(session.is_complete());
        let url = self.transport.endpoint(&[
            "uploads",
            "resumable",
            session.session_id.as_str(),
            "finalize",
        ])?;

        let mut body = self
            .transport
            .execute(Method::POST, url, Body::Empty, &[])
            .await?;
        let finalized: FinalizeResumableUploadResponse = extract(&mut body, "data")?;
        let url = finalized
            .url
            .ok_or_else(|| Error::protocol("finalized upload is missing 'url'"))?;

        tracing::info!(session_id = %session.session_id, %url, "finalized resumable upload");

        Ok(FinalizedUpload {
            session_id: session.session_id.clone(),
            url,
            key: finalized.key,
        })
    }
}
