use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::upload::{DEFAULT_CHUNK_SIZE, UploadPayload};

pub const DEFAULT_QUALITY: &str = "high";
pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const DEFAULT_STYLE: &str = "photorealistic";

const IMAGE_PART: &str = "uploadedImageData";
const DEFAULT_IMAGE_NAME: &str = "image.png";
const RESUMABLE_IMAGE_NAME: &str = "render_image.png";
const DEFAULT_IMAGE_TYPE: &str = "image/png";

/// Parameters for a new render.
///
/// When more than one image source is set, the URL is used first, then raw
/// bytes, then the file. The unused sources are ignored.
#[derive(Clone, Debug)]
pub struct RenderRequest {
    pub image_url: Option<String>,
    pub image_data: Option<Bytes>,
    pub image_file: Option<PathBuf>,
    pub prompt: Option<String>,
    pub quality: String,
    pub aspect_ratio: String,
    pub style: String,
    pub project_id: Option<String>,
    pub callback_url: Option<String>,
    /// Send the image through a resumable upload session instead of a
    /// single multipart request.
    pub resumable: bool,
    pub chunk_size: u64,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            image_url: None,
            image_data: None,
            image_file: None,
            prompt: None,
            quality: DEFAULT_QUALITY.to_string(),
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            style: DEFAULT_STYLE.to_string(),
            project_id: None,
            callback_url: None,
            resumable: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Url(&'a str),
    Bytes(&'a Bytes),
    File(&'a Path),
}

impl RenderRequest {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            image_data: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            image_file: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = aspect_ratio.into();
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn resumable(mut self, chunk_size: u64) -> Self {
        self.resumable = true;
        self.chunk_size = chunk_size;
        self
    }

    pub fn image_source(&self) -> Result<ImageSource<'_>> {
        if let Some(url) = self.image_url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(ImageSource::Url(url));
        }
        if let Some(data) = self.image_data.as_ref().filter(|d| !d.is_empty()) {
            return Ok(ImageSource::Bytes(data));
        }
        if let Some(path) = self.image_file.as_deref() {
            return Ok(ImageSource::File(path));
        }
        Err(Error::validation(
            "must provide image data, an image file or an image URL",
        ))
    }

    pub(crate) fn fields<'a>(&'a self, image_url: Option<&'a str>) -> RenderFields<'a> {
        RenderFields {
            quality: &self.quality,
            aspect_ratio: &self.aspect_ratio,
            style: &self.style,
            kind: "image",
            prompt: self.prompt.as_deref().filter(|p| !p.is_empty()),
            project_id: self.project_id.as_deref().filter(|p| !p.is_empty()),
            callback_url: self.callback_url.as_deref().filter(|u| !u.is_empty()),
            image_url,
            uploaded_image_type: None,
        }
    }

    /// Multipart body carrying the image bytes inline.
    pub(crate) async fn multipart(&self) -> Result<Form> {
        let (part, content_type) = match self.image_source()? {
            ImageSource::Bytes(data) => {
                let part = Part::stream_with_length(data.clone(), data.len() as u64)
                    .file_name(DEFAULT_IMAGE_NAME)
                    .mime_str(DEFAULT_IMAGE_TYPE)?;
                (part, DEFAULT_IMAGE_TYPE.to_string())
            }
            ImageSource::File(path) => {
                let part = Part::file(path).await.map_err(|e| {
                    Error::validation(format!("unable to read image '{}': {e}", path.display()))
                })?;
                (part, guess_content_type(path))
            }
            ImageSource::Url(_) => {
                return Err(Error::validation("image URLs are sent as JSON, not multipart"));
            }
        };

        let mut fields = self.fields(None);
        fields.uploaded_image_type = Some(&content_type);
        Ok(fields.into_form()?.part(IMAGE_PART, part))
    }

    /// The image as an in-memory payload for a resumable upload.
    pub async fn upload_payload(&self) -> Result<UploadPayload> {
        match self.image_source()? {
            ImageSource::Bytes(data) => Ok(UploadPayload {
                file_name: RESUMABLE_IMAGE_NAME.to_string(),
                content_type: DEFAULT_IMAGE_TYPE.to_string(),
                data: data.clone(),
            }),
            ImageSource::File(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    Error::validation(format!("unable to read image '{}': {e}", path.display()))
                })?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| RESUMABLE_IMAGE_NAME.to_string());
                Ok(UploadPayload {
                    file_name,
                    content_type: guess_content_type(path),
                    data: Bytes::from(data),
                })
            }
            ImageSource::Url(_) => Err(Error::validation("image URLs need no upload")),
        }
    }
}

fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_IMAGE_TYPE)
        .to_string()
}

#[derive(Debug, Serialize)]
pub(crate) struct RenderFields<'a> {
    quality: &'a str,
    #[serde(rename = "aspectRatio")]
    aspect_ratio: &'a str,
    style: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
    #[serde(rename = "uploadedImageType", skip_serializing_if = "Option::is_none")]
    uploaded_image_type: Option<&'a str>,
}

impl RenderFields<'_> {
    fn into_form(self) -> Result<Form> {
        let value = serde_json::to_value(&self)
            .map_err(|e| Error::validation(format!("unable to encode render fields: {e}")))?;
        let mut form = Form::new();
        if let Value::Object(fields) = value {
            for (name, value) in fields {
                if let Value::String(text) = value {
                    form = form.text(name, text);
                }
            }
        }
        Ok(form)
    }
}
