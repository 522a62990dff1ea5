//! The photo upload client.
//!
//! [`Uploader`] posts one photo plus its metadata fields to the upload
//! endpoint as a `multipart/form-data` submission and decodes the JSON
//! reply into an [`UploadResponse`].

use crate::form::{EncodedBody, FilePart, MultipartError, MultipartForm};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{StatusCode, Uri};
use hyper::client::connect::Connect;
use hyper::{Body, Client, Request};
use log::debug;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lowest price the API accepts for a photo.
pub const MIN_PRICE: u32 = 60;

/// Environment variable holding the upload endpoint URL.
pub const ENV_API_URL: &str = "UPLOAD_API_URL";

/// Environment variable holding the bearer token.
pub const ENV_API_TOKEN: &str = "UPLOAD_API_TOKEN";

/// The standard error type for upload operations
#[derive(Error, Debug)]
pub enum UploadError {
    /// Given if the configured token is empty
    #[error("api token must not be empty")]
    EmptyApiToken,
    /// Given if the event id is empty
    #[error("event id must not be empty")]
    EmptyEventId,
    /// Given if the shooting location is empty
    #[error("location must not be empty")]
    EmptyLocation,
    /// Given if the price is below the API minimum
    #[error("price {0} is below the minimum of {}", MIN_PRICE)]
    PriceBelowMinimum(u32),
    /// Given if the photo path does not exist
    #[error("photo file not found: {}", .0.display())]
    PhotoNotFound(PathBuf),
    /// Given if the photo path has no final file name component
    #[error("photo path has no file name: {}", .0.display())]
    MissingFileName(PathBuf),
    /// Given if configuration is read from the environment and a variable is unset
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),
    /// Given if the endpoint does not parse as a URI
    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(#[from] http::uri::InvalidUri),
    /// Given if the multipart body cannot be assembled
    #[error(transparent)]
    Multipart(#[from] MultipartError),
    /// Given if the photo cannot be read
    #[error("reading photo: {0}")]
    Io(#[from] std::io::Error),
    /// Given if the request itself cannot be built
    #[error("building request: {0}")]
    Request(#[from] http::Error),
    /// Given if the transport fails underneath us
    #[error(transparent)]
    Transport(#[from] hyper::Error),
    /// Given if a success response does not match the expected schema
    #[error("decoding response: {0}")]
    Decode(#[from] serde_json::Error),
    /// Given if the API answers with a non-success status
    #[error("upload rejected with status {status}: {message}")]
    Api {
        /// The HTTP status of the reply
        status: StatusCode,
        /// The `error` field of the reply body, or the raw body text
        message: String,
    },
}

/// Endpoint and credentials for the upload API.
///
/// Both values are validated up front; nothing here carries a default, so
/// placeholder credentials cannot end up baked into a build.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    endpoint: Uri,
    api_token: String,
}

impl UploadConfig {
    /// Build a config from an explicit endpoint and token.
    pub fn new(endpoint: &str, api_token: impl Into<String>) -> Result<Self, UploadError> {
        let api_token = api_token.into();

        if api_token.trim().is_empty() {
            return Err(UploadError::EmptyApiToken);
        }

        Ok(UploadConfig {
            endpoint: endpoint.parse()?,
            api_token,
        })
    }

    /// Build a config from `UPLOAD_API_URL` and `UPLOAD_API_TOKEN`.
    pub fn from_env() -> Result<Self, UploadError> {
        let endpoint = env::var(ENV_API_URL).map_err(|_| UploadError::MissingEnv(ENV_API_URL))?;
        let api_token =
            env::var(ENV_API_TOKEN).map_err(|_| UploadError::MissingEnv(ENV_API_TOKEN))?;

        Self::new(&endpoint, api_token)
    }

    /// The endpoint uploads are posted to.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }
}

/// One photo and the metadata the API wants alongside it.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    path: PathBuf,
    event_id: String,
    bib_number: Option<String>,
    location: String,
    price: u32,
}

impl PhotoUpload {
    /// Validate the upload parameters.
    ///
    /// The event id and location must be non-empty, the price must be at
    /// least [`MIN_PRICE`] and the path must point at an existing file.
    pub fn new(
        path: impl Into<PathBuf>,
        event_id: impl Into<String>,
        location: impl Into<String>,
        price: u32,
    ) -> Result<Self, UploadError> {
        let path = path.into();
        let event_id = event_id.into();
        let location = location.into();

        if event_id.trim().is_empty() {
            return Err(UploadError::EmptyEventId);
        }

        if location.trim().is_empty() {
            return Err(UploadError::EmptyLocation);
        }

        if price < MIN_PRICE {
            return Err(UploadError::PriceBelowMinimum(price));
        }

        if !path.exists() {
            return Err(UploadError::PhotoNotFound(path));
        }

        if path.file_name().is_none() {
            return Err(UploadError::MissingFileName(path));
        }

        Ok(PhotoUpload {
            path,
            event_id,
            bib_number: None,
            location,
            price,
        })
    }

    /// Bib number worn by the athlete, if identified.
    ///
    /// Uploads without one are submitted as `unknown`.
    pub fn bib_number(mut self, bib_number: impl Into<String>) -> Self {
        self.bib_number = Some(bib_number.into());
        self
    }

    fn filename(&self) -> Result<String, UploadError> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| UploadError::MissingFileName(self.path.clone()))
    }

    fn form(&self, bytes: Vec<u8>) -> Result<EncodedBody, UploadError> {
        let filename = self.filename()?;
        let content_type = content_type_for(&self.path);

        let mut form = MultipartForm::new(FilePart::new("image", filename, content_type, bytes));

        form.add_field("eventId", &self.event_id);
        form.add_field("bibNumber", self.bib_number.as_deref().unwrap_or("unknown"));
        form.add_field("location", &self.location);
        form.add_field("price", self.price.to_string());

        Ok(form.encode()?)
    }
}

/// Resolve a part content type from the photo's file extension.
///
/// The API accepts JPEG, PNG and HEIF images; anything else is submitted
/// as `application/octet-stream`.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("heif") | Some("heic") => "image/heif",
        _ => "application/octet-stream",
    }
}

/// Decoded body of an upload reply.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Whether the API accepted the photo
    pub success: bool,
    /// Identifier of the stored photo
    #[serde(default)]
    pub photo_id: Option<String>,
    /// Identifier of the original file
    #[serde(default)]
    pub original_file_id: Option<String>,
    /// Identifier assigned by the image CDN
    #[serde(default)]
    pub cloudflare_id: Option<String>,
    /// Human readable status message
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Uploads photos over a caller-supplied `hyper` connector.
///
/// The uploader issues one POST per photo and never retries; transport
/// errors surface to the caller as-is.
#[derive(Clone)]
pub struct Uploader<C> {
    client: Client<C>,
    config: UploadConfig,
}

impl<C> Uploader<C>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    /// Construct an uploader from a client and a validated config.
    pub fn new(client: Client<C>, config: UploadConfig) -> Self {
        Uploader { client, config }
    }

    /// Upload one photo, returning the decoded API reply.
    ///
    /// The reply is returned even when its `success` flag is false;
    /// only transport failures and non-success HTTP statuses are errors.
    pub async fn upload(&self, photo: &PhotoUpload) -> Result<UploadResponse, UploadError> {
        debug!(
            "uploading {} for event {}",
            photo.path.display(),
            photo.event_id
        );

        let bytes = tokio::fs::read(&photo.path).await?;
        let body = photo.form(bytes)?;

        let request = Request::post(self.config.endpoint.clone())
            .header(CONTENT_TYPE, body.content_type())
            .header(AUTHORIZATION, format!("Bearer {}", self.config.api_token))
            .body(Body::from(body.bytes))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let raw = hyper::body::to_bytes(response.into_body()).await?;

        if !status.is_success() {
            return Err(UploadError::Api {
                status,
                message: error_message(&raw),
            });
        }

        let decoded: UploadResponse = serde_json::from_slice(&raw)?;

        debug!("upload finished, photo id {:?}", decoded.photo_id);

        Ok(decoded)
    }
}

fn error_message(raw: &[u8]) -> String {
    if let Ok(body) = serde_json::from_slice::<ErrorBody>(raw) {
        if let Some(error) = body.error {
            return error;
        }
    }

    let text = String::from_utf8_lossy(raw);
    let text = text.trim();

    if text.is_empty() {
        "unknown error".to_string()
    } else {
        text.to_string()
    }
}
