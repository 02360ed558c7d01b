use std::path::{Path, PathBuf};

use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

use crate::config::AppConfig;
use crate::models::envelope::{ImageKind, ImageRef};

/// Image bytes plus the media type sniffed from them.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Failure classes for image resolution. `NotFound` and `UnsupportedMedia`
/// are per-image outcomes; `Transient` bubbles up for a job-level retry.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("image not found: {0}")]
    NotFound(String),

    #[error("unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("transient fetch failure: {0}")]
    Transient(String),
}

/// Resolves image references (local path, S3/MinIO URI, HTTP(S) URL) to
/// in-memory bytes. References are borrowed and never mutated.
pub struct ImageResolver {
    root: PathBuf,
    http: reqwest::Client,
    s3_endpoint: Option<String>,
    s3_region: String,
    s3_path_style: bool,
    s3_access_key: Option<String>,
    s3_secret_key: Option<String>,
}

impl ImageResolver {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            root: config.ocr_image_root.clone(),
            http: reqwest::Client::new(),
            s3_endpoint: config.s3_endpoint_url.clone(),
            s3_region: config.s3_region.clone(),
            s3_path_style: config.s3_force_path_style,
            s3_access_key: config.s3_access_key.clone(),
            s3_secret_key: config.s3_secret_key.clone(),
        }
    }

    #[cfg(test)]
    fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            http: reqwest::Client::new(),
            s3_endpoint: None,
            s3_region: "us-east-2".to_string(),
            s3_path_style: false,
            s3_access_key: None,
            s3_secret_key: None,
        }
    }

    pub async fn resolve(&self, image_ref: &ImageRef) -> Result<ResolvedImage, ResolveError> {
        // Cheap rejection before any fetch happens
        if image_ref.value.to_lowercase().ends_with(".pdf") {
            return Err(ResolveError::UnsupportedMedia(
                "PDF files are not supported".to_string(),
            ));
        }

        let bytes = match image_ref.kind {
            ImageKind::LocalPath => self.fetch_local(&image_ref.value).await?,
            ImageKind::S3 => self.fetch_object(&image_ref.value).await?,
            ImageKind::Minio => {
                let uri = image_ref
                    .value
                    .strip_prefix("minio://")
                    .map(|rest| format!("s3://{rest}"))
                    .unwrap_or_else(|| image_ref.value.clone());
                self.fetch_object(&uri).await?
            }
            ImageKind::Db => {
                return Err(ResolveError::NotFound(
                    "image kind 'db' is not supported".to_string(),
                ));
            }
        };

        let media_type = sniff_media_type(&bytes)?;
        Ok(ResolvedImage { bytes, media_type })
    }

    /// Read a file rooted at the configured image directory. Canonicalized
    /// paths escaping the root are refused.
    async fn fetch_local(&self, value: &str) -> Result<Vec<u8>, ResolveError> {
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|e| ResolveError::NotFound(format!("image root unavailable: {e}")))?;

        let candidate = if Path::new(value).is_absolute() {
            PathBuf::from(value)
        } else {
            root.join(value)
        };

        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| ResolveError::NotFound(format!("image file not found: {value}")))?;

        if !resolved.starts_with(&root) {
            return Err(ResolveError::NotFound(format!(
                "path escapes image root: {value}"
            )));
        }

        tokio::fs::read(&resolved)
            .await
            .map_err(|e| ResolveError::NotFound(format!("failed to read {value}: {e}")))
    }

    /// Fetch an `s3://bucket/key` object, or an HTTP(S) form (presigned URL).
    async fn fetch_object(&self, uri: &str) -> Result<Vec<u8>, ResolveError> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            return self.fetch_http(uri).await;
        }

        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| ResolveError::NotFound(format!("invalid S3 URI: {uri}")))?;
        let (bucket_name, key) = rest
            .split_once('/')
            .filter(|(bucket, key)| !bucket.is_empty() && !key.is_empty())
            .ok_or_else(|| ResolveError::NotFound(format!("invalid S3 URI: {uri}")))?;

        let region = match &self.s3_endpoint {
            Some(endpoint) => Region::Custom {
                region: self.s3_region.clone(),
                endpoint: endpoint.clone(),
            },
            None => self
                .s3_region
                .parse()
                .map_err(|_| ResolveError::Transient(format!("bad S3 region: {}", self.s3_region)))?,
        };

        let credentials = match (&self.s3_access_key, &self.s3_secret_key) {
            (Some(access), Some(secret)) => {
                Credentials::new(Some(access), Some(secret), None, None, None)
            }
            _ => Credentials::default(),
        }
        .map_err(|e| ResolveError::Transient(format!("S3 credentials unavailable: {e}")))?;

        let mut bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| ResolveError::Transient(format!("S3 client setup failed: {e}")))?;
        if self.s3_path_style {
            bucket = bucket.with_path_style();
        }

        match bucket.get_object(key).await {
            Ok(response) => Ok(response.to_vec()),
            Err(S3Error::HttpFailWithBody(404, _)) => {
                Err(ResolveError::NotFound(format!("S3 object not found: {uri}")))
            }
            Err(e) => Err(ResolveError::Transient(format!(
                "S3 fetch failed for {uri}: {e}"
            ))),
        }
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, ResolveError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::Transient(format!("failed to fetch {url}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(format!("image not found: {url}")));
        }
        if !response.status().is_success() {
            return Err(ResolveError::Transient(format!(
                "fetch of {url} returned {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ResolveError::Transient(format!("failed to read body of {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// Sniff the media type from magic bytes. PDFs and anything that is not a
/// recognizable raster image are refused.
fn sniff_media_type(bytes: &[u8]) -> Result<String, ResolveError> {
    if bytes.starts_with(b"%PDF-") {
        return Err(ResolveError::UnsupportedMedia(
            "PDF files are not supported".to_string(),
        ));
    }

    match image::guess_format(bytes) {
        Ok(format) => Ok(format.to_mime_type().to_string()),
        Err(_) => Err(ResolveError::UnsupportedMedia(
            "bytes are not a recognizable image".to_string(),
        )),
    }
}
