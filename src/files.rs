//! File attachments: the two-phase upload protocol and spec normalization.
//!
//! Uploading is create-record-then-PUT: the service hands out a presigned
//! URL with a short expiry (typically three minutes), and content must land
//! there before it lapses. Uploaded file ids stay valid for a longer
//! service-side retention window, after which they must not be reused.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::client::{AgentApi, ApiError, AttachmentSpec, CreateFileResponse, Retrier, RetryError};
use crate::config::Config;

/// A local attachment not yet in wire form.
#[derive(Debug, Clone)]
pub enum AttachmentSource {
    /// A file already uploaded to the service.
    FileId {
        file_id: String,
        filename: Option<String>,
    },
    /// A publicly reachable URL.
    Url {
        url: String,
        filename: Option<String>,
    },
    /// Raw content to be sent inline.
    Data {
        bytes: Bytes,
        filename: String,
        mime_type: Option<String>,
    },
}

/// A file record with a pending upload slot.
///
/// Consumed by [`FileManager::upload_content`]; a record whose upload
/// failed is discarded, never retried with a fresh PUT.
#[derive(Debug)]
pub struct FileRecord {
    pub file_id: String,
    pub filename: String,
    pub upload_url: String,
    pub upload_expires_at: DateTime<Utc>,
    pub uploaded: bool,
}

impl From<CreateFileResponse> for FileRecord {
    fn from(response: CreateFileResponse) -> Self {
        Self {
            file_id: response.id,
            filename: response.filename,
            upload_url: response.upload_url,
            upload_expires_at: response.upload_expires_at,
            uploaded: false,
        }
    }
}

impl FileRecord {
    /// Whether a PUT attempted now would still land inside the expiry
    /// window, allowing for clock skew.
    fn accepts_upload(&self, now: DateTime<Utc>, skew: ChronoDuration) -> bool {
        !self.uploaded && now + skew < self.upload_expires_at
    }
}

/// A successfully uploaded file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedFile {
    /// The wire attachment referencing this upload.
    pub fn attachment_spec(&self) -> AttachmentSpec {
        AttachmentSpec::FileId {
            file_id: self.file_id.clone(),
            filename: Some(self.filename.clone()),
        }
    }
}

/// Error from attachment handling.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("failed to register upload for {filename}: {source}")]
    Registration {
        filename: String,
        #[source]
        source: RetryError,
    },
    #[error("upload URL for {filename} expired at {expired_at}")]
    UploadExpired {
        filename: String,
        expired_at: DateTime<Utc>,
    },
    #[error("failed to upload {filename}: {source}")]
    UploadFailed {
        filename: String,
        #[source]
        source: RetryError,
    },
    #[error("inline attachment {filename} is {size} bytes, over the {limit} byte limit")]
    AttachmentTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },
    #[error("invalid attachment URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("cannot derive a filename from {}", .path.display())]
    InvalidPath { path: PathBuf },
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Manages file uploads and attachment normalization.
pub struct FileManager {
    api: Arc<dyn AgentApi>,
    retrier: Retrier,
    skew_margin: ChronoDuration,
    max_inline_bytes: usize,
    retention: ChronoDuration,
    /// Uploads keyed by content digest, reusable within the retention window.
    reuse_cache: Mutex<HashMap<String, UploadedFile>>,
}

impl FileManager {
    pub fn new(api: Arc<dyn AgentApi>, config: &Config) -> Self {
        Self {
            api,
            retrier: Retrier::new(config.retry.clone()),
            skew_margin: ChronoDuration::from_std(config.upload_skew_margin)
                .unwrap_or_else(|_| ChronoDuration::seconds(5)),
            max_inline_bytes: config.max_inline_attachment_bytes,
            retention: ChronoDuration::from_std(config.file_retention)
                .unwrap_or_else(|_| ChronoDuration::hours(48)),
            reuse_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Create a file record and obtain its presigned upload URL.
    pub async fn register_upload(&self, filename: &str) -> Result<FileRecord, FileError> {
        let response = self
            .retrier
            .execute("create file record", || self.api.create_file(filename))
            .await
            .map_err(|source| FileError::Registration {
                filename: filename.to_string(),
                source,
            })?;
        tracing::debug!(
            "File record {} created for {} (upload expires {})",
            response.id,
            filename,
            response.upload_expires_at
        );
        Ok(FileRecord::from(response))
    }

    /// PUT content to a record's presigned URL.
    ///
    /// Expiry is checked locally before any network traffic, and again
    /// before each retry attempt: a PUT is only safe to repeat while the
    /// presigned URL is still live.
    pub async fn upload_content(
        &self,
        record: FileRecord,
        content: Bytes,
    ) -> Result<UploadedFile, FileError> {
        if !record.accepts_upload(Utc::now(), self.skew_margin) {
            return Err(FileError::UploadExpired {
                filename: record.filename,
                expired_at: record.upload_expires_at,
            });
        }

        let result = self
            .retrier
            .execute("upload file content", || {
                let content = content.clone();
                let record = &record;
                async move {
                    if !record.accepts_upload(Utc::now(), self.skew_margin) {
                        return Err(ApiError::from_status(
                            403,
                            "presigned upload URL expired",
                            None,
                        ));
                    }
                    self.api
                        .upload_file_content(&record.upload_url, content)
                        .await
                }
            })
            .await;

        match result {
            Ok(()) => {
                tracing::info!("Uploaded {} ({} bytes)", record.filename, content.len());
                Ok(UploadedFile {
                    file_id: record.file_id,
                    filename: record.filename,
                    uploaded_at: Utc::now(),
                })
            }
            Err(err) => {
                let expired = matches!(
                    &err,
                    RetryError::Fatal(api_err) if api_err.status == Some(403)
                );
                if expired {
                    Err(FileError::UploadExpired {
                        filename: record.filename,
                        expired_at: record.upload_expires_at,
                    })
                } else {
                    Err(FileError::UploadFailed {
                        filename: record.filename,
                        source: err,
                    })
                }
            }
        }
    }

    /// Upload content under a filename, reusing a previous upload of the
    /// same bytes while its file id is still within the retention window.
    pub async fn upload_bytes(
        &self,
        filename: &str,
        content: Bytes,
    ) -> Result<UploadedFile, FileError> {
        let digest = format!("{:x}", md5::compute(&content));

        {
            let mut cache = self.reuse_cache.lock().await;
            match cache.get(&digest) {
                Some(hit) if Utc::now() - hit.uploaded_at < self.retention => {
                    tracing::debug!("Reusing file {} for {}", hit.file_id, filename);
                    return Ok(hit.clone());
                }
                Some(_) => {
                    cache.remove(&digest);
                }
                None => {}
            }
        }

        let record = self.register_upload(filename).await?;
        let uploaded = self.upload_content(record, content).await?;
        self.reuse_cache
            .lock()
            .await
            .insert(digest, uploaded.clone());
        Ok(uploaded)
    }

    /// Upload several local files, driving the uploads concurrently.
    pub async fn upload_paths(
        &self,
        paths: &[impl AsRef<Path>],
    ) -> Result<Vec<UploadedFile>, FileError> {
        futures::future::try_join_all(paths.iter().map(|p| self.upload_path(p))).await
    }

    /// Read a local file and upload it.
    pub async fn upload_path(&self, path: impl AsRef<Path>) -> Result<UploadedFile, FileError> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FileError::InvalidPath {
                path: path.to_path_buf(),
            })?
            .to_string();
        let content = tokio::fs::read(path).await.map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.upload_bytes(&filename, Bytes::from(content)).await
    }

    /// Normalize an attachment source into the wire format.
    pub fn resolve_attachment_spec(
        &self,
        source: &AttachmentSource,
    ) -> Result<AttachmentSpec, FileError> {
        match source {
            AttachmentSource::FileId { file_id, filename } => Ok(AttachmentSpec::FileId {
                file_id: file_id.clone(),
                filename: filename.clone(),
            }),
            AttachmentSource::Url { url, filename } => {
                url::Url::parse(url).map_err(|source| FileError::InvalidUrl {
                    url: url.clone(),
                    source,
                })?;
                Ok(AttachmentSpec::Url {
                    url: url.clone(),
                    filename: filename.clone(),
                })
            }
            AttachmentSource::Data {
                bytes,
                filename,
                mime_type,
            } => {
                if bytes.len() > self.max_inline_bytes {
                    return Err(FileError::AttachmentTooLarge {
                        filename: filename.clone(),
                        size: bytes.len(),
                        limit: self.max_inline_bytes,
                    });
                }
                Ok(AttachmentSpec::Data {
                    file_data: base64::engine::general_purpose::STANDARD.encode(bytes),
                    filename: filename.clone(),
                    mime_type: mime_type.clone(),
                })
            }
        }
    }

    /// Normalize a batch of attachment sources.
    pub fn resolve_all(
        &self,
        sources: &[AttachmentSource],
    ) -> Result<Vec<AttachmentSpec>, FileError> {
        sources
            .iter()
            .map(|s| self.resolve_attachment_spec(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockApi;
    use std::io::Write;
    use std::time::Duration;

    fn fast_config() -> Config {
        Config {
            retry: crate::client::RetryConfig {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                jitter: false,
            },
            ..Config::default()
        }
    }

    fn manager_with(api: Arc<MockApi>) -> FileManager {
        FileManager::new(api, &fast_config())
    }

    fn expired_record(filename: &str) -> FileRecord {
        FileRecord {
            file_id: "file-x".to_string(),
            filename: filename.to_string(),
            upload_url: "https://uploads.example/file-x".to_string(),
            upload_expires_at: Utc::now() - ChronoDuration::seconds(1),
            uploaded: false,
        }
    }

    #[tokio::test]
    async fn test_upload_expired_makes_no_network_call() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(Arc::clone(&api));

        let result = manager
            .upload_content(expired_record("doc.txt"), Bytes::from_static(b"hi"))
            .await;

        assert!(matches!(result, Err(FileError::UploadExpired { .. })));
        assert_eq!(api.upload_call_count(), 0);
    }

    #[tokio::test]
    async fn test_skew_margin_expires_early() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(Arc::clone(&api));

        // Nominally two seconds left, inside the five-second skew margin.
        let record = FileRecord {
            upload_expires_at: Utc::now() + ChronoDuration::seconds(2),
            ..expired_record("doc.txt")
        };
        let result = manager.upload_content(record, Bytes::from_static(b"hi")).await;

        assert!(matches!(result, Err(FileError::UploadExpired { .. })));
        assert_eq!(api.upload_call_count(), 0);
    }

    #[tokio::test]
    async fn test_register_and_upload() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(Arc::clone(&api));

        let record = manager.register_upload("doc.txt").await.unwrap();
        assert!(!record.uploaded);
        let upload_url = record.upload_url.clone();

        let uploaded = manager
            .upload_content(record, Bytes::from_static(b"content"))
            .await
            .unwrap();
        assert_eq!(uploaded.filename, "doc.txt");
        assert_eq!(api.upload_call_count(), 1);
        // Content went to the presigned URL from the record.
        assert_eq!(api.uploaded_urls(), vec![upload_url]);
        assert!(matches!(
            uploaded.attachment_spec(),
            AttachmentSpec::FileId { .. }
        ));
    }

    #[tokio::test]
    async fn test_registration_failure_is_not_retried_on_4xx() {
        let api = Arc::new(MockApi::new());
        api.queue_create_file(Err(ApiError::from_status(400, "bad filename", None)));
        let manager = manager_with(api);

        let result = manager.register_upload("doc.txt").await;
        assert!(matches!(result, Err(FileError::Registration { .. })));
    }

    #[tokio::test]
    async fn test_upload_server_failure_is_upload_failed() {
        let api = Arc::new(MockApi::new());
        // One retry configured, so two attempts both need to fail.
        api.queue_upload(Err(ApiError::from_status(500, "boom", None)));
        api.queue_upload(Err(ApiError::from_status(500, "boom", None)));
        let manager = manager_with(Arc::clone(&api));

        let record = manager.register_upload("doc.txt").await.unwrap();
        let result = manager
            .upload_content(record, Bytes::from_static(b"content"))
            .await;

        assert!(matches!(result, Err(FileError::UploadFailed { .. })));
        assert_eq!(api.upload_call_count(), 2);
    }

    #[tokio::test]
    async fn test_server_403_maps_to_expired() {
        let api = Arc::new(MockApi::new());
        api.queue_upload(Err(ApiError::from_status(403, "expired", None)));
        let manager = manager_with(Arc::clone(&api));

        let record = manager.register_upload("doc.txt").await.unwrap();
        let result = manager
            .upload_content(record, Bytes::from_static(b"content"))
            .await;

        assert!(matches!(result, Err(FileError::UploadExpired { .. })));
    }

    #[tokio::test]
    async fn test_upload_bytes_reuses_cached_id() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(Arc::clone(&api));

        let first = manager
            .upload_bytes("doc.txt", Bytes::from_static(b"same bytes"))
            .await
            .unwrap();
        let second = manager
            .upload_bytes("doc.txt", Bytes::from_static(b"same bytes"))
            .await
            .unwrap();

        assert_eq!(first.file_id, second.file_id);
        assert_eq!(api.upload_call_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_bytes_ignores_cache_past_retention() {
        let api = Arc::new(MockApi::new());
        let config = Config {
            file_retention: Duration::ZERO,
            ..fast_config()
        };
        let manager = FileManager::new(Arc::clone(&api) as Arc<dyn AgentApi>, &config);

        manager
            .upload_bytes("doc.txt", Bytes::from_static(b"same bytes"))
            .await
            .unwrap();
        manager
            .upload_bytes("doc.txt", Bytes::from_static(b"same bytes"))
            .await
            .unwrap();

        assert_eq!(api.upload_call_count(), 2);
    }

    #[tokio::test]
    async fn test_upload_path() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(Arc::clone(&api));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "quarterly numbers").unwrap();

        let uploaded = manager.upload_path(&path).await.unwrap();
        assert_eq!(uploaded.filename, "report.txt");
        assert_eq!(api.upload_call_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_paths_batch() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(Arc::clone(&api));

        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("document-{}.txt", i + 1));
            std::fs::write(&path, format!("sample content {}", i + 1)).unwrap();
            paths.push(path);
        }

        let uploaded = manager.upload_paths(&paths).await.unwrap();
        assert_eq!(uploaded.len(), 3);
        assert_eq!(api.upload_call_count(), 3);
    }

    #[tokio::test]
    async fn test_inline_data_over_ceiling_rejected() {
        let api = Arc::new(MockApi::new());
        let config = Config {
            max_inline_attachment_bytes: 8,
            ..fast_config()
        };
        let manager = FileManager::new(Arc::clone(&api) as Arc<dyn AgentApi>, &config);

        let source = AttachmentSource::Data {
            bytes: Bytes::from_static(b"way more than eight bytes"),
            filename: "big.bin".to_string(),
            mime_type: None,
        };
        assert!(matches!(
            manager.resolve_attachment_spec(&source),
            Err(FileError::AttachmentTooLarge { size: 25, limit: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_inline_data_is_base64_encoded() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(api);

        let source = AttachmentSource::Data {
            bytes: Bytes::from_static(b"hello"),
            filename: "hello.txt".to_string(),
            mime_type: Some("text/plain".to_string()),
        };
        match manager.resolve_attachment_spec(&source).unwrap() {
            AttachmentSpec::Data { file_data, .. } => assert_eq!(file_data, "aGVsbG8="),
            other => panic!("unexpected spec: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_url_rejected() {
        let api = Arc::new(MockApi::new());
        let manager = manager_with(api);

        let source = AttachmentSource::Url {
            url: "not a url".to_string(),
            filename: None,
        };
        assert!(matches!(
            manager.resolve_attachment_spec(&source),
            Err(FileError::InvalidUrl { .. })
        ));
    }
}
