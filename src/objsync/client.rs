//! Object-store client. One trait, one concrete
//! `reqwest`-backed implementation shaped like the S3 REST API
//! (list/head/get) — `list_container`, `head_object`, and `get_object`
//! streamed in chunks are the only operations the sync pipeline needs.

use std::io::Read;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::objsync::config::SectionConfig;

#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ObjectHead {
    pub size: u64,
    pub modified: DateTime<Utc>,
    /// Normalized ETag (quotes stripped). `None` if the server didn't send
    /// one.
    pub etag: Option<String>,
}

impl ObjectHead {
    /// An ETag containing `-` is a multipart/DLO composite, not a plain
    /// MD5 of the object body: "for multipart/DLO objects
    /// where the ETag is not a plain MD5, skip strict check but verify
    /// size".
    pub fn etag_is_plain_md5(&self) -> bool {
        match &self.etag {
            Some(tag) => tag.len() == 32 && !tag.contains('-') && tag.bytes().all(|b| b.is_ascii_hexdigit()),
            None => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transient object-store error: {0}")]
    Transient(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("fatal object-store error: {0}")]
    Fatal(String),
}

/// A chunk of object body bytes, large enough that callers can compute a
/// rolling digest without much per-chunk overhead.
pub const STREAM_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// The capability set the sync pipeline needs from an object store:
/// listing a container, HEAD for authoritative metadata, and a streamed
/// GET for download.
pub trait ObjectStoreClient: Send + Sync {
    /// Every container the endpoint exposes, for `--all-containers` runs.
    fn list_containers(&self) -> Result<Vec<String>, ClientError>;
    fn list_container(&self, container: &str) -> Result<Vec<ObjectStat>, ClientError>;
    fn head_object(&self, container: &str, path: &str) -> Result<ObjectHead, ClientError>;

    /// Stream the object body into `sink`, returning the total bytes
    /// written. Implementations read in `STREAM_CHUNK_BYTES`-sized chunks
    /// so the caller can poll an abort flag between chunks.
    fn get_object(
        &self,
        container: &str,
        path: &str,
        sink: &mut dyn FnMut(&[u8]) -> Result<(), ClientError>,
    ) -> Result<u64, ClientError>;
}

fn normalize_etag(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// `reqwest`-backed client against an S3-compatible REST endpoint, using
/// the blocking client since this pipeline has its own worker-thread
/// model rather than an async runtime.
pub struct HttpObjectStoreClient {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl HttpObjectStoreClient {
    pub fn new(section: &SectionConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(section.timeouts.connect_seconds))
            .timeout(Duration::from_secs(section.timeouts.read_seconds));
        if section.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder
            .build()
            .map_err(|e| ClientError::Fatal(format!("building HTTP client: {e}")))?;
        Ok(Self {
            endpoint: section.endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn object_url(&self, container: &str, path: &str) -> String {
        format!("{}/{container}/{path}", self.endpoint)
    }

    fn classify_status(status: reqwest::StatusCode, context: &str) -> ClientError {
        if status == reqwest::StatusCode::NOT_FOUND {
            ClientError::NotFound(context.to_string())
        } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ClientError::Transient(format!("{context}: {status}"))
        } else {
            ClientError::Fatal(format!("{context}: {status}"))
        }
    }
}

/// Minimal listing JSON shape (`{"objects": [{"name", "size", "last_modified"}]}`)
/// — a deliberately small subset of the real S3 `ListObjectsV2` response,
/// sufficient for the sync pipeline's needs.
#[derive(serde::Deserialize)]
struct ListingResponse {
    objects: Vec<ListingEntry>,
}

#[derive(serde::Deserialize)]
struct ListingEntry {
    name: String,
    size: u64,
    last_modified: DateTime<Utc>,
}

#[derive(serde::Deserialize)]
struct ContainerListingResponse {
    containers: Vec<String>,
}

impl ObjectStoreClient for HttpObjectStoreClient {
    fn list_containers(&self) -> Result<Vec<String>, ClientError> {
        let url = format!("{}?list", self.endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| ClientError::Transient(format!("listing containers: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::classify_status(response.status(), "listing containers"));
        }
        let body: ContainerListingResponse = response
            .json()
            .map_err(|e| ClientError::Fatal(format!("parsing container listing: {e}")))?;
        Ok(body.containers)
    }

    fn list_container(&self, container: &str) -> Result<Vec<ObjectStat>, ClientError> {
        let url = format!("{}/{container}?list", self.endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| ClientError::Transient(format!("listing {container}: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::classify_status(response.status(), &format!("listing {container}")));
        }
        let body: ListingResponse = response
            .json()
            .map_err(|e| ClientError::Fatal(format!("parsing listing for {container}: {e}")))?;
        Ok(body
            .objects
            .into_iter()
            .map(|e| ObjectStat {
                path: e.name,
                size: e.size,
                modified: e.last_modified,
            })
            .collect())
    }

    fn head_object(&self, container: &str, path: &str) -> Result<ObjectHead, ClientError> {
        let url = self.object_url(container, path);
        let response = self
            .http
            .head(&url)
            .send()
            .map_err(|e| ClientError::Transient(format!("HEAD {container}/{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::classify_status(
                response.status(),
                &format!("HEAD {container}/{path}"),
            ));
        }
        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| ClientError::Fatal(format!("HEAD {container}/{path}: no Content-Length")))?;
        let modified = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(normalize_etag);
        Ok(ObjectHead { size, modified, etag })
    }

    fn get_object(
        &self,
        container: &str,
        path: &str,
        sink: &mut dyn FnMut(&[u8]) -> Result<(), ClientError>,
    ) -> Result<u64, ClientError> {
        let url = self.object_url(container, path);
        let response = self
            .http
            .get(&url)
            .send()
            .map_err(|e| ClientError::Transient(format!("GET {container}/{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::classify_status(
                response.status(),
                &format!("GET {container}/{path}"),
            ));
        }
        let mut reader = response;
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
        let mut total = 0u64;
        loop {
            let n = reader
                .read(&mut buf)
                .map_err(|e| ClientError::Transient(format!("reading {container}/{path}: {e}")))?;
            if n == 0 {
                break;
            }
            sink(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_md5_etag_is_recognized() {
        let head = ObjectHead {
            size: 1,
            modified: Utc::now(),
            etag: Some("b47449c3b5c78b115c8faf2e9ecafd35".to_string()),
        };
        assert!(head.etag_is_plain_md5());
    }

    #[test]
    fn multipart_etag_is_not_plain_md5() {
        let head = ObjectHead {
            size: 1,
            modified: Utc::now(),
            etag: Some("b47449c3b5c78b115c8faf2e9ecafd35-4".to_string()),
        };
        assert!(!head.etag_is_plain_md5());
    }

    #[test]
    fn missing_etag_is_not_plain_md5() {
        let head = ObjectHead {
            size: 1,
            modified: Utc::now(),
            etag: None,
        };
        assert!(!head.etag_is_plain_md5());
    }

    #[test]
    fn normalize_etag_strips_quotes() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("abc"), "abc");
    }
}
