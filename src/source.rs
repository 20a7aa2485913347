//! Log sources: enumeration and download of broker log files.
//!
//! A [`LogSource`] knows how to list the files under a location and how to fetch the
//! (decompressed) content of each of them. Two backends are provided:
//!  - [`LocalLogSource`] for a file or a directory tree on the local filesystem
//!  - [`S3LogSource`] for all objects under an S3 prefix, which is where managed brokers deliver
//!    their logs
//!
//! Gzip-compressed files (`.gz` or gzip magic bytes) are transparently decompressed.
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use flate2::read::MultiGzDecoder;
use tracing::{debug, info, instrument};

use crate::error::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Human readable location for logs and errors.
    fn location(&self) -> String;

    /// Enumerate the identifiers of all candidate log files, in a stable order.
    async fn list_files(&self) -> Result<Vec<String>>;

    /// Download and decompress the content of a single file.
    async fn fetch(&self, file: &str) -> Result<Vec<u8>>;
}

/// Parsed form of a `SOURCE__LOCATION` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
}

impl Location {
    /// `s3://bucket/prefix` is an S3 prefix, anything else a local path.
    pub fn parse(uri: &str) -> Result<Self> {
        let Some(rest) = uri.strip_prefix("s3://") else {
            return Ok(Self::Local(PathBuf::from(uri)));
        };

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            bail!(Error::ConfigValue("source.location"));
        }

        Ok(Self::S3 {
            bucket: bucket.to_owned(),
            prefix: prefix.to_owned(),
        })
    }

    /// Connects to the backend of this location.
    pub async fn open(self) -> Result<Arc<dyn LogSource>> {
        Ok(match self {
            Self::Local(path) => Arc::new(LocalLogSource::new(path)),
            Self::S3 { bucket, prefix } => Arc::new(S3LogSource::connect(bucket, prefix).await),
        })
    }
}

/// Decompresses gzip content, any other content is returned as is.
pub fn decompress(file: &str, content: Vec<u8>) -> Result<Vec<u8>, Error> {
    if !file.ends_with(".gz") && !content.starts_with(&GZIP_MAGIC) {
        return Ok(content);
    }

    let mut decoded = Vec::with_capacity(content.len() * 8);
    MultiGzDecoder::new(content.as_slice())
        .read_to_end(&mut decoded)
        .map_err(|source| Error::Decompress {
            file: file.to_owned(),
            source,
        })?;

    debug!(file, compressed = content.len(), decoded = decoded.len(), "decompressed");
    Ok(decoded)
}

/// Log files on the local filesystem.
///
/// The root is either a single file or a directory which is walked recursively.
#[derive(Debug, Clone)]
pub struct LocalLogSource {
    root: PathBuf,
}

impl LocalLogSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to read directory {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl LogSource for LocalLogSource {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    #[instrument(name = "list", fields(location = %self.root.display()), skip_all)]
    async fn list_files(&self) -> Result<Vec<String>> {
        let metadata = tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| anyhow!(Error::backend(self.location(), e)))?;

        let files = if metadata.is_dir() {
            self.walk(&self.root)
                .await
                .map_err(|e| anyhow!(Error::backend(self.location(), e)))?
        } else {
            vec![self.root.clone()]
        };

        info!(files = files.len(), "listed local log files");
        Ok(files.iter().map(|f| f.display().to_string()).collect())
    }

    async fn fetch(&self, file: &str) -> Result<Vec<u8>> {
        let content = tokio::fs::read(file)
            .await
            .map_err(|e| anyhow!(Error::backend(file, e)))?;
        Ok(decompress(file, content)?)
    }
}

/// Log objects under an S3 prefix.
pub struct S3LogSource {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3LogSource {
    /// Create a client from the default AWS configuration chain (env, profile, IMDS).
    pub async fn connect(bucket: String, prefix: String) -> Self {
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let client = aws_sdk_s3::Client::new(&sdk_config);
        Self {
            client,
            bucket,
            prefix,
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[async_trait]
impl LogSource for S3LogSource {
    fn location(&self) -> String {
        self.uri(&self.prefix)
    }

    /// Lists all objects under the prefix, broker logs are partitioned by date so the listing
    /// is recursive.
    #[instrument(name = "list", fields(bucket = self.bucket, prefix = self.prefix), skip_all)]
    async fn list_files(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| anyhow!(Error::backend(self.location(), e)))?;

            keys.extend(
                response
                    .contents
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|object| object.key)
                    .filter(|key| !key.ends_with('/')),
            );

            if response.is_truncated == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        keys.sort();
        info!(files = keys.len(), "listed S3 log objects");
        Ok(keys)
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow!(Error::backend(self.uri(key), e)))?;

        let content = response
            .body
            .collect()
            .await
            .map_err(|e| anyhow!(Error::backend(self.uri(key), e)))?
            .into_bytes()
            .to_vec();

        Ok(decompress(key, content)?)
    }
}
