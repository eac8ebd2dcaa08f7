pub mod local;
pub mod s3;

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use common::config::Settings;
use common::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

pub use local::LocalStorage;
pub use s3::S3Storage;

const S3_SCHEME: &str = "s3://";

/// Which storage backend a location belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Local,
    ObjectStore,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Local => write!(f, "local"),
            Backend::ObjectStore => write!(f, "object-store"),
        }
    }
}

/// A backend tag plus a backend-native path (`/data/x` or `s3://bucket/x`).
///
/// Every derived location keeps the tag of the location it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    backend: Backend,
    path: String,
}

impl StorageLocation {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with(S3_SCHEME) {
            let parsed = Url::parse(raw)?;
            if parsed.host_str().is_none_or(str::is_empty) {
                return Err(Error::InvalidUri(format!(
                    "S3 path '{}' does not name a bucket",
                    raw
                )));
            }
            Ok(Self {
                backend: Backend::ObjectStore,
                path: raw.trim_end_matches('/').to_string(),
            })
        } else {
            Ok(Self::local(raw))
        }
    }

    pub fn local(path: impl AsRef<Path>) -> Self {
        Self {
            backend: Backend::Local,
            path: path.as_ref().to_string_lossy().into_owned(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn as_str(&self) -> &str {
        &self.path
    }

    pub fn join<I, S>(&self, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.backend {
            Backend::Local => {
                let mut path = PathBuf::from(&self.path);
                for segment in segments {
                    let segment = segment.as_ref().trim_matches('/');
                    if !segment.is_empty() {
                        path.push(segment);
                    }
                }
                Self::local(path)
            }
            Backend::ObjectStore => {
                let mut path = self.path.trim_end_matches('/').to_string();
                for segment in segments {
                    let segment = segment.as_ref().trim_matches('/');
                    if !segment.is_empty() {
                        path.push('/');
                        path.push_str(segment);
                    }
                }
                Self {
                    backend: Backend::ObjectStore,
                    path,
                }
            }
        }
    }

    pub fn child(&self, segment: &str) -> Self {
        self.join([segment])
    }

    /// Last path component; the bucket name for a bucket root.
    pub fn name(&self) -> &str {
        match self.backend {
            Backend::Local => Path::new(&self.path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&self.path),
            Backend::ObjectStore => self
                .path
                .trim_start_matches(S3_SCHEME)
                .rsplit('/')
                .next()
                .unwrap_or_default(),
        }
    }

    pub fn parent(&self) -> Option<Self> {
        match self.backend {
            Backend::Local => Path::new(&self.path).parent().map(Self::local),
            Backend::ObjectStore => {
                let (bucket, key) = self.bucket_and_key()?;
                if key.is_empty() {
                    return None;
                }
                let parent = match key.rsplit_once('/') {
                    Some((parent_key, _)) => format!("{}{}/{}", S3_SCHEME, bucket, parent_key),
                    None => format!("{}{}", S3_SCHEME, bucket),
                };
                Some(Self {
                    backend: Backend::ObjectStore,
                    path: parent,
                })
            }
        }
    }

    /// Bucket and object key of an object-store location.
    pub fn bucket_and_key(&self) -> Option<(&str, &str)> {
        if self.backend != Backend::ObjectStore {
            return None;
        }
        let rest = self.path.strip_prefix(S3_SCHEME)?;
        Some(rest.split_once('/').unwrap_or((rest, "")))
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Uniform IO over the local filesystem and object storage.
#[async_trait]
pub trait Storage: Send + Sync {
    fn backend(&self) -> Backend;
    async fn exists(&self, location: &StorageLocation) -> Result<bool>;
    async fn is_dir(&self, location: &StorageLocation) -> Result<bool>;
    /// Names of the immediate children of `location`, in no particular order.
    async fn list(&self, location: &StorageLocation) -> Result<Vec<String>>;
    /// Files directly under `location` whose name matches a shell glob.
    async fn glob(&self, location: &StorageLocation, pattern: &str)
    -> Result<Vec<StorageLocation>>;
    async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>>;
    /// Publishes `data` so readers observe either the old object or the
    /// complete new one.
    async fn put_atomic(&self, location: &StorageLocation, data: &[u8]) -> Result<()>;
    async fn create_dir_all(&self, location: &StorageLocation) -> Result<()>;
    async fn remove(&self, location: &StorageLocation) -> Result<()>;
    /// Fails when `location` cannot be read or listed at all.
    async fn verify_access(&self, location: &StorageLocation) -> Result<()>;
}

pub(crate) fn ensure_backend(expected: Backend, location: &StorageLocation) -> Result<()> {
    if location.backend() != expected {
        return Err(Error::InvalidInput(format!(
            "{} storage cannot operate on {} location '{}'",
            expected,
            location.backend(),
            location
        )));
    }
    Ok(())
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern)
        .map_err(|e| Error::InvalidInput(format!("Invalid glob pattern '{}': {}", pattern, e)))
}

#[derive(Clone, Debug)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub force_path_style: bool,
    pub max_read_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl S3Config {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            endpoint: settings.s3.endpoint.clone(),
            region: settings.s3.region.clone(),
            access_key: settings.s3.access_key.clone(),
            secret_key: settings.s3.secret_key.clone(),
            force_path_style: settings.s3.force_path_style,
            max_read_retries: settings.conversion.max_read_retries,
            retry_base_delay_ms: settings.conversion.retry_base_delay_ms,
        }
    }
}

/// Lazily builds one S3 client shared by every object-store location.
#[derive(Clone)]
pub struct S3Manager {
    pub config: S3Config,
    client: Arc<OnceCell<Arc<S3Client>>>,
}

impl S3Manager {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            client: Arc::new(OnceCell::new()),
        }
    }

    pub async fn get_client(&self) -> Result<Arc<S3Client>> {
        let client = self
            .client
            .get_or_try_init(|| async { self.build_client().await })
            .await?;
        Ok(client.clone())
    }

    async fn build_client(&self) -> Result<Arc<S3Client>> {
        let region = Region::new(self.config.region.clone());

        let s3_config = match (&self.config.access_key, &self.config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "static");
                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(region)
                    .credentials_provider(credentials)
                    .force_path_style(self.config.force_path_style);
                if let Some(endpoint) = &self.config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                builder.build()
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared)
                    .force_path_style(self.config.force_path_style);
                if let Some(endpoint) = &self.config.endpoint {
                    builder = builder.endpoint_url(endpoint);
                }
                builder.build()
            }
        };

        Ok(Arc::new(S3Client::from_conf(s3_config)))
    }
}

/// Picks the storage implementation matching the location's backend.
pub async fn storage_for(
    location: &StorageLocation,
    s3_manager: &S3Manager,
) -> Result<Arc<dyn Storage>> {
    match location.backend() {
        Backend::Local => Ok(Arc::new(LocalStorage::new())),
        Backend::ObjectStore => Ok(Arc::new(S3Storage::new(s3_manager).await?)),
    }
}
