use super::{Backend, S3Manager, Storage, StorageLocation, compile_pattern, ensure_backend};
use crate::utils::retry::retry_with_backoff;
use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_runtime_api::http::Response;
use common::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Object-store backend over the S3 API.
///
/// Listing and existence probes never fail the caller: a missing prefix is
/// the normal outcome while probing layouts, so errors are logged and
/// reported as "nothing there". Reads are retried on transient failures.
pub struct S3Storage {
    client: Arc<S3Client>,
    max_read_retries: u32,
    retry_base_delay_ms: u64,
}

impl S3Storage {
    pub async fn new(s3_manager: &S3Manager) -> Result<Self> {
        let client = s3_manager.get_client().await?;
        Ok(Self::with_client(
            client,
            s3_manager.config.max_read_retries,
            s3_manager.config.retry_base_delay_ms,
        ))
    }

    pub fn with_client(
        client: Arc<S3Client>,
        max_read_retries: u32,
        retry_base_delay_ms: u64,
    ) -> Self {
        Self {
            client,
            max_read_retries,
            retry_base_delay_ms,
        }
    }

    fn split(location: &StorageLocation) -> Result<(&str, &str)> {
        ensure_backend(Backend::ObjectStore, location)?;
        location
            .bucket_and_key()
            .ok_or_else(|| Error::InvalidUri(format!("Not an S3 path: {}", location)))
    }

    fn dir_prefix(key: &str) -> String {
        if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key.trim_end_matches('/'))
        }
    }

    /// Immediate children under `location` as `(name, is_prefix)` pairs.
    async fn entries(&self, location: &StorageLocation) -> Result<Vec<(String, bool)>> {
        let (bucket, key) = Self::split(location)?;
        let prefix = Self::dir_prefix(key);
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(&prefix)
                .delimiter("/");

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| classify(e, location))?;

            for common_prefix in response.common_prefixes() {
                if let Some(name) = common_prefix
                    .prefix()
                    .and_then(|p| p.strip_prefix(&prefix))
                    .map(|p| p.trim_end_matches('/'))
                    .filter(|p| !p.is_empty())
                {
                    entries.push((name.to_string(), true));
                }
            }

            for object in response.contents() {
                if let Some(name) = object
                    .key()
                    .and_then(|k| k.strip_prefix(&prefix))
                    .filter(|k| !k.is_empty() && !k.contains('/'))
                {
                    entries.push((name.to_string(), false));
                }
            }

            continuation_token = response.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    async fn has_children(&self, location: &StorageLocation) -> Result<bool> {
        let (bucket, key) = Self::split(location)?;
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(Self::dir_prefix(key))
            .max_keys(1)
            .send()
            .await
            .map_err(|e| classify(e, location))?;
        Ok(!response.contents().is_empty() || !response.common_prefixes().is_empty())
    }

    async fn bucket_reachable(&self, bucket: &str, location: &StorageLocation) -> Result<()> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => Err(classify(e, location)),
        }
    }

    async fn get_object_once(&self, location: &StorageLocation) -> Result<Vec<u8>> {
        let (bucket, key) = Self::split(location)?;
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(ref err) if err.err().is_no_such_key() => {
                    Error::NotFound(location.to_string())
                }
                other => classify(other, location),
            })?;

        let data = response.body.collect().await?.into_bytes().to_vec();
        debug!(location = %location, bytes = data.len(), "Read S3 object");
        Ok(data)
    }
}

/// Maps an SDK failure onto the crate taxonomy by HTTP status.
fn classify<E>(err: SdkError<E, Response>, location: &StorageLocation) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(401) | Some(403) => {
            Error::PermissionDenied(format!("{}: access denied", location))
        }
        Some(404) => Error::NotFound(location.to_string()),
        _ => Error::Storage(format!("{}: {}", location, DisplayErrorContext(&err))),
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn backend(&self) -> Backend {
        Backend::ObjectStore
    }

    async fn exists(&self, location: &StorageLocation) -> Result<bool> {
        let (bucket, key) = Self::split(location)?;
        if key.is_empty() {
            return Ok(self.bucket_reachable(bucket, location).await.is_ok());
        }

        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => return Ok(true),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => {}
            Err(e) => {
                let err = classify(e, location);
                if !matches!(err, Error::NotFound(_)) {
                    warn!(location = %location, error = %err, "Failed to check S3 object");
                    return Ok(false);
                }
            }
        }

        // Not an object; it may still be a "directory" prefix.
        match self.has_children(location).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(location = %location, error = %e, "Failed to check S3 prefix");
                Ok(false)
            }
        }
    }

    async fn is_dir(&self, location: &StorageLocation) -> Result<bool> {
        let (bucket, key) = Self::split(location)?;
        if key.is_empty() {
            return Ok(self.bucket_reachable(bucket, location).await.is_ok());
        }
        match self.has_children(location).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(location = %location, error = %e, "Failed to check if S3 path is a directory");
                Ok(false)
            }
        }
    }

    async fn list(&self, location: &StorageLocation) -> Result<Vec<String>> {
        match self.entries(location).await {
            Ok(entries) => Ok(entries.into_iter().map(|(name, _)| name).collect()),
            Err(Error::InvalidInput(msg)) => Err(Error::InvalidInput(msg)),
            Err(e) => {
                warn!(location = %location, error = %e, "Failed to list S3 directory");
                Ok(Vec::new())
            }
        }
    }

    async fn glob(
        &self,
        location: &StorageLocation,
        pattern: &str,
    ) -> Result<Vec<StorageLocation>> {
        let pattern = compile_pattern(pattern)?;
        let entries = match self.entries(location).await {
            Ok(entries) => entries,
            Err(Error::InvalidInput(msg)) => return Err(Error::InvalidInput(msg)),
            Err(e) => {
                warn!(location = %location, pattern = %pattern, error = %e, "Failed to glob S3 files");
                return Ok(Vec::new());
            }
        };

        let matched: Vec<StorageLocation> = entries
            .into_iter()
            .filter(|(name, is_prefix)| !is_prefix && pattern.matches(name))
            .map(|(name, _)| location.child(&name))
            .collect();
        debug!(dir = %location, pattern = %pattern, matched = matched.len(), "Globbed S3 prefix");
        Ok(matched)
    }

    async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>> {
        ensure_backend(Backend::ObjectStore, location)?;
        let result = retry_with_backoff(self.max_read_retries, self.retry_base_delay_ms, move || {
            self.get_object_once(location)
        })
        .await;

        match result {
            Err(e) if e.is_retryable() => Err(Error::MaxRetriesExceeded(format!(
                "{} after {} retries: {}",
                location, self.max_read_retries, e
            ))),
            other => other,
        }
    }

    async fn put_atomic(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        let (bucket, key) = Self::split(location)?;
        if key.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Cannot write to bucket root '{}'",
                location
            )));
        }

        // A single PUT is all-or-nothing on S3.
        retry_with_backoff(self.max_read_retries, self.retry_base_delay_ms, move || async move {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map(|_| ())
                .map_err(|e| classify(e, location))
        })
        .await
    }

    async fn create_dir_all(&self, location: &StorageLocation) -> Result<()> {
        // Prefixes come into being with their first object.
        Self::split(location).map(|_| ())
    }

    async fn remove(&self, location: &StorageLocation) -> Result<()> {
        let (bucket, key) = Self::split(location)?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify(e, location))?;
        Ok(())
    }

    async fn verify_access(&self, location: &StorageLocation) -> Result<()> {
        let (bucket, key) = Self::split(location)?;
        self.bucket_reachable(bucket, location).await?;
        if !key.is_empty() && !self.has_children(location).await? {
            return Err(Error::NotFound(location.to_string()));
        }
        Ok(())
    }
}
