use super::{Backend, Storage, StorageLocation, compile_pattern, ensure_backend};
use async_trait::async_trait;
use common::{Error, Result};
use std::io::ErrorKind;
use tokio::fs;
use tracing::{debug, warn};

/// Local filesystem backend.
///
/// Permission problems surface as [`Error::PermissionDenied`] and are never
/// swallowed: they indicate a broken setup for the whole run.
#[derive(Debug, Default, Clone)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }

    async fn entries(&self, location: &StorageLocation) -> Result<Vec<(String, bool)>> {
        let mut read_dir = match fs::read_dir(location.to_path_buf()).await {
            Ok(read_dir) => read_dir,
            Err(e) if is_missing(&e) => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e, location)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| io_error(e, location))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .map_err(|e| io_error(e, location))?;
            entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }
        Ok(entries)
    }
}

/// A path that runs through a regular file (`docket.json/x`) is as absent
/// as one that does not exist at all.
fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

pub(crate) fn io_error(err: std::io::Error, location: &StorageLocation) -> Error {
    match err.kind() {
        ErrorKind::PermissionDenied => {
            Error::PermissionDenied(format!("{}: {}", location, err))
        }
        _ if is_missing(&err) => Error::NotFound(location.to_string()),
        _ => Error::Io(err),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn exists(&self, location: &StorageLocation) -> Result<bool> {
        ensure_backend(Backend::Local, location)?;
        match fs::try_exists(location.to_path_buf()).await {
            Ok(found) => Ok(found),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(io_error(e, location)),
        }
    }

    async fn is_dir(&self, location: &StorageLocation) -> Result<bool> {
        ensure_backend(Backend::Local, location)?;
        match fs::metadata(location.to_path_buf()).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(io_error(e, location)),
        }
    }

    async fn list(&self, location: &StorageLocation) -> Result<Vec<String>> {
        ensure_backend(Backend::Local, location)?;
        let entries = self.entries(location).await?;
        Ok(entries.into_iter().map(|(name, _)| name).collect())
    }

    async fn glob(
        &self,
        location: &StorageLocation,
        pattern: &str,
    ) -> Result<Vec<StorageLocation>> {
        ensure_backend(Backend::Local, location)?;
        let pattern = compile_pattern(pattern)?;
        let matched: Vec<StorageLocation> = self
            .entries(location)
            .await?
            .into_iter()
            .filter(|(name, is_dir)| !is_dir && pattern.matches(name))
            .map(|(name, _)| location.child(&name))
            .collect();
        debug!(dir = %location, pattern = %pattern, matched = matched.len(), "Globbed local directory");
        Ok(matched)
    }

    async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>> {
        ensure_backend(Backend::Local, location)?;
        fs::read(location.to_path_buf())
            .await
            .map_err(|e| io_error(e, location))
    }

    async fn put_atomic(&self, location: &StorageLocation, data: &[u8]) -> Result<()> {
        ensure_backend(Backend::Local, location)?;
        let parent = location.parent().ok_or_else(|| {
            Error::InvalidInput(format!("Cannot write to root location '{}'", location))
        })?;
        self.create_dir_all(&parent).await?;

        let temp = parent.child(&format!(".{}.{}.tmp", location.name(), uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(temp.to_path_buf(), data).await {
            let _ = fs::remove_file(temp.to_path_buf()).await;
            return Err(io_error(e, &temp));
        }
        if let Err(e) = fs::rename(temp.to_path_buf(), location.to_path_buf()).await {
            warn!(temp = %temp, target = %location, error = %e, "Failed to publish file");
            let _ = fs::remove_file(temp.to_path_buf()).await;
            return Err(io_error(e, location));
        }
        Ok(())
    }

    async fn create_dir_all(&self, location: &StorageLocation) -> Result<()> {
        ensure_backend(Backend::Local, location)?;
        fs::create_dir_all(location.to_path_buf())
            .await
            .map_err(|e| io_error(e, location))
    }

    async fn remove(&self, location: &StorageLocation) -> Result<()> {
        ensure_backend(Backend::Local, location)?;
        match fs::remove_file(location.to_path_buf()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e, location)),
        }
    }

    async fn verify_access(&self, location: &StorageLocation) -> Result<()> {
        ensure_backend(Backend::Local, location)?;
        let meta = fs::metadata(location.to_path_buf())
            .await
            .map_err(|e| io_error(e, location))?;
        if meta.is_dir() {
            let _entries = fs::read_dir(location.to_path_buf())
                .await
                .map_err(|e| io_error(e, location))?;
        }
        Ok(())
    }
}
