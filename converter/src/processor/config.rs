use super::writer::Codec;
use crate::storage::{storage_for, S3Config, S3Manager, Storage, StorageLocation};
use common::config::Settings;
use common::Result;
use std::sync::Arc;

/// One conversion run as requested by the caller.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub source: StorageLocation,
    pub output: Option<StorageLocation>,
    pub agency_filter: Option<String>,
    pub docket_pattern: Option<String>,
    pub codec: Codec,
    /// Overrides `[conversion] concurrency` when set.
    pub concurrency: Option<usize>,
}

impl ConvertConfig {
    pub fn new(source: StorageLocation) -> Self {
        Self {
            source,
            output: None,
            agency_filter: None,
            docket_pattern: None,
            codec: Codec::default(),
            concurrency: None,
        }
    }

    pub fn with_output(mut self, output: StorageLocation) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_agency(mut self, agency: impl Into<String>) -> Self {
        self.agency_filter = Some(agency.into());
        self
    }

    pub fn with_docket_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.docket_pattern = Some(pattern.into());
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Where tables land when no output root was given.
    pub fn output_root(&self) -> StorageLocation {
        crate::utils::paths::OutputLayout::new(&self.source, self.output.clone())
            .root()
            .clone()
    }
}

/// Storage handles for the two sides of a run. Source and output may live on
/// different backends.
#[derive(Clone)]
pub struct StorageConfig {
    pub source: Arc<dyn Storage>,
    pub output: Arc<dyn Storage>,
    pub s3_manager: Arc<S3Manager>,
}

impl StorageConfig {
    pub async fn from_settings(settings: &Settings, config: &ConvertConfig) -> Result<Self> {
        let s3_manager = Arc::new(S3Manager::new(S3Config::from_settings(settings)));

        Ok(Self {
            source: storage_for(&config.source, &s3_manager).await?,
            output: storage_for(&config.output_root(), &s3_manager).await?,
            s3_manager,
        })
    }
}
