use super::flatten::parse_and_flatten;
use super::types::{DocketDataset, FileFailure, RecordKind};
use crate::layout::{DocketRoot, LayoutResolver, SourceSet};
use crate::storage::Storage;
use common::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Loads and flattens every source file of one docket.
pub struct DocketExtractor {
    storage: Arc<dyn Storage>,
}

impl DocketExtractor {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Builds the dataset for `docket`. Per-file problems are recorded on the
    /// dataset; only fatal storage errors are returned.
    pub async fn extract(&self, docket: &DocketRoot) -> Result<DocketDataset> {
        let resolver = LayoutResolver::new(self.storage.as_ref());
        let sources = resolver.resolve(docket).await?;

        let mut dataset = DocketDataset::default();
        for resolved in sources.iter() {
            let mut set = resolved.clone();
            // A document or comment directory whose files all failed gives
            // way to the next candidate location.
            while self.load(&set, &mut dataset).await? == 0 && set.kind != RecordKind::DocketInfo {
                match resolver.resolve_next(docket, &set).await? {
                    Some(next) => {
                        debug!(
                            docket = %docket.docket_id,
                            kind = set.kind.table_name(),
                            from = %set.variant,
                            to = %next.variant,
                            "No rows loaded, trying next location"
                        );
                        set = next;
                    }
                    None => break,
                }
            }
            dataset.variants.push((set.kind, set.variant));
        }

        debug!(
            docket = %docket.docket_id,
            documents = dataset.documents.len(),
            comments = dataset.comments.len(),
            failures = dataset.failures.len(),
            "Extracted docket"
        );
        Ok(dataset)
    }

    /// Loads `set` into `dataset` and returns the number of rows added.
    async fn load(&self, set: &SourceSet, dataset: &mut DocketDataset) -> Result<usize> {
        let mut loaded = 0;
        for file in &set.files {
            let record = match self.storage.read(file).await {
                Ok(bytes) => parse_and_flatten(set.kind, &bytes),
                Err(e) => Err(e),
            };

            match record {
                Ok(record) => {
                    dataset.push(set.kind, record);
                    loaded += 1;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(file = %file, error = %e, "Skipping source file");
                    dataset.failures.push(FileFailure {
                        location: file.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(loaded)
    }
}
