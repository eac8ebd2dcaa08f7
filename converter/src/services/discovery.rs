use super::filter::Filters;
use crate::layout::DocketRoot;
use crate::storage::{Backend, Storage, StorageLocation};
use crate::utils::paths::{DERIVED_DATA_DIR, RAW_DATA_DIR};
use common::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DOCKET_MARKER_DIR: &str = "docket";

/// Why discovery stopped early without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    ConsumerGone,
}

/// Streams candidate docket roots found under a source root.
///
/// Local sources are walked exhaustively. Object-store sources are probed
/// agency by agency from the catalog so the bucket is never listed in full.
pub struct DocketDiscoverer {
    storage: Arc<dyn Storage>,
    filters: Arc<Filters>,
    catalog: Vec<String>,
}

impl DocketDiscoverer {
    pub fn new(storage: Arc<dyn Storage>, filters: Arc<Filters>, catalog: Vec<String>) -> Self {
        Self {
            storage,
            filters,
            catalog,
        }
    }

    /// Sends every accepted root on `tx` as soon as it is found and returns
    /// how many were sent. Stops quietly once the receiver is dropped.
    pub async fn discover(
        &self,
        root: &StorageLocation,
        tx: mpsc::Sender<DocketRoot>,
    ) -> Result<usize> {
        let mut sent = 0;
        let raw_data = root.child(RAW_DATA_DIR);
        let has_raw_data = self.storage.exists(&raw_data).await?;

        let flow = match (self.storage.backend(), has_raw_data) {
            (Backend::Local, true) => self.walk_raw_data(&raw_data, &tx, &mut sent).await?,
            (Backend::ObjectStore, true) => self.probe_catalog(&raw_data, &tx, &mut sent).await?,
            (_, false) => {
                debug!(root = %root, "No raw-data directory, walking root directly");
                self.walk_direct(root, &tx, &mut sent).await?
            }
        };

        if flow == Flow::ConsumerGone {
            debug!(sent, "Discovery stopped, consumer hung up");
        } else {
            info!(sent, root = %root, "Discovery finished");
        }
        Ok(sent)
    }

    async fn walk_raw_data(
        &self,
        raw_data: &StorageLocation,
        tx: &mpsc::Sender<DocketRoot>,
        sent: &mut usize,
    ) -> Result<Flow> {
        for agency in sorted(self.storage.list(raw_data).await?) {
            if is_hidden(&agency) || !self.filters.accepts_agency(&agency) {
                continue;
            }
            let agency_dir = raw_data.child(&agency);
            if !self.storage.is_dir(&agency_dir).await? {
                continue;
            }
            if self.list_agency(&agency_dir, tx, sent).await? == Flow::ConsumerGone {
                return Ok(Flow::ConsumerGone);
            }
        }
        Ok(Flow::Continue)
    }

    async fn probe_catalog(
        &self,
        raw_data: &StorageLocation,
        tx: &mpsc::Sender<DocketRoot>,
        sent: &mut usize,
    ) -> Result<Flow> {
        let agencies = match self.filters.agency() {
            Some(agency) => {
                if !self.catalog.iter().any(|c| c.eq_ignore_ascii_case(agency)) {
                    warn!(agency, "Agency is not in the configured catalog, probing anyway");
                }
                vec![agency.to_string()]
            }
            None => self.catalog.clone(),
        };

        for agency in agencies {
            let agency_dir = raw_data.child(&agency);
            if !self.storage.exists(&agency_dir).await? {
                continue;
            }
            debug!(agency = %agency, "Probing agency");

            let flow = match self.filters.exact_docket() {
                Some(docket_id) => {
                    let candidate = agency_dir.child(docket_id);
                    if self.storage.exists(&candidate).await?
                        && self.storage.is_dir(&candidate).await?
                    {
                        self.offer(candidate, tx, sent).await
                    } else {
                        Flow::Continue
                    }
                }
                None => self.list_agency(&agency_dir, tx, sent).await?,
            };
            if flow == Flow::ConsumerGone {
                return Ok(flow);
            }
        }
        Ok(Flow::Continue)
    }

    async fn list_agency(
        &self,
        agency_dir: &StorageLocation,
        tx: &mpsc::Sender<DocketRoot>,
        sent: &mut usize,
    ) -> Result<Flow> {
        for name in sorted(self.storage.list(agency_dir).await?) {
            if is_hidden(&name) || is_reserved(&name) {
                continue;
            }
            let candidate = agency_dir.child(&name);
            if !self.storage.is_dir(&candidate).await? {
                continue;
            }
            if self.offer(candidate, tx, sent).await == Flow::ConsumerGone {
                return Ok(Flow::ConsumerGone);
            }
        }
        Ok(Flow::Continue)
    }

    async fn walk_direct(
        &self,
        root: &StorageLocation,
        tx: &mpsc::Sender<DocketRoot>,
        sent: &mut usize,
    ) -> Result<Flow> {
        for name in sorted(self.storage.list(root).await?) {
            if is_hidden(&name) || is_reserved(&name) {
                continue;
            }
            let candidate = root.child(&name);
            if !self.storage.is_dir(&candidate).await? {
                continue;
            }
            let looks_like_docket = self.storage.exists(&candidate.child(RAW_DATA_DIR)).await?
                || self
                    .storage
                    .exists(&candidate.child(DOCKET_MARKER_DIR))
                    .await?;
            if !looks_like_docket {
                continue;
            }
            if self.offer(candidate, tx, sent).await == Flow::ConsumerGone {
                return Ok(Flow::ConsumerGone);
            }
        }
        Ok(Flow::Continue)
    }

    async fn offer(
        &self,
        candidate: StorageLocation,
        tx: &mpsc::Sender<DocketRoot>,
        sent: &mut usize,
    ) -> Flow {
        let docket = DocketRoot::new(candidate);
        if !self.filters.should_process(&docket.docket_id) {
            return Flow::Continue;
        }
        if tx.send(docket).await.is_err() {
            return Flow::ConsumerGone;
        }
        *sent += 1;
        Flow::Continue
    }
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

fn is_reserved(name: &str) -> bool {
    name == RAW_DATA_DIR || name == DERIVED_DATA_DIR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::path::Path;

    fn mkdirs(root: &Path, dirs: &[&str]) {
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    async fn collect(root: &Path, filters: Filters) -> Vec<String> {
        let discoverer = DocketDiscoverer::new(
            Arc::new(LocalStorage::new()),
            Arc::new(filters),
            Vec::new(),
        );
        let (tx, mut rx) = mpsc::channel(4);
        let root = StorageLocation::local(root);

        let producer = async move { discoverer.discover(&root, tx).await.unwrap() };
        let consumer = async move {
            let mut ids = Vec::new();
            while let Some(docket) = rx.recv().await {
                ids.push(docket.docket_id);
            }
            ids
        };
        let (sent, ids) = tokio::join!(producer, consumer);
        assert_eq!(sent, ids.len());
        ids
    }

    #[tokio::test]
    async fn test_raw_data_walk() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(
            tmp.path(),
            &[
                "raw-data/DEA/DEA-2016-0015/raw-data",
                "raw-data/DEA/DEA-2017-0001",
                "raw-data/FAA/FAA-2000-7032",
                "raw-data/.cache/ignored",
                "derived-data/DEA/DEA-2016-0015",
            ],
        );
        std::fs::write(tmp.path().join("raw-data/FAA/notes.txt"), "x").unwrap();

        let ids = collect(tmp.path(), Filters::default()).await;
        assert_eq!(ids, vec!["DEA-2016-0015", "DEA-2017-0001", "FAA-2000-7032"]);
    }

    #[tokio::test]
    async fn test_raw_data_walk_with_filters() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(
            tmp.path(),
            &[
                "raw-data/CMS/CMS-2025-0020",
                "raw-data/CMS/CMS-2024-0001",
                "raw-data/DEA/DEA-2025-0001",
            ],
        );

        let ids = collect(tmp.path(), Filters::new(Some("cms"), None).unwrap()).await;
        assert_eq!(ids, vec!["CMS-2024-0001", "CMS-2025-0020"]);

        let ids = collect(tmp.path(), Filters::new(None, Some("CMS-2025-*")).unwrap()).await;
        assert_eq!(ids, vec!["CMS-2025-0020"]);
    }

    #[tokio::test]
    async fn test_direct_walk_requires_docket_markers() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(
            tmp.path(),
            &[
                "FAA-2000-7032/docket",
                "DEA-2016-0015/raw-data",
                "scratch/tmp",
                ".hidden/docket",
                "derived-data/docket",
            ],
        );

        let ids = collect(tmp.path(), Filters::default()).await;
        assert_eq!(ids, vec!["DEA-2016-0015", "FAA-2000-7032"]);
    }

    /// Object-store stand-in that only knows a set of prefixes and records
    /// every listing it serves.
    struct PrefixStore {
        dirs: Vec<String>,
        listed: std::sync::Mutex<Vec<String>>,
    }

    impl PrefixStore {
        fn new(dirs: &[&str]) -> Self {
            Self {
                dirs: dirs.iter().map(|d| format!("s3://bucket/{}", d)).collect(),
                listed: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn known(&self, location: &StorageLocation) -> bool {
            let path = location.as_str();
            self.dirs
                .iter()
                .any(|d| d == path || d.starts_with(&format!("{}/", path)))
        }
    }

    #[async_trait::async_trait]
    impl Storage for PrefixStore {
        fn backend(&self) -> Backend {
            Backend::ObjectStore
        }
        async fn exists(&self, location: &StorageLocation) -> Result<bool> {
            Ok(self.known(location))
        }
        async fn is_dir(&self, location: &StorageLocation) -> Result<bool> {
            Ok(self.known(location))
        }
        async fn list(&self, location: &StorageLocation) -> Result<Vec<String>> {
            self.listed.lock().unwrap().push(location.name().to_string());
            let prefix = format!("{}/", location.as_str());
            let mut names: Vec<String> = self
                .dirs
                .iter()
                .filter_map(|d| d.strip_prefix(&prefix))
                .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
                .collect();
            names.dedup();
            Ok(names)
        }
        async fn glob(&self, _: &StorageLocation, _: &str) -> Result<Vec<StorageLocation>> {
            Ok(Vec::new())
        }
        async fn read(&self, location: &StorageLocation) -> Result<Vec<u8>> {
            Err(common::Error::NotFound(location.to_string()))
        }
        async fn put_atomic(&self, _: &StorageLocation, _: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn create_dir_all(&self, _: &StorageLocation) -> Result<()> {
            Ok(())
        }
        async fn remove(&self, _: &StorageLocation) -> Result<()> {
            Ok(())
        }
        async fn verify_access(&self, _: &StorageLocation) -> Result<()> {
            Ok(())
        }
    }

    async fn collect_from(store: Arc<PrefixStore>, filters: Filters, catalog: &[&str]) -> Vec<String> {
        let discoverer = DocketDiscoverer::new(
            store,
            Arc::new(filters),
            catalog.iter().map(|c| c.to_string()).collect(),
        );
        let (tx, mut rx) = mpsc::channel(16);
        let root = StorageLocation::parse("s3://bucket/data").unwrap();
        discoverer.discover(&root, tx).await.unwrap();

        let mut ids = Vec::new();
        while let Some(docket) = rx.recv().await {
            ids.push(docket.docket_id);
        }
        ids
    }

    #[tokio::test]
    async fn test_object_store_probes_catalog_agencies_only() {
        let store = Arc::new(PrefixStore::new(&[
            "data/raw-data/DEA/DEA-2016-0015/raw-data",
            "data/raw-data/FAA/FAA-2000-7032/docket",
            "data/raw-data/ZZZ/ZZZ-2020-0001/docket",
        ]));

        let ids = collect_from(store.clone(), Filters::default(), &["DEA", "EPA", "FAA"]).await;
        assert_eq!(ids, vec!["DEA-2016-0015", "FAA-2000-7032"]);
        assert_eq!(*store.listed.lock().unwrap(), vec!["DEA", "FAA"]);
    }

    #[tokio::test]
    async fn test_object_store_exact_docket_is_probed_not_listed() {
        let store = Arc::new(PrefixStore::new(&[
            "data/raw-data/FAA/FAA-2000-7032/docket",
            "data/raw-data/FAA/FAA-2000-7033/docket",
        ]));

        let filters = Filters::new(Some("faa"), Some("FAA-2000-7032")).unwrap();
        let ids = collect_from(store.clone(), filters, &["DEA"]).await;
        assert_eq!(ids, vec!["FAA-2000-7032"]);
        assert!(store.listed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_object_store_without_raw_data_walks_directly() {
        let store = Arc::new(PrefixStore::new(&["data/FAA-2000-7032/docket", "data/misc/x"]));
        let ids = collect_from(store, Filters::default(), &["FAA"]).await;
        assert_eq!(ids, vec!["FAA-2000-7032"]);
    }

    #[tokio::test]
    async fn test_stops_when_consumer_hangs_up() {
        let tmp = tempfile::tempdir().unwrap();
        mkdirs(
            tmp.path(),
            &["raw-data/A/A-1", "raw-data/A/A-2", "raw-data/A/A-3"],
        );
        let discoverer = DocketDiscoverer::new(
            Arc::new(LocalStorage::new()),
            Arc::new(Filters::default()),
            Vec::new(),
        );
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let sent = discoverer
            .discover(&StorageLocation::local(tmp.path()), tx)
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }
}
