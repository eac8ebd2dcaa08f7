use crate::storage::StorageLocation;

pub const RAW_DATA_DIR: &str = "raw-data";
pub const DERIVED_DATA_DIR: &str = "derived-data";
pub const ICEBERG_DIR: &str = "iceberg";
pub const UNKNOWN_AGENCY: &str = "UNKNOWN";

/// Agency code of a docket identifier.
///
/// `ACF/ACF-2024-0005` -> `ACF`, `DEA-2016-0015` -> `DEA`, otherwise `UNKNOWN`.
pub fn agency_of(docket_id: &str) -> String {
    if let Some((agency, _)) = docket_id.split_once('/') {
        agency.to_string()
    } else if let Some((agency, _)) = docket_id.split_once('-') {
        agency.to_string()
    } else {
        UNKNOWN_AGENCY.to_string()
    }
}

/// Builds `<root>[/derived-data]/<agency>/<docket>/iceberg/<table>.parquet`.
///
/// The `derived-data` segment is only added when the root was given
/// explicitly; the default root already is `<source>/derived-data`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: StorageLocation,
    explicit_root: bool,
}

impl OutputLayout {
    pub fn new(source: &StorageLocation, output: Option<StorageLocation>) -> Self {
        match output {
            Some(root) => Self {
                root,
                explicit_root: true,
            },
            None => Self {
                root: source.child(DERIVED_DATA_DIR),
                explicit_root: false,
            },
        }
    }

    /// The directory that must be writable before the run starts.
    pub fn root(&self) -> &StorageLocation {
        &self.root
    }

    pub fn docket_dir(&self, agency: &str, docket_id: &str) -> StorageLocation {
        if self.explicit_root {
            self.root.join([DERIVED_DATA_DIR, agency, docket_id, ICEBERG_DIR])
        } else {
            self.root.join([agency, docket_id, ICEBERG_DIR])
        }
    }

    pub fn table_file(&self, agency: &str, docket_id: &str, table: &str) -> StorageLocation {
        self.docket_dir(agency, docket_id).child(&format!("{}.parquet", table))
    }
}
