pub mod resolver;

use crate::storage::StorageLocation;
use crate::utils::paths::agency_of;
use std::fmt;

pub use resolver::{LayoutResolver, ResolvedSources, SourceSet};

/// A location believed to hold exactly one docket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocketRoot {
    pub location: StorageLocation,
    pub docket_id: String,
    pub agency: String,
}

impl DocketRoot {
    pub fn new(location: StorageLocation) -> Self {
        let docket_id = location.name().to_string();
        let agency = agency_of(&docket_id);
        Self {
            location,
            docket_id,
            agency,
        }
    }
}

/// Historical directory conventions, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutVariant {
    RawDataFlat,
    RawDataTextSubdir,
    DirectFlat,
    DirectTextSubdir,
}

impl LayoutVariant {
    pub const ORDER: [LayoutVariant; 4] = [
        Self::RawDataFlat,
        Self::RawDataTextSubdir,
        Self::DirectFlat,
        Self::DirectTextSubdir,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawDataFlat => "raw-data-flat",
            Self::RawDataTextSubdir => "raw-data-text-subdir",
            Self::DirectFlat => "direct-flat",
            Self::DirectTextSubdir => "direct-text-subdir",
        }
    }

    pub(crate) fn from_parts(under_raw_data: bool, text_subdir: bool) -> Self {
        match (under_raw_data, text_subdir) {
            (true, false) => Self::RawDataFlat,
            (true, true) => Self::RawDataTextSubdir,
            (false, false) => Self::DirectFlat,
            (false, true) => Self::DirectTextSubdir,
        }
    }

    pub fn is_raw_data(&self) -> bool {
        matches!(self, Self::RawDataFlat | Self::RawDataTextSubdir)
    }

    pub fn is_text_subdir(&self) -> bool {
        matches!(self, Self::RawDataTextSubdir | Self::DirectTextSubdir)
    }
}

impl fmt::Display for LayoutVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docket_root_derives_ids() {
        let root = DocketRoot::new(StorageLocation::local("/data/raw-data/DEA/DEA-2016-0015"));
        assert_eq!(root.docket_id, "DEA-2016-0015");
        assert_eq!(root.agency, "DEA");

        let root = DocketRoot::new(StorageLocation::parse("s3://bucket/results/misc").unwrap());
        assert_eq!(root.docket_id, "misc");
        assert_eq!(root.agency, "UNKNOWN");
    }

    #[test]
    fn test_variant_order_matches_parts() {
        let built: Vec<LayoutVariant> = [(true, false), (true, true), (false, false), (false, true)]
            .into_iter()
            .map(|(raw, text)| LayoutVariant::from_parts(raw, text))
            .collect();
        assert_eq!(built, LayoutVariant::ORDER.to_vec());
        assert_eq!(LayoutVariant::DirectTextSubdir.to_string(), "direct-text-subdir");
    }
}
