pub mod config;
pub mod extract;
pub mod flatten;
pub mod types;
pub mod writer;

pub use config::{ConvertConfig, StorageConfig};
pub use extract::DocketExtractor;
pub use flatten::{flatten, parse_and_flatten};
pub use types::{DocketDataset, FileFailure, FlatRecord, RecordKind};
pub use writer::{Codec, TableWriter};
