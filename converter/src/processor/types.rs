use crate::layout::LayoutVariant;
use crate::storage::StorageLocation;
use serde_json::{Map, Value};

/// One flattened JSON record: column name to scalar value.
pub type FlatRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    DocketInfo,
    Document,
    Comment,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [Self::DocketInfo, Self::Document, Self::Comment];

    /// Output table the records of this kind end up in.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::DocketInfo => "docket_info",
            Self::Document => "documents",
            Self::Comment => "comments",
        }
    }
}

/// A source file that could not be turned into a row.
#[derive(Debug, Clone)]
pub struct FileFailure {
    pub location: StorageLocation,
    pub reason: String,
}

/// Everything extracted for one docket, ready to be written.
#[derive(Debug, Default)]
pub struct DocketDataset {
    pub docket_info: Option<FlatRecord>,
    pub documents: Vec<FlatRecord>,
    pub comments: Vec<FlatRecord>,
    pub variants: Vec<(RecordKind, LayoutVariant)>,
    pub failures: Vec<FileFailure>,
}

impl DocketDataset {
    pub fn is_empty(&self) -> bool {
        self.docket_info.is_none() && self.documents.is_empty() && self.comments.is_empty()
    }

    pub fn push(&mut self, kind: RecordKind, record: FlatRecord) {
        match kind {
            RecordKind::DocketInfo => self.docket_info = Some(record),
            RecordKind::Document => self.documents.push(record),
            RecordKind::Comment => self.comments.push(record),
        }
    }

    /// Non-empty tables as `(table_name, rows)`.
    pub fn tables(&self) -> Vec<(&'static str, &[FlatRecord])> {
        let mut tables = Vec::new();
        if let Some(info) = &self.docket_info {
            tables.push((
                RecordKind::DocketInfo.table_name(),
                std::slice::from_ref(info),
            ));
        }
        if !self.documents.is_empty() {
            tables.push((RecordKind::Document.table_name(), self.documents.as_slice()));
        }
        if !self.comments.is_empty() {
            tables.push((RecordKind::Comment.table_name(), self.comments.as_slice()));
        }
        tables
    }
}
