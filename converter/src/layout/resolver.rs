use super::{DocketRoot, LayoutVariant};
use crate::processor::RecordKind;
use crate::storage::{Storage, StorageLocation};
use crate::utils::paths::RAW_DATA_DIR;
use common::Result;
use tokio::sync::OnceCell;
use tracing::debug;

const TEXT_DIR_PREFIX: &str = "text-";
const JSON_PATTERN: &str = "*.json";

/// Where a candidate is probed: directly under the base or under each
/// `text-*` child of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nesting {
    Flat,
    TextSubdir,
}

#[derive(Debug, Clone)]
enum Target {
    /// A single file; the first existing candidate wins.
    File(Vec<String>),
    /// A directory of `*.json` files; matches accumulate across text dirs.
    JsonDir(&'static str),
}

#[derive(Debug, Clone)]
struct Candidate {
    nesting: Nesting,
    target: Target,
}

/// Probe precedence per record kind. Earlier entries shadow later ones even
/// when both exist on disk.
fn candidates(kind: RecordKind, docket_id: &str) -> Vec<Candidate> {
    let canonical_docket = vec!["docket".to_string(), format!("{}.json", docket_id)];
    match kind {
        RecordKind::DocketInfo => vec![
            Candidate {
                nesting: Nesting::Flat,
                target: Target::File(canonical_docket.clone()),
            },
            Candidate {
                nesting: Nesting::Flat,
                target: Target::File(vec!["docket.json".to_string()]),
            },
            Candidate {
                nesting: Nesting::Flat,
                target: Target::File(vec![format!("{}.json", docket_id)]),
            },
            Candidate {
                nesting: Nesting::TextSubdir,
                target: Target::File(canonical_docket),
            },
        ],
        RecordKind::Document => json_dir_candidates("documents"),
        RecordKind::Comment => json_dir_candidates("comments"),
    }
}

fn json_dir_candidates(dir: &'static str) -> Vec<Candidate> {
    vec![
        Candidate {
            nesting: Nesting::Flat,
            target: Target::JsonDir(dir),
        },
        Candidate {
            nesting: Nesting::TextSubdir,
            target: Target::JsonDir(dir),
        },
    ]
}

/// The files found for one record kind and the variant they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    pub kind: RecordKind,
    pub variant: LayoutVariant,
    pub files: Vec<StorageLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedSources {
    pub docket_info: Option<SourceSet>,
    pub documents: Option<SourceSet>,
    pub comments: Option<SourceSet>,
}

impl ResolvedSources {
    pub fn get(&self, kind: RecordKind) -> Option<&SourceSet> {
        match kind {
            RecordKind::DocketInfo => self.docket_info.as_ref(),
            RecordKind::Document => self.documents.as_ref(),
            RecordKind::Comment => self.comments.as_ref(),
        }
    }

    fn set(&mut self, kind: RecordKind, sources: Option<SourceSet>) {
        match kind {
            RecordKind::DocketInfo => self.docket_info = sources,
            RecordKind::Document => self.documents = sources,
            RecordKind::Comment => self.comments = sources,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceSet> {
        [&self.docket_info, &self.documents, &self.comments]
            .into_iter()
            .flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// Per-docket probing state: the chosen base and its lazily listed text dirs.
struct ProbeContext<'a> {
    storage: &'a dyn Storage,
    base: StorageLocation,
    under_raw_data: bool,
    text_dirs: OnceCell<Vec<StorageLocation>>,
}

impl ProbeContext<'_> {
    async fn text_dirs(&self) -> Result<&[StorageLocation]> {
        let dirs = self
            .text_dirs
            .get_or_try_init(|| async {
                let mut names: Vec<String> = self
                    .storage
                    .list(&self.base)
                    .await?
                    .into_iter()
                    .filter(|name| name.starts_with(TEXT_DIR_PREFIX))
                    .collect();
                names.sort();

                let mut dirs = Vec::with_capacity(names.len());
                for name in &names {
                    let dir = self.base.child(name);
                    if self.storage.is_dir(&dir).await? {
                        dirs.push(dir);
                    } else {
                        debug!(path = %dir, "Ignoring text-* entry that is not a directory");
                    }
                }
                if !dirs.is_empty() {
                    debug!(base = %self.base, text_dirs = dirs.len(), "Found text-* directories");
                }
                Ok::<_, common::Error>(dirs)
            })
            .await?;
        Ok(dirs.as_slice())
    }

    async fn bases(&self, nesting: Nesting) -> Result<Vec<StorageLocation>> {
        match nesting {
            Nesting::Flat => Ok(vec![self.base.clone()]),
            Nesting::TextSubdir => Ok(self.text_dirs().await?.to_vec()),
        }
    }
}

/// Finds the docket-info file and the document/comment files of a docket,
/// whatever historical layout it was stored in.
pub struct LayoutResolver<'a> {
    storage: &'a dyn Storage,
}

impl<'a> LayoutResolver<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self { storage }
    }

    pub async fn resolve(&self, docket: &DocketRoot) -> Result<ResolvedSources> {
        let context = self.context(docket).await?;

        let mut resolved = ResolvedSources::default();
        for kind in RecordKind::ALL {
            let sources = self
                .first_match(&context, kind, candidates(kind, &docket.docket_id))
                .await?;
            resolved.set(kind, sources);
        }

        let variants: Vec<LayoutVariant> = resolved.iter().map(|s| s.variant).collect();
        if variants.windows(2).any(|w| w[0] != w[1]) {
            debug!(
                docket = %docket.docket_id,
                variants = ?variants,
                "Sources resolved under different layout variants"
            );
        }

        Ok(resolved)
    }

    /// Resolves `previous.kind` again from the candidates ranked after the
    /// one that produced `previous`. Used when none of its files loaded.
    pub async fn resolve_next(
        &self,
        docket: &DocketRoot,
        previous: &SourceSet,
    ) -> Result<Option<SourceSet>> {
        let context = self.context(docket).await?;
        let nesting = if previous.variant.is_text_subdir() {
            Nesting::TextSubdir
        } else {
            Nesting::Flat
        };
        let remaining = candidates(previous.kind, &docket.docket_id)
            .into_iter()
            .skip_while(|c| c.nesting != nesting)
            .skip(1);
        self.first_match(&context, previous.kind, remaining).await
    }

    async fn context(&self, docket: &DocketRoot) -> Result<ProbeContext<'a>> {
        let raw_data = docket.location.child(RAW_DATA_DIR);
        let under_raw_data = self.storage.exists(&raw_data).await?;
        Ok(ProbeContext {
            storage: self.storage,
            base: if under_raw_data {
                raw_data
            } else {
                docket.location.clone()
            },
            under_raw_data,
            text_dirs: OnceCell::new(),
        })
    }

    async fn first_match(
        &self,
        context: &ProbeContext<'_>,
        kind: RecordKind,
        candidates: impl IntoIterator<Item = Candidate>,
    ) -> Result<Option<SourceSet>> {
        for candidate in candidates {
            let variant = LayoutVariant::from_parts(
                context.under_raw_data,
                candidate.nesting == Nesting::TextSubdir,
            );
            let bases = context.bases(candidate.nesting).await?;

            match &candidate.target {
                Target::File(segments) => {
                    for base in &bases {
                        let file = base.join(segments);
                        if self.storage.exists(&file).await? {
                            debug!(kind = kind.table_name(), file = %file, variant = %variant, "Resolved source file");
                            return Ok(Some(SourceSet {
                                kind,
                                variant,
                                files: vec![file],
                            }));
                        }
                    }
                }
                Target::JsonDir(dir) => {
                    let mut files = Vec::new();
                    for base in &bases {
                        files.extend(self.storage.glob(&base.child(dir), JSON_PATTERN).await?);
                    }
                    if !files.is_empty() {
                        files.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                        debug!(kind = kind.table_name(), files = files.len(), variant = %variant, "Resolved source directory");
                        return Ok(Some(SourceSet {
                            kind,
                            variant,
                            files,
                        }));
                    }
                }
            }
        }

        Ok(None)
    }
}
