use std::path::PathBuf;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub(super) fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// One debounced batch, split by what it affects.
#[derive(Debug, Default)]
pub(super) struct ChangeBatch {
    /// `weaver.toml` itself changed.
    pub(super) config: bool,
    /// Source files and directories, in path order.
    pub(super) sources: Vec<(PathBuf, ChangeKind)>,
}

impl ChangeBatch {
    pub(super) fn is_empty(&self) -> bool {
        !self.config && self.sources.is_empty()
    }
}

/// What applying a batch did to the cache.
#[derive(Debug, Default)]
pub(super) struct BatchReport {
    pub(super) invalidated: Vec<String>,
    pub(super) config_reloaded: bool,
    pub(super) config_error: Option<String>,
}
