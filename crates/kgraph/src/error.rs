//! Error types for the graph engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The storage layout a database was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    PerType,
    Unified,
}

impl Layout {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::PerType => "per_type",
            Layout::Unified => "unified",
        }
    }

    pub fn parse(s: &str) -> Option<Layout> {
        match s {
            "per_type" => Some(Layout::PerType),
            "unified" => Some(Layout::Unified),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    Exists(String),

    #[error("schema conflict for type '{ty}': {detail}")]
    SchemaConflict { ty: String, detail: String },

    #[error("validation failed: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("database was opened with layout {found:?}, but was created with {expected:?}")]
    LayoutMismatch { expected: Layout, found: Layout },

    #[error("changelog is disabled; delta push is unavailable")]
    ChangelogDisabled,

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
