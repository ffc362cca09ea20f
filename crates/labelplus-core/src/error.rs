//! Error types for label engine operations.

use thiserror::Error;

/// Errors surfaced by label and mapping operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Label id does not name an existing label.
    #[error("unknown label")]
    InvalidLabel {
        /// Offending label id.
        label_id: String,
    },
    /// Parent id is missing, the label itself, or one of its descendants.
    #[error("invalid parent label")]
    InvalidParent {
        /// Offending parent id.
        parent_id: String,
    },
    /// A sibling already uses the name.
    #[error("label already exists")]
    LabelExists {
        /// Conflicting name.
        name: String,
    },
    /// Name was empty after trimming.
    #[error("empty label name")]
    EmptyLabel,
    /// Name contains control characters or path-reserved symbols.
    #[error("label name contains invalid characters")]
    InvalidCharacters {
        /// Rejected name.
        name: String,
    },
    /// Operation attempted before the engine finished initializing.
    #[error("label engine not initialized")]
    CoreNotInitialized,
    /// Path kind string was not recognized.
    #[error("invalid path kind")]
    InvalidPathKind {
        /// Rejected value.
        value: String,
    },
}

impl CoreError {
    pub(crate) fn invalid_label(label_id: &str) -> Self {
        Self::InvalidLabel {
            label_id: label_id.to_string(),
        }
    }

    pub(crate) fn invalid_parent(parent_id: &str) -> Self {
        Self::InvalidParent {
            parent_id: parent_id.to_string(),
        }
    }
}

/// Convenience alias for engine results.
pub type CoreResult<T> = Result<T, CoreError>;
