//! Error types for host torrent operations.

use std::error::Error;

use thiserror::Error;

use crate::model::TorrentId;

/// Primary error type for host torrent operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// Operation is not supported by the host.
    #[error("torrent operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Operation failed inside the host.
    #[error("torrent operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Torrent identifier when available.
        torrent_id: Option<TorrentId>,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Torrent is not known to the host.
    #[error("torrent not found")]
    NotFound {
        /// Missing torrent identifier.
        torrent_id: TorrentId,
    },
}

/// Convenience alias for host torrent results.
pub type TorrentResult<T> = Result<T, TorrentError>;
