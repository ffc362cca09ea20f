#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Label hierarchy engine.
//!
//! Layout: `label.rs` (id scheme and name validation), `autolabel.rs` (rule
//! matching), `tree.rs` (label index and tree mutations), `state.rs`
//! (`CoreState` aggregate, torrent mappings, host event reactions),
//! `options.rs` (option application, path resolution, storage moves),
//! `shared_limit.rs` (shared bandwidth redistribution).
//!
//! Every operation here is synchronous; the caller owns the lock that
//! serializes access to [`CoreState`].

pub mod autolabel;
pub mod error;
pub mod label;
pub mod options;
pub mod shared_limit;
pub mod state;
pub mod tree;

pub use autolabel::{TorrentProperties, find_match};
pub use error::{CoreError, CoreResult};
pub use label::{
    ID_ALL, ID_NONE, ID_NULL, RESERVED_IDS, child_id, cmp_length_then_value, get_parent_id,
    is_ancestor, is_reserved, resolve_name_by_degree, validate_name,
};
pub use options::{AutolabelScope, PathOptions, parse_path_kind, torrent_update};
pub use shared_limit::{MIN_SHARED_RATE, RateSample, TorrentLimits, redistribute};
pub use state::{ChangeTimestamps, CoreState, LabelSummary, LabelUpdate};
pub use tree::{IndexEntry, LabelIndex};
