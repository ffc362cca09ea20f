#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Host-agnostic torrent interfaces and DTOs consumed by the label engine.
//!
//! Layout: `model` (status snapshots, settings patches, host defaults),
//! `service` (the `TorrentHost` capability trait), `error` (host errors).

pub mod error;
pub mod model;
pub mod service;

pub use error::{TorrentError, TorrentResult};
pub use model::{HostDefaults, TorrentId, TorrentSettingsUpdate, TorrentState, TorrentStatus};
pub use service::TorrentHost;
