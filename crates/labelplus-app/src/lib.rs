#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! LabelPlus service wiring.
//!
//! Layout: `bootstrap.rs` (dependency wiring, logging), `service.rs`
//! (lifecycle, event pump, shared-limit and persistence loops), `registry.rs`
//! (named operation table), `error.rs` (service errors).

/// Dependency wiring and logging initialisation.
pub mod bootstrap;
/// Service error types.
pub mod error;
/// Named operation table.
pub mod registry;
/// Service lifecycle and background loops.
pub mod service;

pub use bootstrap::{ServiceDeps, init_logging};
pub use error::{AppError, AppResult};
pub use registry::{Handler, OPERATIONS, lookup};
pub use service::{LabelPlusService, RetryPolicy};
