#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Persisted configuration for the label engine.
//!
//! Layout: `model.rs` (typed document, label options, rules), `defaults.rs`
//! (constants), `validate.rs` (normalization and merge helpers), `store.rs`
//! (`ConfigPersistence` with JSON file and in-memory backends).

pub mod defaults;
pub mod error;
pub mod model;
pub mod store;
pub mod validate;

pub use defaults::{
    CONFIG_FILE_NAME, CONFIG_SAVE_INTERVAL_SECS, CONFIG_VERSION,
    DEFAULT_SHARED_LIMIT_INTERVAL_SECS, MIN_SHARED_LIMIT_INTERVAL_SECS,
};
pub use error::{ConfigError, ConfigResult};
pub use model::{
    CaseSensitivity, ConfigDocument, GlobalOptions, LabelOptions, LabelRecord, PathKind, PathMode,
    Preferences, Rule, RuleOperator, RuleProperty,
};
pub use store::{ConfigPersistence, JsonFileStore, MemoryStore};
pub use validate::{
    host_default_path, merge_global_options, merge_label_options, normalize_global_options,
    normalize_label_options, rule_is_usable,
};
