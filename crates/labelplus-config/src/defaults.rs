//! Default constants for the persisted document and the service timers.
//!
//! # Design
//! - Keep every tunable in one place so the service and the store agree.

/// Version stamped into every saved document; other versions are rejected.
pub const CONFIG_VERSION: u32 = 2;
/// File name used by the JSON store inside the host's config directory.
pub const CONFIG_FILE_NAME: &str = "labelplus.json";
/// Seconds between periodic saves of a dirty document.
pub const CONFIG_SAVE_INTERVAL_SECS: u64 = 120;
/// Default seconds between shared-limit redistribution cycles.
pub const DEFAULT_SHARED_LIMIT_INTERVAL_SECS: u64 = 5;
/// Lower bound for the redistribution interval.
pub const MIN_SHARED_LIMIT_INTERVAL_SECS: u64 = 1;
