//! Normalization and merge helpers for label and global options.
//!
//! # Design
//! - Normalization never fails: bad values are replaced or dropped.
//! - Merges overlay only keys the target type knows; unknown keys are ignored.

use labelplus_torrent_core::HostDefaults;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::defaults::MIN_SHARED_LIMIT_INTERVAL_SECS;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{GlobalOptions, LabelOptions, PathKind, PathMode, Rule, RuleProperty};

/// Whether a rule can be evaluated; only `Label` rules may have an empty query.
#[must_use]
pub fn rule_is_usable(rule: &Rule) -> bool {
    rule.property == RuleProperty::Label || !rule.query.is_empty()
}

/// Host default path for `kind`.
#[must_use]
pub fn host_default_path(defaults: &HostDefaults, kind: PathKind) -> &str {
    match kind {
        PathKind::MoveCompleted => defaults.move_path(),
        PathKind::DownloadLocation => defaults.save_path(),
    }
}

/// Fill blank paths with host defaults and drop unusable rules.
///
/// A blank path forces `folder` mode so the label stops deriving from its parent.
pub fn normalize_label_options(options: &mut LabelOptions, defaults: &HostDefaults) {
    for kind in PathKind::ALL {
        if options.path(kind).trim().is_empty() {
            options.set_mode(kind, PathMode::Folder);
            options.set_path(kind, host_default_path(defaults, kind).to_string());
        }
    }
    options.autolabel_rules.retain(rule_is_usable);
}

/// Clamp global options into their valid ranges.
pub fn normalize_global_options(options: &mut GlobalOptions) {
    options.shared_limit_interval = options
        .shared_limit_interval
        .max(MIN_SHARED_LIMIT_INTERVAL_SECS);
}

/// Overlay a partial JSON object onto the current label options.
///
/// # Errors
///
/// Returns an error when `patch` is not an object or a known key has the wrong type.
pub fn merge_label_options(current: &LabelOptions, patch: &Value) -> ConfigResult<LabelOptions> {
    merge_known_keys(current, patch, "label_options")
}

/// Overlay a partial JSON object onto the current global options.
///
/// # Errors
///
/// Returns an error when `patch` is not an object or a known key has the wrong type.
pub fn merge_global_options(current: &GlobalOptions, patch: &Value) -> ConfigResult<GlobalOptions> {
    let mut merged: GlobalOptions = merge_known_keys(current, patch, "global_options")?;
    normalize_global_options(&mut merged);
    Ok(merged)
}

fn merge_known_keys<T>(current: &T, patch: &Value, field: &'static str) -> ConfigResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let Value::Object(updates) = patch else {
        return Err(ConfigError::InvalidField {
            field,
            value: Some(patch.to_string()),
            reason: "must be an object",
        });
    };

    let mut base = match serde_json::to_value(current) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(source) => return Err(ConfigError::serialization("options.encode", source)),
    };
    for (key, value) in updates {
        if let Some(slot) = base.get_mut(key) {
            *slot = value.clone();
        } else {
            tracing::debug!(field, key = %key, "ignoring unknown option key");
        }
    }

    serde_json::from_value(Value::Object(base)).map_err(|_| ConfigError::InvalidField {
        field,
        value: Some(patch.to_string()),
        reason: "value has the wrong type",
    })
}
