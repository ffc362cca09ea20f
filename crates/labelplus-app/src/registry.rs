//! Static table of named operations.
//!
//! Arguments arrive as a JSON object (or `null` for operations without
//! arguments) and results leave as JSON. Names match the host's RPC surface.

use std::collections::BTreeMap;
use std::path::MAIN_SEPARATOR_STR;

use chrono::{DateTime, Utc};
use labelplus_config::{merge_global_options, merge_label_options};
use labelplus_core::{AutolabelScope, parse_path_kind};
use labelplus_torrent_core::TorrentId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::service::LabelPlusService;

/// Operation entry point.
pub type Handler = fn(&LabelPlusService, &Value) -> AppResult<Value>;

/// Every operation the service exposes, by name.
pub const OPERATIONS: &[(&str, Handler)] = &[
    ("is_initialized", is_initialized),
    ("get_daemon_info", get_daemon_info),
    ("get_preferences", get_preferences),
    ("set_preferences", set_preferences),
    ("get_label_defaults", get_label_defaults),
    ("add_label", add_label),
    ("rename_label", rename_label),
    ("move_label", move_label),
    ("remove_label", remove_label),
    ("get_label_options", get_label_options),
    ("set_label_options", set_label_options),
    ("get_parent_path", get_parent_path),
    ("get_path_options", get_path_options),
    ("set_torrent_labels", set_torrent_labels),
    ("get_torrent_label", get_torrent_label),
    ("get_torrent_labels", get_torrent_labels),
    ("filter_by_label", filter_by_label),
    ("get_label_bandwidth_usage", get_label_bandwidth_usage),
    ("get_label_updates", get_label_updates),
];

/// Handler registered under `name`.
#[must_use]
pub fn lookup(name: &str) -> Option<Handler> {
    OPERATIONS
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, handler)| *handler)
}

impl LabelPlusService {
    /// Dispatch a named operation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::UnknownOperation`] for unregistered names, otherwise
    /// whatever the operation returns.
    pub fn call(&self, name: &str, args: &Value) -> AppResult<Value> {
        let handler = lookup(name).ok_or_else(|| AppError::UnknownOperation {
            name: name.to_string(),
        })?;
        debug!(operation = name, "dispatching operation");
        handler(self, args)
    }
}

fn decode<T: DeserializeOwned>(operation: &'static str, args: &Value) -> AppResult<T> {
    let decoded = if args.is_null() {
        T::deserialize(&Value::Object(Map::new()))
    } else {
        T::deserialize(args)
    };
    decoded.map_err(|source| AppError::InvalidArguments { operation, source })
}

fn encode<T: Serialize>(operation: &'static str, value: &T) -> AppResult<Value> {
    serde_json::to_value(value).map_err(|source| AppError::Encode { operation, source })
}

#[derive(Deserialize)]
struct LabelArgs {
    label_id: String,
}

#[derive(Deserialize)]
struct AddLabelArgs {
    parent_id: String,
    name: String,
}

#[derive(Deserialize)]
struct RenameLabelArgs {
    label_id: String,
    name: String,
}

#[derive(Deserialize)]
struct MoveLabelArgs {
    label_id: String,
    dest_parent_id: String,
    dest_name: String,
}

#[derive(Deserialize)]
struct PreferencesArgs {
    #[serde(default)]
    options: Value,
    #[serde(default)]
    label: Value,
}

#[derive(Deserialize)]
struct SetLabelOptionsArgs {
    label_id: String,
    options: Value,
    #[serde(default)]
    apply_to: Option<AutolabelScope>,
}

#[derive(Deserialize)]
struct ParentPathArgs {
    label_id: String,
    path_kind: String,
}

#[derive(Deserialize)]
struct SetTorrentLabelsArgs {
    label_id: String,
    torrent_ids: Vec<TorrentId>,
}

#[derive(Deserialize)]
struct TorrentArgs {
    torrent_id: TorrentId,
}

#[derive(Deserialize)]
struct TorrentsArgs {
    torrent_ids: Vec<TorrentId>,
}

#[derive(Deserialize)]
struct FilterArgs {
    torrent_ids: Vec<TorrentId>,
    label_ids: Vec<String>,
}

#[derive(Deserialize)]
struct BandwidthArgs {
    label_id: String,
    #[serde(default)]
    include_descendants: bool,
}

#[derive(Deserialize)]
struct UpdatesArgs {
    #[serde(default)]
    since: Option<DateTime<Utc>>,
}

fn is_initialized(service: &LabelPlusService, _args: &Value) -> AppResult<Value> {
    Ok(Value::Bool(service.is_initialized()))
}

fn get_daemon_info(_service: &LabelPlusService, _args: &Value) -> AppResult<Value> {
    Ok(json!({ "path_separator": MAIN_SEPARATOR_STR }))
}

fn get_preferences(service: &LabelPlusService, _args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_preferences";
    let prefs = service.with_state(OPERATION, |state| Ok(state.preferences().clone()))?;
    encode(OPERATION, &prefs)
}

fn set_preferences(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "set_preferences";
    let args: PreferencesArgs = decode(OPERATION, args)?;
    service.try_with_state(OPERATION, |state| {
        let mut prefs = state.preferences().clone();
        if !args.options.is_null() {
            prefs.options = merge_global_options(&prefs.options, &args.options)
                .map_err(|err| AppError::config(OPERATION, err))?;
        }
        if !args.label.is_null() {
            prefs.label = merge_label_options(&prefs.label, &args.label)
                .map_err(|err| AppError::config(OPERATION, err))?;
        }
        state.set_preferences(prefs);
        Ok(())
    })?;
    service.save()?;
    Ok(Value::Null)
}

fn get_label_defaults(service: &LabelPlusService, _args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_label_defaults";
    let defaults = service.with_state(OPERATION, |state| Ok(state.label_defaults().clone()))?;
    encode(OPERATION, &defaults)
}

fn add_label(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "add_label";
    let args: AddLabelArgs = decode(OPERATION, args)?;
    let id = service.with_state(OPERATION, |state| state.add_label(&args.parent_id, &args.name))?;
    Ok(Value::String(id))
}

fn rename_label(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "rename_label";
    let args: RenameLabelArgs = decode(OPERATION, args)?;
    service.with_state(OPERATION, |state| state.rename_label(&args.label_id, &args.name))?;
    Ok(Value::Null)
}

fn move_label(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "move_label";
    let args: MoveLabelArgs = decode(OPERATION, args)?;
    let id = service.with_state(OPERATION, |state| {
        state.move_label(&args.label_id, &args.dest_parent_id, &args.dest_name)
    })?;
    Ok(Value::String(id))
}

fn remove_label(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "remove_label";
    let args: LabelArgs = decode(OPERATION, args)?;
    service.with_state(OPERATION, |state| state.remove_label(&args.label_id))?;
    Ok(Value::Null)
}

fn get_label_options(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_label_options";
    let args: LabelArgs = decode(OPERATION, args)?;
    let options = service.with_state(OPERATION, |state| {
        state.label_options(&args.label_id).cloned()
    })?;
    encode(OPERATION, &options)
}

fn set_label_options(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "set_label_options";
    let args: SetLabelOptionsArgs = decode(OPERATION, args)?;
    service.try_with_state(OPERATION, |state| {
        let current = state
            .label_options(&args.label_id)
            .map_err(|err| AppError::core(OPERATION, err))?;
        let options = merge_label_options(current, &args.options)
            .map_err(|err| AppError::config(OPERATION, err))?;
        state
            .set_label_options(&args.label_id, options, args.apply_to)
            .map_err(|err| AppError::core(OPERATION, err))
    })?;
    Ok(Value::Null)
}

fn get_parent_path(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_parent_path";
    let args: ParentPathArgs = decode(OPERATION, args)?;
    let path = service.with_state(OPERATION, |state| {
        state.parent_path(&args.label_id, parse_path_kind(&args.path_kind)?)
    })?;
    Ok(Value::String(path))
}

fn get_path_options(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_path_options";
    let args: LabelArgs = decode(OPERATION, args)?;
    let paths = service.with_state(OPERATION, |state| state.path_options(&args.label_id))?;
    encode(OPERATION, &paths)
}

fn set_torrent_labels(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "set_torrent_labels";
    let args: SetTorrentLabelsArgs = decode(OPERATION, args)?;
    service.with_state(OPERATION, |state| {
        state.set_torrent_labels(&args.label_id, &args.torrent_ids)
    })?;
    Ok(Value::Null)
}

fn get_torrent_label(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_torrent_label";
    let args: TorrentArgs = decode(OPERATION, args)?;
    let label_id =
        service.with_state(OPERATION, |state| Ok(state.torrent_label(&args.torrent_id)))?;
    Ok(Value::String(label_id))
}

fn get_torrent_labels(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_torrent_labels";
    let args: TorrentsArgs = decode(OPERATION, args)?;
    let labels: BTreeMap<TorrentId, (String, String)> =
        service.with_state(OPERATION, |state| Ok(state.torrent_labels(&args.torrent_ids)))?;
    encode(OPERATION, &labels)
}

fn filter_by_label(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "filter_by_label";
    let args: FilterArgs = decode(OPERATION, args)?;
    let matched = service.with_state(OPERATION, |state| {
        Ok(state.filter_by_label(&args.torrent_ids, &args.label_ids))
    })?;
    encode(OPERATION, &matched)
}

fn get_label_bandwidth_usage(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_label_bandwidth_usage";
    let args: BandwidthArgs = decode(OPERATION, args)?;
    let usage = service.with_state(OPERATION, |state| {
        state.label_bandwidth_usage(&args.label_id, args.include_descendants)
    })?;
    encode(OPERATION, &usage)
}

fn get_label_updates(service: &LabelPlusService, args: &Value) -> AppResult<Value> {
    const OPERATION: &str = "get_label_updates";
    let args: UpdatesArgs = decode(OPERATION, args)?;
    let update = service.with_state(OPERATION, |state| Ok(state.label_updates(args.since)))?;
    encode(OPERATION, &update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_names_are_unique() {
        let mut names: Vec<&str> = OPERATIONS.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OPERATIONS.len());
        assert!(lookup("add_label").is_some());
        assert!(lookup("enable").is_none());
    }

    #[test]
    fn null_arguments_decode_as_empty_object() {
        let args: UpdatesArgs = decode("get_label_updates", &Value::Null).expect("decode");
        assert!(args.since.is_none());
        let err = decode::<LabelArgs>("remove_label", &json!({ "label_id": 7 }))
            .err()
            .expect("wrong type rejected");
        assert!(matches!(err, AppError::InvalidArguments { operation: "remove_label", .. }));
    }
}
