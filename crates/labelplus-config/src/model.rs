//! Typed configuration document, label options and autolabel rules.
//!
//! # Design
//! - Pure data carriers; normalization lives in `validate.rs`.
//! - `#[serde(default)]` fills missing keys so partially written documents load.
//! - Rule lists deserialize leniently: malformed entries are dropped, not fatal.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use labelplus_torrent_core::TorrentId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::defaults::{CONFIG_VERSION, DEFAULT_SHARED_LIMIT_INTERVAL_SECS};
use crate::error::ConfigError;

/// How a label derives a path from its parent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMode {
    /// Use the parent's resolved path unchanged.
    Parent,
    /// Join the parent's resolved path with the label name.
    Subfolder,
    /// Use the label's own explicit path. Unknown modes read as `folder`.
    #[default]
    #[serde(other)]
    Folder,
}

/// The two path settings a label manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    /// Destination for completed data.
    MoveCompleted,
    /// Save location for downloading data.
    DownloadLocation,
}

impl PathKind {
    /// Every path kind, in cascade order.
    pub const ALL: [Self; 2] = [Self::MoveCompleted, Self::DownloadLocation];

    /// Render the kind as its wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MoveCompleted => "move_completed",
            Self::DownloadLocation => "download_location",
        }
    }
}

impl Display for PathKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for PathKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "move_completed" => Ok(Self::MoveCompleted),
            "download_location" => Ok(Self::DownloadLocation),
            other => Err(ConfigError::InvalidField {
                field: "path_kind",
                value: Some(other.to_string()),
                reason: "unknown path kind",
            }),
        }
    }
}

/// Torrent property a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleProperty {
    /// Torrent display name.
    Name,
    /// Tracker announce URLs.
    Tracker,
    /// Paths of files in the payload.
    Files,
    /// Label assigned by the host's legacy label feature.
    Label,
}

/// Comparison applied by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleOperator {
    /// Substring match.
    #[serde(rename = "contains")]
    Contains,
    /// Negated substring match.
    #[serde(rename = "doesn't contain")]
    NotContains,
    /// Whole-value match.
    #[serde(rename = "is")]
    Is,
    /// Negated whole-value match.
    #[serde(rename = "is not")]
    IsNot,
    /// Prefix match.
    #[serde(rename = "starts with")]
    StartsWith,
    /// Suffix match.
    #[serde(rename = "ends with")]
    EndsWith,
    /// Raw regular expression search.
    #[serde(rename = "matches regex")]
    MatchesRegex,
    /// Every whitespace-separated word is contained.
    #[serde(rename = "contains words")]
    ContainsWords,
}

/// Case handling for a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseSensitivity {
    /// Compare exactly.
    #[serde(rename = "match case")]
    MatchCase,
    /// Compare case-insensitively.
    #[serde(rename = "ignore case")]
    IgnoreCase,
}

/// Autolabel rule, persisted as `[property, operator, case, query]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RuleRepr", into = "RuleRepr")]
pub struct Rule {
    /// Property inspected.
    pub property: RuleProperty,
    /// Comparison applied.
    pub operator: RuleOperator,
    /// Case handling.
    pub case: CaseSensitivity,
    /// User supplied query text.
    pub query: String,
}

impl Rule {
    /// Build a rule from its parts.
    #[must_use]
    pub fn new(
        property: RuleProperty,
        operator: RuleOperator,
        case: CaseSensitivity,
        query: impl Into<String>,
    ) -> Self {
        Self {
            property,
            operator,
            case,
            query: query.into(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
struct RuleRepr(RuleProperty, RuleOperator, CaseSensitivity, String);

impl From<RuleRepr> for Rule {
    fn from(RuleRepr(property, operator, case, query): RuleRepr) -> Self {
        Self {
            property,
            operator,
            case,
            query,
        }
    }
}

impl From<Rule> for RuleRepr {
    fn from(rule: Rule) -> Self {
        Self(rule.property, rule.operator, rule.case, rule.query)
    }
}

fn deserialize_rules<'de, D>(deserializer: D) -> Result<Vec<Rule>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| serde_json::from_value::<Rule>(value).ok())
        .collect())
}

/// Per-label option set. Each settings group only takes effect when its flag is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LabelOptions {
    /// Enables the download settings group.
    pub download_settings: bool,
    /// Relocate downloading data to `download_location_path`.
    pub download_location: bool,
    /// Resolved save location for the label.
    pub download_location_path: String,
    /// How the save location derives from the parent.
    pub download_location_mode: PathMode,
    /// Move data once complete.
    pub move_completed: bool,
    /// Resolved move-on-complete destination.
    pub move_completed_path: String,
    /// How the move destination derives from the parent.
    pub move_completed_mode: PathMode,
    /// Prioritize first and last pieces.
    pub prioritize_first_last: bool,

    /// Enables the bandwidth settings group.
    pub bandwidth_settings: bool,
    /// Download cap in KiB/s (negative means unlimited).
    pub max_download_speed: f64,
    /// Upload cap in KiB/s (negative means unlimited).
    pub max_upload_speed: f64,
    /// Peer connection cap.
    pub max_connections: i32,
    /// Upload slot cap.
    pub max_upload_slots: i32,
    /// Treat the speed caps as a pool shared by the label's torrents.
    pub shared_limit: bool,

    /// Enables the queue settings group.
    pub queue_settings: bool,
    /// Let the host queue manage the torrents.
    pub auto_managed: bool,
    /// Stop seeding at `stop_ratio`.
    pub stop_at_ratio: bool,
    /// Share ratio threshold.
    pub stop_ratio: f64,
    /// Remove instead of pausing at the ratio.
    pub remove_at_ratio: bool,

    /// Enables autolabel matching for new torrents.
    pub autolabel_settings: bool,
    /// Require every rule to match instead of any.
    pub autolabel_match_all: bool,
    /// Autolabel rules.
    #[serde(deserialize_with = "deserialize_rules")]
    pub autolabel_rules: Vec<Rule>,
}

impl Default for LabelOptions {
    fn default() -> Self {
        Self {
            download_settings: false,
            download_location: false,
            download_location_path: String::new(),
            download_location_mode: PathMode::Folder,
            move_completed: false,
            move_completed_path: String::new(),
            move_completed_mode: PathMode::Folder,
            prioritize_first_last: false,
            bandwidth_settings: false,
            max_download_speed: -1.0,
            max_upload_speed: -1.0,
            max_connections: -1,
            max_upload_slots: -1,
            shared_limit: false,
            queue_settings: false,
            auto_managed: false,
            stop_at_ratio: false,
            stop_ratio: 1.0,
            remove_at_ratio: false,
            autolabel_settings: false,
            autolabel_match_all: false,
            autolabel_rules: Vec::new(),
        }
    }
}

impl LabelOptions {
    /// Stored path for `kind`.
    #[must_use]
    pub fn path(&self, kind: PathKind) -> &str {
        match kind {
            PathKind::MoveCompleted => &self.move_completed_path,
            PathKind::DownloadLocation => &self.download_location_path,
        }
    }

    /// Replace the stored path for `kind`.
    pub fn set_path(&mut self, kind: PathKind, path: String) {
        match kind {
            PathKind::MoveCompleted => self.move_completed_path = path,
            PathKind::DownloadLocation => self.download_location_path = path,
        }
    }

    /// Derivation mode for `kind`.
    #[must_use]
    pub const fn mode(&self, kind: PathKind) -> PathMode {
        match kind {
            PathKind::MoveCompleted => self.move_completed_mode,
            PathKind::DownloadLocation => self.download_location_mode,
        }
    }

    /// Replace the derivation mode for `kind`.
    pub const fn set_mode(&mut self, kind: PathKind, mode: PathMode) {
        match kind {
            PathKind::MoveCompleted => self.move_completed_mode = mode,
            PathKind::DownloadLocation => self.download_location_mode = mode,
        }
    }

    /// Whether the toggle for `kind` is on (ignores the group flag).
    #[must_use]
    pub const fn path_enabled(&self, kind: PathKind) -> bool {
        match kind {
            PathKind::MoveCompleted => self.move_completed,
            PathKind::DownloadLocation => self.download_location,
        }
    }

    /// Whether the label participates in shared-limit redistribution.
    #[must_use]
    pub const fn uses_shared_limit(&self) -> bool {
        self.bandwidth_settings && self.shared_limit
    }
}

/// Plugin-wide behavior switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    /// Move torrent data whenever a label change alters its destination.
    pub move_on_changes: bool,
    /// Seconds between shared-limit redistribution cycles.
    pub shared_limit_interval: u64,
    /// Run a move pass when a labeled torrent finishes (including rechecks).
    pub move_after_recheck: bool,
    /// Restore host defaults on torrents that lose their label.
    pub reset_on_label_unset: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            move_on_changes: false,
            shared_limit_interval: DEFAULT_SHARED_LIMIT_INTERVAL_SECS,
            move_after_recheck: false,
            reset_on_label_unset: true,
        }
    }
}

/// User preferences: global switches plus the defaults applied to new labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Plugin-wide switches.
    pub options: GlobalOptions,
    /// Option set copied into each new label.
    pub label: LabelOptions,
}

/// Persisted label: display name and options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelRecord {
    /// Name of this hierarchy level (no separators).
    pub name: String,
    /// Option set.
    pub options: LabelOptions,
}

/// Root persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDocument {
    /// Document format version.
    pub version: u32,
    /// User preferences.
    pub prefs: Preferences,
    /// Labels keyed by hierarchical id.
    pub labels: BTreeMap<String, LabelRecord>,
    /// Torrent to label id.
    pub mappings: BTreeMap<TorrentId, String>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            prefs: Preferences::default(),
            labels: BTreeMap::new(),
            mappings: BTreeMap::new(),
        }
    }
}
