//! The `CoreState` aggregate: labels, mappings, indexes and change tracking.
//!
//! # Design
//! - One owner for every piece of label state; callers get clones.
//! - Loading prunes and normalizes before any operation can observe the data.
//! - `mapping[t] == L` holds exactly when `t` is listed under `L` in the index.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use labelplus_config::{
    ConfigDocument, LabelOptions, LabelRecord, Preferences, normalize_global_options,
    normalize_label_options,
};
use labelplus_telemetry::Metrics;
use labelplus_torrent_core::{TorrentHost, TorrentId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::autolabel::{TorrentProperties, find_match};
use crate::error::{CoreError, CoreResult};
use crate::label::{ID_ALL, ID_NONE, ID_NULL, get_parent_id, is_reserved};
use crate::options::AutolabelScope;
use crate::tree::LabelIndex;

/// When labels and mappings last changed and when the document was last saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeTimestamps {
    /// Last label create, rename, move, remove or option change.
    pub labels_changed: DateTime<Utc>,
    /// Last torrent mapping change.
    pub mappings_changed: DateTime<Utc>,
    /// Last successful save.
    pub last_saved: DateTime<Utc>,
}

impl Default for ChangeTimestamps {
    fn default() -> Self {
        Self {
            labels_changed: DateTime::<Utc>::MIN_UTC,
            mappings_changed: DateTime::<Utc>::MIN_UTC,
            last_saved: DateTime::<Utc>::MIN_UTC,
        }
    }
}

impl ChangeTimestamps {
    /// Latest of the two change stamps.
    #[must_use]
    pub fn last_changed(&self) -> DateTime<Utc> {
        self.labels_changed.max(self.mappings_changed)
    }

    /// Whether anything changed since the last save.
    #[must_use]
    pub fn needs_save(&self) -> bool {
        self.last_saved <= self.last_changed()
    }
}

/// One row of the label snapshot handed to pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSummary {
    /// Name of this hierarchy level.
    pub name: String,
    /// Torrents mapped to the label.
    pub count: usize,
    /// `/`-joined name from the root.
    pub full_name: String,
}

/// Full label snapshot plus the token to pass on the next poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelUpdate {
    /// Time the snapshot was taken.
    pub token: DateTime<Utc>,
    /// Summaries keyed by label id, including `All` and `None`.
    pub data: BTreeMap<String, LabelSummary>,
}

/// Label hierarchy, torrent mappings and derived indexes.
pub struct CoreState {
    pub(crate) host: Arc<dyn TorrentHost>,
    pub(crate) metrics: Metrics,
    pub(crate) prefs: Preferences,
    pub(crate) labels: BTreeMap<String, LabelRecord>,
    pub(crate) mappings: BTreeMap<TorrentId, String>,
    pub(crate) index: LabelIndex,
    pub(crate) shared_limit_index: BTreeSet<String>,
    pub(crate) timestamps: ChangeTimestamps,
}

impl CoreState {
    /// Build state from a persisted document, pruning and normalizing it
    /// against the torrents the host currently knows.
    #[must_use]
    pub fn new(document: ConfigDocument, host: Arc<dyn TorrentHost>, metrics: Metrics) -> Self {
        let ConfigDocument {
            prefs,
            mut labels,
            mappings,
            ..
        } = document;
        labels.retain(|id, _| !is_reserved(id));

        let mut state = Self {
            host,
            metrics,
            prefs,
            index: LabelIndex::build(labels.keys(), mappings.iter()),
            labels,
            mappings,
            shared_limit_index: BTreeSet::new(),
            timestamps: ChangeTimestamps::default(),
        };
        state.remove_orphans();
        state.normalize_options();
        state.normalize_mappings();
        for id in state.index.children(ID_NULL).to_vec() {
            state.pin_root_modes(&id);
        }
        state.index.clear_full_names();
        state.shared_limit_index = state
            .labels
            .iter()
            .filter(|(_, record)| record.options.uses_shared_limit())
            .map(|(id, _)| id.clone())
            .collect();
        info!(
            labels = state.labels.len(),
            mappings = state.mappings.len(),
            shared_limit_labels = state.shared_limit_index.len(),
            "label state loaded"
        );
        state
    }

    fn remove_orphans(&mut self) {
        let orphans: Vec<String> = self
            .labels
            .keys()
            .filter(|id| {
                let parent = get_parent_id(id);
                parent != ID_NULL && !self.labels.contains_key(parent)
            })
            .cloned()
            .collect();
        for id in orphans {
            if self.labels.contains_key(&id) {
                debug!(label_id = %id, "pruning orphaned label");
                self.remove_subtree(&id);
            }
        }
    }

    fn normalize_options(&mut self) {
        let defaults = self.host.defaults();
        normalize_global_options(&mut self.prefs.options);
        normalize_label_options(&mut self.prefs.label, &defaults);
        for record in self.labels.values_mut() {
            normalize_label_options(&mut record.options, &defaults);
        }
    }

    fn normalize_mappings(&mut self) {
        let entries: Vec<(TorrentId, String)> = self
            .mappings
            .iter()
            .map(|(torrent_id, label_id)| (torrent_id.clone(), label_id.clone()))
            .collect();
        for (torrent_id, label_id) in entries {
            if self.host.contains(&torrent_id) {
                if self.labels.contains_key(&label_id) {
                    self.apply_torrent_options(&torrent_id);
                    continue;
                }
                if self.prefs.options.reset_on_label_unset {
                    self.reset_torrent_options(&torrent_id);
                }
            }
            debug!(torrent_id = %torrent_id, label_id = %label_id, "dropping stale mapping");
            self.remove_torrent_mapping(&torrent_id);
        }
    }

    pub(crate) fn mark_labels_changed(&mut self) {
        self.timestamps.labels_changed = Utc::now();
    }

    pub(crate) fn mark_mappings_changed(&mut self) {
        self.timestamps.mappings_changed = Utc::now();
    }

    /// Change stamps driving persistence and polling.
    #[must_use]
    pub const fn timestamps(&self) -> &ChangeTimestamps {
        &self.timestamps
    }

    /// Record a successful save at `at`.
    pub const fn mark_saved(&mut self, at: DateTime<Utc>) {
        self.timestamps.last_saved = at;
    }

    /// Metrics handle shared with the owning service.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current preferences.
    #[must_use]
    pub const fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    /// Option set copied into new labels.
    #[must_use]
    pub const fn label_defaults(&self) -> &LabelOptions {
        &self.prefs.label
    }

    /// Normalize and replace the preferences.
    pub fn set_preferences(&mut self, mut prefs: Preferences) {
        normalize_global_options(&mut prefs.options);
        normalize_label_options(&mut prefs.label, &self.host.defaults());
        self.prefs = prefs;
        debug!("preferences updated");
    }

    /// Whether `id` names a label.
    #[must_use]
    pub fn contains_label(&self, id: &str) -> bool {
        self.labels.contains_key(id)
    }

    /// Options of a label.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown.
    pub fn label_options(&self, id: &str) -> CoreResult<&LabelOptions> {
        self.labels
            .get(id)
            .map(|record| &record.options)
            .ok_or_else(|| CoreError::invalid_label(id))
    }

    /// Name of a label's own hierarchy level.
    #[must_use]
    pub fn label_name(&self, id: &str) -> Option<&str> {
        self.labels.get(id).map(|record| record.name.as_str())
    }

    /// Number of labels.
    #[must_use]
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Torrent to label id.
    #[must_use]
    pub const fn mappings(&self) -> &BTreeMap<TorrentId, String> {
        &self.mappings
    }

    /// Torrents listed under a label in the index.
    #[must_use]
    pub fn label_torrents(&self, id: &str) -> &[TorrentId] {
        self.index.torrents(id)
    }

    /// Direct children of a label (or of the root).
    #[must_use]
    pub fn children(&self, id: &str) -> &[String] {
        self.index.children(id)
    }

    /// Labels participating in shared-limit redistribution.
    #[must_use]
    pub const fn shared_limit_labels(&self) -> &BTreeSet<String> {
        &self.shared_limit_index
    }

    /// Snapshot suitable for persistence.
    #[must_use]
    pub fn document(&self) -> ConfigDocument {
        ConfigDocument {
            prefs: self.prefs.clone(),
            labels: self.labels.clone(),
            mappings: self.mappings.clone(),
            ..ConfigDocument::default()
        }
    }

    pub(crate) fn remove_torrent_mapping(&mut self, torrent_id: &TorrentId) -> Option<String> {
        let label_id = self.mappings.remove(torrent_id)?;
        self.index.detach_torrent(&label_id, torrent_id);
        Some(label_id)
    }

    /// Map a torrent to `label_id` (or unmap it with [`ID_NONE`]) and push options.
    pub(crate) fn set_torrent_label(&mut self, torrent_id: &TorrentId, label_id: &str) {
        self.remove_torrent_mapping(torrent_id);
        if label_id == ID_NONE {
            if self.prefs.options.reset_on_label_unset {
                self.reset_torrent_options(torrent_id);
            }
        } else {
            self.mappings
                .insert(torrent_id.clone(), label_id.to_string());
            self.index.attach_torrent(label_id, torrent_id);
            self.apply_torrent_options(torrent_id);
        }
    }

    /// Assign every host-known torrent in `torrent_ids` to `label_id` (or [`ID_NONE`]).
    ///
    /// # Errors
    ///
    /// Fails when `label_id` is neither a label nor [`ID_NONE`].
    pub fn set_torrent_labels(
        &mut self,
        label_id: &str,
        torrent_ids: &[TorrentId],
    ) -> CoreResult<()> {
        if label_id != ID_NONE && !self.labels.contains_key(label_id) {
            return Err(CoreError::invalid_label(label_id));
        }
        let mut seen = HashSet::new();
        let batch: Vec<TorrentId> = torrent_ids
            .iter()
            .filter(|id| seen.insert((*id).clone()) && self.host.contains(id))
            .cloned()
            .collect();
        if batch.is_empty() {
            return Ok(());
        }
        for torrent_id in &batch {
            self.set_torrent_label(torrent_id, label_id);
        }
        if self.prefs.options.move_on_changes {
            self.move_torrents(&batch);
        }
        self.mark_mappings_changed();
        info!(label_id, torrents = batch.len(), "torrent labels set");
        Ok(())
    }

    /// Label id of a torrent, [`ID_NONE`] when unmapped.
    #[must_use]
    pub fn torrent_label(&self, torrent_id: &TorrentId) -> String {
        self.mappings
            .get(torrent_id)
            .cloned()
            .unwrap_or_else(|| ID_NONE.to_string())
    }

    /// Label id and full name of every host-known torrent in `torrent_ids`.
    pub fn torrent_labels(
        &mut self,
        torrent_ids: &[TorrentId],
    ) -> BTreeMap<TorrentId, (String, String)> {
        let mut out = BTreeMap::new();
        for torrent_id in torrent_ids {
            if out.contains_key(torrent_id) || !self.host.contains(torrent_id) {
                continue;
            }
            let label_id = self.torrent_label(torrent_id);
            let full_name = if label_id == ID_NONE {
                String::new()
            } else {
                self.full_name(&label_id)
            };
            out.insert(torrent_id.clone(), (label_id, full_name));
        }
        out
    }

    /// Torrents from `torrent_ids` whose label (or [`ID_NONE`]) is in `label_ids`.
    #[must_use]
    pub fn filter_by_label(
        &self,
        torrent_ids: &[TorrentId],
        label_ids: &[String],
    ) -> Vec<TorrentId> {
        torrent_ids
            .iter()
            .filter(|id| {
                let label_id = self.torrent_label(id);
                label_ids.contains(&label_id)
            })
            .cloned()
            .collect()
    }

    /// Summed payload rates (bytes/s) of active torrents under a label.
    ///
    /// [`ID_NONE`] measures unlabeled torrents.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown.
    pub fn label_bandwidth_usage(
        &self,
        label_id: &str,
        include_descendants: bool,
    ) -> CoreResult<(f64, f64)> {
        let torrents: Vec<TorrentId> = if label_id == ID_NONE {
            self.host
                .torrent_ids()
                .into_iter()
                .filter(|id| !self.mappings.contains_key(id))
                .collect()
        } else {
            if !self.labels.contains_key(label_id) {
                return Err(CoreError::invalid_label(label_id));
            }
            let mut torrents = self.index.torrents(label_id).to_vec();
            if include_descendants {
                for id in self.descendent_labels(label_id, -1) {
                    torrents.extend_from_slice(self.index.torrents(&id));
                }
            }
            torrents
        };

        Ok(torrents
            .iter()
            .filter_map(|id| self.host.status(id))
            .filter(|status| status.state.is_active())
            .fold((0.0, 0.0), |(down, up), status| {
                (
                    down + status.download_payload_rate,
                    up + status.upload_payload_rate,
                )
            }))
    }

    /// Summary rows for every label plus `All` and `None`.
    pub fn labels_data(&mut self) -> BTreeMap<String, LabelSummary> {
        let total = self.host.torrent_ids().len();
        let mut labeled = 0;
        let mut data = BTreeMap::new();
        for id in self.sorted_labels() {
            let count = self.index.torrents(&id).len();
            labeled += count;
            let summary = LabelSummary {
                name: self.label_name(&id).unwrap_or_default().to_string(),
                count,
                full_name: self.full_name(&id),
            };
            data.insert(id, summary);
        }
        for (id, count) in [(ID_ALL, total), (ID_NONE, total.saturating_sub(labeled))] {
            data.insert(
                id.to_string(),
                LabelSummary {
                    name: id.to_string(),
                    count,
                    full_name: id.to_string(),
                },
            );
        }
        data
    }

    /// Full snapshot when anything changed at or after `since`, otherwise `None`.
    pub fn label_updates(&mut self, since: Option<DateTime<Utc>>) -> Option<LabelUpdate> {
        let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
        if since > self.timestamps.last_changed() {
            return None;
        }
        Some(LabelUpdate {
            token: Utc::now(),
            data: self.labels_data(),
        })
    }

    fn has_autolabel_match(&self, torrent_id: &TorrentId, label_id: &str) -> bool {
        let (Some(record), Some(status)) = (self.labels.get(label_id), self.host.status(torrent_id))
        else {
            return false;
        };
        find_match(
            &TorrentProperties::from_status(&status),
            &record.options.autolabel_rules,
            record.options.autolabel_match_all,
        )
    }

    /// First label, deepest first, whose enabled rules match the torrent.
    #[must_use]
    pub fn find_autolabel_match(&self, torrent_id: &TorrentId) -> String {
        self.sorted_labels()
            .into_iter()
            .filter(|id| {
                self.labels
                    .get(id)
                    .is_some_and(|record| record.options.autolabel_settings)
            })
            .find(|id| self.has_autolabel_match(torrent_id, id))
            .unwrap_or_else(|| ID_NONE.to_string())
    }

    fn do_autolabel_torrent(&mut self, torrent_id: &TorrentId) -> String {
        let label_id = self.find_autolabel_match(torrent_id);
        if label_id != self.torrent_label(torrent_id) {
            self.set_torrent_label(torrent_id, &label_id);
            if label_id != ID_NONE {
                self.metrics.inc_autolabel_match();
            }
            self.mark_mappings_changed();
            debug!(torrent_id = %torrent_id, label_id = %label_id, "autolabel applied");
        }
        label_id
    }

    /// Re-run one label's rules over host torrents in `scope`.
    pub(crate) fn do_autolabel_torrents(&mut self, label_id: &str, scope: AutolabelScope) {
        let mut changed = 0_usize;
        for torrent_id in self.host.torrent_ids() {
            let eligible = match scope {
                AutolabelScope::All => true,
                AutolabelScope::Unlabeled => !self.mappings.contains_key(&torrent_id),
            };
            if eligible && self.has_autolabel_match(&torrent_id, label_id) {
                self.set_torrent_label(&torrent_id, label_id);
                self.metrics.inc_autolabel_match();
                changed += 1;
            }
        }
        if changed > 0 {
            self.mark_mappings_changed();
            info!(label_id, torrents = changed, ?scope, "autolabel rules re-applied");
        }
    }

    /// React to a newly added torrent; returns the label it was given.
    pub fn on_torrent_added(&mut self, torrent_id: &TorrentId) -> String {
        if !self.host.contains(torrent_id) {
            debug!(torrent_id = %torrent_id, "added torrent unknown to host");
            return ID_NONE.to_string();
        }
        let label_id = self.do_autolabel_torrent(torrent_id);
        if label_id != ID_NONE {
            self.move_torrents(std::slice::from_ref(torrent_id));
        }
        self.mark_mappings_changed();
        label_id
    }

    /// Forget a removed torrent.
    pub fn on_torrent_removed(&mut self, torrent_id: &TorrentId) {
        if let Some(label_id) = self.remove_torrent_mapping(torrent_id) {
            debug!(torrent_id = %torrent_id, label_id = %label_id, "removed torrent unmapped");
        }
        self.mark_mappings_changed();
    }

    /// Move a finished labeled torrent when rechecks should trigger moves.
    pub fn on_torrent_finished(&mut self, torrent_id: &TorrentId) {
        if self.mappings.contains_key(torrent_id) && self.prefs.options.move_after_recheck {
            debug!(torrent_id = %torrent_id, "labeled torrent finished; checking location");
            self.move_torrents(std::slice::from_ref(torrent_id));
        }
    }
}
