//! Option application, path resolution and storage moves.
//!
//! # Design
//! - `torrent_update` is the pure mapping from label options to host settings.
//! - Host failures while pushing settings are logged and never abort a tree operation.
//! - Paths cascade only into subtrees whose resolved path actually changed.

use std::collections::BTreeMap;
use std::path::Path;

use labelplus_config::{
    LabelOptions, PathKind, PathMode, host_default_path, normalize_label_options,
};
use labelplus_torrent_core::{TorrentId, TorrentSettingsUpdate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::label::{ID_NULL, get_parent_id};
use crate::state::CoreState;

/// Which torrents an autolabel re-run may relabel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutolabelScope {
    /// Every torrent known to the host.
    All,
    /// Only torrents without a label.
    Unlabeled,
}

/// Candidate paths for a label in `parent` and `subfolder` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOptions {
    /// Path inherited from the parent (or host default).
    pub parent: String,
    /// Parent path joined with the label's name.
    pub subfolder: String,
}

/// Settings a label pushes onto its torrents; disabled groups contribute nothing.
#[must_use]
pub fn torrent_update(options: &LabelOptions) -> TorrentSettingsUpdate {
    let mut update = TorrentSettingsUpdate::default();
    if options.download_settings {
        update.move_completed = Some(options.move_completed);
        update.prioritize_first_last = Some(options.prioritize_first_last);
        if options.move_completed {
            update.move_completed_path = Some(options.move_completed_path.clone());
        }
    }
    if options.bandwidth_settings {
        update.max_download_speed = Some(options.max_download_speed);
        update.max_upload_speed = Some(options.max_upload_speed);
        update.max_connections = Some(options.max_connections);
        update.max_upload_slots = Some(options.max_upload_slots);
    }
    if options.queue_settings {
        update.auto_managed = Some(options.auto_managed);
        update.stop_at_ratio = Some(options.stop_at_ratio);
        if options.stop_at_ratio {
            update.stop_ratio = Some(options.stop_ratio);
            update.remove_at_ratio = Some(options.remove_at_ratio);
        }
    }
    update
}

fn join_path(parent: &str, name: &str) -> String {
    Path::new(parent).join(name).to_string_lossy().into_owned()
}

impl CoreState {
    fn push_settings(&self, torrent_id: &TorrentId, update: &TorrentSettingsUpdate) {
        if update.is_empty() {
            return;
        }
        if let Err(error) = self.host.update_settings(torrent_id, update) {
            warn!(torrent_id = %torrent_id, error = %error, "failed to push torrent settings");
        }
    }

    /// Restore host defaults on a torrent.
    pub(crate) fn reset_torrent_options(&self, torrent_id: &TorrentId) {
        self.push_settings(torrent_id, &self.host.defaults().reset_update());
    }

    /// Push the mapped label's options (or host defaults when unmapped).
    pub(crate) fn apply_torrent_options(&self, torrent_id: &TorrentId) {
        match self
            .mappings
            .get(torrent_id)
            .and_then(|label_id| self.labels.get(label_id))
        {
            Some(record) => self.push_settings(torrent_id, &torrent_update(&record.options)),
            None => self.reset_torrent_options(torrent_id),
        }
    }

    fn parent_path_of(&self, id: &str, kind: PathKind) -> String {
        let parent_id = get_parent_id(id);
        match self.labels.get(parent_id) {
            Some(parent) if parent_id != ID_NULL => parent.options.path(kind).to_string(),
            _ => host_default_path(&self.host.defaults(), kind).to_string(),
        }
    }

    /// Path a label would inherit from its parent (host default at the root).
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown.
    pub fn parent_path(&self, id: &str, kind: PathKind) -> CoreResult<String> {
        if !self.labels.contains_key(id) {
            return Err(CoreError::invalid_label(id));
        }
        Ok(self.parent_path_of(id, kind))
    }

    /// Effective path of a label for `kind` given its mode.
    pub(crate) fn resolve_path(&self, id: &str, kind: PathKind) -> String {
        let Some(record) = self.labels.get(id) else {
            return String::new();
        };
        match record.options.mode(kind) {
            PathMode::Folder => record.options.path(kind).to_string(),
            PathMode::Parent => self.parent_path_of(id, kind),
            PathMode::Subfolder => join_path(&self.parent_path_of(id, kind), &record.name),
        }
    }

    /// Parent and subfolder candidates for both path kinds.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown.
    pub fn path_options(&self, id: &str) -> CoreResult<BTreeMap<PathKind, PathOptions>> {
        let name = self
            .label_name(id)
            .ok_or_else(|| CoreError::invalid_label(id))?;
        Ok(PathKind::ALL
            .into_iter()
            .map(|kind| {
                let parent = self.parent_path_of(id, kind);
                let subfolder = join_path(&parent, name);
                (kind, PathOptions { parent, subfolder })
            })
            .collect())
    }

    /// Re-resolve a label's path and cascade into children when it changed.
    pub(crate) fn update_paths(&mut self, id: &str, kind: PathKind) {
        let resolved = self.resolve_path(id, kind);
        let Some(record) = self.labels.get_mut(id) else {
            return;
        };
        if record.options.path(kind) == resolved {
            return;
        }
        record.options.set_path(kind, resolved);
        for child in self.index.children(id).to_vec() {
            self.update_paths(&child, kind);
        }
    }

    /// Push the move-completed destination onto a label's torrents.
    pub(crate) fn apply_move_completed_paths(&self, id: &str, recursive: bool) {
        let Some(record) = self.labels.get(id) else {
            return;
        };
        if record.options.download_settings && record.options.move_completed {
            let update = TorrentSettingsUpdate {
                move_completed_path: Some(record.options.move_completed_path.clone()),
                ..TorrentSettingsUpdate::default()
            };
            for torrent_id in self.index.torrents(id) {
                self.push_settings(torrent_id, &update);
            }
        }
        if recursive {
            for child in self.index.children(id) {
                self.apply_move_completed_paths(child, true);
            }
        }
    }

    /// Move torrents whose storage differs from where their label says they belong.
    pub(crate) fn move_torrents(&self, torrent_ids: &[TorrentId]) {
        let defaults = self.host.defaults();
        for torrent_id in torrent_ids {
            let Some(status) = self.host.status(torrent_id) else {
                continue;
            };
            let label = self
                .mappings
                .get(torrent_id)
                .and_then(|label_id| self.labels.get(label_id));
            let destination = match label {
                None if status.is_finished && defaults.move_completed => {
                    status.move_completed_path.as_str()
                }
                Some(record) if record.options.download_settings => {
                    let options = &record.options;
                    if status.is_finished && options.move_completed {
                        options.move_completed_path.as_str()
                    } else if options.download_location {
                        options.download_location_path.as_str()
                    } else {
                        status.save_path.as_str()
                    }
                }
                _ => status.save_path.as_str(),
            };
            if destination == status.save_path {
                continue;
            }
            match self.host.move_storage(torrent_id, destination) {
                Ok(()) => {
                    self.metrics.inc_storage_move();
                    debug!(torrent_id = %torrent_id, destination, "torrent storage moved");
                }
                Err(error) => {
                    warn!(
                        torrent_id = %torrent_id,
                        destination,
                        error = %error,
                        "failed to move torrent storage"
                    );
                }
            }
        }
    }

    /// Move every torrent of a label, optionally including descendants.
    pub(crate) fn move_torrents_by_label(&self, id: &str, sublabels: bool) {
        let mut torrents = self.index.torrents(id).to_vec();
        if sublabels {
            for child in self.descendent_labels(id, -1) {
                torrents.extend_from_slice(self.index.torrents(&child));
            }
        }
        self.move_torrents(&torrents);
    }

    /// Recompute whether a label takes part in shared-limit redistribution.
    pub(crate) fn refresh_shared_limit(&mut self, id: &str) {
        let shared = self
            .labels
            .get(id)
            .is_some_and(|record| record.options.uses_shared_limit());
        if shared {
            self.shared_limit_index.insert(id.to_string());
        } else {
            self.shared_limit_index.remove(id);
        }
    }

    /// Replace a label's options and propagate the consequences.
    ///
    /// Pushes settings onto the label's torrents, cascades changed paths into
    /// the subtree, moves storage when enabled and re-runs autolabel rules
    /// over `scope` when given.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown.
    pub fn set_label_options(
        &mut self,
        id: &str,
        mut options: LabelOptions,
        scope: Option<AutolabelScope>,
    ) -> CoreResult<()> {
        let old = self
            .labels
            .get(id)
            .map(|record| record.options.clone())
            .ok_or_else(|| CoreError::invalid_label(id))?;

        normalize_label_options(&mut options, &self.host.defaults());
        if let Some(record) = self.labels.get_mut(id) {
            record.options = options;
        }
        self.pin_root_modes(id);
        for kind in PathKind::ALL {
            let resolved = self.resolve_path(id, kind);
            if let Some(record) = self.labels.get_mut(id) {
                record.options.set_path(kind, resolved);
            }
        }
        self.refresh_shared_limit(id);
        for torrent_id in self.index.torrents(id) {
            self.apply_torrent_options(torrent_id);
        }

        let new = self.label_options(id)?.clone();
        let path_toggled_on = new.download_settings
            && if new.download_settings == old.download_settings {
                PathKind::ALL
                    .into_iter()
                    .any(|kind| new.path_enabled(kind) && !old.path_enabled(kind))
            } else {
                new.download_location || new.move_completed
            };
        let changed: Vec<PathKind> = PathKind::ALL
            .into_iter()
            .filter(|kind| new.path(*kind) != old.path(*kind))
            .collect();

        for kind in &changed {
            for child in self.index.children(id).to_vec() {
                self.update_paths(&child, *kind);
            }
        }
        if changed.contains(&PathKind::MoveCompleted) {
            self.apply_move_completed_paths(id, true);
        }
        if self.prefs.options.move_on_changes {
            if !changed.is_empty() {
                self.move_torrents_by_label(id, true);
            } else if path_toggled_on {
                self.move_torrents_by_label(id, false);
            }
        }
        if let Some(scope) = scope.filter(|_| new.autolabel_settings) {
            self.do_autolabel_torrents(id, scope);
        }

        self.mark_labels_changed();
        info!(
            label_id = id,
            changed_paths = changed.len(),
            path_toggled_on,
            "label options updated"
        );
        Ok(())
    }
}

/// Parse a path kind name.
///
/// # Errors
///
/// Returns [`CoreError::InvalidPathKind`] for anything but
/// `move_completed` or `download_location`.
pub fn parse_path_kind(value: &str) -> CoreResult<PathKind> {
    value.parse().map_err(|_| CoreError::InvalidPathKind {
        value: value.to_string(),
    })
}
