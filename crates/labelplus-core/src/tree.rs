//! Label index and tree mutations.
//!
//! # Design
//! - `LabelIndex` mirrors the parent/child and label/torrent relations of the
//!   persisted records so lookups never scan every label.
//! - Full names are a lazily filled side table, invalidated per subtree.
//! - Moves are two-pass: plan every old -> new id, then apply the plan.

use std::collections::HashMap;

use labelplus_config::{LabelRecord, PathKind, PathMode};
use labelplus_torrent_core::TorrentId;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::label::{
    ID_NONE, ID_NULL, child_id, cmp_length_then_value, get_parent_id, is_ancestor, validate_name,
};
use crate::state::CoreState;

/// Children and torrents of one label (or of the root).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Direct child label ids, in insertion order.
    pub children: Vec<String>,
    /// Torrents mapped to this label.
    pub torrents: Vec<TorrentId>,
}

/// Index of every label plus the root entry.
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    entries: HashMap<String, IndexEntry>,
    full_names: HashMap<String, String>,
}

impl LabelIndex {
    /// Build from label ids and torrent mappings; mappings to unknown labels are skipped.
    pub fn build<'a>(
        label_ids: impl IntoIterator<Item = &'a String>,
        mappings: impl IntoIterator<Item = (&'a TorrentId, &'a String)>,
    ) -> Self {
        let mut entries = HashMap::new();
        entries.insert(ID_NULL.to_string(), IndexEntry::default());
        let ids: Vec<&String> = label_ids.into_iter().collect();
        for id in &ids {
            entries.insert((*id).clone(), IndexEntry::default());
        }
        let mut sorted = ids;
        sorted.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        for id in sorted {
            if let Some(parent) = entries.get_mut(get_parent_id(id)) {
                parent.children.push(id.clone());
            }
        }
        for (torrent_id, label_id) in mappings {
            if let Some(entry) = entries.get_mut(label_id.as_str()) {
                entry.torrents.push(torrent_id.clone());
            }
        }
        Self {
            entries,
            full_names: HashMap::new(),
        }
    }

    /// Whether `id` has an entry (the root always does).
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Entry for `id`.
    #[must_use]
    pub fn entry(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    /// Direct children of `id`.
    #[must_use]
    pub fn children(&self, id: &str) -> &[String] {
        self.entries
            .get(id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or_default()
    }

    /// Torrents mapped to `id`.
    #[must_use]
    pub fn torrents(&self, id: &str) -> &[TorrentId] {
        self.entries
            .get(id)
            .map(|entry| entry.torrents.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn insert(&mut self, id: &str, entry: IndexEntry) {
        if let Some(parent) = self.entries.get_mut(get_parent_id(id)) {
            parent.children.push(id.to_string());
        }
        self.entries.insert(id.to_string(), entry);
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<IndexEntry> {
        if let Some(parent) = self.entries.get_mut(get_parent_id(id)) {
            parent.children.retain(|child| child != id);
        }
        self.full_names.remove(id);
        self.entries.remove(id)
    }

    pub(crate) fn attach_torrent(&mut self, label_id: &str, torrent_id: &TorrentId) {
        if let Some(entry) = self.entries.get_mut(label_id) {
            entry.torrents.push(torrent_id.clone());
        }
    }

    pub(crate) fn detach_torrent(&mut self, label_id: &str, torrent_id: &TorrentId) {
        if let Some(entry) = self.entries.get_mut(label_id) {
            entry.torrents.retain(|id| id != torrent_id);
        }
    }

    pub(crate) fn cached_full_name(&self, id: &str) -> Option<&str> {
        self.full_names.get(id).map(String::as_str)
    }

    pub(crate) fn cache_full_name(&mut self, id: &str, full_name: String) {
        self.full_names.insert(id.to_string(), full_name);
    }

    pub(crate) fn invalidate_full_names(&mut self, id: &str) {
        self.full_names.remove(id);
        for child in self.children(id).to_vec() {
            self.invalidate_full_names(&child);
        }
    }

    pub(crate) fn clear_full_names(&mut self) {
        self.full_names.clear();
    }
}

impl CoreState {
    /// Lowest `n` such that `parent:n` is not a label.
    pub(crate) fn unused_id(&self, parent_id: &str) -> String {
        (0..)
            .map(|index| child_id(parent_id, index))
            .find(|id| !self.labels.contains_key(id))
            .unwrap_or_default()
    }

    fn validate_sibling_name(
        &self,
        parent_id: &str,
        name: &str,
        exclude: Option<&str>,
    ) -> CoreResult<()> {
        validate_name(name)?;
        let taken = self
            .index
            .children(parent_id)
            .iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .filter_map(|id| self.labels.get(id))
            .any(|record| record.name == name);
        if taken {
            return Err(CoreError::LabelExists {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Descendants of `id` depth-first; `depth < 0` is unlimited, `0` yields nothing.
    #[must_use]
    pub fn descendent_labels(&self, id: &str, depth: i32) -> Vec<String> {
        let mut out = Vec::new();
        if depth == 0 {
            return out;
        }
        let next = if depth > 0 { depth - 1 } else { depth };
        for child in self.index.children(id) {
            out.push(child.clone());
            out.extend(self.descendent_labels(child, next));
        }
        out
    }

    /// Every label id, deepest first.
    #[must_use]
    pub fn sorted_labels(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.labels.keys().cloned().collect();
        ids.sort_by(|a, b| cmp_length_then_value(a, b));
        ids
    }

    /// `/`-joined names from the root down to `id`, cached until an ancestor changes.
    pub fn full_name(&mut self, id: &str) -> String {
        if let Some(cached) = self.index.cached_full_name(id) {
            return cached.to_string();
        }
        let mut parts = Vec::new();
        let mut current = id;
        while current != ID_NULL {
            match self.labels.get(current) {
                Some(record) => parts.push(record.name.as_str()),
                None => break,
            }
            current = get_parent_id(current);
        }
        parts.reverse();
        let full_name = parts.join("/");
        if self.labels.contains_key(id) {
            self.index.cache_full_name(id, full_name.clone());
        }
        full_name
    }

    /// Create a label under `parent_id` and return its id.
    ///
    /// # Errors
    ///
    /// Fails when the parent is unknown or the name is invalid or taken.
    pub fn add_label(&mut self, parent_id: &str, name: &str) -> CoreResult<String> {
        if parent_id != ID_NULL && !self.labels.contains_key(parent_id) {
            return Err(CoreError::invalid_parent(parent_id));
        }
        let name = name.trim();
        self.validate_sibling_name(parent_id, name, None)?;

        let id = self.unused_id(parent_id);
        self.labels.insert(
            id.clone(),
            LabelRecord {
                name: name.to_string(),
                options: self.prefs.label.clone(),
            },
        );
        self.index.insert(&id, IndexEntry::default());
        for kind in PathKind::ALL {
            let path = self.resolve_path(&id, kind);
            if let Some(record) = self.labels.get_mut(&id) {
                record.options.set_path(kind, path);
            }
        }
        self.pin_root_modes(&id);
        self.refresh_shared_limit(&id);
        self.mark_labels_changed();
        info!(label_id = %id, parent_id, name, "label added");
        Ok(id)
    }

    /// Rename a label, cascading paths and full names through its subtree.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown or the name is invalid or taken by a sibling.
    pub fn rename_label(&mut self, id: &str, name: &str) -> CoreResult<()> {
        if !self.labels.contains_key(id) {
            return Err(CoreError::invalid_label(id));
        }
        let name = name.trim();
        self.validate_sibling_name(get_parent_id(id), name, Some(id))?;
        if let Some(record) = self.labels.get_mut(id) {
            record.name = name.to_string();
        }
        self.index.invalidate_full_names(id);
        self.relocate_subtree(id);
        self.mark_labels_changed();
        info!(label_id = id, name, "label renamed");
        Ok(())
    }

    /// Move a label (and its subtree) under `dest_parent_id`, renaming it to `dest_name`.
    ///
    /// Returns the label's new id.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown, the destination is missing, the label
    /// itself or one of its descendants, or the name is invalid or taken.
    pub fn move_label(
        &mut self,
        id: &str,
        dest_parent_id: &str,
        dest_name: &str,
    ) -> CoreResult<String> {
        if !self.labels.contains_key(id) {
            return Err(CoreError::invalid_label(id));
        }
        if dest_parent_id != ID_NULL
            && (dest_parent_id == id
                || !self.labels.contains_key(dest_parent_id)
                || is_ancestor(id, dest_parent_id))
        {
            return Err(CoreError::invalid_parent(dest_parent_id));
        }
        if get_parent_id(id) == dest_parent_id {
            self.rename_label(id, dest_name)?;
            return Ok(id.to_string());
        }

        let dest_name = dest_name.trim();
        self.validate_sibling_name(dest_parent_id, dest_name, None)?;

        let new_root = self.unused_id(dest_parent_id);
        let plan = self.plan_move(id, &new_root);
        self.apply_move_plan(&plan);
        if let Some(record) = self.labels.get_mut(&new_root) {
            record.name = dest_name.to_string();
        }
        self.relocate_subtree(&new_root);
        self.mark_labels_changed();
        self.mark_mappings_changed();
        info!(label_id = id, new_id = %new_root, dest_parent_id, "label moved");
        Ok(new_root)
    }

    /// Old -> new id for every label in the subtree, parents before children.
    fn plan_move(&self, id: &str, new_id: &str) -> Vec<(String, String)> {
        let mut plan = vec![(id.to_string(), new_id.to_string())];
        for (index, child) in self.index.children(id).iter().enumerate() {
            plan.extend(self.plan_move(child, &child_id(new_id, index)));
        }
        plan
    }

    fn apply_move_plan(&mut self, plan: &[(String, String)]) {
        // Create every new record before deleting any old one.
        for (old, new) in plan {
            if let Some(record) = self.labels.get(old).cloned() {
                self.labels.insert(new.clone(), record);
            }
            let torrents = self.index.torrents(old).to_vec();
            for torrent_id in &torrents {
                self.mappings.insert(torrent_id.clone(), new.clone());
            }
            self.index.insert(
                new,
                IndexEntry {
                    children: Vec::new(),
                    torrents,
                },
            );
            if self.shared_limit_index.remove(old) {
                self.shared_limit_index.insert(new.clone());
            }
        }
        for (old, _) in plan.iter().rev() {
            self.index.invalidate_full_names(old);
            self.index.remove(old);
            self.labels.remove(old);
        }
        debug!(labels = plan.len(), "label subtree re-keyed");
    }

    /// Recompute paths below a renamed or moved label and push them to torrents.
    fn relocate_subtree(&mut self, id: &str) {
        for kind in PathKind::ALL {
            self.update_paths(id, kind);
        }
        self.pin_root_modes(id);
        self.apply_move_completed_paths(id, true);
        if self.prefs.options.move_on_changes {
            self.move_torrents_by_label(id, true);
        }
    }

    /// Labels directly under the root have no labeled parent to derive from.
    pub(crate) fn pin_root_modes(&mut self, id: &str) {
        if get_parent_id(id) != ID_NULL {
            return;
        }
        if let Some(record) = self.labels.get_mut(id) {
            for kind in PathKind::ALL {
                record.options.set_mode(kind, PathMode::Folder);
            }
        }
    }

    /// Remove a label and its subtree, unmapping every torrent in it.
    ///
    /// # Errors
    ///
    /// Fails when the label is unknown.
    pub fn remove_label(&mut self, id: &str) -> CoreResult<()> {
        if !self.labels.contains_key(id) {
            return Err(CoreError::invalid_label(id));
        }
        let unmapped = self.remove_subtree(id);
        if self.prefs.options.move_on_changes {
            self.move_torrents(&unmapped);
        }
        self.mark_labels_changed();
        self.mark_mappings_changed();
        info!(label_id = id, unmapped = unmapped.len(), "label removed");
        Ok(())
    }

    /// Drop `id` and its descendants; returns host-known torrents that lost their label.
    pub(crate) fn remove_subtree(&mut self, id: &str) -> Vec<TorrentId> {
        let mut unmapped = Vec::new();
        for child in self.index.children(id).to_vec() {
            unmapped.extend(self.remove_subtree(&child));
        }
        for torrent_id in self.index.torrents(id).to_vec() {
            if self.host.contains(&torrent_id) {
                self.set_torrent_label(&torrent_id, ID_NONE);
                unmapped.push(torrent_id);
            } else {
                self.remove_torrent_mapping(&torrent_id);
            }
        }
        self.shared_limit_index.remove(id);
        self.index.remove(id);
        self.labels.remove(id);
        unmapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn index_links_children_and_torrents() {
        let labels = ids(&["0", "0:1", "0:0", "1"]);
        let torrent = TorrentId::from("t");
        let mapped = "0:1".to_string();
        let index = LabelIndex::build(labels.iter(), [(&torrent, &mapped)]);
        assert_eq!(index.children(ID_NULL), ["0", "1"]);
        assert_eq!(index.children("0"), ["0:0", "0:1"]);
        assert_eq!(index.torrents("0:1"), [torrent]);
        assert!(index.contains(ID_NULL));
        assert!(index.torrents("9").is_empty());
    }

    #[test]
    fn removing_an_entry_detaches_it_from_its_parent() {
        let labels = ids(&["0", "0:0"]);
        let mut index = LabelIndex::build(labels.iter(), []);
        index.remove("0:0");
        assert!(index.children("0").is_empty());
        assert!(!index.contains("0:0"));
    }
}
