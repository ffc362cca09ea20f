//! Hierarchical label ids and name validation.
//!
//! Ids are colon-separated child indexes (`"3:1:0"`); the empty id is the
//! root of the hierarchy. `All` and `None` are pseudo-ids used by callers for
//! "every torrent" and "unlabeled torrents" and never name a real label.

use std::cmp::Ordering;

use crate::error::{CoreError, CoreResult};

/// Root of the hierarchy.
pub const ID_NULL: &str = "";
/// Pseudo-id for every torrent.
pub const ID_ALL: &str = "All";
/// Pseudo-id for unlabeled torrents.
pub const ID_NONE: &str = "None";
/// Ids that can never be real labels.
pub const RESERVED_IDS: [&str; 3] = [ID_NULL, ID_ALL, ID_NONE];

const SEPARATOR: char = ':';
const INVALID_NAME_CHARS: &[char] = &['"', '*', '/', ':', '<', '>', '?', '|', '\\'];

/// Whether `id` is one of the reserved pseudo-ids.
#[must_use]
pub fn is_reserved(id: &str) -> bool {
    RESERVED_IDS.contains(&id)
}

/// Parent of `id`; root-level ids (and the root) yield [`ID_NULL`].
#[must_use]
pub fn get_parent_id(id: &str) -> &str {
    id.rfind(SEPARATOR).map_or(ID_NULL, |pos| &id[..pos])
}

/// Whether `ancestor` is a strict ancestor of `id`.
#[must_use]
pub fn is_ancestor(ancestor: &str, id: &str) -> bool {
    if ancestor == id {
        return false;
    }
    if ancestor == ID_NULL {
        return true;
    }
    id.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with(SEPARATOR))
}

/// Id of the `index`-th child slot under `parent`.
#[must_use]
pub fn child_id(parent: &str, index: usize) -> String {
    if parent == ID_NULL {
        index.to_string()
    } else {
        format!("{parent}{SEPARATOR}{index}")
    }
}

/// Last `degree` components of a `/`-joined full name; zero yields an empty string.
#[must_use]
pub fn resolve_name_by_degree(full_name: &str, degree: usize) -> String {
    if degree == 0 {
        return String::new();
    }
    let parts: Vec<&str> = full_name.split('/').collect();
    let start = parts.len().saturating_sub(degree);
    parts[start..].join("/")
}

/// Longer ids first (deepest labels), ties broken lexicographically.
#[must_use]
pub fn cmp_length_then_value(a: &str, b: &str) -> Ordering {
    b.len().cmp(&a.len()).then_with(|| a.cmp(b))
}

/// Reject empty names and names containing filesystem-illegal characters.
///
/// # Errors
///
/// Returns [`CoreError::EmptyLabel`] or [`CoreError::InvalidCharacters`].
pub fn validate_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::EmptyLabel);
    }
    if name
        .chars()
        .any(|ch| ch.is_ascii_control() || INVALID_NAME_CHARS.contains(&ch))
    {
        return Err(CoreError::InvalidCharacters {
            name: name.to_string(),
        });
    }
    Ok(())
}
