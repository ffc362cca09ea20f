//! Autolabel rule evaluation.
//!
//! Each rule becomes a regular expression built from its operator and query;
//! a rule matches when any candidate value of its property matches. Rules are
//! combined with AND (`match_all`) or OR, short-circuiting either way.

use std::collections::HashMap;

use labelplus_config::{CaseSensitivity, Rule, RuleOperator, RuleProperty};
use labelplus_torrent_core::TorrentStatus;
use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Candidate values per rule property for one torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorrentProperties {
    values: HashMap<RuleProperty, Vec<String>>,
}

impl TorrentProperties {
    /// Gather properties from a host status snapshot.
    #[must_use]
    pub fn from_status(status: &TorrentStatus) -> Self {
        Self::default()
            .with(RuleProperty::Name, vec![status.name.clone()])
            .with(RuleProperty::Tracker, status.trackers.clone())
            .with(RuleProperty::Files, status.files.clone())
            .with(
                RuleProperty::Label,
                status.legacy_label.iter().cloned().collect(),
            )
    }

    /// Replace the values for `property`.
    #[must_use]
    pub fn with(mut self, property: RuleProperty, values: Vec<String>) -> Self {
        self.values.insert(property, values);
        self
    }

    /// Values for `property` (empty when none were gathered).
    #[must_use]
    pub fn get(&self, property: RuleProperty) -> &[String] {
        self.values
            .get(&property)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

fn compile(pattern: &str, case: CaseSensitivity) -> Option<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case == CaseSensitivity::IgnoreCase)
        .build()
        .map_err(|err| debug!(pattern, error = %err, "autolabel pattern rejected"))
        .ok()
}

fn search(pattern: &str, case: CaseSensitivity, value: &str) -> bool {
    compile(pattern, case).is_some_and(|regex| regex.is_match(value))
}

fn value_matches(rule: &Rule, value: &str) -> bool {
    let query = regex::escape(&rule.query);
    match rule.operator {
        RuleOperator::Contains => search(&query, rule.case, value),
        RuleOperator::NotContains => !search(&query, rule.case, value),
        RuleOperator::Is => search(&format!("^{query}$"), rule.case, value),
        RuleOperator::IsNot => !search(&format!("^{query}$"), rule.case, value),
        RuleOperator::StartsWith => search(&format!("^{query}"), rule.case, value),
        RuleOperator::EndsWith => search(&format!("{query}$"), rule.case, value),
        RuleOperator::MatchesRegex => search(&rule.query, rule.case, value),
        RuleOperator::ContainsWords => rule
            .query
            .split_whitespace()
            .all(|word| search(&regex::escape(word), rule.case, value)),
    }
}

fn rule_matches(properties: &TorrentProperties, rule: &Rule) -> bool {
    properties
        .get(rule.property)
        .iter()
        .any(|value| value_matches(rule, value))
}

/// Evaluate `rules` against `properties`.
///
/// An empty rule list never matches. With `match_all` every rule must match;
/// otherwise one matching rule is enough.
#[must_use]
pub fn find_match(properties: &TorrentProperties, rules: &[Rule], match_all: bool) -> bool {
    if rules.is_empty() {
        return false;
    }
    if match_all {
        rules.iter().all(|rule| rule_matches(properties, rule))
    } else {
        rules.iter().any(|rule| rule_matches(properties, rule))
    }
}
