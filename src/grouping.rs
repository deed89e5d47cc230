//! Groups series by their assigned rule and lays them out as checkbox rows.
//!
//! [`render_groups`] is a pure function of its inputs: it builds a fresh
//! [`RenderTree`] on every call and keeps nothing between calls. The page
//! adapter in `ui` turns the tree into HTML, and `/api/groups` serves it as JSON.

use crate::rules::Rule;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

pub const UNASSIGNED_LABEL: &str = "Unassigned";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SeriesAssignment {
    pub series_id: i64,
    pub title: String,
    /// `None` (or an empty name) means the series has no rule.
    pub rule: Option<String>,
}

/// Group identity. `Unassigned` is its own variant, so a rule that happens to be
/// named "unassigned" still gets a separate group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "kebab-case")]
pub enum GroupKey {
    Rule(String),
    Unassigned,
}

impl GroupKey {
    fn for_assignment(assignment: &SeriesAssignment) -> Self {
        match assignment.rule.as_deref() {
            Some(name) if !name.is_empty() => GroupKey::Rule(name.to_string()),
            _ => GroupKey::Unassigned,
        }
    }

    pub fn rule_name(&self) -> Option<&str> {
        match self {
            GroupKey::Rule(name) => Some(name),
            GroupKey::Unassigned => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub get_option: String,
    pub action_option: String,
    pub keep_watched: String,
    pub monitor_watched: bool,
}

impl RuleSummary {
    fn from_rule(rule: &Rule) -> Self {
        Self {
            get_option: rule.get_option.clone(),
            action_option: rule.action_option.clone(),
            keep_watched: rule.keep_watched.clone(),
            monitor_watched: rule.monitor_watched,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "Get {} | Action {} | Keep {} | Monitor watched: {}",
            self.get_option,
            self.action_option,
            self.keep_watched,
            if self.monitor_watched { "yes" } else { "no" }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupHeader {
    pub label: String,
    /// False for the unassigned group and for rules missing from the rule table.
    pub known_rule: bool,
    pub summary: Option<RuleSummary>,
    pub member_count: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckboxRow {
    pub series_id: i64,
    pub title: String,
    pub checked: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuleGroup {
    pub key: GroupKey,
    pub header: GroupHeader,
    /// State of the group's select/deselect-all control.
    pub all_checked: bool,
    pub rows: Vec<CheckboxRow>,
}

impl RuleGroup {
    fn sync_all_checked(&mut self) {
        self.all_checked = !self.rows.is_empty() && self.rows.iter().all(|row| row.checked);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RenderTree {
    pub selected: Option<String>,
    pub groups: Vec<RuleGroup>,
}

impl RenderTree {
    pub fn group(&self, key: &GroupKey) -> Option<&RuleGroup> {
        self.groups.iter().find(|group| &group.key == key)
    }

    /// Sets every row of one group. Returns false when no such group exists.
    pub fn toggle_group(&mut self, key: &GroupKey, checked: bool) -> bool {
        let Some(group) = self.groups.iter_mut().find(|group| &group.key == key) else {
            return false;
        };
        for row in group.rows.iter_mut() {
            row.checked = checked;
        }
        group.sync_all_checked();
        true
    }

    pub fn set_checked(&mut self, series_id: i64, checked: bool) -> bool {
        for group in self.groups.iter_mut() {
            if let Some(row) = group.rows.iter_mut().find(|row| row.series_id == series_id) {
                row.checked = checked;
                group.sync_all_checked();
                return true;
            }
        }
        false
    }

    /// Checked series ids in display order.
    pub fn checked_series(&self) -> Vec<i64> {
        self.groups
            .iter()
            .flat_map(|group| group.rows.iter())
            .filter(|row| row.checked)
            .map(|row| row.series_id)
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.groups.iter().map(|group| group.rows.len()).sum()
    }
}

/// Builds the grouped checkbox layout.
///
/// Groups come out in this order: the selected rule's group (when it has members),
/// then the remaining rule groups in the order their first member appears in
/// `assignments`, then the unassigned group. Members are sorted by title,
/// case-insensitively; equal titles keep input order.
///
/// A series is checked when it is assigned to the selected rule. A rule name
/// that is not in `rules` still forms its own group, but its header has no summary.
pub fn render_groups(
    assignments: &[SeriesAssignment],
    rules: &BTreeMap<String, Rule>,
    selected: Option<&str>,
) -> RenderTree {
    let selected = selected.filter(|name| !name.is_empty());

    let mut order: Vec<GroupKey> = Vec::new();
    let mut members: HashMap<GroupKey, Vec<&SeriesAssignment>> = HashMap::new();
    for assignment in assignments {
        let key = GroupKey::for_assignment(assignment);
        members
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(assignment);
    }

    if let Some(name) = selected {
        let selected_key = GroupKey::Rule(name.to_string());
        if let Some(pos) = order.iter().position(|key| key == &selected_key) {
            let key = order.remove(pos);
            order.insert(0, key);
        }
    }
    if let Some(pos) = order.iter().position(|key| key == &GroupKey::Unassigned) {
        let key = order.remove(pos);
        order.push(key);
    }

    let groups = order
        .into_iter()
        .map(|key| {
            let mut group_members = members.remove(&key).unwrap_or_default();
            group_members.sort_by_cached_key(|assignment| assignment.title.to_lowercase());
            build_group(key, &group_members, rules, selected)
        })
        .collect();

    RenderTree {
        selected: selected.map(str::to_string),
        groups,
    }
}

fn build_group(
    key: GroupKey,
    members: &[&SeriesAssignment],
    rules: &BTreeMap<String, Rule>,
    selected: Option<&str>,
) -> RuleGroup {
    let rule = key.rule_name().and_then(|name| rules.get(name));
    let label = match &key {
        GroupKey::Rule(name) => name.clone(),
        GroupKey::Unassigned => UNASSIGNED_LABEL.to_string(),
    };
    let is_selected = selected.is_some() && key.rule_name() == selected;
    let rows = members
        .iter()
        .map(|assignment| CheckboxRow {
            series_id: assignment.series_id,
            title: assignment.title.clone(),
            checked: is_selected,
        })
        .collect::<Vec<_>>();

    let mut group = RuleGroup {
        header: GroupHeader {
            label,
            known_rule: rule.is_some(),
            summary: rule.map(RuleSummary::from_rule),
            member_count: rows.len(),
        },
        key,
        all_checked: false,
        rows,
    };
    group.sync_all_checked();
    group
}
