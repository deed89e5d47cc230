use crate::grouping::{GroupKey, RenderTree, RuleGroup};
use crate::rules::{ADD_NEW, DEFAULT_RULE, Rule};
use crate::sonarr::{CurrentSeries, Premiere};
use dioxus::core::NoOpMutations;
use dioxus::prelude::*;
use std::collections::BTreeMap;

pub const SECTIONS: [&str; 6] = [
    "current",
    "upcoming",
    "settings",
    "assign_rules",
    "actions",
    "logs",
];

#[derive(Props, Clone, PartialEq)]
pub struct DashboardProps {
    pub section: String,
    pub message: Option<String>,
    pub warning: Option<String>,
    pub selected: Option<String>,
    pub rules: BTreeMap<String, Rule>,
    pub tree: RenderTree,
    pub current: Vec<CurrentSeries>,
    pub upcoming: Vec<Premiere>,
}

#[derive(Props, Clone, PartialEq)]
pub struct ErrorProps {
    pub message: String,
}

pub fn render_html(props: DashboardProps) -> String {
    render_dom(VirtualDom::new_with_props(Dashboard, props))
}

pub fn render_error_html(message: &str) -> String {
    render_dom(VirtualDom::new_with_props(
        ErrorPage,
        ErrorProps {
            message: message.to_string(),
        },
    ))
}

fn render_dom(mut app: VirtualDom) -> String {
    // Build the tree before rendering to avoid SSR panics.
    let mut noop = NoOpMutations {};
    let _ = app.rebuild(&mut noop);
    dioxus_ssr::render(&mut app)
}

fn section_class(active: &str, section: &str) -> &'static str {
    if active == section {
        "card section active"
    } else {
        "card section"
    }
}

fn nav_class(active: &str, section: &str) -> &'static str {
    if active == section {
        "nav-btn active"
    } else {
        "nav-btn"
    }
}

/// DOM-safe id shared by a group's toggle and its member checkboxes.
fn group_dom_id(index: usize, key: &GroupKey) -> String {
    match key {
        GroupKey::Rule(_) => format!("group-{index}"),
        GroupKey::Unassigned => "group-unassigned".to_string(),
    }
}

pub const STYLES: &str = r#"
* { box-sizing: border-box; }
body, html {
    margin: 0;
    padding: 0;
    background: radial-gradient(circle at 15% 10%, #15212a, #0a0f14 45%), #0a0f14;
}
.page { min-height: 100vh; display: flex; justify-content: center; padding: 32px 18px; color: #e6eef4; font-family: "Inter", system-ui, -apple-system, sans-serif; }
.shell { width: min(960px, 100%); display: flex; flex-direction: column; gap: 12px; }
.header { display: flex; flex-direction: column; gap: 6px; }
.title { font-size: 26px; margin: 0; }
.subtitle { margin: 0; color: #93a7b5; font-size: 15px; }
.nav { display: flex; flex-wrap: wrap; gap: 8px; }
.nav-btn { padding: 9px 14px; border-radius: 10px; border: 1px solid #1d2a33; background: #0f171d; color: #c3d3de; font-weight: 700; cursor: pointer; }
.nav-btn.active { background: linear-gradient(135deg, #2dd4bf, #14b8a6); color: #061013; border-color: #5eead4; }
.card { width: 100%; background: linear-gradient(145deg, #121b22, #0c1318); border: 1px solid #1d2a33; border-radius: 14px; padding: 20px; }
.section { display: none; }
.section.active { display: block; }
.card-title { margin: 0 0 4px 0; font-size: 20px; }
.muted { color: #8296a4; margin: 0 0 14px 0; font-size: 14px; }
.alert { padding: 10px 14px; border-radius: 10px; font-size: 14px; }
.alert-success { background: #0f2a25; border: 1px solid #2dd4bf; color: #a7f3e4; }
.alert-warning { background: #2a220f; border: 1px solid #f5b942; color: #f8dfa6; }
.alert-error { background: #2a1012; border: 1px solid #f26d6d; color: #f8b4b4; }
.series-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(200px, 1fr)); gap: 12px; }
.series-card { display: flex; flex-direction: column; gap: 6px; padding: 10px; background: #0e161c; border: 1px solid #1d2a33; border-radius: 12px; color: inherit; text-decoration: none; }
.series-card img { width: 100%; border-radius: 8px; }
.series-name { font-weight: 700; }
.series-meta { font-size: 13px; color: #8296a4; }
.form-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(220px, 1fr)); gap: 12px; margin-bottom: 12px; }
.field { display: flex; flex-direction: column; gap: 6px; font-size: 13px; color: #a9bccb; }
.field input, .field select { padding: 9px 10px; border-radius: 8px; border: 1px solid #25343f; background: #0b1216; color: #e6eef4; font-weight: 600; }
.rule-groups { display: flex; flex-direction: column; gap: 10px; }
.rule-group { background: #0e161c; border: 1px solid #1d2a33; border-radius: 12px; padding: 10px; }
.rule-group-head { display: flex; flex-wrap: wrap; align-items: center; gap: 10px; margin-bottom: 8px; }
.rule-group-title { margin: 0; font-size: 13px; color: #a9bccb; letter-spacing: 0.4px; text-transform: uppercase; }
.rule-summary { font-size: 12px; color: #7d909d; }
.rule-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(220px, 1fr)); gap: 6px; }
.checkbox { display: flex; align-items: center; gap: 8px; padding: 8px 10px; border: 1px solid #1d2a33; border-radius: 10px; background: #0b1216; cursor: pointer; }
.checkbox input { width: 16px; height: 16px; }
.toolbar { display: flex; flex-wrap: wrap; gap: 10px; margin-top: 12px; }
.pill-btn { padding: 8px 12px; border-radius: 10px; border: 1px solid #25343f; background: #0b1216; color: #dbe7ef; font-weight: 700; cursor: pointer; }
.pill-btn:hover { border-color: #5eead4; color: #a7f3e4; }
.primary { padding: 10px 16px; border-radius: 10px; border: none; background: linear-gradient(135deg, #2dd4bf, #14b8a6); color: #061013; font-weight: 800; cursor: pointer; }
.danger { padding: 10px 16px; border-radius: 10px; border: none; background: #f26d6d; color: #12080a; font-weight: 800; cursor: pointer; }
.status { margin-top: 10px; color: #8296a4; font-size: 14px; min-height: 18px; }
.log { white-space: pre-wrap; font-family: ui-monospace, monospace; font-size: 13px; background: #0b1216; border: 1px solid #1d2a33; border-radius: 10px; padding: 12px; max-height: 420px; overflow: auto; }
@media (max-width: 640px) {
    .page { padding: 18px 12px; }
    .card { padding: 16px; }
    .nav-btn { flex: 1; text-align: center; }
}
"#;

pub const SCRIPT: &str = r#"
(() => {
  const navButtons = document.querySelectorAll('[data-target]');
  const sections = document.querySelectorAll('[data-section]');
  const ruleSelect = document.getElementById('rule_name');
  const newRuleGroup = document.getElementById('new_rule_name_group');
  const newRuleName = document.getElementById('new_rule_name');
  const getOption = document.getElementById('get_option');
  const actionOption = document.getElementById('action_option');
  const keepWatched = document.getElementById('keep_watched');
  const monitorWatched = document.getElementById('monitor_watched');
  const saveRule = document.getElementById('save_rule');
  const deleteRule = document.getElementById('delete_rule');
  const ruleStatus = document.getElementById('rule-status');
  const assignSelect = document.getElementById('assign_rule_name');
  const assignSave = document.getElementById('assign_save');
  const assignStatus = document.getElementById('assign-status');
  const actionStatus = document.getElementById('action-status');
  const ratingKey = document.getElementById('rating_key');
  const logView = document.getElementById('log-content');

  function setSection(target) {
    sections.forEach((section) => {
      section.classList.toggle('active', section.dataset.section === target);
    });
    navButtons.forEach((btn) => {
      btn.classList.toggle('active', btn.dataset.target === target);
    });
    if (target === 'logs') {
      fetchLogs();
    }
  }

  navButtons.forEach((btn) => {
    btn.addEventListener('click', () => setSection(btn.dataset.target));
  });

  function reloadWith(section, message, extra) {
    const params = new URLSearchParams({ section });
    if (message) params.set('message', message);
    Object.entries(extra || {}).forEach(([k, v]) => { if (v) params.set(k, v); });
    window.location.assign(`/?${params.toString()}`);
  }

  async function postJson(url, body) {
    const res = await fetch(url, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify(body || {}),
    });
    const text = await res.text();
    if (!res.ok) throw new Error(text || `HTTP ${res.status}`);
    return text ? JSON.parse(text) : {};
  }

  function loadRule() {
    if (!ruleSelect) return;
    const isNew = ruleSelect.value === 'add_new';
    newRuleGroup.style.display = isNew ? 'flex' : 'none';
    const opt = ruleSelect.selectedOptions[0];
    const data = opt && !isNew ? opt.dataset : {};
    getOption.value = data.get || '';
    actionOption.value = data.action || '';
    keepWatched.value = data.keep || '';
    monitorWatched.value = data.monitor || 'false';
  }

  if (ruleSelect) {
    ruleSelect.addEventListener('change', loadRule);
    loadRule();
  }

  if (saveRule) {
    saveRule.addEventListener('click', async (e) => {
      e.preventDefault();
      try {
        const saved = await postJson('/api/rules', {
          rule_name: ruleSelect.value,
          new_rule_name: newRuleName.value,
          get_option: getOption.value,
          action_option: actionOption.value,
          keep_watched: keepWatched.value,
          monitor_watched: monitorWatched.value === 'true',
        });
        reloadWith('settings', `Rule '${saved.rule_name}' saved.`);
      } catch (err) {
        ruleStatus.textContent = `Save failed: ${err.message}`;
      }
    });
  }

  if (deleteRule) {
    deleteRule.addEventListener('click', async (e) => {
      e.preventDefault();
      const name = ruleSelect.value;
      if (name === 'default') {
        alert('Default rule cannot be deleted.');
        return;
      }
      if (name === 'add_new') return;
      try {
        await postJson('/api/rules/delete', { rule_name: name });
        reloadWith('settings', `Rule '${name}' deleted successfully.`);
      } catch (err) {
        ruleStatus.textContent = `Delete failed: ${err.message}`;
      }
    });
  }

  document.querySelectorAll('[data-group-toggle]').forEach((toggle) => {
    const group = toggle.dataset.groupToggle;
    const members = document.querySelectorAll(`input[data-member-of="${group}"]`);
    toggle.addEventListener('change', () => {
      members.forEach((input) => { input.checked = toggle.checked; });
    });
    members.forEach((input) => {
      input.addEventListener('change', () => {
        toggle.checked = Array.from(members).every((m) => m.checked);
      });
    });
  });

  if (assignSelect) {
    assignSelect.addEventListener('change', () => {
      reloadWith('assign_rules', '', { selected: assignSelect.value });
    });
  }

  if (assignSave) {
    assignSave.addEventListener('click', async (e) => {
      e.preventDefault();
      const ids = Array.from(document.querySelectorAll('input[data-series-id]:checked'))
        .map((input) => Number(input.dataset.seriesId));
      try {
        await postJson('/api/assign', { rule_name: assignSelect.value, series_ids: ids });
        reloadWith('assign_rules', 'Rules assigned to selected series.', { selected: assignSelect.value });
      } catch (err) {
        assignStatus.textContent = `Assign failed: ${err.message}`;
      }
    });
  }

  document.querySelectorAll('[data-action]').forEach((btn) => {
    btn.addEventListener('click', async () => {
      const action = btn.dataset.action;
      const body = action === 'mark-watched' ? { rating_key: ratingKey.value } : {};
      actionStatus.textContent = 'Sending...';
      try {
        const ack = await postJson(`/api/actions/${action}`, body);
        actionStatus.textContent = ack.message;
      } catch (err) {
        actionStatus.textContent = `Request failed: ${err.message}`;
      }
    });
  });

  async function fetchLogs() {
    if (!logView) return;
    try {
      const res = await fetch('/api/logs');
      if (!res.ok) throw new Error('logs failed');
      const data = await res.json();
      logView.textContent = data.content;
    } catch (err) {
      logView.textContent = 'Unable to load log';
    }
  }

  if (window.location.search.indexOf('message=') >= 0) {
    const params = new URLSearchParams(window.location.search);
    params.delete('message');
    const query = params.toString();
    window.history.replaceState({}, document.title, window.location.pathname + (query ? `?${query}` : ''));
  }

  const active = document.querySelector('[data-section].active');
  if (active && active.dataset.section === 'logs') {
    fetchLogs();
  }
})();
"#;

#[component]
fn Dashboard(props: DashboardProps) -> Element {
    let active = props.section.clone();
    let selected = props.selected.clone().unwrap_or_default();

    rsx! {
        link { rel: "stylesheet", href: "/assets/dashboard.css" }
        div { class: "page",
            meta { name: "viewport", content: "width=device-width, initial-scale=1" }
            div { class: "shell",
                div { class: "header",
                    h1 { class: "title", "Series dashboard" }
                    p { class: "subtitle", "What you are watching, what is coming, and how each series is handled" }
                }
                if let Some(message) = props.message.as_ref() {
                    div { class: "alert alert-success", "{message}" }
                }
                if let Some(warning) = props.warning.as_ref() {
                    div { class: "alert alert-warning", "{warning}" }
                }
                div { class: "nav",
                    button { class: nav_class(&active, "current"), "data-target": "current", "Watching" }
                    button { class: nav_class(&active, "upcoming"), "data-target": "upcoming", "Premieres" }
                    button { class: nav_class(&active, "settings"), "data-target": "settings", "Rules" }
                    button { class: nav_class(&active, "assign_rules"), "data-target": "assign_rules", "Assign" }
                    button { class: nav_class(&active, "actions"), "data-target": "actions", "Actions" }
                    button { class: nav_class(&active, "logs"), "data-target": "logs", "Logs" }
                }
                div { class: "content",
                    div { id: "current", class: section_class(&active, "current"), "data-section": "current",
                        h2 { class: "card-title", "Currently watching" }
                        p { class: "muted", "Series with the most recently added monitored episode." }
                        if props.current.is_empty() {
                            p { class: "muted", "Nothing to show yet." }
                        }
                        div { class: "series-grid",
                            for show in props.current.iter() {
                                a { class: "series-card", href: "{show.series_url}", target: "_blank",
                                    img { src: "{show.artwork_url}", alt: "{show.name}" }
                                    span { class: "series-name", "{show.name}" }
                                    span { class: "series-meta", "{show.latest_episode}" }
                                }
                            }
                        }
                    }
                    div { id: "upcoming", class: section_class(&active, "upcoming"), "data-section": "upcoming",
                        h2 { class: "card-title", "Upcoming premieres" }
                        p { class: "muted", "Series with a scheduled next airing, soonest first." }
                        if props.upcoming.is_empty() {
                            p { class: "muted", "No upcoming premieres." }
                        }
                        div { class: "series-grid",
                            for show in props.upcoming.iter() {
                                a { class: "series-card", href: "{show.series_url}", target: "_blank",
                                    img { src: "{show.artwork_url}", alt: "{show.name}" }
                                    span { class: "series-name", "{show.name}" }
                                    span { class: "series-meta", "{show.next_airing}" }
                                }
                            }
                        }
                    }
                    div { id: "settings", class: section_class(&active, "settings"), "data-section": "settings",
                        h2 { class: "card-title", "Rules" }
                        p { class: "muted", "Pick a rule to edit it, or add a new one." }
                        div { class: "form-grid",
                            label { class: "field",
                                span { "Rule" }
                                select { id: "rule_name",
                                    for (name, rule) in props.rules.iter() {
                                        option {
                                            value: "{name}",
                                            selected: name == DEFAULT_RULE,
                                            "data-get": "{rule.get_option}",
                                            "data-action": "{rule.action_option}",
                                            "data-keep": "{rule.keep_watched}",
                                            "data-monitor": "{rule.monitor_watched}",
                                            "{name}"
                                        }
                                    }
                                    option { value: ADD_NEW, "Add new rule" }
                                }
                            }
                            label { id: "new_rule_name_group", class: "field", style: "display: none",
                                span { "New rule name" }
                                input { id: "new_rule_name", r#type: "text" }
                            }
                            label { class: "field",
                                span { "Get" }
                                input { id: "get_option", r#type: "text", placeholder: "1, season or all" }
                            }
                            label { class: "field",
                                span { "Action" }
                                select { id: "action_option",
                                    option { value: "search", "Search" }
                                    option { value: "monitor", "Monitor" }
                                }
                            }
                            label { class: "field",
                                span { "Keep watched" }
                                input { id: "keep_watched", r#type: "text", placeholder: "1, season or all" }
                            }
                            label { class: "field",
                                span { "Monitor watched" }
                                select { id: "monitor_watched",
                                    option { value: "true", "Yes" }
                                    option { value: "false", "No" }
                                }
                            }
                        }
                        div { class: "toolbar",
                            button { id: "save_rule", class: "primary", "Save rule" }
                            button { id: "delete_rule", class: "danger", "Delete rule" }
                        }
                        div { id: "rule-status", class: "status" }
                    }
                    div { id: "assign_rules", class: section_class(&active, "assign_rules"), "data-section": "assign_rules",
                        h2 { class: "card-title", "Assign rules" }
                        p { class: "muted", "Checked series are assigned to the selected rule when you save." }
                        label { class: "field",
                            span { "Rule to assign" }
                            select { id: "assign_rule_name",
                                for name in props.rules.keys() {
                                    option { value: "{name}", selected: *name == selected, "{name}" }
                                }
                            }
                        }
                        div { id: "series_list", class: "rule-groups",
                            if props.tree.groups.is_empty() {
                                p { class: "muted", "No series found." }
                            }
                            for (index, group) in props.tree.groups.iter().enumerate() {
                                GroupCard { key: "{index}", group: group.clone(), index }
                            }
                        }
                        div { class: "toolbar",
                            button { id: "assign_save", class: "primary", "Assign to selected rule" }
                        }
                        div { id: "assign-status", class: "status" }
                    }
                    div { id: "actions", class: section_class(&active, "actions"), "data-section": "actions",
                        h2 { class: "card-title", "Actions" }
                        p { class: "muted", "One-off requests to the media setup." }
                        div { class: "toolbar",
                            button { class: "pill-btn", "data-action": "wake", "Wake device" }
                            button { class: "pill-btn", "data-action": "refresh", "Refresh media server" }
                        }
                        div { class: "form-grid",
                            label { class: "field",
                                span { "Episode rating key" }
                                input { id: "rating_key", r#type: "text" }
                            }
                        }
                        button { class: "pill-btn", "data-action": "mark-watched", "Mark watched" }
                        div { id: "action-status", class: "status" }
                    }
                    div { id: "logs", class: section_class(&active, "logs"), "data-section": "logs",
                        h2 { class: "card-title", "Missing episodes log" }
                        pre { id: "log-content", class: "log", "Loading..." }
                    }
                }
            }
        }
        script { src: "/assets/dashboard.js" }
    }
}

#[component]
fn GroupCard(group: RuleGroup, index: usize) -> Element {
    let dom_id = group_dom_id(index, &group.key);
    let summary = group
        .header
        .summary
        .as_ref()
        .map(|summary| summary.describe())
        .unwrap_or_default();
    let count = group.header.member_count;

    rsx! {
        div { class: "rule-group", id: "{dom_id}",
            div { class: "rule-group-head",
                label { class: "checkbox",
                    input { r#type: "checkbox", checked: group.all_checked, "data-group-toggle": "{dom_id}" }
                    span { "Select all" }
                }
                h3 { class: "rule-group-title", "{group.header.label} ({count})" }
                if !summary.is_empty() {
                    span { class: "rule-summary", "{summary}" }
                }
            }
            div { class: "rule-grid",
                for row in group.rows.iter() {
                    label { class: "checkbox", key: "{row.series_id}",
                        input {
                            r#type: "checkbox",
                            checked: row.checked,
                            "data-series-id": "{row.series_id}",
                            "data-member-of": "{dom_id}",
                        }
                        span { "{row.title}" }
                    }
                }
            }
        }
    }
}

#[component]
fn ErrorPage(props: ErrorProps) -> Element {
    rsx! {
        link { rel: "stylesheet", href: "/assets/dashboard.css" }
        div { class: "page",
            div { class: "shell",
                h1 { class: "title", "Series dashboard" }
                div { class: "alert alert-error", "Configuration error: {props.message}" }
                p { class: "muted", "Fix the configuration file and reload the page." }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{SeriesAssignment, render_groups};

    fn rule() -> Rule {
        Rule {
            get_option: "1".into(),
            action_option: "search".into(),
            keep_watched: "1".into(),
            monitor_watched: false,
            series: Vec::new(),
        }
    }

    fn page(selected: &str) -> DashboardProps {
        let mut rules = BTreeMap::new();
        rules.insert(DEFAULT_RULE.to_string(), rule());
        rules.insert("binge".to_string(), rule());
        let assignments = vec![
            SeriesAssignment {
                series_id: 1,
                title: "Zeta Files".into(),
                rule: Some(DEFAULT_RULE.into()),
            },
            SeriesAssignment {
                series_id: 2,
                title: "Loose <End>".into(),
                rule: None,
            },
            SeriesAssignment {
                series_id: 3,
                title: "Binge Show".into(),
                rule: Some("binge".into()),
            },
        ];
        let tree = render_groups(&assignments, &rules, Some(selected));
        DashboardProps {
            section: "assign_rules".into(),
            message: Some("Saved".into()),
            warning: None,
            selected: Some(selected.into()),
            rules,
            tree,
            current: Vec::new(),
            upcoming: Vec::new(),
        }
    }

    #[test]
    fn groups_render_in_tree_order() {
        let html = render_html(page("binge"));
        let binge = html.find("Binge Show").unwrap();
        let zeta = html.find("Zeta Files").unwrap();
        let loose = html.find("Loose").unwrap();
        assert!(binge < zeta);
        assert!(zeta < loose);
        assert!(html.contains("data-member-of=\"group-unassigned\""));
        assert!(html.contains("Saved"));
    }

    #[test]
    fn titles_are_escaped() {
        let html = render_html(page(DEFAULT_RULE));
        assert!(!html.contains("Loose <End>"));
    }

    #[test]
    fn rule_options_carry_their_settings() {
        let html = render_html(page(DEFAULT_RULE));
        assert!(html.contains("data-action=\"search\""));
        assert!(html.contains("value=\"add_new\""));
    }

    #[test]
    fn error_page_shows_the_cause() {
        let html = render_error_html("bad json");
        assert!(html.contains("Configuration error: bad json"));
        let escaped = render_error_html("<b>key</b>");
        assert!(escaped.contains("&lt;b&gt;key"));
    }

    #[test]
    fn dom_ids_do_not_collide_with_sentinel() {
        assert_eq!(group_dom_id(0, &GroupKey::Rule("unassigned".into())), "group-0");
        assert_eq!(group_dom_id(3, &GroupKey::Unassigned), "group-unassigned");
    }
}
