use crate::grouping::SeriesAssignment;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

pub const DEFAULT_RULE: &str = "default";
/// Select value the settings form uses for "create a new rule".
pub const ADD_NEW: &str = "add_new";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read configuration at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("configuration at {} is malformed: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write configuration at {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum RuleEditError {
    #[error("rule name is required")]
    MissingName,
    #[error("rule '{0}' not found")]
    UnknownRule(String),
    #[error("the 'default' rule cannot be deleted")]
    ProtectedRule,
    #[error(transparent)]
    Config(#[from] ConfigurationError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(deserialize_with = "string_or_number")]
    pub get_option: String,
    #[serde(deserialize_with = "string_or_number")]
    pub action_option: String,
    #[serde(deserialize_with = "string_or_number")]
    pub keep_watched: String,
    pub monitor_watched: bool,
    #[serde(default)]
    pub series: Vec<i64>,
}

/// Editable part of a rule; the series list is owned by assignment.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RuleSettings {
    pub get_option: String,
    pub action_option: String,
    pub keep_watched: String,
    pub monitor_watched: bool,
}

impl Rule {
    fn from_settings(settings: RuleSettings, series: Vec<i64>) -> Self {
        Self {
            get_option: settings.get_option,
            action_option: settings.action_option,
            keep_watched: settings.keep_watched,
            monitor_watched: settings.monitor_watched,
            series,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,
    /// Unrelated top-level keys, written back untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            DEFAULT_RULE.to_string(),
            Rule {
                get_option: "1".into(),
                action_option: "search".into(),
                keep_watched: "1".into(),
                monitor_watched: false,
                series: Vec::new(),
            },
        );
        Self {
            rules,
            extra: Map::new(),
        }
    }
}

impl RulesConfig {
    pub fn from_json(path: &Path, raw: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(raw).map_err(|source| ConfigurationError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn rule_for(&self, series_id: i64) -> Option<&str> {
        self.rules
            .iter()
            .find(|(_, rule)| rule.series.contains(&series_id))
            .map(|(name, _)| name.as_str())
    }

    pub fn assignments<'a>(
        &self,
        series: impl IntoIterator<Item = (i64, &'a str)>,
    ) -> Vec<SeriesAssignment> {
        series
            .into_iter()
            .map(|(id, title)| SeriesAssignment {
                series_id: id,
                title: title.to_string(),
                rule: self.rule_for(id).map(str::to_string),
            })
            .collect()
    }

    /// Returns the stored rule name.
    pub fn upsert_rule(
        &mut self,
        name: &str,
        settings: RuleSettings,
    ) -> Result<String, RuleEditError> {
        let name = name.trim();
        if name.is_empty() || name == ADD_NEW {
            return Err(RuleEditError::MissingName);
        }
        let series = self
            .rules
            .get(name)
            .map(|rule| rule.series.clone())
            .unwrap_or_default();
        self.rules
            .insert(name.to_string(), Rule::from_settings(settings, series));
        Ok(name.to_string())
    }

    pub fn delete_rule(&mut self, name: &str) -> Result<Rule, RuleEditError> {
        if name == DEFAULT_RULE {
            return Err(RuleEditError::ProtectedRule);
        }
        self.rules
            .remove(name)
            .ok_or_else(|| RuleEditError::UnknownRule(name.to_string()))
    }

    /// Rule that governs `series_id`: its own rule, else the default one.
    pub fn effective_rule(&self, series_id: i64) -> Option<(&str, &Rule)> {
        let name = self.rule_for(series_id).unwrap_or(DEFAULT_RULE);
        self.rules
            .get_key_value(name)
            .map(|(name, rule)| (name.as_str(), rule))
    }

    /// Replaces the rule's series list, returning how many distinct ids it now holds.
    pub fn assign(&mut self, name: &str, series_ids: &[i64]) -> Result<usize, RuleEditError> {
        if !self.rules.contains_key(name) {
            return Err(RuleEditError::UnknownRule(name.to_string()));
        }
        let mut ids: Vec<i64> = Vec::with_capacity(series_ids.len());
        for id in series_ids {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        for (other, rule) in self.rules.iter_mut() {
            if other == name {
                rule.series = ids.clone();
            } else {
                rule.series.retain(|id| !ids.contains(id));
            }
        }
        Ok(ids.len())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads a fresh snapshot, writing the default config when the file is missing.
    pub async fn load(&self) -> Result<RulesConfig, ConfigurationError> {
        if let Some(config) = self.read().await? {
            return Ok(config);
        }
        let _guard = self.write_lock.lock().await;
        self.load_locked().await
    }

    async fn read(&self) -> Result<Option<RulesConfig>, ConfigurationError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => RulesConfig::from_json(&self.path, &raw).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigurationError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Caller holds `write_lock`; another writer may have created the file meanwhile.
    async fn load_locked(&self) -> Result<RulesConfig, ConfigurationError> {
        if let Some(config) = self.read().await? {
            return Ok(config);
        }
        tracing::info!(
            "No configuration at {}, writing defaults",
            self.path.display()
        );
        let config = RulesConfig::default();
        self.save(&config).await?;
        Ok(config)
    }

    pub async fn save(&self, config: &RulesConfig) -> Result<(), ConfigurationError> {
        let write_err = |source: io::Error| ConfigurationError::Write {
            path: self.path.clone(),
            source,
        };
        let body = serde_json::to_string_pretty(config)
            .map_err(|err| write_err(io::Error::new(io::ErrorKind::InvalidData, err)))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        Ok(())
    }

    /// Load, edit and save under the write lock.
    pub async fn update<T>(
        &self,
        edit: impl FnOnce(&mut RulesConfig) -> Result<T, RuleEditError>,
    ) -> Result<T, RuleEditError> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load_locked().await?;
        let out = edit(&mut config)?;
        self.save(&config).await?;
        Ok(out)
    }
}
