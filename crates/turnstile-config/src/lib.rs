//! Topic configuration files.
//!
//! A topic file is an ordered list of records:
//!
//! ```text
//! name             string, unique, required
//! permission       [string | null]       gates one slot each; null or "" = ungated
//! fireCallback     [string]              follow-up transitions
//! setGuardCallback [[string]]            guard group per slot
//! ```
//!
//! JSON files hold a bare array of records. TOML files hold `[[topic]]`
//! tables. Missing lists default to empty.
//!
//! ```
//! let topics = turnstile_config::parse_json(
//!     r#"[{"name": "bake", "permission": ["start"], "fireCallback": ["done"]}]"#,
//! )
//! .unwrap();
//! assert_eq!(topics[0].follow_ups(), ["done"]);
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use turnstile_core::{GuardGroup, Topic};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON topic file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid TOML topic file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported topic file extension: {0}")]
    UnsupportedFormat(String),

    #[error("topic #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("topic {0} is defined more than once")]
    DuplicateTopic(String),
}

/// One topic as written in a configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub name: String,
    #[serde(default)]
    pub permission: Vec<Option<String>>,
    #[serde(default, rename = "fireCallback")]
    pub fire_callback: Vec<String>,
    #[serde(default, rename = "setGuardCallback")]
    pub set_guard_callback: Vec<GuardGroup>,
}

impl TopicRecord {
    pub fn into_topic(self) -> Topic {
        Topic::new(self.name)
            .with_permissions(self.permission.into_iter().map(Option::unwrap_or_default))
            .with_follow_ups(self.fire_callback)
            .with_guard_groups(self.set_guard_callback)
    }
}

/// TOML layout: `[[topic]]` tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicFile {
    #[serde(default, rename = "topic")]
    pub topics: Vec<TopicRecord>,
}

impl TopicFile {
    /// Checks names, then converts every record in order.
    ///
    /// Guard group lengths are not checked here; a mismatched topic loads
    /// fine and fails each subscription made against it.
    pub fn into_topics(self) -> Result<Vec<Topic>, ConfigError> {
        let mut seen = HashSet::new();
        for (index, record) in self.topics.iter().enumerate() {
            if record.name.is_empty() {
                return Err(ConfigError::EmptyName { index });
            }
            if !seen.insert(record.name.as_str()) {
                return Err(ConfigError::DuplicateTopic(record.name.clone()));
            }
        }
        Ok(self.topics.into_iter().map(TopicRecord::into_topic).collect())
    }
}

pub fn parse_json(input: &str) -> Result<Vec<Topic>, ConfigError> {
    let topics: Vec<TopicRecord> = serde_json::from_str(input)?;
    TopicFile { topics }.into_topics()
}

pub fn parse_toml(input: &str) -> Result<Vec<Topic>, ConfigError> {
    let file: TopicFile = toml::from_str(input)?;
    file.into_topics()
}

/// Loads a topic file, picking the format from the extension (`json` or `toml`).
pub fn load_topics(path: impl AsRef<Path>) -> Result<Vec<Topic>, ConfigError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), format = %extension, "parsing topic file");

    let topics = match extension.as_str() {
        "json" => parse_json(&contents)?,
        "toml" => parse_toml(&contents)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };
    info!(path = %path.display(), topics = topics.len(), "topics loaded");
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_nulls_and_missing_lists() {
        let topics = parse_json(
            r#"[
                {"name": "a", "permission": ["p0", null, ""], "setGuardCallback": [["g"], [], []]},
                {"name": "b"}
            ]"#,
        )
        .unwrap();

        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].permissions(), ["p0", "", ""]);
        assert_eq!(topics[0].permission(1), None);
        assert_eq!(topics[0].guards(0), ["g"]);
        assert!(topics[0].follow_ups().is_empty());
        assert_eq!(topics[1].slots(), 0);
        assert!(topics[1].guard_groups().is_empty());
    }

    #[test]
    fn toml_topic_tables() {
        let topics = parse_toml(
            r#"
            [[topic]]
            name = "bake"
            permission = ["start"]
            fireCallback = ["done", "logged"]
            setGuardCallback = [["hot", "ready"]]

            [[topic]]
            name = "idle"
            "#,
        )
        .unwrap();

        assert_eq!(topics[0].name(), "bake");
        assert_eq!(topics[0].follow_ups(), ["done", "logged"]);
        assert_eq!(topics[0].guards(0), ["hot", "ready"]);
        assert_eq!(topics[1].name(), "idle");
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let err = parse_json(r#"[{"name": "a"}, {"name": "a"}]"#).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTopic(ref n) if n == "a"));

        let err = parse_toml("[[topic]]\nname = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyName { index: 0 }));
    }

    #[test]
    fn mismatched_guard_groups_still_load() {
        let topics = parse_json(
            r#"[{"name": "a", "permission": ["p0", "p1"], "setGuardCallback": [["g"]]}]"#,
        )
        .unwrap();
        assert_eq!(topics[0].validate().unwrap_err().as_label(), "invalid_topic");
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = std::env::temp_dir().join(format!("turnstile-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let json = dir.join("topics.json");
        fs::write(&json, r#"[{"name": "j", "permission": ["p"]}]"#).unwrap();
        assert_eq!(load_topics(&json).unwrap()[0].name(), "j");

        let toml_path = dir.join("topics.TOML");
        fs::write(&toml_path, "[[topic]]\nname = \"t\"\n").unwrap();
        assert_eq!(load_topics(&toml_path).unwrap()[0].name(), "t");

        let yaml = dir.join("topics.yaml");
        fs::write(&yaml, "- name: y\n").unwrap();
        assert!(matches!(
            load_topics(&yaml).unwrap_err(),
            ConfigError::UnsupportedFormat(ref ext) if ext == "yaml"
        ));

        assert!(matches!(
            load_topics(dir.join("missing.json")).unwrap_err(),
            ConfigError::Read { .. }
        ));

        fs::remove_dir_all(&dir).unwrap();
    }
}
