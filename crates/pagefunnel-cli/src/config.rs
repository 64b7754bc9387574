use crate::errors::CliError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "pagefunnel.yml";

/// How the target scope is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplaceMode {
    /// One transaction when the backend supports it, two steps otherwise.
    #[default]
    Auto,
    /// Always delete, then insert. An insert failure leaves the scope empty.
    TwoStep,
}

impl std::str::FromStr for ReplaceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(ReplaceMode::Auto),
            "two_step" => Ok(ReplaceMode::TwoStep),
            _ => Err(format!(
                "Invalid replace mode: {}. Must be 'auto' or 'two_step'",
                s
            )),
        }
    }
}

impl<'de> Deserialize<'de> for ReplaceMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for ReplaceMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ReplaceMode::Auto => serializer.serialize_str("auto"),
            ReplaceMode::TwoStep => serializer.serialize_str("two_step"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_targets")]
    pub targets: HashMap<String, Target>,
    #[serde(default)]
    pub source: SourceConfig,
    /// Country code -> company code
    #[serde(default = "default_companies")]
    pub companies: BTreeMap<String, i16>,
    #[serde(default)]
    pub replace_mode: ReplaceMode,
    /// Offset of the reporting locale from UTC
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i64,
}

fn default_name() -> String {
    "pagefunnel".to_string()
}

fn default_version() -> u32 {
    1
}

fn default_targets() -> HashMap<String, Target> {
    HashMap::from([("dev".to_string(), Target::default())])
}

fn default_companies() -> BTreeMap<String, i16> {
    BTreeMap::from([("th".to_string(), 11)])
}

fn default_utc_offset_hours() -> i64 {
    7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            targets: default_targets(),
            source: SourceConfig::default(),
            companies: default_companies(),
            replace_mode: ReplaceMode::default(),
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Target {
    #[serde(rename = "type", default = "default_target_type")]
    pub target_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default = "default_target_schema")]
    pub schema: String,
    #[serde(default = "default_target_table")]
    pub table: String,
}

fn default_target_type() -> String {
    "duckdb".to_string()
}

fn default_target_schema() -> String {
    "customer_loyalty".to_string()
}

fn default_target_table() -> String {
    "AA_DAILY_TRN_PAGENAME".to_string()
}

impl Default for Target {
    fn default() -> Self {
        Self {
            target_type: default_target_type(),
            database: Some("pagefunnel.duckdb".to_string()),
            schema: default_target_schema(),
            table: default_target_table(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    DuckDB,
}

impl Target {
    /// Get the backend type from the target_type field.
    pub fn backend_type(&self) -> Result<BackendType, CliError> {
        match self.target_type.to_lowercase().as_str() {
            "duckdb" => Ok(BackendType::DuckDB),
            _ => Err(CliError::UnsupportedBackend {
                target_type: self.target_type.clone(),
            }),
        }
    }
}

/// Where clickstream events are read from.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_schema")]
    pub schema: String,
    #[serde(default = "default_source_table")]
    pub table: String,
    #[serde(default)]
    pub columns: SourceColumns,
}

fn default_source_schema() -> String {
    "adobe_analytic".to_string()
}

fn default_source_table() -> String {
    "webapp_event".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            schema: default_source_schema(),
            table: default_source_table(),
            columns: SourceColumns::default(),
        }
    }
}

/// Source column names for the event attributes the job reads.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceColumns {
    pub timestamp: String,
    pub subject: String,
    pub page: String,
    pub country: String,
}

impl Default for SourceColumns {
    fn default() -> Self {
        Self {
            timestamp: "date_time".to_string(),
            subject: "post_evar1".to_string(),
            page: "post_evar2".to_string(),
            country: "country".to_string(),
        }
    }
}

/// Plain SQL identifier: letters, digits and underscores, not starting with a digit.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CliError::ConfigLoadError {
            path: path.to_path_buf(),
            source: e.into(),
        })?;

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| CliError::ConfigLoadError {
                path: path.to_path_buf(),
                source: e.into(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load `pagefunnel.yml` from the project root above `start_dir`, or fall
    /// back to the built-in defaults when there is none.
    pub fn discover(start_dir: &Path) -> Result<(Self, Option<PathBuf>)> {
        match find_project_root(start_dir) {
            Some(root) => {
                let path = root.join(CONFIG_FILE);
                Ok((Self::load(&path)?, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Reject identifiers that would be spliced into SQL unquoted.
    pub fn validate(&self) -> Result<(), CliError> {
        let mut names = vec![
            ("source.schema", &self.source.schema),
            ("source.table", &self.source.table),
            ("source.columns.timestamp", &self.source.columns.timestamp),
            ("source.columns.subject", &self.source.columns.subject),
            ("source.columns.page", &self.source.columns.page),
            ("source.columns.country", &self.source.columns.country),
        ];
        for target in self.targets.values() {
            names.push(("targets.schema", &target.schema));
            names.push(("targets.table", &target.table));
        }

        if let Some((field, value)) = names.into_iter().find(|(_, v)| !is_identifier(v)) {
            return Err(CliError::InvalidConfig {
                message: format!("{} '{}' is not a plain SQL identifier", field, value),
            });
        }

        if self.companies.is_empty() {
            return Err(CliError::InvalidConfig {
                message: "companies must map at least one country".to_string(),
            });
        }

        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(CliError::InvalidConfig {
                message: format!("utc_offset_hours {} is out of range", self.utc_offset_hours),
            });
        }

        Ok(())
    }

    pub fn target(&self, name: &str) -> Result<&Target, CliError> {
        self.targets.get(name).ok_or_else(|| {
            let mut available: Vec<_> = self.targets.keys().cloned().collect();
            available.sort();
            CliError::TargetNotFound {
                target: name.to_string(),
                available: available.join(", "),
            }
        })
    }
}

/// Find the project root by looking for pagefunnel.yml
pub fn find_project_root(start_dir: &Path) -> Option<PathBuf> {
    let mut current = start_dir.to_path_buf();

    // Walk up max 5 levels
    for _ in 0..5 {
        if current.join(CONFIG_FILE).exists() {
            return Some(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_full_config_deserialization() {
        let yaml = r#"
name: loyalty_pagename
version: 1
targets:
  dev:
    type: duckdb
    database: warehouse.duckdb
    schema: customer_loyalty
    table: AA_DAILY_TRN_PAGENAME
source:
  schema: adobe_analytic
  table: webapp_event
  columns:
    subject: post_evar1
    page: post_evar2
companies:
  th: 11
  my: 12
replace_mode: two_step
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name, "loyalty_pagename");
        assert_eq!(config.companies.get("my"), Some(&12));
        assert_eq!(config.replace_mode, ReplaceMode::TwoStep);
        assert_eq!(config.source.columns.timestamp, "date_time");
        assert_eq!(config.utc_offset_hours, 7);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.target("dev").unwrap().backend_type().unwrap(),
            BackendType::DuckDB
        );
    }

    #[test]
    fn test_defaults_from_empty_document() {
        let config: Config = serde_yaml::from_str("{}").unwrap();

        assert_eq!(config.replace_mode, ReplaceMode::Auto);
        assert_eq!(config.companies.get("th"), Some(&11));
        let dev = config.target("dev").unwrap();
        assert_eq!(dev.schema, "customer_loyalty");
        assert_eq!(dev.table, "AA_DAILY_TRN_PAGENAME");
    }

    #[test]
    fn test_invalid_replace_mode() {
        let result: Result<Config, _> = serde_yaml::from_str("replace_mode: merge");
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_identifier_columns() {
        let yaml = r#"
source:
  columns:
    page: "post_evar2; DROP TABLE x"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(CliError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_unknown_target() {
        let config = Config::default();
        let err = config.target("prod").unwrap_err();
        assert!(err.to_string().contains("dev"));
    }

    #[test]
    fn test_unsupported_backend_type() {
        let target = Target {
            target_type: "spark".to_string(),
            ..Target::default()
        };
        assert!(target.backend_type().is_err());
    }

    #[test]
    fn test_discover_walks_up() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CONFIG_FILE), "name: walked\n").unwrap();
        let nested = temp_dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let (config, path) = Config::discover(&nested).unwrap();
        assert_eq!(config.name, "walked");
        assert_eq!(path, Some(temp_dir.path().join(CONFIG_FILE)));
    }

    #[test]
    fn test_discover_without_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let (config, path) = Config::discover(temp_dir.path()).unwrap();

        assert!(path.is_none());
        assert_eq!(config.name, "pagefunnel");
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("AA_DAILY_TRN_PAGENAME"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }
}
