//! Migration configuration: compound schemas, column classification lists,
//! and the derived value tables.
//!
//! The configuration is loaded once from YAML (or taken from
//! [`MigrationConfig::default`], which mirrors a stock Jira export) and is
//! immutable afterwards. Every stage of the pipeline borrows it.

use std::{
    collections::{BTreeMap, HashSet},
    fs::File,
    io::BufReader,
    path::Path,
};

use anyhow::{Context, Result};
use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_ISSUE_KEY_COLUMN: &str = "Issue key";
pub const DEFAULT_UNKNOWN_USER: &str = "Unknown";

/// Simple-column kind holding usernames; the user table reads these columns.
pub const USERNAME_KIND: &str = "username";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Schema '{0}' has no fields")]
    EmptySchema(String),
    #[error("Compound column '{column}' refers to missing schema '{schema}'")]
    MissingSchema { column: String, schema: String },
    #[error("Column '{0}' is listed as both a simple and a compound column")]
    DuplicateColumn(String),
    #[error("Value table '{0}' lists no columns")]
    EmptyValueTable(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueTableConfig {
    pub name: String,
    #[serde(default = "ValueTableConfig::default_header")]
    pub header: String,
    pub columns: Vec<String>,
}

impl ValueTableConfig {
    fn default_header() -> String {
        "name".to_string()
    }

    fn new(name: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            header: Self::default_header(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigrationConfig {
    pub issue_key_column: String,
    /// Placeholder written when a compound cell is missing its username.
    pub unknown_user: String,
    /// Compound schema name -> ordered sub-field names.
    pub schemas: BTreeMap<String, Vec<String>>,
    /// Simple value kind (`username`, `datetime`, ...) -> column names.
    pub simple_columns: BTreeMap<String, Vec<String>>,
    pub compound_columns: Vec<String>,
    /// Explicit column -> schema overrides. Columns not listed here use the
    /// snake-cased column name as their schema key.
    pub compound_schemas: BTreeMap<String, String>,
    pub column_exclusions: Vec<String>,
    pub value_tables: Vec<ValueTableConfig>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        let schema = |fields: &[&str]| fields.iter().map(|f| f.to_string()).collect::<Vec<_>>();
        let mut schemas = BTreeMap::new();
        schemas.insert(
            "attachment".to_string(),
            schema(&["datetime", "username", "filename", "location"]),
        );
        schemas.insert(
            "comment".to_string(),
            schema(&["datetime", "username", "comment"]),
        );
        schemas.insert(
            "log_work".to_string(),
            schema(&["comment", "datetime", "username", "seconds"]),
        );

        let mut simple_columns = BTreeMap::new();
        simple_columns.insert(
            USERNAME_KIND.to_string(),
            schema(&["Assignee", "Reporter", "Creator", "Watchers"]),
        );
        simple_columns.insert(
            "datetime".to_string(),
            schema(&["Created", "Updated", "Last Viewed", "Resolved", "Due Date"]),
        );

        Self {
            issue_key_column: DEFAULT_ISSUE_KEY_COLUMN.to_string(),
            unknown_user: DEFAULT_UNKNOWN_USER.to_string(),
            schemas,
            simple_columns,
            compound_columns: schema(&["Attachment", "Comment", "Log Work"]),
            compound_schemas: BTreeMap::new(),
            column_exclusions: schema(&["Last Comment"]),
            value_tables: vec![
                ValueTableConfig::new("Components", &["Component/s"]),
                ValueTableConfig::new("Sprints", &["Sprint"]),
                ValueTableConfig::new("Versions", &["Fix Version/s", "Affects Version/s"]),
            ],
        }
    }
}

impl MigrationConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: MigrationConfig =
            serde_yaml::from_reader(reader).context("Parsing config YAML")?;
        config
            .validate()
            .with_context(|| format!("Validating config file {path:?}"))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Creating config file {path:?}"))?;
        serde_yaml::to_writer(file, self).context("Writing config YAML")
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if let Some((name, _)) = self.schemas.iter().find(|(_, fields)| fields.is_empty()) {
            return Err(ConfigError::EmptySchema(name.clone()));
        }
        for column in &self.compound_columns {
            let schema = self.schema_name_for(column);
            if !self.schemas.contains_key(&schema) {
                return Err(ConfigError::MissingSchema {
                    column: column.clone(),
                    schema,
                });
            }
        }
        let compound: HashSet<&str> = self.compound_columns.iter().map(String::as_str).collect();
        if let Some(column) = self
            .simple_columns
            .values()
            .flatten()
            .find(|column| compound.contains(column.as_str()))
        {
            return Err(ConfigError::DuplicateColumn(column.clone()));
        }
        if let Some(table) = self.value_tables.iter().find(|t| t.columns.is_empty()) {
            return Err(ConfigError::EmptyValueTable(table.name.clone()));
        }
        Ok(())
    }

    /// Schema key used for a compound column.
    pub fn schema_name_for(&self, column: &str) -> String {
        self.compound_schemas
            .get(column)
            .cloned()
            .unwrap_or_else(|| column.to_snake_case())
    }

    pub fn schema(&self, name: &str) -> Option<&[String]> {
        self.schemas.get(name).map(Vec::as_slice)
    }

    pub fn value_table(&self, name: &str) -> Option<&ValueTableConfig> {
        self.value_tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name))
    }
}
