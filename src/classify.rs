use std::{collections::HashMap, fmt};

use log::warn;
use serde::Serialize;

use crate::config::MigrationConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ColumnClass {
    /// Single value column; the payload is the configured value kind.
    Simple(String),
    /// Semicolon-joined sub-records; the payload is the schema name.
    Compound(String),
    Excluded,
    Unclassified,
}

impl ColumnClass {
    pub fn is_compound(&self) -> bool {
        matches!(self, ColumnClass::Compound(_))
    }

    pub fn schema_name(&self) -> Option<&str> {
        match self {
            ColumnClass::Compound(schema) => Some(schema),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnClass::Simple(kind) => write!(f, "simple({kind})"),
            ColumnClass::Compound(schema) => write!(f, "compound({schema})"),
            ColumnClass::Excluded => f.write_str("excluded"),
            ColumnClass::Unclassified => f.write_str("unclassified"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedColumn {
    pub index: usize,
    pub name: String,
    pub class: ColumnClass,
}

/// Immutable column-name lookup built once from the configuration.
#[derive(Debug, Clone)]
pub struct Classifier {
    classes: HashMap<String, ColumnClass>,
}

impl Classifier {
    pub fn new(config: &MigrationConfig) -> Self {
        let mut classes = HashMap::new();
        for (kind, columns) in &config.simple_columns {
            for column in columns {
                classes.insert(column.clone(), ColumnClass::Simple(kind.clone()));
            }
        }
        for column in &config.compound_columns {
            let schema = config.schema_name_for(column);
            let class = if config.schema(&schema).is_some() {
                ColumnClass::Compound(schema)
            } else {
                warn!("Compound column '{column}' has no schema '{schema}'; leaving unclassified");
                ColumnClass::Unclassified
            };
            classes.insert(column.clone(), class);
        }
        for column in &config.column_exclusions {
            classes.insert(column.clone(), ColumnClass::Excluded);
        }
        Self { classes }
    }

    pub fn classify(&self, column: &str) -> ColumnClass {
        self.classes
            .get(column)
            .cloned()
            .unwrap_or(ColumnClass::Unclassified)
    }

    pub fn classify_headers(&self, headers: &[String]) -> Vec<ClassifiedColumn> {
        headers
            .iter()
            .enumerate()
            .map(|(index, name)| ClassifiedColumn {
                index,
                name: name.clone(),
                class: self.classify(name),
            })
            .collect()
    }

    /// Header positions of simple columns holding the given value kind.
    pub fn simple_indices(&self, headers: &[String], kind: &str) -> Vec<usize> {
        self.classify_headers(headers)
            .into_iter()
            .filter(|column| matches!(&column.class, ColumnClass::Simple(k) if k == kind))
            .map(|column| column.index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn classify_uses_configured_lists() {
        let classifier = Classifier::new(&MigrationConfig::default());
        assert_eq!(
            classifier.classify("Assignee"),
            ColumnClass::Simple("username".to_string())
        );
        assert_eq!(
            classifier.classify("Log Work"),
            ColumnClass::Compound("log_work".to_string())
        );
        assert_eq!(classifier.classify("Last Comment"), ColumnClass::Excluded);
        assert_eq!(classifier.classify("Summary"), ColumnClass::Unclassified);
    }

    #[test]
    fn classify_is_case_sensitive() {
        let classifier = Classifier::new(&MigrationConfig::default());
        assert_eq!(classifier.classify("comment"), ColumnClass::Unclassified);
        assert_eq!(classifier.classify("assignee"), ColumnClass::Unclassified);
    }

    #[test]
    fn exclusion_takes_precedence_over_compound() {
        let mut config = MigrationConfig::default();
        config.column_exclusions.push("Comment".to_string());
        let classifier = Classifier::new(&config);
        assert_eq!(classifier.classify("Comment"), ColumnClass::Excluded);
    }

    #[test]
    fn compound_column_without_schema_is_unclassified() {
        let mut config = MigrationConfig::default();
        config.compound_columns.push("Checklist".to_string());
        let classifier = Classifier::new(&config);
        assert_eq!(classifier.classify("Checklist"), ColumnClass::Unclassified);
    }

    #[test]
    fn repeated_headers_are_classified_at_every_position() {
        let classifier = Classifier::new(&MigrationConfig::default());
        let columns = classifier.classify_headers(&headers(&[
            "Issue key",
            "Comment",
            "Watchers",
            "Comment",
            "Watchers",
        ]));
        assert_eq!(columns.len(), 5);
        assert_eq!(columns[3].index, 3);
        assert!(columns[3].class.is_compound());
        assert_eq!(
            classifier.simple_indices(
                &headers(&["Watchers", "Summary", "Watchers"]),
                "username"
            ),
            vec![0, 2]
        );
    }
}
