//! Username table for remapping identities on the target instance.

use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    Input,
    classify::{ColumnClass, Classifier},
    cli::UsersArgs,
    config::{MigrationConfig, USERNAME_KIND},
    dataset::Dataset,
    describe_write, io_utils,
    predicates::PredicateRegistry,
    print_summary,
    split::Splitter,
};

pub const USER_TABLE_HEADERS: [&str; 2] = ["Username", "NT Username"];
/// Reserved placeholder row operators use to redirect unresolvable identities.
pub const REMAP_USER: &str = "remap_user";

const USERNAME_FIELD: &str = "username";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEntry {
    pub username: String,
    pub nt_username: String,
}

impl UserEntry {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            nt_username: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserTable {
    /// Sorted unique usernames followed by the `remap_user` sentinel.
    pub entries: Vec<UserEntry>,
}

impl UserTable {
    pub fn headers() -> Vec<String> {
        USER_TABLE_HEADERS.iter().map(|h| h.to_string()).collect()
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.entries
            .iter()
            .map(|entry| vec![entry.username.clone(), entry.nt_username.clone()])
            .collect()
    }

    /// Number of real users, excluding the sentinel.
    pub fn user_count(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }
}

/// Insertion-ordered set of usernames, compared exactly.
#[derive(Debug, Default)]
struct UserCollector {
    seen: HashSet<String>,
    users: Vec<String>,
}

impl UserCollector {
    fn add(&mut self, username: &str) {
        if username.is_empty() || self.seen.contains(username) {
            return;
        }
        self.seen.insert(username.to_string());
        self.users.push(username.to_string());
    }

    fn finish(mut self) -> UserTable {
        self.users.sort();
        let mut entries = self
            .users
            .into_iter()
            .map(UserEntry::new)
            .collect::<Vec<_>>();
        entries.push(UserEntry::new(REMAP_USER));
        UserTable { entries }
    }
}

/// Collects every distinct username from simple username columns and from the
/// `username` sub-field of compound columns. The dataset is only read; cells
/// that do not decode are logged and skipped.
pub fn build_user_table(
    dataset: &Dataset,
    config: &MigrationConfig,
    classifier: &Classifier,
) -> UserTable {
    let registry = PredicateRegistry::standard();
    let splitter = Splitter::new(&registry, &config.unknown_user);
    let key_column = dataset
        .column_indices(&config.issue_key_column)
        .first()
        .copied();

    let simple = classifier.simple_indices(dataset.headers(), USERNAME_KIND);
    let compound = classifier
        .classify_headers(dataset.headers())
        .into_iter()
        .filter_map(|column| match &column.class {
            ColumnClass::Compound(schema_name) => {
                let schema = config.schema(schema_name)?;
                schema
                    .iter()
                    .any(|field| field == USERNAME_FIELD)
                    .then(|| (column.index, column.name.clone(), schema.to_vec()))
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    debug!(
        "Reading usernames from {} simple and {} compound column(s)",
        simple.len(),
        compound.len()
    );

    let mut collector = UserCollector::default();
    for (row, cells) in dataset.rows().iter().enumerate() {
        for &column in &simple {
            collector.add(&cells[column]);
        }
        for (column, name, schema) in &compound {
            let raw = &cells[*column];
            if raw.is_empty() {
                continue;
            }
            match splitter.decode(raw, schema) {
                Ok(decoded) => {
                    if let Some(username) = splitter.record(&decoded, schema).get(USERNAME_FIELD) {
                        collector.add(username);
                    }
                }
                Err(err) => error!(
                    "{}: unable to read username from {} ({err}) = {}",
                    dataset.issue_key(row, key_column),
                    name,
                    raw
                ),
            }
        }
    }

    let table = collector.finish();
    info!("Found {} unique user(s)", table.user_count());
    table
}

pub fn execute(args: &UsersArgs) -> Result<()> {
    let source = &args.input.input;
    let from_stdin = io_utils::is_dash(source);
    if from_stdin && args.output.is_none() {
        bail!("The export is read from stdin; pass -o to name the user table file");
    }
    let mut input = Input::load(&args.input)?;
    let report = input.reconcile(&args.input, &args.correction);
    if input.dataset.is_modified() && from_stdin {
        warn!("Corrections to an export read from stdin are not saved; run `fix` to keep them");
    } else if input.dataset.is_modified() {
        let outcome = input
            .dataset
            .save(source, input.delimiter, input.encoding, !args.no_backup)
            .with_context(|| format!("Rewriting {source:?}"))?;
        describe_write(&outcome, source);
    }

    let table = build_user_table(&input.dataset, &input.config, &input.classifier);
    let destination = args
        .output
        .clone()
        .unwrap_or_else(|| io_utils::sibling_path(source, "_Users"));
    let bytes = io_utils::render_csv(
        &UserTable::headers(),
        &table.rows(),
        input.delimiter,
        input.encoding,
    )?;
    let outcome = io_utils::write_with_backup(&destination, &bytes, !args.no_backup)
        .with_context(|| format!("Writing user table to {destination:?}"))?;
    info!(
        "Writing {} user(s) plus '{REMAP_USER}' to {destination:?}",
        table.user_count()
    );
    describe_write(&outcome, &destination);
    print_summary(&report, io_utils::is_dash(&destination));
    Ok(())
}
