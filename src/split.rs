//! Compound cell splitting.
//!
//! A compound cell joins the sub-fields of one record with `;`. Free-text
//! sub-fields (comments, file names) may themselves contain `;`, so a naive
//! split can yield more fragments than the schema has fields. [`Splitter`]
//! re-merges adjacent fragments using the field predicates and reports how
//! the cell was resolved. It never touches the dataset; writing the result
//! back is the reconciler's job.

use std::borrow::Cow;

use itertools::Itertools;
use serde::Serialize;
use thiserror::Error;

use crate::predicates::{Predicate, PredicateRegistry};

pub const DELIMITER: char = ';';
pub const ESCAPED_DELIMITER: &str = "%3b";

/// Upper bound on merge candidates collected for one cell.
const MAX_CANDIDATES: usize = 16;
/// Upper bound on predicate checks spent merging one cell.
const MAX_VISITS: usize = 50_000;

const USERNAME_FIELD: &str = "username";

pub fn escape_delimiter(value: &str) -> Cow<'_, str> {
    if value.contains(DELIMITER) {
        Cow::Owned(value.replace(DELIMITER, ESCAPED_DELIMITER))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn unescape_delimiter(value: &str) -> Cow<'_, str> {
    if value.contains(ESCAPED_DELIMITER) || value.contains("%3B") {
        Cow::Owned(
            value
                .replace(ESCAPED_DELIMITER, ";")
                .replace("%3B", ";"),
        )
    } else {
        Cow::Borrowed(value)
    }
}

/// Joins field values into a stored cell, escaping delimiters inside values.
pub fn encode_fields<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|value| escape_delimiter(value.as_ref()))
        .join(";")
}

pub fn fragment_count(raw: &str) -> usize {
    raw.split(DELIMITER).count()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("expected {expected} field(s) but found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("{candidates} different field boundaries validate (suggested: {suggestion})")]
    Ambiguous {
        candidates: usize,
        suggestion: String,
    },
    #[error("no merge of {found} fragment(s) into {expected} field(s) validates")]
    Unresolved { expected: usize, found: usize },
    #[error("too many ways to merge {found} fragment(s) into {expected} field(s)")]
    SearchExhausted { expected: usize, found: usize },
    #[error("'{value}' is not a valid {field}")]
    InvalidValue { field: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Resolution {
    /// The first split already matched the schema.
    Clean,
    /// Fragments were re-merged along the only boundary set that validates.
    Merged,
    /// A missing username was filled with the unknown-user placeholder.
    Repaired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub values: Vec<String>,
    pub resolution: Resolution,
    /// Schema fields whose value failed its predicate on a clean split.
    pub suspect_fields: Vec<String>,
}

impl Decoded {
    /// Cell text to store for this record.
    pub fn encode(&self) -> String {
        encode_fields(&self.values)
    }
}

/// One decoded compound value, keyed by schema field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubRecord {
    fields: Vec<(String, String)>,
}

impl SubRecord {
    /// Empty values are dropped. Escaped delimiters are decoded except in
    /// percent-encoded fields such as attachment URLs, where `%3b` is part
    /// of the value.
    pub fn from_values<S: AsRef<str>>(
        schema: &[String],
        values: &[S],
        registry: &PredicateRegistry,
    ) -> Self {
        let fields = schema
            .iter()
            .zip(values)
            .filter(|(_, value)| !value.as_ref().is_empty())
            .map(|(name, value)| {
                let value = value.as_ref();
                let value = if registry.get(name).is_percent_encoded() {
                    value.to_string()
                } else {
                    unescape_delimiter(value).into_owned()
                };
                (name.clone(), value)
            })
            .collect();
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Fragment boundaries of a raw cell. Spans are sliced out of the cell
/// instead of re-joined.
struct Fragments<'r> {
    raw: &'r str,
    /// Byte offset of every fragment start, then `raw.len() + 1`.
    starts: Vec<usize>,
}

impl<'r> Fragments<'r> {
    fn new(raw: &'r str) -> Self {
        let mut starts = vec![0];
        starts.extend(raw.match_indices(DELIMITER).map(|(idx, _)| idx + 1));
        starts.push(raw.len() + 1);
        Self { raw, starts }
    }

    fn len(&self) -> usize {
        self.starts.len() - 1
    }

    /// Fragments `start..end` joined by their original delimiters.
    fn span(&self, start: usize, end: usize) -> &'r str {
        &self.raw[self.starts[start]..self.starts[end] - 1]
    }
}

/// Depth-first search over field boundaries. Unmergeable fields only ever
/// take one fragment, and the total number of predicate checks is bounded.
struct MergeSearch<'r> {
    fragments: Fragments<'r>,
    predicates: Vec<Predicate>,
    current: Vec<&'r str>,
    found: Vec<Vec<String>>,
    visits: usize,
}

impl<'r> MergeSearch<'r> {
    fn new(raw: &'r str, predicates: Vec<Predicate>) -> Self {
        Self {
            fragments: Fragments::new(raw),
            current: Vec::with_capacity(predicates.len()),
            predicates,
            found: Vec::new(),
            visits: 0,
        }
    }

    fn exhausted(&self) -> bool {
        self.visits >= MAX_VISITS
    }

    fn done(&self) -> bool {
        self.found.len() >= MAX_CANDIDATES || self.exhausted()
    }

    fn accept(&mut self, field: usize, start: usize, end: usize) -> Option<&'r str> {
        let predicate = self.predicates[field];
        if end - start > 1 && !predicate.mergeable() {
            return None;
        }
        self.visits += 1;
        let value = self.fragments.span(start, end);
        predicate.accepts(value).then_some(value)
    }

    /// Shorter leading fields are tried first, so the first candidate is
    /// the one a left-to-right scan would pick.
    fn run(&mut self, start: usize) {
        if self.done() {
            return;
        }
        let field = self.current.len();
        let remaining = self.predicates.len() - field;
        let total = self.fragments.len();
        if remaining == 1 {
            if let Some(value) = self.accept(field, start, total) {
                let mut candidate = self
                    .current
                    .iter()
                    .map(|value| value.to_string())
                    .collect::<Vec<_>>();
                candidate.push(value.to_string());
                self.found.push(candidate);
            }
            return;
        }
        let last_end = if self.predicates[field].mergeable() {
            total - (remaining - 1)
        } else {
            start + 1
        };
        for end in start + 1..=last_end {
            if self.done() {
                return;
            }
            let Some(value) = self.accept(field, start, end) else {
                continue;
            };
            self.current.push(value);
            self.run(end);
            self.current.pop();
        }
    }
}

pub struct Splitter<'a> {
    registry: &'a PredicateRegistry,
    unknown_user: &'a str,
}

impl<'a> Splitter<'a> {
    pub fn new(registry: &'a PredicateRegistry, unknown_user: &'a str) -> Self {
        Self {
            registry,
            unknown_user,
        }
    }

    pub fn decode(&self, raw: &str, schema: &[String]) -> Result<Decoded, SplitError> {
        let fragments = raw.split(DELIMITER).collect::<Vec<_>>();
        let expected = schema.len();
        let found = fragments.len();
        if found == expected {
            let suspect_fields = schema
                .iter()
                .zip(&fragments)
                .filter(|(field, value)| !self.registry.accepts(field, value))
                .map(|(field, _)| field.clone())
                .collect();
            return Ok(Decoded {
                values: fragments.iter().map(|f| f.to_string()).collect(),
                resolution: Resolution::Clean,
                suspect_fields,
            });
        }
        if found < expected {
            return self
                .repair_missing_username(&fragments, schema)
                .ok_or(SplitError::ArityMismatch { expected, found });
        }

        let search = self.merge_candidates(raw, schema);
        let exhausted = search.exhausted();
        let mut candidates = search.found;
        match candidates.len() {
            0 | 1 if exhausted => {
                Err(SplitError::SearchExhausted { expected, found })
            }
            0 => Err(SplitError::Unresolved { expected, found }),
            1 => Ok(Decoded {
                values: candidates.pop().unwrap_or_default(),
                resolution: Resolution::Merged,
                suspect_fields: Vec::new(),
            }),
            count => Err(SplitError::Ambiguous {
                candidates: count,
                suggestion: encode_fields(&candidates[0]),
            }),
        }
    }

    /// Named sub-fields of a decoded cell.
    pub fn record(&self, decoded: &Decoded, schema: &[String]) -> SubRecord {
        SubRecord::from_values(schema, &decoded.values, self.registry)
    }

    /// Every way of grouping the fragments of `raw` into `schema.len()`
    /// fields where each field validates.
    fn merge_candidates<'r>(&self, raw: &'r str, schema: &[String]) -> MergeSearch<'r> {
        let predicates = schema.iter().map(|field| self.registry.get(field)).collect();
        let mut search = MergeSearch::new(raw, predicates);
        if !schema.is_empty() && search.fragments.len() >= schema.len() {
            search.run(0);
        }
        search
    }

    fn repair_missing_username(&self, fragments: &[&str], schema: &[String]) -> Option<Decoded> {
        if fragments.len() + 1 != schema.len() {
            return None;
        }
        let position = schema.iter().position(|field| field == USERNAME_FIELD)?;
        let mut values = fragments.iter().map(|f| f.to_string()).collect::<Vec<_>>();
        values.insert(position, self.unknown_user.to_string());
        let valid = schema
            .iter()
            .zip(&values)
            .all(|(field, value)| self.registry.accepts(field, value));
        valid.then_some(Decoded {
            values,
            resolution: Resolution::Repaired,
            suspect_fields: Vec::new(),
        })
    }
}
