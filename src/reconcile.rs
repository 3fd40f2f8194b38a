//! Dataset-wide reconciliation of compound cells.
//!
//! [`reconcile`] walks every row in input order and every compound column,
//! resolves cells whose delimiter count does not match the schema, and writes
//! the settled value back with embedded delimiters escaped. Cells that cannot
//! be settled, even with operator help, are left untouched and reported so
//! the rest of the batch still goes through.

use std::collections::BTreeSet;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    classify::{ClassifiedColumn, Classifier},
    config::MigrationConfig,
    correction::{CorrectionProvider, CorrectionRequest},
    dataset::Dataset,
    predicates::PredicateRegistry,
    split::{Decoded, Resolution, SplitError, Splitter, fragment_count},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrectionKind {
    AutoMerge,
    Repair,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    /// 0-based data row.
    pub row: usize,
    pub issue_key: String,
    pub column: String,
    pub before: String,
    pub after: String,
    pub kind: CorrectionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidCell {
    pub row: usize,
    pub issue_key: String,
    pub column: String,
    pub raw: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ambiguity {
    pub row: usize,
    pub issue_key: String,
    pub column: String,
    pub candidates: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub rows_processed: usize,
    pub cells_checked: usize,
    pub clean_cells: usize,
    /// Clean cells holding at least one value that failed its predicate.
    pub suspect_cells: usize,
    pub corrections: Vec<Correction>,
    pub ambiguities: Vec<Ambiguity>,
    pub invalid: Vec<InvalidCell>,
    pub modified: bool,
}

impl ReconcileReport {
    pub fn count(&self, kind: CorrectionKind) -> usize {
        self.corrections.iter().filter(|c| c.kind == kind).count()
    }

    pub fn is_row_invalid(&self, row: usize) -> bool {
        self.invalid.iter().any(|cell| cell.row == row)
    }

    pub fn invalid_rows(&self) -> BTreeSet<usize> {
        self.invalid.iter().map(|cell| cell.row).collect()
    }

    /// Issue keys of invalid rows, in row order, without repeats.
    pub fn invalid_issue_keys(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.invalid
            .iter()
            .filter(|cell| seen.insert(cell.row))
            .map(|cell| cell.issue_key.clone())
            .collect()
    }
}

/// A compound cell whose first split does not match its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCell {
    pub row: usize,
    pub issue_key: String,
    pub column: String,
    pub expected: usize,
    pub found: usize,
}

/// Reconciles with the standard predicate registry.
pub fn reconcile(
    dataset: Dataset,
    config: &MigrationConfig,
    classifier: &Classifier,
    provider: &mut dyn CorrectionProvider,
) -> (Dataset, ReconcileReport) {
    let registry = PredicateRegistry::standard();
    Reconciler::new(config, classifier, &registry).run(dataset, provider)
}

pub struct Reconciler<'a> {
    config: &'a MigrationConfig,
    classifier: &'a Classifier,
    splitter: Splitter<'a>,
}

struct CellContext<'c> {
    row: usize,
    issue_key: &'c str,
    column: &'c str,
    schema: &'c [String],
}

impl<'a> Reconciler<'a> {
    pub fn new(
        config: &'a MigrationConfig,
        classifier: &'a Classifier,
        registry: &'a PredicateRegistry,
    ) -> Self {
        Self {
            config,
            classifier,
            splitter: Splitter::new(registry, &config.unknown_user),
        }
    }

    pub fn run(
        &self,
        mut dataset: Dataset,
        provider: &mut dyn CorrectionProvider,
    ) -> (Dataset, ReconcileReport) {
        let mut report = ReconcileReport::default();
        let key_column = dataset
            .column_indices(&self.config.issue_key_column)
            .first()
            .copied();
        if key_column.is_none() {
            warn!(
                "No '{}' column found; rows are identified by line number",
                self.config.issue_key_column
            );
        }
        let compound = self.compound_columns(dataset.headers());
        debug!("{} compound column(s) to reconcile", compound.len());

        for row in 0..dataset.len() {
            let issue_key = dataset.issue_key(row, key_column);
            for (column, schema) in &compound {
                let Some(raw) = dataset.cell(row, column.index).map(str::to_string) else {
                    continue;
                };
                if raw.is_empty() {
                    continue;
                }
                report.cells_checked += 1;
                let ctx = CellContext {
                    row,
                    issue_key: &issue_key,
                    column: &column.name,
                    schema,
                };
                if let Some(settled) = self.settle(&ctx, &raw, provider, &mut report) {
                    dataset.set_cell(row, column.index, settled);
                }
            }
            report.rows_processed += 1;
        }

        report.modified = dataset.is_modified();
        info!(
            "Reconciled {} row(s): {} compound cell(s), {} auto-merged, {} repaired, {} corrected manually, {} invalid",
            report.rows_processed,
            report.cells_checked,
            report.count(CorrectionKind::AutoMerge),
            report.count(CorrectionKind::Repair),
            report.count(CorrectionKind::Manual),
            report.invalid.len()
        );
        (dataset, report)
    }

    /// Compound cells that would need reconciling, without touching anything.
    pub fn pending(&self, dataset: &Dataset) -> Vec<PendingCell> {
        let key_column = dataset
            .column_indices(&self.config.issue_key_column)
            .first()
            .copied();
        let compound = self.compound_columns(dataset.headers());
        let mut pending = Vec::new();
        for row in 0..dataset.len() {
            for (column, schema) in &compound {
                let raw = dataset.cell(row, column.index).unwrap_or_default();
                if raw.is_empty() {
                    continue;
                }
                let found = fragment_count(raw);
                if found != schema.len() {
                    pending.push(PendingCell {
                        row,
                        issue_key: dataset.issue_key(row, key_column),
                        column: column.name.clone(),
                        expected: schema.len(),
                        found,
                    });
                }
            }
        }
        pending
    }

    fn compound_columns(&self, headers: &[String]) -> Vec<(ClassifiedColumn, Vec<String>)> {
        self.classifier
            .classify_headers(headers)
            .into_iter()
            .filter_map(|column| {
                let schema_name = column.class.schema_name()?;
                match self.config.schema(schema_name) {
                    Some(schema) => {
                        let schema = schema.to_vec();
                        Some((column, schema))
                    }
                    None => {
                        warn!("Column '{}' has no schema '{schema_name}'", column.name);
                        None
                    }
                }
            })
            .collect()
    }

    /// Returns the value to store when the cell changed.
    fn settle(
        &self,
        ctx: &CellContext<'_>,
        raw: &str,
        provider: &mut dyn CorrectionProvider,
        report: &mut ReconcileReport,
    ) -> Option<String> {
        match self.splitter.decode(raw, ctx.schema) {
            Ok(decoded) => self.accept(ctx, raw, decoded, report),
            Err(problem) => {
                if let SplitError::Ambiguous { candidates, .. } = &problem {
                    warn!(
                        "{}: {} has {} equally valid splits, not choosing one: {}",
                        ctx.issue_key, ctx.column, candidates, raw
                    );
                    report.ambiguities.push(Ambiguity {
                        row: ctx.row,
                        issue_key: ctx.issue_key.to_string(),
                        column: ctx.column.to_string(),
                        candidates: *candidates,
                    });
                } else {
                    warn!(
                        "{}: invalid {} ({} should have {} values = {}): {}",
                        ctx.issue_key,
                        ctx.column,
                        ctx.column,
                        ctx.schema.len(),
                        ctx.schema.join(";"),
                        raw
                    );
                }
                self.ask_operator(ctx, raw, problem, provider, report)
            }
        }
    }

    fn accept(
        &self,
        ctx: &CellContext<'_>,
        raw: &str,
        decoded: Decoded,
        report: &mut ReconcileReport,
    ) -> Option<String> {
        let kind = match decoded.resolution {
            Resolution::Clean => {
                report.clean_cells += 1;
                if !decoded.suspect_fields.is_empty() {
                    report.suspect_cells += 1;
                    warn!(
                        "{}: {} kept as-is, unexpected value for {}: {}",
                        ctx.issue_key,
                        ctx.column,
                        decoded.suspect_fields.join(", "),
                        raw
                    );
                }
                return None;
            }
            Resolution::Merged => CorrectionKind::AutoMerge,
            Resolution::Repaired => CorrectionKind::Repair,
        };
        let after = decoded.encode();
        match kind {
            CorrectionKind::AutoMerge => info!(
                "{}: merged {} into {} field(s) = {}",
                ctx.issue_key,
                ctx.column,
                ctx.schema.len(),
                after
            ),
            _ => warn!(
                "{}: {} missing username, filled with '{}' = {}",
                ctx.issue_key, ctx.column, self.config.unknown_user, after
            ),
        }
        Some(self.record(ctx, raw, after, kind, report))
    }

    fn ask_operator(
        &self,
        ctx: &CellContext<'_>,
        raw: &str,
        mut problem: SplitError,
        provider: &mut dyn CorrectionProvider,
        report: &mut ReconcileReport,
    ) -> Option<String> {
        let mut text = raw.to_string();
        let mut attempt = 1;
        loop {
            let request = CorrectionRequest {
                issue_key: ctx.issue_key,
                column: ctx.column,
                schema: ctx.schema,
                raw: &text,
                problem: &problem,
                attempt,
            };
            let Some(answer) = provider.correct(&request) else {
                error!(
                    "{}: unable to parse {} ({}), leaving it unchanged: {}",
                    ctx.issue_key, ctx.column, problem, raw
                );
                report.invalid.push(InvalidCell {
                    row: ctx.row,
                    issue_key: ctx.issue_key.to_string(),
                    column: ctx.column.to_string(),
                    raw: raw.to_string(),
                    reason: problem.to_string(),
                });
                return None;
            };
            match self.validate_answer(&answer, ctx.schema) {
                Ok(decoded) => {
                    let after = decoded.encode();
                    warn!(
                        "{}: {} corrected manually (row {}) = {}",
                        ctx.issue_key,
                        ctx.column,
                        ctx.row + 2,
                        after
                    );
                    return Some(self.record(ctx, raw, after, CorrectionKind::Manual, report));
                }
                Err(rejected) => {
                    warn!("{}: correction rejected, {rejected}", ctx.issue_key);
                    text = answer;
                    problem = rejected;
                    attempt += 1;
                }
            }
        }
    }

    fn validate_answer(&self, answer: &str, schema: &[String]) -> Result<Decoded, SplitError> {
        let decoded = self.splitter.decode(answer, schema)?;
        if let Some(field) = decoded.suspect_fields.first() {
            let position = schema.iter().position(|f| f == field).unwrap_or_default();
            return Err(SplitError::InvalidValue {
                field: field.clone(),
                value: decoded.values.get(position).cloned().unwrap_or_default(),
            });
        }
        Ok(decoded)
    }

    fn record(
        &self,
        ctx: &CellContext<'_>,
        before: &str,
        after: String,
        kind: CorrectionKind,
        report: &mut ReconcileReport,
    ) -> String {
        report.corrections.push(Correction {
            row: ctx.row,
            issue_key: ctx.issue_key.to_string(),
            column: ctx.column.to_string(),
            before: before.to_string(),
            after: after.clone(),
            kind,
        });
        after
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::correction::Unattended;

    struct Scripted {
        answers: VecDeque<String>,
        asked: usize,
    }

    impl Scripted {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                asked: 0,
            }
        }
    }

    impl CorrectionProvider for Scripted {
        fn correct(&mut self, _request: &CorrectionRequest<'_>) -> Option<String> {
            self.asked += 1;
            self.answers.pop_front()
        }
    }

    fn dataset(rows: &[[&str; 3]]) -> Dataset {
        let headers = ["Issue key", "Comment", "Summary"]
            .iter()
            .map(|h| h.to_string())
            .collect();
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect();
        Dataset::new(headers, rows).unwrap()
    }

    fn run(data: Dataset, provider: &mut dyn CorrectionProvider) -> (Dataset, ReconcileReport) {
        let config = MigrationConfig::default();
        let classifier = Classifier::new(&config);
        reconcile(data, &config, &classifier, provider)
    }

    #[test]
    fn embedded_semicolon_is_escaped_in_stored_cell() {
        let data = dataset(&[[
            "MIG-1",
            "2024-01-01 10:00;jdoe;Fixed the bug; added tests",
            "a;b",
        ]]);
        let (data, report) = run(data, &mut Unattended);
        assert_eq!(
            data.cell(0, 1),
            Some("2024-01-01 10:00;jdoe;Fixed the bug%3b added tests")
        );
        assert_eq!(data.cell(0, 2), Some("a;b"));
        assert!(data.is_modified());
        assert!(report.modified);
        assert_eq!(report.count(CorrectionKind::AutoMerge), 1);
        assert_eq!(report.corrections[0].issue_key, "MIG-1");
    }

    #[test]
    fn clean_dataset_is_left_unmodified() {
        let data = dataset(&[
            ["MIG-1", "2024-01-01 10:00;jdoe;Looks good", ""],
            ["MIG-2", "", ""],
        ]);
        let mut provider = Scripted::new(&[]);
        let (data, report) = run(data, &mut provider);
        assert!(!data.is_modified());
        assert!(!report.modified);
        assert_eq!(report.cells_checked, 1);
        assert_eq!(report.clean_cells, 1);
        assert_eq!(provider.asked, 0);
    }

    #[test]
    fn unattended_ambiguity_marks_row_invalid_and_continues() {
        let mut config = MigrationConfig::default();
        config.schemas.insert(
            "comment".to_string(),
            vec!["datetime".into(), "summary".into(), "comment".into()],
        );
        let classifier = Classifier::new(&config);
        let data = dataset(&[
            ["MIG-1", "2024-01-01 10:00;a;b;c", ""],
            ["MIG-2", "2024-01-02 10:00;x;y", ""],
        ]);
        let (data, report) = reconcile(data, &config, &classifier, &mut Unattended);
        assert_eq!(report.rows_processed, 2);
        assert_eq!(report.ambiguities.len(), 1);
        assert_eq!(report.invalid_issue_keys(), vec!["MIG-1".to_string()]);
        assert!(report.is_row_invalid(0));
        assert!(!report.is_row_invalid(1));
        assert_eq!(data.cell(0, 1), Some("2024-01-01 10:00;a;b;c"));
        assert!(!data.is_modified());
    }

    #[test]
    fn operator_is_asked_again_until_answer_validates() {
        let data = dataset(&[["MIG-7", "garbage", ""]]);
        let mut provider = Scripted::new(&[
            "still garbage",
            "2024-01-01 10:00;Jane Doe;text",
            "2024-01-01 10:00;jdoe;hello; world",
        ]);
        let (data, report) = run(data, &mut provider);
        assert_eq!(provider.asked, 3);
        assert_eq!(data.cell(0, 1), Some("2024-01-01 10:00;jdoe;hello%3b world"));
        assert_eq!(report.count(CorrectionKind::Manual), 1);
        assert!(report.invalid.is_empty());
    }

    #[test]
    fn operator_giving_up_keeps_original_value() {
        let data = dataset(&[["MIG-7", "garbage", ""]]);
        let mut provider = Scripted::new(&["nope"]);
        let (data, report) = run(data, &mut provider);
        assert_eq!(provider.asked, 2);
        assert_eq!(data.cell(0, 1), Some("garbage"));
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].raw, "garbage");
    }

    #[test]
    fn reconciled_output_needs_no_further_work() {
        let data = dataset(&[
            ["MIG-1", "2024-01-01 10:00;jdoe;one; two; three", ""],
            ["MIG-2", "2024-01-01 10:00;no author", ""],
        ]);
        let (data, first) = run(data, &mut Unattended);
        assert_eq!(first.corrections.len(), 2);

        let config = MigrationConfig::default();
        let classifier = Classifier::new(&config);
        let registry = PredicateRegistry::standard();
        let reconciler = Reconciler::new(&config, &classifier, &registry);
        assert!(reconciler.pending(&data).is_empty());

        let mut provider = Scripted::new(&[]);
        let (again, second) = reconciler.run(data.clone(), &mut provider);
        assert!(second.corrections.is_empty());
        assert_eq!(provider.asked, 0);
        assert_eq!(again.rows(), data.rows());
    }

    #[test]
    fn pending_lists_cells_off_schema() {
        let data = dataset(&[
            ["MIG-1", "2024-01-01 10:00;jdoe;a;b", ""],
            ["MIG-2", "2024-01-01 10:00;jdoe;fine", ""],
        ]);
        let config = MigrationConfig::default();
        let classifier = Classifier::new(&config);
        let registry = PredicateRegistry::standard();
        let pending = Reconciler::new(&config, &classifier, &registry).pending(&data);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].issue_key, "MIG-1");
        assert_eq!((pending[0].expected, pending[0].found), (3, 4));
    }
}
