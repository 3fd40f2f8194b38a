pub mod classify;
pub mod cli;
pub mod config;
pub mod correction;
pub mod dataset;
pub mod fix;
pub mod io_utils;
pub mod predicates;
pub mod reconcile;
pub mod split;
pub mod table;
pub mod users;
pub mod values;
pub mod verify;

use std::{env, io, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use encoding_rs::Encoding;
use log::{LevelFilter, info, warn};

use crate::{
    classify::Classifier,
    cli::{Cli, Commands, CorrectionArgs, InputArgs},
    config::MigrationConfig,
    correction::{CorrectionProvider, PromptCorrection, Unattended},
    dataset::Dataset,
    io_utils::WriteOutcome,
    reconcile::ReconcileReport,
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("jira_csv_reconcile", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Config(args) => handle_config(&args),
        Commands::Classify(args) => handle_classify(&args),
        Commands::Verify(args) => verify::execute(&args),
        Commands::Fix(args) => fix::execute(&args),
        Commands::Users(args) => users::execute(&args),
        Commands::Values(args) => values::execute(&args),
    }
}

fn handle_config(args: &cli::ConfigArgs) -> Result<()> {
    let config = MigrationConfig::default();
    match &args.output {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("Writing configuration to {path:?}"))?;
            info!("Default configuration written to {path:?}");
        }
        None => {
            let yaml = serde_yaml::to_string(&config).context("Serializing configuration")?;
            print!("{yaml}");
        }
    }
    Ok(())
}

fn handle_classify(args: &cli::ClassifyArgs) -> Result<()> {
    let input = Input::load(&args.input)?;
    let mut table = TextTable::new(&["#", "column", "class"]);
    for column in input.classifier.classify_headers(input.dataset.headers()) {
        table.push_row([
            (column.index + 1).to_string(),
            column.name,
            column.class.to_string(),
        ]);
    }
    table.print();
    Ok(())
}

/// Everything loaded from the shared input flags.
pub(crate) struct Input {
    pub config: MigrationConfig,
    pub classifier: Classifier,
    pub dataset: Dataset,
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl Input {
    pub(crate) fn load(args: &InputArgs) -> Result<Self> {
        let config = MigrationConfig::load_or_default(args.config.as_deref())?;
        let classifier = Classifier::new(&config);
        let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
        let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
        info!(
            "Reading '{}' with delimiter '{}'",
            args.input.display(),
            printable_delimiter(delimiter)
        );
        let dataset = Dataset::from_path(&args.input, delimiter, encoding)?;
        info!(
            "Loaded {} row(s) across {} column(s)",
            dataset.len(),
            dataset.headers().len()
        );
        Ok(Self {
            config,
            classifier,
            dataset,
            delimiter,
            encoding,
        })
    }

    /// Reconciles the loaded dataset in place using the provider selected by
    /// the correction flags.
    pub(crate) fn reconcile(&mut self, args: &InputArgs, correction: &CorrectionArgs) -> ReconcileReport {
        let mut provider = correction_provider(args, correction);
        let dataset = std::mem::take(&mut self.dataset);
        let (dataset, report) =
            reconcile::reconcile(dataset, &self.config, &self.classifier, provider.as_mut());
        self.dataset = dataset;
        report
    }
}

fn correction_provider(args: &InputArgs, correction: &CorrectionArgs) -> Box<dyn CorrectionProvider> {
    if correction.unattended {
        return Box::new(Unattended);
    }
    if io_utils::is_dash(&args.input) {
        warn!("Input is read from stdin; corrections cannot be prompted, running unattended");
        return Box::new(Unattended);
    }
    Box::new(
        PromptCorrection::new(io::stdin().lock(), io::stderr())
            .with_max_attempts(correction.max_attempts),
    )
}

/// Prints the run summary. When the CSV itself was written to stdout the
/// summary goes to stderr so the stream stays a valid CSV.
pub(crate) fn print_summary(report: &ReconcileReport, csv_on_stdout: bool) {
    let mut text = if report.invalid.is_empty() {
        format!(
            "{} compound cell(s) checked, {} corrected, no invalid rows\n",
            report.cells_checked,
            report.corrections.len()
        )
    } else {
        let mut table = TextTable::new(&["issue", "column", "reason"]);
        for cell in &report.invalid {
            table.push_row([
                cell.issue_key.clone(),
                cell.column.clone(),
                cell.reason.clone(),
            ]);
        }
        format!(
            "{} compound cell(s) checked, {} corrected, {} invalid row(s):\n{}",
            report.cells_checked,
            report.corrections.len(),
            report.invalid_rows().len(),
            table.render()
        )
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    if csv_on_stdout {
        eprint!("{text}");
    } else {
        print!("{text}");
    }
}

pub(crate) fn describe_write(outcome: &WriteOutcome, path: &std::path::Path) {
    match outcome {
        WriteOutcome::Written { backup: Some(backup) } => {
            info!("Wrote {path:?} (previous version kept as {backup:?})")
        }
        WriteOutcome::Written { backup: None } => info!("Wrote {path:?}"),
        WriteOutcome::Unchanged => info!("{path:?} is already up to date"),
        WriteOutcome::Stdout => {}
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
