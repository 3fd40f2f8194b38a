use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Reconcile Jira CSV exports for migration", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write the default migration configuration to a YAML file
    Config(ConfigArgs),
    /// Show how each column of an export is classified
    Classify(ClassifyArgs),
    /// Report compound cells that do not split into their schema (read-only)
    Verify(VerifyArgs),
    /// Repair compound cells with embedded delimiters and rewrite the export
    Fix(FixArgs),
    /// Build the table of unique usernames for remapping
    Users(UsersArgs),
    /// Build tables of distinct component, sprint, and version values
    Values(ValuesArgs),
}

#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input CSV export
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Migration configuration (YAML); built-in Jira defaults when omitted
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct CorrectionArgs {
    /// Never prompt; cells that cannot be repaired automatically are reported invalid
    #[arg(long)]
    pub unattended: bool,
    /// Stop prompting for a cell after this many rejected answers
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Destination YAML file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ClassifyArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

#[derive(Debug, Args)]
pub struct FixArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub correction: CorrectionArgs,
    /// Corrected CSV destination (defaults to rewriting the input in place)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Write the reconciliation report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
    /// Overwrite without keeping a .bak copy of the previous file
    #[arg(long = "no-backup")]
    pub no_backup: bool,
}

#[derive(Debug, Args)]
pub struct UsersArgs {
    #[command(flatten)]
    pub input: InputArgs,
    #[command(flatten)]
    pub correction: CorrectionArgs,
    /// User table destination (defaults to <input>_Users.csv)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Overwrite without keeping a .bak copy of the previous file
    #[arg(long = "no-backup")]
    pub no_backup: bool,
}

#[derive(Debug, Args)]
pub struct ValuesArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Only build the named table(s); all configured tables when omitted
    #[arg(long = "table", action = clap::ArgAction::Append)]
    pub tables: Vec<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
