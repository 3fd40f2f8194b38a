//! I/O utilities for CSV reading, writing, encoding, and backups.
//!
//! All file I/O flows through this module:
//!
//! - **Delimiter resolution**: extension-based auto-detection (`.csv` → comma,
//!   `.tsv` → tab) with manual override support.
//! - **Encoding**: input decoding and output encoding via `encoding_rs`,
//!   defaulting to UTF-8.
//! - **Backups**: an existing output file is renamed to `<name>.bak` (or
//!   `<name>.(N).bak`) before it is overwritten with different content.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.
//! - **Quoting**: CSV output uses `QuoteStyle::Always`, matching the quoting of
//!   Jira's own exports.

use std::{
    fs::{self, File},
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use log::debug;
use sha2::{Digest, Sha256};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    };
    Ok(open_csv_reader(reader, delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Serializes a header-prefixed table into encoded CSV bytes.
pub fn render_csv(
    headers: &[String],
    rows: &[Vec<String>],
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Vec<u8>> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    let mut writer = builder.from_writer(Vec::new());
    writer
        .write_record(headers)
        .context("Writing output headers")?;
    for (idx, row) in rows.iter().enumerate() {
        writer
            .write_record(row)
            .with_context(|| format!("Writing output row {}", idx + 2))?;
    }
    let utf8 = writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing CSV buffer: {}", err.error()))?;
    if encoding == UTF_8 {
        return Ok(utf8);
    }
    let text = String::from_utf8(utf8).context("CSV output is not valid UTF-8")?;
    let (encoded, _, had_errors) = encoding.encode(&text);
    if had_errors {
        return Err(anyhow!("Failed to encode text using {}", encoding.name()));
    }
    Ok(encoded.into_owned())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { backup: Option<PathBuf> },
    /// The destination already held identical content.
    Unchanged,
    Stdout,
}

/// Writes `contents` to `path`, keeping a backup of a differing existing file.
pub fn write_with_backup(path: &Path, contents: &[u8], backup: bool) -> Result<WriteOutcome> {
    if is_dash(path) {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(contents).context("Writing to stdout")?;
        stdout.flush().context("Flushing stdout")?;
        return Ok(WriteOutcome::Stdout);
    }
    let mut backup_file = None;
    if path.exists() {
        if content_matches(path, contents)? {
            debug!("{path:?} already up to date");
            return Ok(WriteOutcome::Unchanged);
        }
        if backup {
            let target = next_backup_path(path);
            fs::rename(path, &target)
                .with_context(|| format!("Backing up {path:?} to {target:?}"))?;
            backup_file = Some(target);
        }
    }
    let mut file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    file.write_all(contents)
        .with_context(|| format!("Writing output file {path:?}"))?;
    file.flush()?;
    Ok(WriteOutcome::Written {
        backup: backup_file,
    })
}

pub fn content_matches(path: &Path, contents: &[u8]) -> Result<bool> {
    let existing = fs::read(path).with_context(|| format!("Reading existing file {path:?}"))?;
    Ok(Sha256::digest(&existing) == Sha256::digest(contents))
}

/// `<file>.bak`, then `<file>.(2).bak`, `<file>.(3).bak`, ...
pub fn next_backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let first = path.with_file_name(format!("{name}.bak"));
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| path.with_file_name(format!("{name}.({n}).bak")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// `export.csv` + `_Users` -> `export_Users.csv`, next to the base file.
pub fn sibling_path(base: &Path, suffix: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match base.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    base.with_file_name(file_name)
}
