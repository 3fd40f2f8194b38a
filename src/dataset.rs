use std::{io::Read, path::Path};

use anyhow::{Context, Result, ensure};
use encoding_rs::Encoding;

use crate::io_utils::{self, WriteOutcome};

/// An issue export held in memory: one header row plus data rows of raw cells.
///
/// Every row has exactly as many cells as there are headers. Cells are only
/// ever replaced through [`Dataset::set_cell`], which tracks whether anything
/// changed since the data was read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    modified: bool,
}

impl Dataset {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        for (idx, row) in rows.iter().enumerate() {
            ensure!(
                row.len() == headers.len(),
                "Row {} has {} field(s) but the header has {}",
                idx + 2,
                row.len(),
                headers.len()
            );
        }
        Ok(Self {
            headers,
            rows,
            modified: false,
        })
    }

    pub fn from_reader<R: Read>(
        reader: R,
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let mut reader = io_utils::open_csv_reader(reader, delimiter);
        Self::read_all(&mut reader, encoding)
    }

    pub fn from_path(path: &Path, delimiter: u8, encoding: &'static Encoding) -> Result<Self> {
        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
        Self::read_all(&mut reader, encoding).with_context(|| format!("Reading {path:?}"))
    }

    fn read_all<R: Read>(reader: &mut csv::Reader<R>, encoding: &'static Encoding) -> Result<Self> {
        let headers = io_utils::decode_record(reader.byte_headers()?, encoding)?;
        let mut rows = Vec::new();
        for (idx, record) in reader.byte_records().enumerate() {
            let record = record.with_context(|| format!("Reading row {}", idx + 2))?;
            rows.push(
                io_utils::decode_record(&record, encoding)
                    .with_context(|| format!("Decoding row {}", idx + 2))?,
            );
        }
        Self::new(headers, rows)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
    }

    /// Replaces a cell, returning the previous value. Marks the dataset
    /// modified only when the value actually changes.
    pub fn set_cell(&mut self, row: usize, column: usize, value: String) -> Option<String> {
        let cell = self.rows.get_mut(row)?.get_mut(column)?;
        if *cell == value {
            return Some(value);
        }
        self.modified = true;
        Some(std::mem::replace(cell, value))
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn column_indices(&self, name: &str) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, header)| header.as_str() == name)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Issue key for log and report entries; falls back to the 1-based file
    /// line when the export has no key column.
    pub fn issue_key(&self, row: usize, key_column: Option<usize>) -> String {
        key_column
            .and_then(|column| self.cell(row, column))
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("row {}", row + 2))
    }

    pub fn to_csv_bytes(&self, delimiter: u8, encoding: &'static Encoding) -> Result<Vec<u8>> {
        io_utils::render_csv(&self.headers, &self.rows, delimiter, encoding)
    }

    pub fn save(
        &self,
        path: &Path,
        delimiter: u8,
        encoding: &'static Encoding,
        backup: bool,
    ) -> Result<WriteOutcome> {
        let bytes = self.to_csv_bytes(delimiter, encoding)?;
        io_utils::write_with_backup(path, &bytes, backup)
    }
}

#[cfg(test)]
mod tests {
    use encoding_rs::UTF_8;

    use super::*;

    #[test]
    fn from_reader_decodes_headers_and_rows() {
        let csv = "Issue key,Comment,Comment\nMIG-1,\"a;b;c\",\nMIG-2,,\n";
        let dataset = Dataset::from_reader(csv.as_bytes(), b',', UTF_8).unwrap();
        assert_eq!(dataset.headers(), ["Issue key", "Comment", "Comment"]);
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.cell(0, 1), Some("a;b;c"));
        assert_eq!(dataset.column_indices("Comment"), vec![1, 2]);
        assert!(!dataset.is_modified());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let csv = "Issue key,Summary\nMIG-1\n";
        assert!(Dataset::from_reader(csv.as_bytes(), b',', UTF_8).is_err());
        let headers = vec!["a".to_string(), "b".to_string()];
        assert!(Dataset::new(headers, vec![vec!["1".to_string()]]).is_err());
    }

    #[test]
    fn set_cell_only_flags_real_changes() {
        let mut dataset = Dataset::new(
            vec!["Issue key".to_string()],
            vec![vec!["MIG-1".to_string()]],
        )
        .unwrap();
        assert_eq!(dataset.set_cell(0, 0, "MIG-1".to_string()).as_deref(), Some("MIG-1"));
        assert!(!dataset.is_modified());
        assert_eq!(dataset.set_cell(0, 0, "MIG-9".to_string()).as_deref(), Some("MIG-1"));
        assert!(dataset.is_modified());
        assert_eq!(dataset.set_cell(4, 0, String::new()), None);
    }

    #[test]
    fn issue_key_falls_back_to_line_number() {
        let dataset = Dataset::new(
            vec!["Issue key".to_string()],
            vec![vec!["MIG-1".to_string()], vec![String::new()]],
        )
        .unwrap();
        assert_eq!(dataset.issue_key(0, Some(0)), "MIG-1");
        assert_eq!(dataset.issue_key(1, Some(0)), "row 3");
        assert_eq!(dataset.issue_key(0, None), "row 2");
    }
}
