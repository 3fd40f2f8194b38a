//! Plain-text tables for terminal summaries.

use std::fmt::Write as _;

#[derive(Debug, Clone, Default)]
pub struct TextTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TextTable {
    pub fn new<S: AsRef<str>>(headers: &[S]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.as_ref().to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut row = cells.into_iter().map(Into::into).collect::<Vec<String>>();
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self) -> String {
        let mut widths = self
            .headers
            .iter()
            .map(|h| h.chars().count().max(3))
            .collect::<Vec<_>>();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(single_line(cell).chars().count());
            }
        }

        let mut output = String::new();
        let _ = writeln!(output, "{}", format_line(&self.headers, &widths));
        let rule = widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>();
        let _ = writeln!(output, "{}", format_line(&rule, &widths));
        for row in &self.rows {
            let _ = writeln!(output, "{}", format_line(row, &widths));
        }
        output
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

fn single_line(value: &str) -> String {
    value.replace(['\n', '\r', '\t'], " ")
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", single_line(cell), width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    line.trim_end().to_string()
}
