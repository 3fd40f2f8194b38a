use std::io::{BufRead, Write};

use log::{debug, warn};

use crate::split::SplitError;

/// Everything an operator needs to repair one compound cell.
#[derive(Debug)]
pub struct CorrectionRequest<'a> {
    pub issue_key: &'a str,
    pub column: &'a str,
    pub schema: &'a [String],
    /// Text being corrected; after a rejected answer this is the answer.
    pub raw: &'a str,
    pub problem: &'a SplitError,
    /// 1-based attempt counter for this cell.
    pub attempt: usize,
}

/// Source of manual corrections for cells the splitter cannot resolve.
///
/// Returning `None` gives up on the cell; the row is then reported invalid.
pub trait CorrectionProvider {
    fn correct(&mut self, request: &CorrectionRequest<'_>) -> Option<String>;
}

/// Batch mode: never corrects anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl CorrectionProvider for Unattended {
    fn correct(&mut self, request: &CorrectionRequest<'_>) -> Option<String> {
        debug!(
            "{}: unattended, not correcting {} = {}",
            request.issue_key, request.column, request.raw
        );
        None
    }
}

/// Interactive corrections read line by line from `input`.
pub struct PromptCorrection<R, W> {
    input: R,
    output: W,
    max_attempts: Option<usize>,
}

impl<R: BufRead, W: Write> PromptCorrection<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<usize>) -> Self {
        self.max_attempts = max_attempts.filter(|limit| *limit > 0);
        self
    }

    fn ask(&mut self, request: &CorrectionRequest<'_>) -> std::io::Result<Option<String>> {
        writeln!(
            self.output,
            "{}: {} should have {} value(s) = {}",
            request.issue_key,
            request.column,
            request.schema.len(),
            request.schema.join("; ")
        )?;
        writeln!(self.output, "  {}", request.raw)?;
        writeln!(self.output, "  problem: {}", request.problem)?;
        write!(
            self.output,
            "Fix the above string (copy and paste here, blank to skip): "
        )?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let answer = line.trim_end_matches(['\r', '\n']);
        if answer.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(answer.to_string()))
        }
    }
}

impl<R: BufRead, W: Write> CorrectionProvider for PromptCorrection<R, W> {
    fn correct(&mut self, request: &CorrectionRequest<'_>) -> Option<String> {
        if let Some(limit) = self.max_attempts
            && request.attempt > limit
        {
            warn!(
                "{}: giving up on {} after {} attempt(s)",
                request.issue_key, request.column, limit
            );
            return None;
        }
        match self.ask(request) {
            Ok(answer) => answer,
            Err(err) => {
                warn!("{}: correction prompt failed: {err}", request.issue_key);
                None
            }
        }
    }
}
