use std::{fs::File, io::BufWriter};

use anyhow::{Context, Result};
use log::info;

use crate::{Input, cli::FixArgs, describe_write, io_utils, print_summary};

pub fn execute(args: &FixArgs) -> Result<()> {
    let mut input = Input::load(&args.input)?;
    let report = input.reconcile(&args.input, &args.correction);

    if let Some(path) = &args.report {
        let file = File::create(path).with_context(|| format!("Creating report file {path:?}"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .context("Writing reconciliation report")?;
        info!("Reconciliation report written to {path:?}");
    }

    let from_stdin = io_utils::is_dash(&args.input.input);
    let csv_on_stdout = match &args.output {
        Some(output) => io_utils::is_dash(output),
        None => from_stdin,
    };
    match &args.output {
        Some(output) => {
            let outcome = input
                .dataset
                .save(output, input.delimiter, input.encoding, !args.no_backup)
                .with_context(|| format!("Writing corrected CSV to {output:?}"))?;
            describe_write(&outcome, output);
        }
        None if from_stdin => {
            input
                .dataset
                .save(&args.input.input, input.delimiter, input.encoding, false)
                .context("Writing corrected CSV to stdout")?;
        }
        None if input.dataset.is_modified() => {
            info!(
                "CSV data modified; embedded semicolons were escaped as %3b so the import splits fields correctly"
            );
            let target = &args.input.input;
            let outcome = input
                .dataset
                .save(target, input.delimiter, input.encoding, !args.no_backup)
                .with_context(|| format!("Rewriting {target:?}"))?;
            describe_write(&outcome, target);
        }
        None => info!("No compound cells needed repair; {:?} left as-is", args.input.input),
    }

    print_summary(&report, csv_on_stdout);
    Ok(())
}
