use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info};

use crate::{
    Input, cli::ValuesArgs, config::ValueTableConfig, dataset::Dataset, describe_write, io_utils,
};

/// Distinct values of one or more columns, e.g. every component or sprint
/// referenced by the export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTable {
    pub name: String,
    pub header: String,
    pub values: Vec<String>,
}

impl ValueTable {
    pub fn headers(&self) -> Vec<String> {
        vec![self.header.clone()]
    }

    pub fn rows(&self) -> Vec<Vec<String>> {
        self.values.iter().map(|v| vec![v.clone()]).collect()
    }
}

pub fn build_value_table(dataset: &Dataset, table: &ValueTableConfig) -> ValueTable {
    let columns = table
        .columns
        .iter()
        .flat_map(|name| dataset.column_indices(name))
        .collect::<Vec<_>>();
    debug!(
        "Table '{}' reads {} column(s) of {:?}",
        table.name,
        columns.len(),
        table.columns
    );
    let values = dataset
        .rows()
        .iter()
        .flat_map(|row| columns.iter().map(move |&idx| row[idx].as_str()))
        .filter(|value| !value.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect();
    ValueTable {
        name: table.name.clone(),
        header: table.header.clone(),
        values,
    }
}

pub fn execute(args: &ValuesArgs) -> Result<()> {
    if io_utils::is_dash(&args.input.input) {
        bail!("Value tables are written next to the export; read it from a file, not stdin");
    }
    let input = Input::load(&args.input)?;
    let selected = if args.tables.is_empty() {
        input.config.value_tables.iter().collect::<Vec<_>>()
    } else {
        args.tables
            .iter()
            .map(|name| {
                input
                    .config
                    .value_table(name)
                    .ok_or_else(|| anyhow!("Unknown value table '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?
    };

    for table_config in selected {
        let table = build_value_table(&input.dataset, table_config);
        let destination = io_utils::sibling_path(&args.input.input, &format!("_{}", table.name));
        let bytes = io_utils::render_csv(
            &table.headers(),
            &table.rows(),
            input.delimiter,
            input.encoding,
        )?;
        let outcome = io_utils::write_with_backup(&destination, &bytes, true)
            .with_context(|| format!("Writing {} table to {destination:?}", table.name))?;
        info!("{} distinct value(s) for {}", table.values.len(), table.name);
        describe_write(&outcome, &destination);
    }
    Ok(())
}
