use anyhow::{Result, bail};
use log::info;

use crate::{
    Input, cli::VerifyArgs, predicates::PredicateRegistry, reconcile::Reconciler,
    table::TextTable,
};

pub fn execute(args: &VerifyArgs) -> Result<()> {
    let input = Input::load(&args.input)?;
    let registry = PredicateRegistry::standard();
    let reconciler = Reconciler::new(&input.config, &input.classifier, &registry);
    let pending = reconciler.pending(&input.dataset);
    if pending.is_empty() {
        info!("✓ {:?} needs no reconciliation", args.input.input);
        return Ok(());
    }

    let mut table = TextTable::new(&["issue", "column", "expected", "found"]);
    for cell in &pending {
        table.push_row([
            cell.issue_key.clone(),
            cell.column.clone(),
            cell.expected.to_string(),
            cell.found.to_string(),
        ]);
    }
    table.print();
    bail!(
        "{} compound cell(s) in {:?} do not match their schema; run `fix` to repair them",
        pending.len(),
        args.input.input
    )
}
