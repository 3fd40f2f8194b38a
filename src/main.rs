fn main() {
    if let Err(err) = jira_csv_reconcile::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
