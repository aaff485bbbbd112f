use anyhow::Context;
use dragnet::{configuration::get_configuration, services::GoldenStore};
use env_logger::Env;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let configuration = get_configuration().context("Failed to read configuration")?;
    let store = GoldenStore::new(&configuration.application.output_dir);

    let report = store
        .rebuild()
        .with_context(|| format!("Failed to rebuild {}", store.golden_path().display()))?;

    println!(
        "Golden updated: {} -> {} rows (added {}). File: {}",
        report.before,
        report.after,
        report.after.saturating_sub(report.before),
        store.golden_path().display()
    );
    if report.backfilled > 0 {
        println!(
            "Appended {} golden rows across {} run CSVs",
            report.backfilled, report.run_files
        );
    }

    Ok(())
}
