use std::sync::Arc;

use anyhow::Context;
use dragnet::{
    configuration::{get_configuration, load_sources},
    dal::{write_records, write_summary, RunFiles},
    services::{crawl, GoldenStore, HttpFetcher},
};
use env_logger::Env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let configuration = get_configuration().context("Failed to read configuration")?;
    let sources = load_sources(&configuration.application.sources_file).with_context(|| {
        format!(
            "Failed to load sources from {}",
            configuration.application.sources_file.display()
        )
    })?;
    log::info!(
        "Loaded {} sources from {}",
        sources.len(),
        configuration.application.sources_file.display()
    );

    let fetcher = HttpFetcher::new(&configuration.crawl).context("Failed to build http client")?;
    let output = crawl(Arc::new(fetcher), sources, &configuration.crawl).await;

    let output_dir = &configuration.application.output_dir;
    let files = RunFiles::new(output_dir, output.summary.started_at);
    write_records(&files.records, &output.records)
        .with_context(|| format!("Failed to write {}", files.records.display()))?;
    write_summary(&files.summary, &output.summary)
        .with_context(|| format!("Failed to write {}", files.summary.display()))?;
    log::info!(
        "Wrote {} records to {}",
        output.records.len(),
        files.records.display()
    );

    // The run file stands on its own if the golden merge fails.
    if let Err(e) = GoldenStore::new(output_dir).merge_run(&files.records) {
        log::error!("Golden merge failed, keeping {}: {}", files.records.display(), e);
    }

    Ok(())
}
