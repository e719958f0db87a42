use gcs_zip::config::CliConfig;
use gcs_zip::storage::GcsStore;
use gcs_zip::{archive_prefix, logging, ArchiveSummary, Target};
use std::process::ExitCode;
use tokio::io::BufWriter;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    match run().await {
        Ok(summary) => {
            tracing::info!(entries = summary.entries, "done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ArchiveSummary> {
    let cfg = CliConfig::from_env_and_args()?;
    let target = Target::resolve(&cfg.target, cfg.strict)?;

    let store = GcsStore::connect(&cfg.storage).await?;

    let file = tokio::fs::File::create(&cfg.output).await?;
    tracing::info!(output = %cfg.output.display(), "writing archive");

    Ok(archive_prefix(&store, &target, BufWriter::new(file)).await?)
}
