// ihc-pipeline - multi-touch attribution reporting
//
// Batch ETL job, run on a schedule by an external scheduler. Stages, in
// order, each blocking until complete:
// - journey:  rebuild ordered customer journeys from raw events, in batches
// - scoring:  submit each batch to the IHC attribution service
// - store:    reconcile scored pairs into attribution records, then rebuild
//             the channel/day aggregate from scratch
// - report:   derive CPO / ROAS and export the channel metrics CSV
//
// Fatal errors (missing credential, unreachable store, failed batch) exit
// non-zero so the scheduler sees the run as failed. Per-record problems are
// logged and skipped; the run completes with whatever succeeded.

mod cli;
mod config;
mod journey;
mod pipeline;
mod report;
mod scoring;
mod store;

use anyhow::{anyhow, Result};
use clap::Parser;
use cli::Cli;
use config::Config;
use scoring::IhcClient;
use store::Store;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        tracing::error!("pipeline run failed: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let window = cli.date_window().map_err(|e| anyhow!(e))?;
    let config = Config::from_env()?;

    // CLI flags override the environment.
    let db_path = cli.db.unwrap_or_else(|| config.db_path.clone());
    let output_path = cli.output.unwrap_or_else(|| config.output_path.clone());
    let batch_size = cli.batch_size.unwrap_or(config.batch_size);

    let store = Store::new(&db_path);
    store.init_schema()?;

    let client = IhcClient::new(
        &config.api_key,
        &config.api_url,
        config.max_attempts,
        config.retry_delay,
    )?;

    let scores = pipeline::collect_scores(
        &store,
        &client,
        &config.conv_type_id,
        batch_size,
        window.as_ref(),
        None,
    )?;
    tracing::info!(scored_pairs = scores.len(), "scoring complete");

    let outcome = store.persist_scores(&scores)?;
    if outcome.skipped > 0 {
        tracing::warn!(
            written = outcome.written,
            skipped = outcome.skipped,
            "some attribution records were skipped"
        );
    } else {
        tracing::info!(written = outcome.written, "attribution records persisted");
    }

    let aggregate_rows = store.rebuild_channel_reporting()?;
    tracing::info!(rows = aggregate_rows, "channel reporting rebuilt");

    report::export(&store, &output_path)?;
    Ok(())
}
