use std::fs::File;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use envconfig::Envconfig;
use tracing::info;

use kiosk_batch::cli::{Cli, Input};
use kiosk_batch::config::Config;
use kiosk_batch::csv_source::read_records;
use kiosk_batch::extract::{fetch_kiosk_csv, S3ObjectStore};
use kiosk_common::driver::{IngestionDriver, SystemClock};
use kiosk_common::logging::setup_tracing;
use kiosk_common::record::RawRecord;
use kiosk_common::store::postgres::PgStore;

async fn load_records(cli: &Cli, config: &Config) -> anyhow::Result<Vec<RawRecord>> {
    let input = cli
        .input()
        .ok_or_else(|| anyhow!("either --bucket or --csv is required"))?;

    let records = match input {
        Input::Bucket(bucket) => {
            let store =
                S3ObjectStore::connect(&config.aws_region, config.s3_endpoint.as_deref()).await;
            let csv = fetch_kiosk_csv(
                &store,
                bucket,
                &config.kiosk_object_prefix,
                &config.kiosk_object_suffix,
            )
            .await?;
            read_records(csv.as_bytes()).context("kiosk export is not valid CSV")?
        }
        Input::File(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            read_records(file).with_context(|| format!("{} is not valid CSV", path.display()))?
        }
    };

    Ok(records)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_tracing(&cli.log_target()).context("failed to set up logging")?;

    let config = Config::init_from_env().context("invalid configuration")?;

    let records = load_records(&cli, &config).await?;
    info!(count = records.len(), "Loaded kiosk records");

    let store = Arc::new(PgStore::new(&config.database).await?);
    if !cli.skip_reset {
        store.reset_schema().await?;
    }

    let mut driver = IngestionDriver::new(
        store.clone(),
        Arc::new(SystemClock),
        config.max_consecutive_store_failures,
    );
    driver.run_batch(records, cli.limit).await;

    store.close().await;
    info!("Pipeline complete");
    Ok(())
}
