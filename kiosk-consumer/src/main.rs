use std::sync::Arc;

use envconfig::Envconfig;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use kiosk_common::driver::{IngestionDriver, SystemClock};
use kiosk_common::health::Liveness;
use kiosk_common::logging::setup_tracing;
use kiosk_common::metrics::{serve, setup_metrics_routes};
use kiosk_common::store::postgres::PgStore;
use kiosk_consumer::app::app;
use kiosk_consumer::config::Config;
use kiosk_consumer::error::ConsumerError;
use kiosk_consumer::service::run;
use kiosk_consumer::source::KafkaRecordSource;

#[tokio::main]
async fn main() -> Result<(), ConsumerError> {
    let config = Config::init_from_env()?;
    setup_tracing(&config.log_target()).map_err(ConsumerError::Logging)?;
    info!("Starting kiosk consumer");

    let mut sigterm = signal(SignalKind::terminate()).map_err(ConsumerError::Signal)?;
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        on_signal.cancel();
    });

    let liveness = Liveness::new("kiosk-consumer", config.liveness_deadline.0);
    let router = setup_metrics_routes(app(liveness.clone()))?;
    let bind = config.bind();

    let store = Arc::new(PgStore::new(&config.database).await?);
    let source = KafkaRecordSource::new(&config.kafka)?;

    let mut driver = IngestionDriver::new(
        store.clone(),
        Arc::new(SystemClock),
        config.max_consecutive_store_failures,
    )
    .with_liveness(liveness);

    let result = run(
        &mut driver,
        &source,
        config.poll_timeout.0,
        shutdown,
        async move { serve(router, &bind).await },
    )
    .await;

    store.close().await;
    info!("Kiosk consumer stopped");
    result
}
