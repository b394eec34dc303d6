use std::future::Future;
use std::time::Duration;

use kiosk_common::driver::IngestionDriver;
use kiosk_common::source::RecordSource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::ConsumerError;

/// Run the driver next to the HTTP server until `shutdown` is cancelled.
///
/// If the server stops first, `shutdown` is cancelled and the driver is left to finish the
/// record in hand before returning the server's error.
pub async fn run<S, F>(
    driver: &mut IngestionDriver,
    source: &S,
    poll_timeout: Duration,
    shutdown: CancellationToken,
    server: F,
) -> Result<(), ConsumerError>
where
    S: RecordSource + ?Sized,
    F: Future<Output = Result<(), std::io::Error>> + Send + 'static,
{
    let on_exit = shutdown.clone();
    let server = tokio::spawn(async move {
        let served = server.await;
        if !on_exit.is_cancelled() {
            error!("HTTP server exited, stopping ingestion");
            on_exit.cancel();
        }
        served
    });

    driver.run_stream(source, poll_timeout, shutdown).await;

    if !server.is_finished() {
        server.abort();
        info!("HTTP server stopped");
        return Ok(());
    }

    server.await?.map_err(ConsumerError::Server)
}
