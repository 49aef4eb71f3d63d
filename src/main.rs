use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use sqs_batch_broker::config::Settings;
use sqs_batch_broker::dispatch::LoggingSendClient;
use sqs_batch_broker::telemetry::init_telemetry;
use sqs_batch_broker::{BatchBroker, BrokerError};

/// Queue used for input lines without a `queue<TAB>` prefix
const DEFAULT_QUEUE: &str = "default";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    let _telemetry = init_telemetry(&settings.logging, &settings.otel)?;
    tracing::info!("Configuration loaded");

    let client = Arc::new(LoggingSendClient::new());
    let broker = BatchBroker::new(settings.broker.clone(), client.clone())?;

    tokio::select! {
        result = pump_stdin(&broker) => {
            result?;
            tracing::info!("Input exhausted, initiating shutdown");
        }
        _ = shutdown_signal() => {}
    }

    let report = broker.close().await;
    let metrics = broker.get_metrics();

    tracing::info!(
        batches = client.calls(),
        entries_sent = report.entries_sent,
        entries_lost = report.entries_lost,
        "Broker shutdown complete"
    );
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    Ok(())
}

/// Enqueue one entry per stdin line: `queue<TAB>payload` or just `payload`.
async fn pump_stdin(broker: &BatchBroker) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let (queue, payload) = line.split_once('\t').unwrap_or((DEFAULT_QUEUE, line.as_str()));

        match broker.enqueue(queue, payload.to_owned()).await {
            Ok(id) => tracing::debug!(queue = %queue, entry_id = %id, "Line enqueued"),
            Err(e @ BrokerError::BackpressureRejected { .. }) => {
                tracing::warn!(queue = %queue, error = %e, "Dropping input line");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
