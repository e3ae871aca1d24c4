//! Consumer entry point.

use std::process::ExitCode;

use change_stream::KafkaChangeStream;
use consumer::config::Config;
use consumer::error::Result;
use order_sync::SyncLoop;
use tokio::signal;
use tokio::sync::oneshot;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;

    // 1. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    consumer::describe_metrics();

    // 2. Connect sources and targets; failures here abort startup
    let processor = consumer::connect_processor(&config).await?;
    let stream = KafkaChangeStream::connect(&config.kafka_config())?;
    let mut sync = SyncLoop::new(stream, processor);

    // 3. Serve health and metrics
    let listener = tokio::net::TcpListener::bind(config.addr()).await?;
    tracing::info!(addr = %config.addr(), "serving health and metrics");

    let (stop_server, server_stopped) = oneshot::channel::<()>();
    let app = consumer::create_app(metrics_handle);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_stopped.await;
            })
            .await
    });

    // 4. Sync until the stream ends or we are told to stop
    let stats = sync.run_until(shutdown_signal()).await;
    tracing::info!(%stats, "sync loop stopped");

    let _ = stop_server.send(());
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "server error"),
        Err(e) => tracing::error!(error = %e, "server task failed"),
    }

    tracing::info!("consumer shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();
    consumer::init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "consumer failed to start");
            ExitCode::FAILURE
        }
    }
}
