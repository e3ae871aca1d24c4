//! CDC consumer wiring.
//!
//! Connects the change stream, the relational reader and the document
//! writers into a [`SyncLoop`](order_sync::SyncLoop), and serves `/health`
//! and `/metrics` next to it.

pub mod config;
pub mod error;
pub mod routes;

use axum::Router;
use axum::routing::get;
use change_stream::KafkaDeadLetterSink;
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use order_sync::{
    ElasticsearchWriter, EventRouter, MongoDocumentWriter, PostgresOrderReader, SyncProcessor,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{Config, LogFormat};
use error::Result;

/// Creates the HTTP router for health checks and metrics scraping.
pub fn create_app(metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` directives that fail to parse fall back to `info`.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Registers descriptions for the metrics the sync loop emits.
pub fn describe_metrics() {
    describe_counter!("cdc_messages_received", "Change records pulled from the stream");
    describe_counter!("cdc_events_skipped", "Change events that required no write, by reason");
    describe_counter!("cdc_documents_upserted", "Order documents rebuilt and written");
    describe_counter!("cdc_documents_deleted", "Order documents removed");
    describe_counter!(
        "cdc_documents_not_found",
        "Rebuilds skipped because the order row no longer exists"
    );
    describe_counter!("cdc_events_dead_lettered", "Change records handed to the dead-letter sink");
    describe_counter!("cdc_retries", "Retried fetches and writes, by operation");
    describe_histogram!(
        "cdc_event_duration_seconds",
        Unit::Seconds,
        "Time to process one change record"
    );
}

/// Connects to PostgreSQL and the configured document targets and assembles
/// the processor. Any connection failure here is fatal for the consumer.
pub async fn connect_processor(config: &Config) -> Result<SyncProcessor<PostgresOrderReader>> {
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres_max_connections)
        .connect(&config.postgres_url)
        .await?;
    info!(max_connections = config.postgres_max_connections, "Connected to PostgreSQL");

    let mut processor = SyncProcessor::new(
        PostgresOrderReader::new(pool),
        EventRouter::new(config.routing_table()),
    )
    .with_retry_policy(config.retry_policy());

    let mongo = MongoDocumentWriter::connect(
        &config.mongo_uri,
        &config.mongo_db,
        &config.mongo_collection,
    )
    .await?;
    processor.register(Box::new(mongo));

    if let Some(es) = &config.elasticsearch {
        processor.register(Box::new(ElasticsearchWriter::new(es.clone())?));
        info!(url = %es.url, index = %es.index, "Mirroring order documents to Elasticsearch");
    }

    if let Some(topic) = &config.dlq_topic {
        let sink = KafkaDeadLetterSink::connect(&config.kafka_config(), topic)?;
        processor = processor.with_dead_letter_sink(Box::new(sink));
    }

    Ok(processor)
}
