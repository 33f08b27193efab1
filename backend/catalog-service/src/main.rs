//! Catalog Service - Main entry point
//!
//! Consumes category and genre CDC topics, enriches each change from the
//! canonical entity API and applies it to the in-memory read models.
//! Exposes `/health` and `/metrics` over HTTP.

use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Result;
use catalog_service::{
    CdcConsumer, CdcListener, CdcMetrics, Config, EnrichmentClient, EntityKind,
    HttpEnrichmentClient, InMemoryReadModelStore, KafkaRetryDispatcher, RetryDispatcher,
};
use prometheus::{Encoder, Registry, TextEncoder};
use resilience::timeout::with_timeout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long in-flight messages get to settle on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct AppState {
    registry: Registry,
    categories: Arc<InMemoryReadModelStore>,
    genres: Arc<InMemoryReadModelStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    init_tracing(&config.log_format);
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        e
    })?;

    info!(
        categories_topic = %config.categories_topic,
        genres_topic = %config.genres_topic,
        concurrency = config.consumer_concurrency,
        max_attempts = config.max_attempts,
        "Starting Catalog Service"
    );

    let registry = Registry::new();
    let metrics = CdcMetrics::new(&registry)
        .map_err(|e| anyhow::anyhow!("Metrics registration error: {}", e))?;

    let enrichment: Arc<dyn EnrichmentClient> = Arc::new(HttpEnrichmentClient::new(
        config.enrichment_base_url.clone(),
        config.enrichment_api_token.clone(),
        config.enrichment_timeout(),
    )?);

    let dispatcher: Arc<dyn RetryDispatcher> = Arc::new(
        KafkaRetryDispatcher::new(&config.kafka_brokers).map_err(|e| {
            error!("Failed to create Kafka producer: {}", e);
            anyhow::anyhow!("Kafka producer error: {}", e)
        })?,
    );

    let categories = Arc::new(InMemoryReadModelStore::new());
    let genres = Arc::new(InMemoryReadModelStore::new());
    let policy = config.retry_policy()?;

    let consumers = vec![
        Arc::new(
            CdcConsumer::new(
                EntityKind::Category,
                config.categories_topic.clone(),
                Arc::clone(&enrichment),
                categories.clone(),
                Arc::clone(&dispatcher),
            )
            .with_policy(policy.clone())
            .with_metrics(metrics.clone()),
        ),
        Arc::new(
            CdcConsumer::new(
                EntityKind::Genre,
                config.genres_topic.clone(),
                Arc::clone(&enrichment),
                genres.clone(),
                Arc::clone(&dispatcher),
            )
            .with_policy(policy)
            .with_metrics(metrics),
        ),
    ];

    let listener = CdcListener::new(config.listener_config(), consumers).map_err(|e| {
        error!("Failed to create Kafka consumer: {}", e);
        anyhow::anyhow!("Kafka consumer error: {}", e)
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut listener_handle = tokio::spawn(listener.run(shutdown_rx));

    let state = AppState {
        registry,
        categories,
        genres,
    };

    // actix-web server futures are not Send; run in the foreground
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics_handler))
    })
    .bind(("0.0.0.0", config.http_port))?
    .disable_signals()
    .run();
    let server_handle = server.handle();

    info!("Catalog Service ready on port {}", config.http_port);

    let mut listener_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server => {
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        }
        result = &mut listener_handle => {
            listener_done = true;
            match result {
                Ok(Ok(())) => warn!("CDC listener exited"),
                Ok(Err(e)) => error!("CDC listener error: {}", e),
                Err(e) => error!("CDC listener task failed: {}", e),
            }
        }
    }

    info!("Shutting down Catalog Service");
    let _ = shutdown_tx.send(true);

    if !listener_done && with_timeout(SHUTDOWN_GRACE, listener_handle).await.is_err() {
        warn!("CDC listener did not stop within {:?}", SHUTDOWN_GRACE);
    }
    server_handle.stop(true).await;

    Ok(())
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "catalog_service=debug,rdkafka=warn,info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "read_models": {
            "categories": state.categories.len(),
            "genres": state.genres.len(),
        }
    }))
}

async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&state.registry.gather(), &mut buffer) {
        Ok(()) => HttpResponse::Ok()
            .content_type(encoder.format_type())
            .body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}
