//! `sealed-store` service binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing + optional OTLP).
//! 3. Select the key provider (KMS or local) and resolve the active key version.
//! 4. Select the document store (S3 or in-memory).
//! 5. Build the [`RecordAdapter`] and spawn the key refresh task.
//! 6. Build the Axum router and serve until Ctrl-C.

mod adapter;
mod aws;
mod config;
mod crypto;
mod engine;
mod keys;
mod record;
mod retry;
mod server;
mod store;
mod telemetry;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use adapter::RecordAdapter;
use config::{Config, KeyProviderKind, StoreBackend};
use engine::{EncryptionEngine, EngineError};
use keys::{KeyProvider, KeyProviderError, KmsKeyProvider, LocalKeyProvider};
use server::state::AppState;
use store::{DocumentStore, MemoryStore, S3Store};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        key_provider = ?cfg.key_provider,
        store_backend = ?cfg.store_backend,
        "sealed-store starting"
    );

    let aws = match (cfg.key_provider, cfg.store_backend) {
        (KeyProviderKind::Local, StoreBackend::Memory) => None,
        _ => Some(aws::AwsClients::init(cfg.aws_endpoint_url.as_deref()).await),
    };

    // -----------------------------------------------------------------------
    // 3. Key provider + encryption engine
    // -----------------------------------------------------------------------
    let provider: Arc<dyn KeyProvider> = match (&aws, cfg.key_provider) {
        (Some(aws), KeyProviderKind::Kms) => Arc::new(KmsKeyProvider::new(aws.kms.clone())),
        _ => {
            warn!("using in-process keys; sealed data will be unreadable after restart");
            Arc::new(LocalKeyProvider::with_initial_version(&cfg.key_name).await?)
        }
    };
    let engine = Arc::new(init_engine(provider, &cfg.key_name).await?);

    // -----------------------------------------------------------------------
    // 4. Document store
    // -----------------------------------------------------------------------
    let store: Arc<dyn DocumentStore> = match (&aws, &cfg.s3_bucket, cfg.store_backend) {
        (Some(aws), Some(bucket), StoreBackend::S3) => {
            Arc::new(S3Store::new(aws.s3.clone(), bucket, &cfg.s3_prefix))
        }
        _ => {
            warn!("using in-memory record store; records are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // -----------------------------------------------------------------------
    // 5. Adapter + background tasks
    // -----------------------------------------------------------------------
    let adapter = Arc::new(RecordAdapter::new(
        store,
        Arc::clone(&engine),
        cfg.retry_policy(),
        &cfg.sensitive_field,
        cfg.max_page_size,
    ));
    let _key_refresh = engine::refresh_task(engine, cfg.key_refresh_interval());

    // -----------------------------------------------------------------------
    // 6. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(adapter, cfg.default_page_size);
    let router = server::router::build(state, cfg.request_timeout());

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    telemetry::shutdown();
    Ok(())
}

/// Resolve the active key version, minting the first one if the key is new.
async fn init_engine(provider: Arc<dyn KeyProvider>, key_name: &str) -> Result<EncryptionEngine> {
    match EncryptionEngine::init(Arc::clone(&provider), key_name).await {
        Err(EngineError::Key(KeyProviderError::NoVersions(_))) => {
            let minted = provider.create_new_version(key_name).await?;
            info!(key_name, key_version = %minted.version, "created initial key version");
            Ok(EncryptionEngine::init(provider, key_name).await?)
        }
        other => Ok(other?),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
