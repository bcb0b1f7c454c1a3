use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use rand::Rng;
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trustsync::audit::{AuditLedger, EventType};
use trustsync::config::AppConfig;
use trustsync::error::RotationError;
use trustsync::keys::KeyRegistry;
use trustsync::reconcile::ReconciliationEngine;
use trustsync::remote::{HttpRemoteAuthority, MockRemoteAuthority, RemoteAuthority};
use trustsync::rotation::{pair_lock, RotationCoordinator, RotationStatus};
use trustsync::store::{self, CacheStore, SqliteCacheStore};
use trustsync::view::{self, AuditPage, KeyView};

#[derive(Clone)]
struct AppState {
    coordinator: RotationCoordinator,
    registry: KeyRegistry,
    ledger: AuditLedger,
    config: AppConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trustsync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SecureCypher trust-state synchronization core");

    // Load configuration
    let config = AppConfig::load()?;
    info!("Configuration loaded");

    // Initialize cache store
    let sqlite = SqliteCacheStore::new(&config.database_url).await?;
    sqlite.run_migrations().await?;
    let cache: Arc<dyn CacheStore> = Arc::new(sqlite);
    info!("Cache store ready");

    // Load cached trust state (verifies the audit chain on the way in)
    let (registry, ledger) = store::load_state(cache.as_ref()).await?;
    info!(
        keys = registry.all_keys().await.len(),
        records = ledger.len().await,
        "Cached trust state loaded"
    );

    // Wire the remote authority
    let demo_mode = config.remote_base_url.is_none();
    let remote: Arc<dyn RemoteAuthority> = match &config.remote_base_url {
        Some(url) => Arc::new(HttpRemoteAuthority::new(url.clone())),
        None => {
            warn!("No remote authority configured; running against the in-process mock");
            // Seed the mock's generation counter from cached state so a
            // restarted demo does not look like a key regression.
            Arc::new(MockRemoteAuthority::with_key_history(
                registry.max_version().await,
            ))
        }
    };

    let lock = pair_lock();
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let engine = ReconciliationEngine::new(
        registry.clone(),
        ledger.clone(),
        Arc::clone(&remote),
        Arc::clone(&cache),
        Arc::clone(&lock),
        request_timeout,
    );
    let coordinator = RotationCoordinator::new(
        registry.clone(),
        ledger.clone(),
        remote,
        cache,
        engine.clone(),
        lock,
        config.server_id.clone(),
        request_timeout,
    );

    // Demo mode starts from nothing; install a first key
    if demo_mode && registry.active_key().await.is_none() {
        match coordinator.rotate("bootstrap").await {
            Ok(key) => info!(version = key.version, "Bootstrap key installed"),
            Err(err) => error!("Bootstrap rotation failed: {}", err),
        }
    }

    // Periodic reconciliation against the authority
    {
        let engine = engine.clone();
        let interval = Duration::from_secs(config.reconcile_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                match engine.fetch_and_merge().await {
                    Ok(report) => {
                        if report.records_appended > 0 {
                            info!(
                                appended = report.records_appended,
                                "Reconciliation merged remote records"
                            );
                        }
                    }
                    Err(err) => warn!("Periodic reconciliation failed: {}", err),
                }
            }
        });
        info!("Periodic reconciliation started");
    }

    // Demo traffic generator, the console's mock data feed analogue
    if demo_mode {
        let ledger = ledger.clone();
        let server_id = config.server_id.clone();
        let interval = Duration::from_secs(config.demo_traffic_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;

                let (event_type, status, response_time_ms, client_key) = {
                    let mut rng = rand::thread_rng();
                    let event_type = [
                        EventType::Encrypt,
                        EventType::Decrypt,
                        EventType::Sign,
                        EventType::Verify,
                    ][rng.gen_range(0..4)];
                    let status = if rng.gen_bool(0.95) { "success" } else { "failed" };
                    let response_time_ms = rng.gen_range(50..550);
                    let client_key = format!("pk_{}", hex::encode(rand::random::<[u8; 10]>()));
                    (event_type, status, response_time_ms, client_key)
                };

                let mut details = HashMap::new();
                details.insert("status".to_string(), status.to_string());
                details.insert("client_public_key".to_string(), client_key);
                details.insert("response_time_ms".to_string(), response_time_ms.to_string());

                if let Err(err) = ledger
                    .append(event_type, &server_id, details, chrono::Utc::now())
                    .await
                {
                    warn!("Demo audit append failed: {}", err);
                }
            }
        });
        info!("Demo traffic generator started");
    }

    // Build application
    let state = AppState {
        coordinator,
        registry,
        ledger,
        config: config.clone(),
    };
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .route("/keys", get(keys_endpoint))
        .route("/audit", get(audit_endpoint))
        .route("/rotation/status", get(rotation_status_endpoint))
        .route("/rotation", post(rotate_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "trustsync",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state.ledger.verify_chain(None).await;
    let rotation = state.coordinator.status().await;

    Json(serde_json::json!({
        "status": if report.ok { "healthy" } else { "integrity_violation" },
        "service": "trustsync",
        "timestamp": chrono::Utc::now(),
        "server_id": state.config.server_id,
        "ledger": {
            "records": state.ledger.len().await,
            "tail_hash": state.ledger.tail_hash().await,
            "chain_ok": report.ok,
            "broken_at_id": report.broken_at_id,
        },
        "rotation_state": rotation.state.as_str(),
        "active_key_version": rotation.active_key_version,
    }))
}

async fn keys_endpoint(State(state): State<AppState>) -> Json<Vec<KeyView>> {
    Json(view::list_keys(&state.registry).await)
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default)]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page_size() -> usize {
    25
}

async fn audit_endpoint(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<AuditPage> {
    Json(view::list_audit_records(&state.ledger, query.page, query.page_size).await)
}

async fn rotation_status_endpoint(State(state): State<AppState>) -> Json<RotationStatus> {
    Json(state.coordinator.status().await)
}

#[derive(Deserialize)]
struct RotateRequest {
    #[serde(default = "default_reason")]
    reason: String,
}

fn default_reason() -> String {
    "manual".to_string()
}

async fn rotate_endpoint(
    State(state): State<AppState>,
    Json(request): Json<RotateRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.coordinator.rotate(&request.reason).await {
        Ok(key) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "rotated": true,
                "key_id": key.key_id,
                "version": key.version,
            })),
        ),
        Err(RotationError::AlreadyRotating) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({
                "rotated": false,
                "error": "a rotation is already in flight",
            })),
        ),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "rotated": false,
                "error": err.to_string(),
            })),
        ),
    }
}
