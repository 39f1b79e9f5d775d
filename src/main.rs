use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{routing::get, Router};
use http::HeaderValue;
use tokio::{signal, sync::mpsc};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use storefront_api as api;

use api::notifications::{LogNotifier, Notifier};
use api::payments::StripeGateway;
use api::rate_limiter::{RateLimitConfig, RateLimiter};
use api::services::{CheckoutService, OrderStatusService, ReconciliationService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    // Rate limiter: Redis when configured, in-memory otherwise
    let rl_cfg = RateLimitConfig {
        requests_per_window: cfg.rate_limit_requests,
        window: Duration::from_secs(cfg.rate_limit_window_secs),
    };
    let rate_limiter = match cfg.redis_url.as_deref() {
        Some(url) => match redis::Client::open(url) {
            Ok(client) => match client.get_tokio_connection_manager().await {
                Ok(conn) => {
                    info!("Rate limiting backed by Redis");
                    Arc::new(RateLimiter::redis(rl_cfg, conn))
                }
                Err(e) => {
                    warn!("Redis unavailable ({}), using in-memory rate limiting", e);
                    Arc::new(RateLimiter::in_memory(rl_cfg))
                }
            },
            Err(e) => {
                warn!("Invalid Redis URL ({}), using in-memory rate limiting", e);
                Arc::new(RateLimiter::in_memory(rl_cfg))
            }
        },
        None => Arc::new(RateLimiter::in_memory(rl_cfg)),
    };
    api::rate_limiter::spawn_eviction_task(rate_limiter.clone());

    // External collaborators and services
    let gateway = Arc::new(StripeGateway::new(cfg.payment_secret_key.clone())?);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let event_sender_for_services = event_sender.clone();
    let checkout = Arc::new(CheckoutService::new(
        db.clone(),
        gateway,
        event_sender_for_services.clone(),
        cfg.base_url.clone(),
    ));
    let order_status = Arc::new(OrderStatusService::new(
        db.clone(),
        notifier.clone(),
        event_sender_for_services.clone(),
    ));
    let reconciliation = Arc::new(ReconciliationService::new(
        db.clone(),
        notifier,
        event_sender_for_services,
        cfg.payment_webhook_secret.clone(),
        cfg.payment_webhook_tolerance_secs as i64,
    ));

    let cfg = Arc::new(cfg);
    let app_state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        checkout,
        order_status,
        reconciliation,
        rate_limiter,
    };

    // Build CORS layer from config
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());
    let cors_layer = if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        info!("No CORS origins configured, allowing all origins");
        CorsLayer::permissive()
    };

    let app = Router::<api::AppState>::new()
        .route("/", get(|| async { "storefront-api up" }))
        .nest("/api/v1", api::api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors_layer)
        .with_state(app_state);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
