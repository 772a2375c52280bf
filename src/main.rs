use std::{net::SocketAddr, sync::Arc};

use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use storefront_api as api;
use storefront_api::{
    auth::{AuthConfig, AuthService},
    events::EventSender,
    handlers::AppServices,
    services::{
        gateway::{PaymentGateway, RazorpayGateway},
        notifications::{LogNotifier, Notifier},
        staging::build_staging_store,
    },
    AppState,
};

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
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx, Vec::new()));

    let staging = build_staging_store(&cfg.staging, &cfg.redis_url).await?;
    info!(backend = %cfg.staging.backend, ttl_secs = cfg.staging.ttl_secs, "staging store ready");

    if cfg.gateway.key_secret.is_empty() {
        warn!("gateway key secret is empty; every payment verification will fail");
    }
    let gateway: Arc<dyn PaymentGateway> = Arc::new(RazorpayGateway::new(&cfg.gateway)?);
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let services = AppServices::new(
        db.clone(),
        &cfg,
        event_sender.clone(),
        staging,
        gateway,
        notifier,
    );
    let auth = Arc::new(AuthService::new(AuthConfig::from_app_config(&cfg)));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    let app_state = AppState {
        db,
        config: cfg,
        event_sender,
        services,
        auth,
    };
    let app = api::build_router(app_state);

    // Bind and serve
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("storefront-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
