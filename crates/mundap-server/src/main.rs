mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{
    HeaderName, HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mundap_api::middleware::ADMIN_KEY_HEADER;
use mundap_api::{AppStateInner, Settings, TokenIssuer, build_router, spawn_limiter_pruning};
use mundap_crypto::PhoneVault;
use mundap_db::{Database, Store};
use mundap_notify::worker::run_worker;
use mundap_notify::{LogQueue, NotificationQueue, Notifier, RedisQueue, Scheduler, TracingNotifier};

use crate::config::{Config, DatabaseConfig, Environment};

const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(600);

const DEFAULT_LOG_FILTER: &str = "mundapdari=debug,mundap_api=debug,mundap_notify=info,tower_http=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    if config.env == Environment::Development {
        warn!("Running in development mode; placeholder secrets may be in use");
    }

    let store = open_store(&config.database).await?;

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let queue: Arc<dyn NotificationQueue> = match &config.redis_url {
        Some(url) => match RedisQueue::connect(url).await {
            Ok(redis) => {
                let redis = Arc::new(redis);
                tokio::spawn(run_worker(redis.clone(), notifier.clone(), Duration::from_secs(1)));
                info!("Notification queue: redis");
                redis
            }
            Err(e) => {
                warn!("Redis unavailable ({}), falling back to log-only notifications", e);
                Arc::new(LogQueue::new(notifier.clone()))
            }
        },
        None => {
            info!("REDIS_URL not set, notifications are delivered inline");
            Arc::new(LogQueue::new(notifier.clone()))
        }
    };

    let scheduler = Scheduler::new(store.clone(), queue.clone(), config.schedule);
    let mut jobs = scheduler.spawn();
    info!("Scheduler started with {} jobs", jobs.len());

    let tokens = TokenIssuer::new(
        &config.jwt_secret,
        &config.jwt_refresh_secret,
        chrono::Duration::minutes(config.access_ttl_minutes),
        chrono::Duration::days(config.refresh_ttl_days),
    );
    let settings = Settings {
        admin_api_key: config.admin_api_key.clone(),
        utc_offset_hours: config.schedule.utc_offset_hours,
        auth_rate_limit_per_minute: config.auth_rate_limit_per_minute,
    };
    let state = AppStateInner::new(
        store,
        tokens,
        PhoneVault::new(config.encryption_key),
        queue,
        settings,
    );

    jobs.push(spawn_limiter_pruning(state.clone(), LIMITER_PRUNE_INTERVAL));

    let mut app = build_router(state);
    if let Some(dir) = &config.static_dir {
        info!("Serving static files from {}", dir.display());
        let spa = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
        app = app.fallback_service(spa);
    }
    let app = app
        .layer(cors_layer(&config.cors_origins)?)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Mundapdari server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    for job in jobs {
        job.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn open_store(database: &DatabaseConfig) -> anyhow::Result<Arc<dyn Store>> {
    match database {
        #[cfg(feature = "postgres")]
        DatabaseConfig::Postgres(url) => Ok(Arc::new(mundap_db::postgres::PgDatabase::connect(url).await?)),
        #[cfg(not(feature = "postgres"))]
        DatabaseConfig::Postgres(_) => {
            anyhow::bail!("USE_POSTGRES is set but this build has no postgres support")
        }
        DatabaseConfig::Sqlite(path) => Ok(Arc::new(Database::open(path)?)),
    }
}

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o).with_context(|| format!("Invalid CORS origin '{o}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(ADMIN_KEY_HEADER),
        ]))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
