use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum::response::IntoResponse;
use axum::Router;
use sqlx::PgPool;
#[cfg(not(feature = "tls"))]
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use plansync_backend::config::Config;
use plansync_backend::db::{
    postgres_stripe_event_log_repository::PostgresStripeEventLogRepository,
    postgres_user_repository::PostgresUserRepository,
    stripe_event_log_repository::StripeEventLogRepository, user_repository::UserRepository,
};
use plansync_backend::responses::JsonResponse;
use plansync_backend::routes;
use plansync_backend::services::stripe::{LiveStripeService, StripeService};
use plansync_backend::utils::jwt::JwtKeys;
use plansync_backend::AppState;

#[cfg(feature = "tls")]
use axum_server::tls_rustls::RustlsConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env().context("invalid configuration")?);
    let jwt_keys = Arc::new(JwtKeys::from_env().context("invalid JWT secret")?);

    let pool = establish_connection(&config.database_url).await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let users = Arc::new(PostgresUserRepository { pool: pool.clone() }) as Arc<dyn UserRepository>;
    let event_log = Arc::new(PostgresStripeEventLogRepository { pool: pool.clone() })
        as Arc<dyn StripeEventLogRepository>;

    let stripe = match &config.billing {
        Ok(Some(settings)) => {
            info!("stripe billing enabled");
            Some(Arc::new(LiveStripeService::from_settings(&settings.stripe)) as Arc<dyn StripeService>)
        }
        Ok(None) => {
            info!("stripe is not configured; billing routes are disabled");
            None
        }
        Err(err) => {
            error!(%err, "stripe configuration is invalid; billing routes are disabled");
            None
        }
    };

    let state = AppState::new(config.clone(), jwt_keys, users, event_log, stripe);

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(config.rate_limit_ms)
            .burst_size(config.rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .context("invalid rate limiter settings")?,
    );

    // Drop limiter entries for idle clients.
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let origin = config
        .frontend_origin
        .parse::<HeaderValue>()
        .context("FRONTEND_ORIGIN is not a valid header value")?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let app = routes::router(state)
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = config.bind_addr;

    #[cfg(feature = "tls")]
    serve_tls(addr, make_service).await?;
    #[cfg(not(feature = "tls"))]
    serve_plain(addr, make_service).await?;

    Ok(())
}

type AppService = IntoMakeServiceWithConnectInfo<Router, SocketAddr>;

#[cfg(not(feature = "tls"))]
async fn serve_plain(addr: SocketAddr, make_service: AppService) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

#[cfg(feature = "tls")]
async fn serve_tls(addr: SocketAddr, make_service: AppService) -> anyhow::Result<()> {
    let cert = std::env::var("DEV_CERT_LOCATION").context("DEV_CERT_LOCATION must be set")?;
    let key = std::env::var("DEV_KEY_LOCATION").context("DEV_KEY_LOCATION must be set")?;
    let tls_config = RustlsConfig::from_pem_file(cert, key)
        .await
        .context("failed to load TLS certs")?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    info!(%addr, "listening with TLS");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(make_service)
        .await
        .context("server error")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to verify database connection")?;

    info!("connected to the database");
    Ok(pool)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
