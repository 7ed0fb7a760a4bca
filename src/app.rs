use crate::auth::{
    auth_middleware, check_credentials, insert_user, logout, serve_login, serve_signup,
    spawn_session_sweeper, MemorySessionStore, PasswordHasher, PgSessionStore, PgUserStore,
    SessionStore, UserStore,
};
use crate::error::handle_panic;
use crate::pages::{admin, fallback, profile, welcome};
use crate::settings::{self, SessionBackend, Settings};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Collaborators shared by every request.
#[derive(Clone)]
pub struct AppState {
    /// The credential store.
    pub users: Arc<dyn UserStore>,
    /// The session store.
    pub sessions: Arc<dyn SessionStore>,
    /// Hashes signup passwords and verifies login attempts.
    pub hasher: PasswordHasher,
    /// Session cookie settings.
    pub cookie: settings::Session,
}

/// Error when starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    /// Could not reach or migrate the database.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Migrations failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    /// Could not bind or serve.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// `server.host` is not an IP address.
    #[error("invalid listen address: {0}")]
    Address(#[from] std::net::AddrParseError),
}

/// Runs the server. Main entrypoint for the server app.
pub async fn run_server() -> Result<(), ServerError> {
    let settings = Settings::new()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .ok()
                .or_else(|| settings.base.rust_log.clone())
                .unwrap_or_else(|| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(&settings.database.url)
        .await?;
    sqlx::migrate!("database/migrations").run(&pool).await?;

    let ttl = Duration::from_secs(settings.session.ttl_secs);
    let sessions: Arc<dyn SessionStore> = match settings.session.backend {
        SessionBackend::Postgres => Arc::new(PgSessionStore::new(&pool, ttl)),
        SessionBackend::Memory => {
            tracing::warn!("sessions are kept in memory and are lost on restart");
            Arc::new(MemorySessionStore::with_ttl(ttl))
        }
    };
    spawn_session_sweeper(
        sessions.clone(),
        Duration::from_secs(settings.session.sweep_interval_secs.max(1)),
    );

    let state = AppState {
        users: Arc::new(PgUserStore::new(&pool)),
        sessions,
        hasher: PasswordHasher::new(),
        cookie: settings.session.clone(),
    };

    let addr = SocketAddr::new(settings.server.host.parse()?, settings.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// The router with every route and layer. Every request goes through the
/// auth middleware before reaching a handler.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/signup", get(serve_signup).post(insert_user))
        .route("/login", get(serve_login).post(check_credentials))
        .route("/logout", post(logout))
        .route("/admin", get(admin))
        .route("/profile", get(profile))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(handle_panic)),
        )
        .with_state(state)
}
