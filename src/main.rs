mod auth;
mod backup;
mod config;
mod db;
mod error;
mod fallback;
mod handlers;
mod health;
mod health_watch;
mod llm;
mod mailer;
mod models;
mod settings;
mod storage;
#[cfg(test)]
mod test_support;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::Config;
pub use error::{AppError, Result};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub s3_client: aws_sdk_s3::Client,
    pub http: reqwest::Client,
    pub settings: settings::SettingsStore,
    pub watch_stats: health_watch::WatchStats,
}

impl AppState {
    pub fn new(config: Config, db: sqlx::SqlitePool) -> Self {
        let s3_client = storage::build_client(&config);
        let settings = settings::SettingsStore::new(db.clone());

        Self {
            db,
            config,
            s3_client,
            http: reqwest::Client::new(),
            settings,
            watch_stats: health_watch::WatchStats::default(),
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_body = state.config.max_request_body_bytes();

    Router::new()
        .route("/health", get(handlers::health_check))
        // Auth
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/me", get(handlers::auth::me))
        // Appointments
        .route(
            "/appointments",
            get(handlers::appointments::list).post(handlers::appointments::create),
        )
        .route(
            "/appointments/:id",
            put(handlers::appointments::update).delete(handlers::appointments::delete),
        )
        // AI, speech and content
        .route("/positions/redgifs", get(handlers::positions::redgifs))
        .route("/stories/generate", post(handlers::stories::generate))
        .route("/ai/chat", post(handlers::ai::chat))
        .route("/ask-ai", post(handlers::ai::ask))
        .route("/tts", post(handlers::tts::speak))
        .route("/toys/lovense/connect", post(handlers::toys::connect))
        .route("/toys/lovense/control", post(handlers::toys::control))
        // Media
        .route("/media", get(handlers::media::list))
        .route("/media/upload", post(handlers::media::upload))
        .route("/media/file/:filename", get(handlers::media::file))
        // Chat
        .route(
            "/chat/messages",
            get(handlers::chat::list).post(handlers::chat::send),
        )
        .route("/chat/messages/:id/read", put(handlers::chat::mark_read))
        // Settings, onboarding and health
        .route("/settings/health/all", get(handlers::settings::health_all))
        .route("/settings/health/watch", get(handlers::settings::watch_stats))
        .route(
            "/settings/settings",
            get(handlers::settings::get_settings).post(handlers::settings::save_settings),
        )
        .route(
            "/settings/onboarding/state",
            get(handlers::settings::onboarding_state),
        )
        .route(
            "/settings/onboarding/complete",
            post(handlers::settings::complete_onboarding),
        )
        // Luxury extras
        .route("/luxury/backup.zip", get(handlers::luxury::backup_zip))
        .route("/luxury/partner-message", post(handlers::luxury::partner_message))
        .route("/luxury/partner-messages", get(handlers::luxury::partner_messages))
        .route("/luxury/feedback", post(handlers::luxury::feedback))
        .route("/luxury/milestone/incr", post(handlers::luxury::milestone_incr))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // SQLite needs the parent directory of a file database to exist
    if let Some(path) = config
        .database_url
        .strip_prefix("sqlite:")
        .map(|rest| rest.trim_start_matches("//"))
        .and_then(|rest| rest.split('?').next())
        .filter(|path| !path.is_empty() && !path.starts_with(':'))
    {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    db::run_migrations(&db).await?;
    db::seed_users(&db, &config.seed_users()).await?;

    let state = Arc::new(AppState::new(config.clone(), db));

    let watch = health_watch::HealthWatch::from_state(state.clone())?;
    health_watch::spawn(watch);

    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
