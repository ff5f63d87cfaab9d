use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use orgsync_api::addresses::CleansingClient;
use orgsync_api::config::Settings;
use orgsync_api::dest::writer::BusinessLogicClient;
use orgsync_api::dest::DstClient;
use orgsync_api::email_notify::EmailNotifier;
use orgsync_api::handlers;
use orgsync_api::run_db::RunDb;
use orgsync_api::source::SrcClient;
use orgsync_api::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("orgsync_api=debug,tower_http=debug")
        }))
        .init();

    let config_path =
        std::env::var("ORGSYNC_CONFIG").unwrap_or_else(|_| "./orgsync.toml".to_string());
    let settings = Settings::load(&config_path)?;
    let timeout = settings.request_timeout();

    let src_base_url =
        std::env::var("ORGSYNC_SRC_URL").unwrap_or_else(|_| "http://localhost:9001".to_string());
    let src_username = std::env::var("ORGSYNC_SRC_USER").unwrap_or_default();
    let src_password = std::env::var("ORGSYNC_SRC_PASSWORD").unwrap_or_default();

    let dst_base_url =
        std::env::var("ORGSYNC_DST_URL").unwrap_or_else(|_| "http://localhost:9002".to_string());
    let dst_token = std::env::var("ORGSYNC_DST_TOKEN").unwrap_or_default();

    let cleansing_base_url = std::env::var("ORGSYNC_CLEANSING_URL")
        .unwrap_or_else(|_| "http://localhost:9003".to_string());
    let business_logic_base_url = std::env::var("ORGSYNC_BUSINESS_LOGIC_URL")
        .unwrap_or_else(|_| src_base_url.clone());

    let run_db = Arc::new(RunDb::open(&settings.run_db_path)?);
    tracing::info!("run db opened at {}", settings.run_db_path);

    let src = Arc::new(SrcClient::new(src_base_url, src_username, src_password, timeout)?);
    let dst = Arc::new(DstClient::new(dst_base_url, dst_token, timeout)?);
    let cleanser = Arc::new(CleansingClient::new(cleansing_base_url, timeout)?);
    let business_logic = Arc::new(BusinessLogicClient::new(business_logic_base_url, timeout)?);
    let email = Arc::new(EmailNotifier::new(settings.email.clone()));

    let state = AppState {
        settings: Arc::new(settings),
        run_db,
        src,
        dst,
        cleanser,
        business_logic,
        email,
        last_success: Arc::new(AtomicU64::new(0)),
    };

    let app = Router::new()
        .route("/", get(handlers::trigger::index))
        .route("/trigger", post(handlers::trigger::trigger))
        .route("/rundb/status", get(handlers::trigger::rundb_status))
        .route("/timeline/sync/person", post(handlers::person::sync_person))
        .route("/metrics", get(handlers::metrics::metrics))
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("orgsync-api listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
