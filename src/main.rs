use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use five_news::config::{Config, Secrets};
use five_news::db::Database;
use five_news::fetcher::{start_background_refresh, Fetcher};
use five_news::filter::HeadlineFilter;
use five_news::retry::RetryPolicy;
use five_news::routes::{self, AppState};
use five_news::service::NewsService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "five_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("NEWS_CONFIG").unwrap_or_else(|_| "news.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    let secrets = Secrets::from_env();
    for (name, value) in [
        ("OPENAI_API_KEY", &secrets.openai_api_key),
        ("REPLICATE_API_TOKEN", &secrets.replicate_api_token),
        ("ELEVENLABS_API_KEY", &secrets.elevenlabs_api_key),
    ] {
        if value.is_none() {
            warn!("{} is not set; the matching endpoint will return 503", name);
        }
    }

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:five_news.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.sync_feeds(&config.feeds).await?;
    info!("Database initialized");

    let db = Arc::new(db);

    let retry = RetryPolicy::from(&config.retry);
    let filter = HeadlineFilter::new(&config.filter, config.max_age_hours)?;
    let fetcher = Arc::new(Fetcher::new(db.clone(), filter, retry)?);
    let service = Arc::new(NewsService::new(db.clone(), &config, secrets)?);

    // Start background refresh task
    let bg_fetcher = fetcher.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_fetcher, refresh_interval).await;
    });

    let state = Arc::new(AppState {
        db,
        fetcher,
        service,
        headline_limit: config.headline_limit,
    });
    let app = routes::router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server starting on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
