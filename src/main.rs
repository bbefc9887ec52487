use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rss_reader::aggregator::Aggregator;
use rss_reader::config::Config;
use rss_reader::db::Database;
use rss_reader::fetcher::HttpFeedSource;
use rss_reader::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rss_reader=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("FEEDS_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!(
        "Loaded {} categories and {} feeds from {}",
        config.categories.len(),
        config.feeds.len(),
        config_path
    );
    if config.api_tokens.is_empty() && config.users.is_empty() {
        warn!("No api_tokens or users configured, write endpoints will reject every request");
    }

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| config.database_url.clone());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.seed(&config).await?;
    info!("Database initialized");

    let source = Arc::new(HttpFeedSource::new()?);
    let aggregator = Aggregator::new(source, config.fetch_concurrency);

    let state = Arc::new(AppState {
        db: Arc::new(db),
        aggregator: Arc::new(aggregator),
        api_tokens: config.api_tokens.clone(),
        default_article_count: config.default_article_count,
    });

    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
