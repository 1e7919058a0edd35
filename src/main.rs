// src/main.rs
use chrono::Duration;
use env_logger::{Builder, Env};
use log::{error, info};
use reqwest::Client;
use std::sync::Arc;
use stock_trader::auth::Authenticator;
use stock_trader::quote::{AlphaVantage, QuoteSource};
use stock_trader::{Config, Database};

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db = match Database::open_at_path(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = db.health_check().await {
        error!("Database health check failed: {}", e);
        std::process::exit(1);
    }
    info!("Connected to database at {}", db.path().display());

    let quotes: Arc<dyn QuoteSource> = Arc::new(AlphaVantage::new(
        Client::new(),
        Arc::new(config.api_key.clone()),
        config.quote_base_url.clone(),
    ));
    let auth = Arc::new(Authenticator::new(
        config.session_secret.clone(),
        Duration::hours(config.session_ttl_hours),
        config.bcrypt_cost,
    ));

    info!("Starting the stock trader application...");
    let app = stock_trader::app(db, quotes, auth, config.starting_cash);

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(app).run(config.bind_addr).await;
}
