use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use storefront::config::AppConfig;
use storefront::db;
use storefront::handlers;
use storefront::services::gateway::card::HttpCardGateway;
use storefront::services::gateway::mpesa::DarajaClient;
use storefront::services::messaging::twilio::TwilioSmsProvider;
use storefront::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let conn = db::init_db(&config.database_url)?;

    if config.mpesa.consumer_key.is_empty() {
        tracing::warn!("MPESA_CONSUMER_KEY not set, M-Pesa initiation will fail");
    }
    if config.mpesa.webhook_secret.is_empty() {
        tracing::warn!("MPESA_WEBHOOK_SECRET not set, callback signatures are not verified");
    }
    if config.card_gateway_url.is_empty() {
        tracing::warn!("CARD_GATEWAY_URL not set, card payments will fail");
    }

    let mpesa = DarajaClient::new(config.mpesa.clone());
    let card = HttpCardGateway::new(
        config.card_gateway_url.clone(),
        config.card_gateway_key.clone(),
    );
    let messaging = TwilioSmsProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    );

    let state = Arc::new(AppState {
        db: Arc::new(Mutex::new(conn)),
        config: config.clone(),
        mpesa: Box::new(mpesa),
        card: Box::new(card),
        messaging: Box::new(messaging),
    });

    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!("listening on port {}", config.port);
    axum::serve(listener, app).await?;

    Ok(())
}
