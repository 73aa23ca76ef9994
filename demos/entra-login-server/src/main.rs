//! Sign users in with Microsoft Entra ID (or any OpenID provider) and call
//! Microsoft Graph on their behalf.

use anyhow::{Context, Result};
use ras_identity_login::{LoginService, login_router, spawn_sweeper};
use ras_identity_oidc::{ProviderConfig, TokenExchangeClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{Config, DiscoveryTarget};

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_filter().into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.eq_ignore_ascii_case("compact") {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::load().context("Invalid configuration")?;
    init_tracing(&config);

    let target = config
        .discovery_target()
        .context("No issuer or tenant id configured")?;
    let oidc_config = config.oidc_config();

    // Resolve the provider's endpoints
    let client = TokenExchangeClient::new(oidc_config.http_timeout_seconds)?;
    let metadata = match &target {
        DiscoveryTarget::Issuer(issuer) => client.discover(issuer).await,
        DiscoveryTarget::Authority(authority) => client.discover_authority(authority).await,
    }
    .with_context(|| format!("Provider discovery failed for {}", target.url()))?;
    let issuer = metadata.issuer.clone().unwrap_or_else(|| target.url().to_string());
    let provider = ProviderConfig::from_metadata(
        "entra",
        metadata,
        config.credentials(),
        config.redirect_uri(),
        config.provider.scopes.clone(),
    )
    .context("Discovered provider configuration is unusable")?;
    info!("Using provider {} with redirect URI {}", issuer, provider.redirect_uri);

    let service = Arc::new(
        LoginService::in_memory(provider, &oidc_config, config.session_config())
            .context("Failed to create login service")?,
    );

    let _sweeper = spawn_sweeper(
        service.clone(),
        Duration::from_secs(config.session.sweep_interval_seconds),
    );

    let app = login_router(service, config.route_config());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Login server listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
