use crate::{
    APP_USER_AGENT,
    cli::telemetry,
    gateway::{self, AppState, AuditLog, GatewayConfig, MemorySessionStore, OidcProvider},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub base_url: Url,
    pub trust_forwarded: bool,
    pub domain: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub provider_timeout: Duration,
    pub secret_key: SecretString,
    pub session_ttl: Duration,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = GatewayConfig::new(
        args.base_url,
        &args.domain,
        &args.client_id,
        &args.secret_key,
    )
    .context("Invalid gateway configuration")?
    .with_trust_forwarded(args.trust_forwarded);

    debug!("Gateway config: {:?}", config);

    // the token endpoint must never be followed through a redirect
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(args.provider_timeout)
        .user_agent(APP_USER_AGENT)
        .build()
        .context("Failed to build provider HTTP client")?;

    let provider = OidcProvider::new(
        config.provider_domain(),
        config.client_id(),
        args.client_secret,
    )
    .with_http_client(http);

    info!(
        "Using identity provider {} with callback {}",
        provider.issuer(),
        config.callback_url()
    );

    let state = AppState::new(
        config,
        Arc::new(provider),
        Arc::new(MemorySessionStore::new(args.session_ttl)),
        AuditLog::default(),
    );

    let result = gateway::serve(args.port, state).await;

    telemetry::shutdown_tracer();

    result
}
