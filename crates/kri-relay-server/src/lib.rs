//! KRI relay server: configuration, HTTP routes and startup wiring.

pub mod config;
pub mod routes;

use std::sync::Arc;

use anyhow::Context;
use kri_relay::{PortalEndpoints, PortalSession, Relay, ReqwestTransport};

pub use config::{ConfigError, RelayConfig};
pub use routes::{router, serve, ApiError, AppState};

/// Build the relay core described by `config`.
pub fn build_relay(config: &RelayConfig) -> anyhow::Result<Relay> {
    let transport =
        ReqwestTransport::new(config.timeout).context("Failed to build the HTTP client")?;

    let mut endpoints = PortalEndpoints::with_origin(&config.portal_origin)
        .context("Invalid portal origin")?;
    if let Some(url) = &config.search_url {
        endpoints = endpoints.with_search(url.clone());
    }
    if let Some(url) = &config.mobile_warmup_url {
        endpoints = endpoints.with_mobile_warmup(url.clone());
    }

    let session = PortalSession::new(
        Arc::new(transport),
        config.credentials.clone(),
        endpoints,
        config.session_ttl,
    );
    Ok(Relay::new(session))
}

/// Shared router state for `config`.
pub fn build_state(config: &RelayConfig) -> anyhow::Result<Arc<AppState>> {
    Ok(Arc::new(AppState {
        relay: build_relay(config)?,
        api_token: config.api_token.clone(),
    }))
}
