pub mod callback;
pub use self::callback::callback;

pub mod health;
pub use self::health::health;

pub mod home;
pub use self::home::home;

pub mod login;
pub use self::login::login;

pub mod logout;
pub use self::logout::logout;

pub mod protected;
pub use self::protected::protected;


// common extractors for the handlers
use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::{convert::Infallible, net::SocketAddr};

use crate::gateway::AppState;

/// Client address recorded in audit events.
///
/// The socket peer by default. With forwarding trusted in the config, the
/// first `X-Forwarded-For` hop, then `X-Real-IP`, win over the peer. `None`
/// when nothing is known.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        if state.config().trust_forwarded() {
            Ok(Self(forwarded_ip(&parts.headers).or(peer)))
        } else {
            Ok(Self(peer))
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        })
}

/// Substring check used to classify provider failures by their message.
pub(crate) fn mentions(message: &str, marker: &str) -> bool {
    message.to_lowercase().contains(marker)
}
