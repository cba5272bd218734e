//! # Authgate (OpenID Connect Session Gateway)
//!
//! `authgate` is a small web front end that delegates authentication to an
//! external OpenID Connect provider and gates pages behind a server-side
//! session.
//!
//! ## Flow
//!
//! - `GET /login` redirects the browser to the provider's authorization endpoint.
//! - `GET|POST /callback` exchanges the authorization code for tokens and stores
//!   the token response plus ID token claims in the session.
//! - `GET /protected` is served only when the session holds a user; otherwise the
//!   browser is sent back to `/login`.
//! - `GET /logout` drops the session and redirects to the provider's logout endpoint.
//!
//! Protocol checks (state, nonce, PKCE, ID token signatures) are delegated to the
//! [`openidconnect`] crate and the provider itself.
//!
//! ## Audit
//!
//! Every security-relevant transition emits exactly one structured audit event,
//! written as a flat JSON object through `tracing` under the `audit` target.

pub mod cli;
pub mod gateway;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
