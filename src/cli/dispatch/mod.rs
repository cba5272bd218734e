//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action that starts the gateway.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_BASE_URL, ARG_PORT, ARG_TRUST_FORWARDED, provider, session};
use anyhow::{Context, Result};
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or the base URL is invalid.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(3000);

    let base_url = match matches
        .get_one::<String>(ARG_BASE_URL)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
    {
        Some(url) => Url::parse(url).with_context(|| format!("invalid --{ARG_BASE_URL}: {url}"))?,
        None => default_base_url(port)?,
    };

    let provider_opts = provider::Options::parse(matches)?;
    let session_opts = session::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        base_url,
        trust_forwarded: matches.get_flag(ARG_TRUST_FORWARDED),
        domain: provider_opts.domain,
        client_id: provider_opts.client_id,
        client_secret: provider_opts.client_secret,
        provider_timeout: provider_opts.timeout,
        secret_key: session_opts.secret_key,
        session_ttl: session_opts.ttl,
    }))
}

fn default_base_url(port: u16) -> Result<Url> {
    Url::parse(&format!("http://localhost:{port}")).context("failed to build default base URL")
}
