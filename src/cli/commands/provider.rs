use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_DOMAIN: &str = "domain";
pub const ARG_CLIENT_ID: &str = "client-id";
pub const ARG_CLIENT_SECRET: &str = "client-secret";
pub const ARG_PROVIDER_TIMEOUT: &str = "provider-timeout-seconds";

#[derive(Debug)]
pub struct Options {
    pub domain: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub timeout: Duration,
}

impl Options {
    /// Parse identity provider arguments from matches.
    ///
    /// # Errors
    /// Returns an error if required arguments are missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // env vars set to "" pass clap's required check
        let read_required = |id: &str| -> anyhow::Result<String> {
            matches
                .get_one::<String>(id)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            domain: read_required(ARG_DOMAIN)?,
            client_id: read_required(ARG_CLIENT_ID)?,
            client_secret: SecretString::from(read_required(ARG_CLIENT_SECRET)?),
            timeout: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_PROVIDER_TIMEOUT)
                    .copied()
                    .unwrap_or(10),
            ),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DOMAIN)
                .long("domain")
                .help("Identity provider domain, example: tenant.eu.auth0.com")
                .env("AUTH0_DOMAIN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_ID)
                .long("client-id")
                .help("OAuth client id registered with the provider")
                .env("AUTH0_CLIENT_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_CLIENT_SECRET)
                .long("client-secret")
                .help("OAuth client secret")
                .env("AUTH0_CLIENT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_PROVIDER_TIMEOUT)
                .long("provider-timeout-seconds")
                .help("Timeout for discovery and token requests to the provider")
                .env("AUTHGATE_PROVIDER_TIMEOUT_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
