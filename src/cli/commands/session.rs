use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

pub const ARG_SECRET_KEY: &str = "secret-key";
pub const ARG_SESSION_TTL: &str = "session-ttl-seconds";

#[derive(Debug)]
pub struct Options {
    pub secret_key: SecretString,
    pub ttl: Duration,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the secret key is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret_key = matches
            .get_one::<String>(ARG_SECRET_KEY)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_SECRET_KEY}"))?;

        Ok(Self {
            secret_key: SecretString::from(secret_key),
            ttl: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_SESSION_TTL)
                    .copied()
                    .unwrap_or(86_400),
            ),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SECRET_KEY)
                .long("secret-key")
                .help("Secret used to encrypt and sign the session cookie")
                .env("APP_SECRET_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long("session-ttl-seconds")
                .help("Idle lifetime of a server-side session in seconds (at most one year)")
                .env("AUTHGATE_SESSION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..=31_536_000)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn command() -> Command {
        with_args(Command::new("authgate"))
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        temp_env::with_vars(
            [
                ("APP_SECRET_KEY", Some("change-me")),
                ("AUTHGATE_SESSION_TTL_SECONDS", None),
            ],
            || {
                let matches = command().try_get_matches_from(vec!["authgate"])?;
                let options = Options::parse(&matches)?;
                assert_eq!(options.secret_key.expose_secret(), "change-me");
                assert_eq!(options.ttl, Duration::from_secs(86_400));
                Ok(())
            },
        )
    }

    #[test]
    fn test_ttl_must_be_positive() {
        temp_env::with_vars([("APP_SECRET_KEY", Some("change-me"))], || {
            let result = command().try_get_matches_from(vec![
                "authgate",
                "--session-ttl-seconds",
                "0",
            ]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn test_ttl_above_one_year_is_rejected() {
        temp_env::with_vars([("APP_SECRET_KEY", Some("change-me"))], || {
            let result = command().try_get_matches_from(vec![
                "authgate",
                "--session-ttl-seconds",
                "18446744073709551615",
            ]);
            assert!(result.is_err());

            let result = command().try_get_matches_from(vec![
                "authgate",
                "--session-ttl-seconds",
                "31536000",
            ]);
            assert!(result.is_ok());
        });
    }

    #[test]
    fn test_blank_secret_is_rejected() {
        temp_env::with_vars([("APP_SECRET_KEY", Some("   "))], || {
            let result = command()
                .try_get_matches_from(vec!["authgate"])
                .map_err(anyhow::Error::from)
                .and_then(|matches| Options::parse(&matches));
            assert!(result.is_err());
        });
    }
}
