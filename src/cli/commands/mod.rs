pub mod logging;
pub mod provider;
pub mod session;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_TRUST_FORWARDED: &str = "trust-forwarded";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("authgate")
        .about("OpenID Connect session gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("3000")
                .env("PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_BASE_URL)
                .long("base-url")
                .help("Externally visible URL of the gateway (default: http://localhost:<port>)")
                .long_help(
                    "Externally visible URL of the gateway. The provider callback, the logout returnTo target and the Secure cookie flag are derived from it.",
                )
                .env("AUTHGATE_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED)
                .long("trust-forwarded")
                .help("Record the client address from X-Forwarded-For/X-Real-IP")
                .long_help(
                    "Record the client address from X-Forwarded-For, then X-Real-IP. Only enable behind a reverse proxy that overwrites these headers, otherwise clients can forge the audited address.",
                )
                .env("AUTHGATE_TRUST_FORWARDED")
                .action(clap::ArgAction::SetTrue),
        );

    let command = provider::with_args(command);
    let command = session::with_args(command);
    logging::with_args(command)
}
