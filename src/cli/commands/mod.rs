use crate::cilogin::session::SESSION_COOKIE_NAME;
use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};

const DEFAULT_USER: &str = "ciuser@example.com:password";
const DEFAULT_SESSION_TTL: &str = "7200";

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("cilogin")
        .about("Login endpoint with session regeneration")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CILOGIN_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .help("User allowed to log in as email:password, repeatable (env: comma separated)")
                .env("CILOGIN_USERS")
                .value_delimiter(',')
                .action(ArgAction::Append)
                .default_value(DEFAULT_USER),
        )
        .arg(
            Arg::new("session-cookie")
                .long("session-cookie")
                .help("Name of the session cookie")
                .env("CILOGIN_SESSION_COOKIE")
                .default_value(SESSION_COOKIE_NAME),
        )
        .arg(
            Arg::new("session-ttl")
                .long("session-ttl")
                .help("Session idle lifetime and cookie Max-Age in seconds")
                .env("CILOGIN_SESSION_TTL")
                .default_value(DEFAULT_SESSION_TTL)
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("session-secure")
                .long("session-secure")
                .help("Mark the session cookie Secure (serve over HTTPS)")
                .env("CILOGIN_SESSION_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("CILOGIN_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
