use crate::config::MAX_EXPIRY_SECONDS;
use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ColorChoice, Command,
};

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

    Command::new("visitors")
        .about("Token based visitor access")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("VISITORS_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string, visitors are kept in memory when omitted")
                .env("VISITORS_DSN"),
        )
        .arg(
            Arg::new("admin-token")
                .long("admin-token")
                .help("Token expected in the x-visitors-admin-token header, admin routes are disabled when omitted")
                .env("VISITORS_ADMIN_TOKEN"),
        )
        .arg(
            Arg::new("query-key")
                .long("query-key")
                .help("Query string parameter carrying the visitor token")
                .default_value("vuid")
                .env("VISITORS_QUERY_KEY"),
        )
        .arg(
            Arg::new("session-key")
                .long("session-key")
                .help("Session key holding the visitor")
                .default_value("visitor:session")
                .env("VISITORS_SESSION_KEY"),
        )
        .arg(
            Arg::new("session-expiry")
                .long("session-expiry")
                .help("Seconds of inactivity before a visitor session expires")
                .default_value("86400")
                .env("VISITORS_SESSION_EXPIRY")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_EXPIRY_SECONDS)),
        )
        .arg(
            Arg::new("token-expiry")
                .long("token-expiry")
                .help("Seconds a new visitor token stays valid, 0 for never")
                .default_value("86400")
                .env("VISITORS_TOKEN_EXPIRY")
                .value_parser(clap::value_parser!(i64).range(0..=MAX_EXPIRY_SECONDS)),
        )
        .arg(
            Arg::new("cookie-secure")
                .long("cookie-secure")
                .help("Mark the session cookie Secure")
                .default_value("true")
                .env("VISITORS_COOKIE_SECURE")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("VISITORS_LOG_LEVEL")
                .global(true)
                .action(clap::ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
