use crate::{cli::actions::Action, config::VisitorConfig};
use anyhow::Result;
use secrecy::SecretString;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let secret = |name: &str| {
        matches
            .get_one::<String>(name)
            .filter(|value| !value.is_empty())
            .map(|value| SecretString::from(value.clone()))
    };

    let mut config = VisitorConfig::new();
    if let Some(key) = matches.get_one::<String>("query-key") {
        config = config.with_querystring_key(key.to_string());
    }
    if let Some(key) = matches.get_one::<String>("session-key") {
        config = config.with_session_key(key.to_string());
    }
    if let Some(seconds) = matches.get_one::<i64>("session-expiry") {
        config = config.with_session_expiry_seconds(*seconds);
    }
    if let Some(seconds) = matches.get_one::<i64>("token-expiry") {
        config = config.with_token_expiry_seconds(*seconds);
    }
    if let Some(secure) = matches.get_one::<bool>("cookie-secure") {
        config = config.with_session_cookie_secure(*secure);
    }

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: secret("dsn"),
        admin_token: secret("admin-token"),
        config,
    })
}
