pub mod server;

use crate::config::VisitorConfig;
use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: Option<SecretString>,
        admin_token: Option<SecretString>,
        config: VisitorConfig,
    },
}
