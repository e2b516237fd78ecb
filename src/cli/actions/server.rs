use crate::api::{handlers::AdminToken, new};
use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            admin_token,
            config,
        } => {
            new(port, dsn, config, AdminToken::new(admin_token)).await?;
        }
    }

    Ok(())
}
