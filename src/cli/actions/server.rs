use crate::cilogin::{
    auth::Authenticator,
    new,
    session::{MemorySessionStore, SessionStore},
};
use crate::cli::actions::Action;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            users,
            session,
        } => {
            debug!("Loaded {} user(s)", users.len());

            let authenticator: Arc<dyn Authenticator> = Arc::new(users);
            let store: Arc<dyn SessionStore> =
                Arc::new(MemorySessionStore::new(Some(session.ttl())));

            new(port, authenticator, store, session).await?;
        }
    }

    Ok(())
}
