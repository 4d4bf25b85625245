use crate::cilogin::{auth::UserDirectory, session::SessionConfig};

pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        users: UserDirectory,
        session: SessionConfig,
    },
}
