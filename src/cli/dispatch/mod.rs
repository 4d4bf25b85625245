use crate::cilogin::{auth::UserDirectory, session::SessionConfig};
use crate::cli::actions::Action;
use anyhow::{Context, Result};

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let users = UserDirectory::from_specs(
        matches
            .get_many::<String>("user")
            .into_iter()
            .flatten()
            .filter(|spec| !spec.trim().is_empty()),
    )
    .context("invalid --user")?;

    let session = SessionConfig {
        cookie_name: matches
            .get_one::<String>("session-cookie")
            .cloned()
            .context("missing required argument: --session-cookie")?,
        ttl_seconds: matches
            .get_one::<u64>("session-ttl")
            .copied()
            .context("missing required argument: --session-ttl")?,
        secure: matches.get_flag("session-secure"),
    };

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        users,
        session,
    })
}
