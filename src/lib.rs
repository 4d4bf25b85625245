//! # cilogin
//!
//! A single login endpoint with session regeneration.
//!
//! The handler builds credentials from the request, asks an injected
//! [`Authenticator`](cilogin::auth::Authenticator) whether they are valid and,
//! on success, asks an injected [`SessionStore`](cilogin::session::SessionStore)
//! to regenerate the caller's session before answering `200 Login successful`.
//! Anything else answers `403 Invalid credentials`.
//!
//! ## Known quirk
//!
//! The password sent to the authenticator is always the literal `password`;
//! whatever the request carries is ignored. The default email is
//! `ciuser@example.com`.

pub mod cilogin;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
