//! Sessions: the store seam, an in-memory store and the cookie plumbing that
//! hands every request a [`Session`].

use anyhow::{anyhow, Result};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{
        header::{InvalidHeaderValue, COOKIE},
        request::Parts,
        HeaderMap, HeaderValue, StatusCode,
    },
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};
use tracing::{debug, error};

pub const SESSION_COOKIE_NAME: &str = "cilogin_session";
pub const SESSION_TTL_SECONDS: u64 = 7200;

/// Opaque handle to a session owned by a [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
}

impl Session {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

pub trait SessionStore: Send + Sync {
    /// Resume the session named by `id`, or create a fresh one when the id is
    /// missing, unknown or expired.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable.
    fn start(&self, id: Option<&str>) -> Result<Session>;

    /// Move the session's data under a new id and invalidate the old one.
    ///
    /// # Errors
    /// Returns an error if the store is unavailable.
    fn regenerate(&self, session: &mut Session) -> Result<()>;
}

#[derive(Debug)]
struct SessionData {
    values: HashMap<String, String>,
    touched_at: Instant,
}

impl SessionData {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            touched_at: Instant::now(),
        }
    }
}

/// Process-local session store. Sessions idle for longer than the TTL are
/// neither resumed nor kept.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
    ttl: Option<Duration>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Store a value in a live session.
    ///
    /// # Errors
    /// Returns an error if the session does not exist or the lock is poisoned.
    pub fn put(&self, session: &Session, key: &str, value: &str) -> Result<()> {
        let mut sessions = self.write()?;
        let data = sessions
            .get_mut(session.id())
            .ok_or_else(|| anyhow!("session not found"))?;
        data.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Read a value from a session, `None` if either is missing.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn get(&self, session: &Session, key: &str) -> Result<Option<String>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(sessions
            .get(session.id())
            .and_then(|data| data.values.get(key).cloned()))
    }

    /// Whether the store currently knows `id`.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn contains(&self, id: &str) -> Result<bool> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(sessions.contains_key(id))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, SessionData>>> {
        self.sessions
            .write()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    /// Number of sessions held, expired ones included until the next prune.
    ///
    /// # Errors
    /// Returns an error if the lock is poisoned.
    pub fn session_count(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow!("session store lock poisoned"))?;
        Ok(sessions.len())
    }

    /// Drop every session idle for longer than the TTL.
    fn prune(&self, sessions: &mut HashMap<String, SessionData>) {
        if let Some(ttl) = self.ttl {
            sessions.retain(|_, data| data.touched_at.elapsed() < ttl);
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn start(&self, id: Option<&str>) -> Result<Session> {
        let mut sessions = self.write()?;
        self.prune(&mut sessions);

        if let Some(id) = id {
            if let Some(data) = sessions.get_mut(id) {
                data.touched_at = Instant::now();
                return Ok(Session::new(id));
            }
            debug!("Unknown or expired session");
        }

        let id = unused_id(&sessions)?;
        sessions.insert(id.clone(), SessionData::new());
        Ok(Session::new(id))
    }

    fn regenerate(&self, session: &mut Session) -> Result<()> {
        let mut sessions = self.write()?;

        let mut data = sessions
            .remove(session.id())
            .unwrap_or_else(SessionData::new);
        data.touched_at = Instant::now();

        self.prune(&mut sessions);

        let id = unused_id(&sessions)?;
        sessions.insert(id.clone(), data);
        session.id = id;

        Ok(())
    }
}

/// 32 bytes from the OS RNG, URL-safe base64 without padding.
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_session_id() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

fn unused_id(sessions: &HashMap<String, SessionData>) -> Result<String> {
    loop {
        let id = generate_session_id()?;
        if !sessions.contains_key(&id) {
            return Ok(id);
        }
    }
}

/// Cookie settings for the session handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub ttl_seconds: u64,
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: SESSION_COOKIE_NAME.to_string(),
            ttl_seconds: SESSION_TTL_SECONDS,
            secure: false,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Build the `HttpOnly` cookie carrying `id`.
    ///
    /// # Errors
    /// Returns an error if the cookie name or id is not a valid header value.
    pub fn cookie(&self, id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.cookie_name, self.ttl_seconds
        );
        // Only mark cookies secure when served over HTTPS.
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

/// Find the session id in the `Cookie` headers.
#[must_use]
pub fn extract_session_id(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == cookie_name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(store) = parts.extensions.get::<Arc<dyn SessionStore>>().cloned() else {
            error!("Session store not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        };

        let config = parts
            .extensions
            .get::<SessionConfig>()
            .cloned()
            .unwrap_or_default();

        let presented = extract_session_id(&parts.headers, &config.cookie_name);

        store.start(presented.as_deref()).map_err(|e| {
            error!("Failed to start session: {e:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }
}
