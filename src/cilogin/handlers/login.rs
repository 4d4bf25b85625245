use crate::cilogin::{
    auth::{Authenticator, Credentials},
    session::{Session, SessionConfig, SessionStore},
};
use anyhow::Result;
use axum::{
    async_trait,
    extract::{Extension, FromRequest, Query, Request},
    http::{
        header::{CONTENT_TYPE, SET_COOKIE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{convert::Infallible, sync::Arc};
use tracing::{debug, error, instrument};
use utoipa::{IntoParams, ToSchema};

/// Request parameters read by the login endpoint. Only `email` is used; a
/// `password` field, if sent, is ignored.
#[derive(ToSchema, IntoParams, Serialize, Deserialize, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct LoginParams {
    email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Rejected,
}

impl LoginOutcome {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Success => StatusCode::OK,
            Self::Rejected => StatusCode::FORBIDDEN,
        }
    }

    #[must_use]
    pub const fn body(self) -> &'static str {
        match self {
            Self::Success => "Login successful",
            Self::Rejected => "Invalid credentials",
        }
    }
}

impl IntoResponse for LoginOutcome {
    fn into_response(self) -> Response {
        (self.status(), self.body()).into_response()
    }
}

/// Attempt a login and regenerate the session on success.
///
/// The session is regenerated exactly once when the authenticator accepts and
/// left untouched otherwise.
///
/// # Errors
/// Propagates failures from the authenticator or the session store.
pub fn authenticate<A, S>(
    authenticator: &A,
    store: &S,
    email: Option<String>,
    session: &mut Session,
) -> Result<LoginOutcome>
where
    A: Authenticator + ?Sized,
    S: SessionStore + ?Sized,
{
    let credentials = Credentials::for_login(email);

    if authenticator.attempt(&credentials)? {
        store.regenerate(session)?;

        debug!("Login successful");

        Ok(LoginOutcome::Success)
    } else {
        debug!("Invalid credentials");

        Ok(LoginOutcome::Rejected)
    }
}

/// The `email` request parameter: query string first, then a form or JSON
/// body. Repeated keys resolve to the last value; text is trimmed and blank
/// counts as absent. Array or object values are [`EmailParam::Unusable`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EmailParam {
    #[default]
    Absent,
    Present(String),
    Unusable,
}

impl EmailParam {
    fn from_text(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() {
            Self::Absent
        } else {
            Self::Present(value.to_string())
        }
    }

    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        pairs
            .into_iter()
            .fold(Self::Absent, |found, (key, value)| {
                if key == "email" {
                    Self::from_text(&value)
                } else if key.starts_with("email[") {
                    Self::Unusable
                } else {
                    found
                }
            })
    }

    fn from_json(body: &Value) -> Self {
        match body.get("email") {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::String(value)) => Self::from_text(value),
            Some(Value::Bool(value)) => Self::from_text(&value.to_string()),
            Some(Value::Number(value)) => Self::from_text(&value.to_string()),
            Some(Value::Array(_) | Value::Object(_)) => Self::Unusable,
        }
    }
}

#[async_trait]
impl<S> FromRequest<S> for EmailParam
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let from_query = match Query::<Vec<(String, String)>>::try_from_uri(req.uri()) {
            Ok(Query(pairs)) => Self::from_pairs(pairs),
            Err(e) => {
                debug!("Unreadable query string: {e}");
                Self::Unusable
            }
        };

        if from_query != Self::Absent {
            return Ok(from_query);
        }

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        // An unparseable body carries no email.
        let from_body = if content_type.starts_with("application/x-www-form-urlencoded") {
            Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_or(Self::Absent, |Form(pairs)| Self::from_pairs(pairs))
        } else if content_type.starts_with("application/json") {
            Json::<Value>::from_request(req, state)
                .await
                .map_or(Self::Absent, |Json(body)| Self::from_json(&body))
        } else {
            Self::Absent
        };

        Ok(from_body)
    }
}

fn with_session_cookie(
    config: &SessionConfig,
    session: &Session,
    outcome: LoginOutcome,
) -> Response {
    let mut headers = HeaderMap::new();
    match config.cookie(session.id()) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(e) => error!("Error building session cookie: {:?}", e),
    }

    (headers, outcome).into_response()
}

#[utoipa::path(
    post,
    path= "/login",
    params(LoginParams),
    request_body(content = LoginParams, content_type = "application/x-www-form-urlencoded"),
    responses (
        (status = 200, description = "Login successful", body = String, content_type = "text/plain"),
        (status = 403, description = "Invalid credentials", body = String, content_type = "text/plain"),
        (status = 500, description = "Authenticator or session store failure"),
    ),
    tag= "login"
)]
// axum handler for login
#[instrument(skip_all)]
pub async fn login(
    Extension(authenticator): Extension<Arc<dyn Authenticator>>,
    Extension(store): Extension<Arc<dyn SessionStore>>,
    Extension(config): Extension<SessionConfig>,
    mut session: Session,
    email: EmailParam,
) -> Response {
    let email = match email {
        EmailParam::Absent => None,
        EmailParam::Present(email) => Some(email),
        EmailParam::Unusable => {
            debug!("Unusable email parameter");

            return with_session_cookie(&config, &session, LoginOutcome::Rejected);
        }
    };

    let outcome = match authenticate(
        authenticator.as_ref(),
        store.as_ref(),
        email,
        &mut session,
    ) {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Login failed: {e:#}");

            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
                .into_response();
        }
    };

    with_session_cookie(&config, &session, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cilogin::session::MemorySessionStore;
    use anyhow::bail;
    use axum::{
        body::{to_bytes, Body},
        http::{header::COOKIE, Method, Request},
        routing::post,
        Router,
    };
    use secrecy::ExposeSecret;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use tower::ServiceExt;

    /// Accepts one email/password pair and records every attempt.
    struct RecordingAuthenticator {
        accept: Option<(String, String)>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl RecordingAuthenticator {
        fn accepting(email: &str, password: &str) -> Self {
            Self {
                accept: Some((email.to_string(), password.to_string())),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn rejecting() -> Self {
            Self {
                accept: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
        }
    }

    impl Authenticator for RecordingAuthenticator {
        fn attempt(&self, credentials: &Credentials) -> Result<bool> {
            let pair = (
                credentials.email().to_string(),
                credentials.password().expose_secret().to_string(),
            );
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(pair.clone());
            }
            Ok(self.accept.as_ref() == Some(&pair))
        }
    }

    struct FailingAuthenticator;

    impl Authenticator for FailingAuthenticator {
        fn attempt(&self, _credentials: &Credentials) -> Result<bool> {
            bail!("user store unavailable")
        }
    }

    #[derive(Default)]
    struct CountingStore {
        regenerated: AtomicUsize,
        fail: bool,
    }

    impl SessionStore for CountingStore {
        fn start(&self, id: Option<&str>) -> Result<Session> {
            Ok(Session::new(id.unwrap_or("fresh")))
        }

        fn regenerate(&self, session: &mut Session) -> Result<()> {
            if self.fail {
                bail!("session store unavailable");
            }
            let count = self.regenerated.fetch_add(1, Ordering::SeqCst) + 1;
            *session = Session::new(format!("regenerated-{count}"));
            Ok(())
        }
    }

    #[test]
    fn accepted_email_logs_in() -> Result<()> {
        let authenticator = RecordingAuthenticator::accepting("a@b.com", "password");
        let store = CountingStore::default();
        let mut session = Session::new("old");

        let outcome = authenticate(
            &authenticator,
            &store,
            Some("a@b.com".to_string()),
            &mut session,
        )?;

        assert_eq!(outcome, LoginOutcome::Success);
        assert_eq!(outcome.body(), "Login successful");
        assert_eq!(outcome.status(), StatusCode::OK);
        assert_eq!(store.regenerated.load(Ordering::SeqCst), 1);
        assert_eq!(session.id(), "regenerated-1");
        Ok(())
    }

    #[test]
    fn missing_email_uses_default() -> Result<()> {
        let authenticator = RecordingAuthenticator::accepting("ciuser@example.com", "password");
        let store = CountingStore::default();
        let mut session = Session::new("old");

        let outcome = authenticate(&authenticator, &store, None, &mut session)?;

        assert_eq!(outcome, LoginOutcome::Success);
        assert_eq!(
            authenticator.seen(),
            vec![("ciuser@example.com".to_string(), "password".to_string())]
        );
        Ok(())
    }

    #[test]
    fn rejected_credentials_leave_session_alone() -> Result<()> {
        let authenticator = RecordingAuthenticator::rejecting();
        let store = CountingStore::default();
        let mut session = Session::new("old");

        let outcome = authenticate(
            &authenticator,
            &store,
            Some("a@b.com".to_string()),
            &mut session,
        )?;

        assert_eq!(outcome, LoginOutcome::Rejected);
        assert_eq!(outcome.body(), "Invalid credentials");
        assert_eq!(outcome.status(), StatusCode::FORBIDDEN);
        assert_eq!(store.regenerated.load(Ordering::SeqCst), 0);
        assert_eq!(session.id(), "old");
        Ok(())
    }

    // Known quirk: the password is the literal "password" whatever the caller sends.
    #[test]
    fn password_is_always_the_fixed_literal() -> Result<()> {
        let authenticator = RecordingAuthenticator::rejecting();
        let store = CountingStore::default();

        for email in [None, Some("a@b.com".to_string()), Some("x".to_string())] {
            let mut session = Session::new("old");
            authenticate(&authenticator, &store, email, &mut session)?;
        }

        let seen = authenticator.seen();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, password)| password == "password"));
        Ok(())
    }

    #[test]
    fn authenticator_failure_propagates() {
        let store = CountingStore::default();
        let mut session = Session::new("old");

        let result = authenticate(&FailingAuthenticator, &store, None, &mut session);

        assert!(result.is_err());
        assert_eq!(store.regenerated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn session_store_failure_propagates() {
        let authenticator = RecordingAuthenticator::accepting("ciuser@example.com", "password");
        let store = CountingStore {
            fail: true,
            ..CountingStore::default()
        };
        let mut session = Session::new("old");

        assert!(authenticate(&authenticator, &store, None, &mut session).is_err());
    }

    #[test]
    fn email_text_is_trimmed_and_blank_is_absent() {
        assert_eq!(
            EmailParam::from_text("  a@b.com "),
            EmailParam::Present("a@b.com".to_string())
        );
        assert_eq!(EmailParam::from_text("   "), EmailParam::Absent);
    }

    #[test]
    fn repeated_email_keys_resolve_to_last() {
        let pairs = vec![
            ("email".to_string(), "mallory@x.com".to_string()),
            ("other".to_string(), "1".to_string()),
            ("email".to_string(), "eve@x.com".to_string()),
        ];
        assert_eq!(
            EmailParam::from_pairs(pairs),
            EmailParam::Present("eve@x.com".to_string())
        );

        let bracketed = vec![("email[]".to_string(), "a@b.com".to_string())];
        assert_eq!(EmailParam::from_pairs(bracketed), EmailParam::Unusable);
    }

    #[test]
    fn json_scalars_are_stringified() {
        assert_eq!(
            EmailParam::from_json(&serde_json::json!({ "email": 123 })),
            EmailParam::Present("123".to_string())
        );
        assert_eq!(
            EmailParam::from_json(&serde_json::json!({ "email": false })),
            EmailParam::Present("false".to_string())
        );
        assert_eq!(
            EmailParam::from_json(&serde_json::json!({ "email": null })),
            EmailParam::Absent
        );
        assert_eq!(
            EmailParam::from_json(&serde_json::json!({ "email": ["a@b.com"] })),
            EmailParam::Unusable
        );
        assert_eq!(
            EmailParam::from_json(&serde_json::json!({ "email": { "a": 1 } })),
            EmailParam::Unusable
        );
        assert_eq!(
            EmailParam::from_json(&serde_json::json!(["a@b.com"])),
            EmailParam::Absent
        );
    }

    fn app(authenticator: Arc<dyn Authenticator>, store: Arc<dyn SessionStore>) -> Router {
        Router::new()
            .route("/login", post(login).get(login))
            .layer(Extension(SessionConfig::default()))
            .layer(Extension(store))
            .layer(Extension(authenticator))
    }

    async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, HeaderMap, String)> {
        let response = app.oneshot(request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, headers, String::from_utf8(body.to_vec())?))
    }

    fn attempts_for(authenticator: &RecordingAuthenticator) -> Vec<String> {
        authenticator
            .seen()
            .into_iter()
            .map(|(email, _)| email)
            .collect()
    }

    #[tokio::test]
    async fn email_from_query_wins_over_body() -> Result<()> {
        let authenticator = Arc::new(RecordingAuthenticator::rejecting());
        let app = app(authenticator.clone(), Arc::new(CountingStore::default()));

        let request = Request::builder()
            .method(Method::POST)
            .uri("/login?email=query@example.com")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("email=body@example.com"))?;
        let (status, _, body) = send(app, request).await?;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Invalid credentials");
        assert_eq!(attempts_for(&authenticator), vec!["query@example.com"]);
        Ok(())
    }

    #[tokio::test]
    async fn email_from_form_and_json_bodies() -> Result<()> {
        let authenticator = Arc::new(RecordingAuthenticator::rejecting());
        let store: Arc<dyn SessionStore> = Arc::new(CountingStore::default());

        let form = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("email=+form%40example.com+&password=ignored"))?;
        send(app(authenticator.clone(), store.clone()), form).await?;

        let json = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":"json@example.com","password":"ignored"}"#))?;
        send(app(authenticator.clone(), store.clone()), json).await?;

        let plain = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("email=plain@example.com"))?;
        send(app(authenticator.clone(), store.clone()), plain).await?;

        let broken = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))?;
        send(app(authenticator.clone(), store), broken).await?;

        assert_eq!(
            attempts_for(&authenticator),
            vec![
                "form@example.com",
                "json@example.com",
                "ciuser@example.com",
                "ciuser@example.com"
            ]
        );
        assert!(authenticator
            .seen()
            .iter()
            .all(|(_, password)| password == "password"));
        Ok(())
    }

    #[tokio::test]
    async fn repeated_query_email_uses_last_value() -> Result<()> {
        let authenticator = Arc::new(RecordingAuthenticator::accepting(
            "ciuser@example.com",
            "password",
        ));
        let store = Arc::new(CountingStore::default());
        let app = app(authenticator.clone(), store.clone());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/login?email=mallory@x.com&email=eve@x.com")
            .body(Body::empty())?;
        let (status, _, body) = send(app, request).await?;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Invalid credentials");
        assert_eq!(attempts_for(&authenticator), vec!["eve@x.com"]);
        assert_eq!(store.regenerated.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn non_string_json_email_is_not_the_default() -> Result<()> {
        let authenticator = Arc::new(RecordingAuthenticator::accepting(
            "ciuser@example.com",
            "password",
        ));
        let store: Arc<dyn SessionStore> = Arc::new(CountingStore::default());

        let number = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":123}"#))?;
        let (status, _, body) = send(app(authenticator.clone(), store.clone()), number).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Invalid credentials");

        let array = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":["ciuser@example.com"]}"#))?;
        let (status, headers, _) = send(app(authenticator.clone(), store.clone()), array).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(headers.get(SET_COOKIE).is_some());

        let bracketed = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("email%5B%5D=ciuser%40example.com"))?;
        let (status, _, _) = send(app(authenticator.clone(), store), bracketed).await?;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Arrays and objects never reach the authenticator.
        assert_eq!(attempts_for(&authenticator), vec!["123"]);
        Ok(())
    }

    #[tokio::test]
    async fn blank_email_falls_back_to_default() -> Result<()> {
        let authenticator = Arc::new(RecordingAuthenticator::accepting(
            "ciuser@example.com",
            "password",
        ));
        let app = app(authenticator.clone(), Arc::new(CountingStore::default()));

        let request = Request::builder()
            .method(Method::GET)
            .uri("/login?email=%20%20")
            .body(Body::empty())?;
        let (status, _, body) = send(app, request).await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Login successful");
        Ok(())
    }

    #[tokio::test]
    async fn success_sets_regenerated_cookie() -> Result<()> {
        let authenticator = Arc::new(RecordingAuthenticator::accepting("a@b.com", "password"));
        let store = Arc::new(CountingStore::default());
        let app = app(authenticator, store.clone());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/login?email=a@b.com")
            .header(COOKIE, "cilogin_session=old")
            .body(Body::empty())?;
        let (status, headers, body) = send(app, request).await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Login successful");
        assert_eq!(store.regenerated.load(Ordering::SeqCst), 1);
        let cookie = headers
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("cilogin_session=regenerated-1;"));
        Ok(())
    }

    #[tokio::test]
    async fn rejection_keeps_presented_cookie() -> Result<()> {
        let store = Arc::new(CountingStore::default());
        let app = app(Arc::new(RecordingAuthenticator::rejecting()), store.clone());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .header(COOKIE, "cilogin_session=old")
            .body(Body::empty())?;
        let (status, headers, body) = send(app, request).await?;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, "Invalid credentials");
        assert_eq!(store.regenerated.load(Ordering::SeqCst), 0);
        let cookie = headers
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("cilogin_session=old;"));
        Ok(())
    }

    #[tokio::test]
    async fn collaborator_failure_is_500() -> Result<()> {
        let app = app(
            Arc::new(FailingAuthenticator),
            Arc::new(MemorySessionStore::default()),
        );

        let request = Request::builder()
            .method(Method::POST)
            .uri("/login")
            .body(Body::empty())?;
        let (status, headers, body) = send(app, request).await?;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal server error");
        assert!(headers.get(SET_COOKIE).is_none());
        Ok(())
    }
}
