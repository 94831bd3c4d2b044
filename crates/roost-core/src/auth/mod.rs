//! Login against the booking site and the session it yields.

mod session_store;

pub use session_store::SessionStore;

use std::fmt;

use chrono::{DateTime, Utc};
use scraper::ElementRef;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fetch::Transport;
use crate::parse::html::{document, with_name};

/// Authenticated cookie header plus its expiry
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Value for the `Cookie` request header
    pub fn token(&self) -> &str {
        &self.token
    }

    pub const fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials from configuration; absent values become empty strings
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.username.clone().unwrap_or_default(),
            config.password.clone().unwrap_or_default(),
        )
    }

    fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Result of a login attempt that reached the site
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Success(Session),
    /// Expected failure such as bad credentials or a missing login form
    Failure(String),
}

/// Login form fields discovered from the page markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: Option<String>,
    pub username_field: String,
    pub password_field: String,
    pub hidden: Vec<(String, String)>,
}

fn input_type(input: &ElementRef<'_>) -> String {
    input.value().attr("type").unwrap_or("text").to_ascii_lowercase()
}

fn form_from_inputs(scope: ElementRef<'_>, action: Option<String>) -> Option<LoginForm> {
    let inputs: Vec<ElementRef<'_>> = with_name(scope, "input")
        .filter(|input| input.value().attr("name").is_some())
        .collect();

    let password_index = inputs.iter().position(|input| input_type(input) == "password")?;
    let username = inputs[..password_index]
        .iter()
        .find(|input| matches!(input_type(input).as_str(), "text" | "email"))?;

    let hidden = inputs
        .iter()
        .filter(|input| input_type(input) == "hidden")
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            Some((name.to_string(), input.value().attr("value").unwrap_or_default().to_string()))
        })
        .collect();

    Some(LoginForm {
        action: action.filter(|value| !value.trim().is_empty()),
        username_field: username.value().attr("name")?.to_string(),
        password_field: inputs[password_index].value().attr("name")?.to_string(),
        hidden,
    })
}

/// Find the form that carries a password input.
///
/// Falls back to scanning the whole document when the inputs are not
/// wrapped in a `<form>`.
pub fn discover_login_form(html: &str) -> Option<LoginForm> {
    let page = document(html);
    let root = page.root_element();
    let in_form = with_name(root, "form")
        .find_map(|form| form_from_inputs(form, form.value().attr("action").map(str::to_string)));
    in_form.or_else(|| form_from_inputs(root, None))
}

/// Merge `Set-Cookie` values into an existing cookie header; later values win
pub fn combine_cookies(existing: &str, set_cookies: &[String]) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let incoming = set_cookies
        .iter()
        .filter_map(|header| header.split(';').next());

    for pair in existing.split(';').chain(incoming) {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match pairs.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value.trim().to_string(),
            None => pairs.push((name.to_string(), value.trim().to_string())),
        }
    }

    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Performs the login round-trip
pub struct Authenticator<'a, T> {
    transport: &'a T,
    login_url: String,
    ttl: chrono::Duration,
}

impl<'a, T: Transport> Authenticator<'a, T> {
    pub fn new(transport: &'a T, config: &SyncConfig) -> Result<Self> {
        let ttl = chrono::Duration::from_std(config.session_ttl)
            .map_err(|e| Error::InvalidInput(format!("session ttl: {e}")))?;
        Ok(Self {
            transport,
            login_url: config.login_url(),
            ttl,
        })
    }

    /// Log in with `credentials`.
    ///
    /// Transport failures are errors; everything the site itself rejects is
    /// an [`AuthOutcome::Failure`].
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        now: DateTime<Utc>,
    ) -> Result<AuthOutcome> {
        if !credentials.is_complete() {
            return Ok(AuthOutcome::Failure(
                "Missing username or password".to_string(),
            ));
        }

        tracing::debug!(url = %self.login_url, "Loading login page");
        let page = self.transport.get(&self.login_url, None).await?;
        if !page.is_success() {
            return Ok(AuthOutcome::Failure(format!(
                "Login page unavailable (HTTP {})",
                page.status
            )));
        }

        let Some(form) = discover_login_form(&page.body) else {
            return Ok(AuthOutcome::Failure("Login form not found".to_string()));
        };

        let base = Url::parse(&self.login_url)?;
        let target = match &form.action {
            Some(action) => base.join(action)?.to_string(),
            None => self.login_url.clone(),
        };

        let mut fields = form.hidden.clone();
        fields.push((form.username_field.clone(), credentials.username.clone()));
        fields.push((form.password_field.clone(), credentials.password.clone()));

        let page_cookies = combine_cookies("", &page.set_cookies);
        let cookie_header = (!page_cookies.is_empty()).then_some(page_cookies.as_str());
        let response = self
            .transport
            .post_form(&target, &fields, cookie_header)
            .await?;

        if response.is_redirect() {
            let back_to_login = response
                .location
                .as_deref()
                .is_some_and(|location| location.contains("login"));
            if back_to_login {
                return Ok(AuthOutcome::Failure("Invalid credentials".to_string()));
            }

            let token = combine_cookies(&page_cookies, &response.set_cookies);
            if token.is_empty() {
                return Ok(AuthOutcome::Failure(
                    "Login succeeded but no session cookie was returned".to_string(),
                ));
            }
            tracing::info!("Authenticated with booking site");
            return Ok(AuthOutcome::Success(Session::new(token, now + self.ttl)));
        }

        let body = response.body.to_ascii_lowercase();
        if body.contains("invalid") || body.contains("incorrect") {
            Ok(AuthOutcome::Failure("Invalid credentials".to_string()))
        } else {
            Ok(AuthOutcome::Failure(format!(
                "Login failed (HTTP {})",
                response.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::fetch::testing::{ok, status, FakeTransport};

    const LOGIN_PAGE: &str = r#"
        <html><body>
        <form id="search" action="/search"><input type="text" name="q"></form>
        <form method="post" action="/login/check">
            <input type="hidden" name="_csrf" value="tok&amp;123">
            <input type="email" name="user_email">
            <input type="password" name="user_pass">
            <input type="submit" value="Sign in">
        </form>
        </body></html>"#;

    fn config() -> SyncConfig {
        SyncConfig::new("https://site.test").with_credentials("owner", "hunter2")
    }

    fn redirect(location: &str, cookie: &str) -> crate::fetch::HttpResponse {
        let mut response = status(302);
        response.location = Some(location.to_string());
        response.set_cookies = vec![cookie.to_string()];
        response
    }

    #[test]
    fn discovers_fields_from_password_form() {
        let form = discover_login_form(LOGIN_PAGE).unwrap();
        assert_eq!(
            form,
            LoginForm {
                action: Some("/login/check".into()),
                username_field: "user_email".into(),
                password_field: "user_pass".into(),
                hidden: vec![("_csrf".into(), "tok&123".into())],
            }
        );
    }

    #[test]
    fn form_without_password_is_not_a_login_form() {
        assert_eq!(
            discover_login_form(r#"<form><input name="q"></form>"#),
            None
        );
    }

    #[test]
    fn combine_cookies_keeps_latest_value() {
        let merged = combine_cookies(
            "sid=old; theme=dark",
            &["sid=new; Path=/; HttpOnly".to_string(), "remember=1".to_string()],
        );
        assert_eq!(merged, "sid=new; theme=dark; remember=1");
    }

    #[test]
    fn session_debug_redacts_token() {
        let session = Session::new("sid=secret", Utc::now());
        let output = format!("{session:?}");
        assert!(!output.contains("secret"));
        assert!(output.contains("[REDACTED]"));

        let credentials = Credentials::new("owner", "hunter2");
        assert!(!format!("{credentials:?}").contains("hunter2"));
    }

    #[test]
    fn session_expiry_is_inclusive() {
        let now = Utc::now();
        assert!(Session::new("a=1", now).is_expired(now));
        assert!(!Session::new("a=1", now + Duration::seconds(1)).is_expired(now));
    }

    #[tokio::test]
    async fn successful_login_posts_discovered_fields() {
        let transport = FakeTransport::new();
        let mut page = ok(LOGIN_PAGE);
        page.set_cookies = vec!["csrf_cookie=abc; Path=/".into()];
        transport
            .route("https://site.test/login", page)
            .route(
                "https://site.test/login/check",
                redirect("/schedule", "sid=xyz; HttpOnly"),
            );

        let config = config();
        let now = Utc::now();
        let outcome = Authenticator::new(&transport, &config)
            .unwrap()
            .authenticate(&Credentials::from_config(&config), now)
            .await
            .unwrap();

        let AuthOutcome::Success(session) = outcome else {
            panic!("expected a session");
        };
        assert_eq!(session.token(), "csrf_cookie=abc; sid=xyz");
        assert_eq!(session.expires_at(), now + Duration::hours(24));

        let requests = transport.requests.borrow();
        let post = &requests[1];
        assert_eq!(post.method, "POST");
        assert_eq!(post.cookies.as_deref(), Some("csrf_cookie=abc"));
        assert_eq!(
            post.form,
            vec![
                ("_csrf".to_string(), "tok&123".to_string()),
                ("user_email".to_string(), "owner".to_string()),
                ("user_pass".to_string(), "hunter2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn redirect_back_to_login_is_invalid_credentials() {
        let transport = FakeTransport::new();
        transport
            .route("https://site.test/login", ok(LOGIN_PAGE))
            .route(
                "https://site.test/login/check",
                redirect("/login?error=1", "sid=anon"),
            );

        let config = config();
        let outcome = Authenticator::new(&transport, &config)
            .unwrap()
            .authenticate(&Credentials::from_config(&config), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, AuthOutcome::Failure("Invalid credentials".into()));
    }

    #[tokio::test]
    async fn rejected_form_body_is_invalid_credentials() {
        let transport = FakeTransport::new();
        transport
            .route("https://site.test/login", ok(LOGIN_PAGE))
            .route(
                "https://site.test/login/check",
                ok("<p>Incorrect email or password</p>"),
            );

        let config = config();
        let outcome = Authenticator::new(&transport, &config)
            .unwrap()
            .authenticate(&Credentials::from_config(&config), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, AuthOutcome::Failure("Invalid credentials".into()));
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_requests() {
        let transport = FakeTransport::new();
        let config = SyncConfig::new("https://site.test");

        let outcome = Authenticator::new(&transport, &config)
            .unwrap()
            .authenticate(&Credentials::from_config(&config), Utc::now())
            .await
            .unwrap();

        assert!(matches!(outcome, AuthOutcome::Failure(_)));
        assert!(transport.requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn missing_login_page_is_a_failure_not_an_error() {
        let transport = FakeTransport::new();
        let config = config();

        let outcome = Authenticator::new(&transport, &config)
            .unwrap()
            .authenticate(&Credentials::from_config(&config), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AuthOutcome::Failure("Login page unavailable (HTTP 404)".into())
        );
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let transport = FakeTransport::new();
        transport.route_failure("https://site.test/login", "refused");
        let config = config();

        let result = Authenticator::new(&transport, &config)
            .unwrap()
            .authenticate(&Credentials::from_config(&config), Utc::now())
            .await;
        assert!(result.is_err());
    }
}
