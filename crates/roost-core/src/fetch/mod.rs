//! HTTP access to the booking site
//!
//! [`Transport`] is the only seam that touches the network. The engine is
//! generic over it so tests can script responses in-process.

use std::time::Duration;

use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::redirect::Policy;

use crate::auth::Session;
use crate::config::{SyncConfig, USER_AGENT};
use crate::error::{Error, Result};

/// Marker present on every real appointment detail page
pub const APPOINTMENT_MARKER: &str = "data-start_scheduled";

/// A fully read HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Raw `Set-Cookie` header values in received order
    pub set_cookies: Vec<String>,
    pub location: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Minimal HTTP client surface used by the engine.
///
/// Implementations must not follow redirects; callers inspect them.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get(&self, url: &str, cookies: Option<&str>) -> Result<HttpResponse>;

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        cookies: Option<&str>,
    ) -> Result<HttpResponse>;
}

/// [`Transport`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    auth_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(page_timeout: Duration, auth_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(page_timeout)
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            client,
            auth_timeout,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(config.page_timeout, config.auth_timeout)
    }

    async fn read(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            body,
            set_cookies,
            location,
        })
    }
}

impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, cookies: Option<&str>) -> Result<HttpResponse> {
        let mut request = self.client.get(url);
        if let Some(cookies) = cookies {
            request = request.header(COOKIE, cookies);
        }
        Self::read(request.send().await?).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
        cookies: Option<&str>,
    ) -> Result<HttpResponse> {
        let mut request = self.client.post(url).form(form).timeout(self.auth_timeout);
        if let Some(cookies) = cookies {
            request = request.header(COOKIE, cookies);
        }
        Self::read(request.send().await?).await
    }
}

/// How a fetched page should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Valid,
    /// The site asked for credentials again
    LoginPage,
    /// Not an appointment page the session may see
    AccessDenied,
}

/// Whether a body is the site's login form
pub fn is_login_page(body: &str) -> bool {
    body.contains("login") && body.contains("password")
}

fn redirects_to_login(response: &HttpResponse) -> bool {
    response.is_redirect()
        && response
            .location
            .as_deref()
            .is_some_and(|location| location.contains("login"))
}

/// Classify a generic page fetch
pub fn classify_page(response: &HttpResponse) -> PageKind {
    if is_login_page(&response.body) || redirects_to_login(response) {
        PageKind::LoginPage
    } else if response.is_success() {
        PageKind::Valid
    } else {
        PageKind::AccessDenied
    }
}

/// Classify a page that is expected to be an appointment detail page.
///
/// A 2xx page without the appointment marker (typically the generic schedule
/// page served for appointments that no longer exist) counts as denied.
pub fn classify_appointment_page(response: &HttpResponse) -> PageKind {
    match classify_page(response) {
        PageKind::Valid if !response.body.contains(APPOINTMENT_MARKER) => PageKind::AccessDenied,
        kind => kind,
    }
}

/// Authenticated page fetcher bound to one session
pub struct PageFetcher<'a, T> {
    transport: &'a T,
    session: &'a Session,
}

impl<'a, T: Transport> PageFetcher<'a, T> {
    pub const fn new(transport: &'a T, session: &'a Session) -> Self {
        Self { transport, session }
    }

    /// Fetch a page without interpreting it
    pub async fn fetch_raw(&self, url: &str) -> Result<HttpResponse> {
        tracing::debug!(url, "Fetching page");
        self.transport.get(url, Some(self.session.token())).await
    }

    /// Fetch a page and return its body, failing on login pages and non-2xx
    pub async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.fetch_raw(url).await?;
        match classify_page(&response) {
            PageKind::Valid => Ok(response.body),
            PageKind::LoginPage => Err(Error::SessionExpired),
            PageKind::AccessDenied => Err(Error::HttpStatus {
                status: response.status,
                url: url.to_string(),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{ok, status, FakeTransport};
    use super::*;

    #[test]
    fn login_markers_classify_as_login_page() {
        let response = ok("<form action=\"/login\"><input type=\"password\" name=\"password\"></form>");
        assert_eq!(classify_page(&response), PageKind::LoginPage);
        assert_eq!(classify_appointment_page(&response), PageKind::LoginPage);
    }

    #[test]
    fn redirect_to_login_is_login_page() {
        let mut response = status(302);
        response.location = Some("/login?next=/schedule".into());
        assert_eq!(classify_page(&response), PageKind::LoginPage);
    }

    #[test]
    fn schedule_page_served_for_appointment_is_access_denied() {
        let response = ok("<div class=\"schedule\">Week view</div>");
        assert_eq!(classify_page(&response), PageKind::Valid);
        assert_eq!(classify_appointment_page(&response), PageKind::AccessDenied);

        let appointment = ok("<div id=\"when-wrapper\" data-start_scheduled=\"1766336400\"></div>");
        assert_eq!(classify_appointment_page(&appointment), PageKind::Valid);
    }

    #[test]
    fn non_success_is_access_denied() {
        assert_eq!(classify_page(&status(404)), PageKind::AccessDenied);
        assert_eq!(classify_page(&status(500)), PageKind::AccessDenied);
    }

    #[tokio::test]
    async fn fetcher_sends_session_cookie_and_maps_errors() {
        let transport = FakeTransport::new();
        transport
            .route("https://site.test/ok", ok("hello"))
            .route("https://site.test/login-wall", ok("login password"))
            .route("https://site.test/broken", status(503));
        let session = Session::new("sid=abc", chrono::Utc::now() + chrono::Duration::hours(1));
        let fetcher = PageFetcher::new(&transport, &session);

        assert_eq!(fetcher.fetch("https://site.test/ok").await.unwrap(), "hello");
        assert!(matches!(
            fetcher.fetch("https://site.test/login-wall").await,
            Err(Error::SessionExpired)
        ));
        let err = fetcher.fetch("https://site.test/broken").await.unwrap_err();
        assert!(err.is_transient());

        let requests = transport.requests.borrow();
        assert_eq!(requests[0].cookies.as_deref(), Some("sid=abc"));
    }
}
