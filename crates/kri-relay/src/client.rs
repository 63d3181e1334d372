//! Cookie-aware HTTP client with manual redirect handling.
//!
//! The transport underneath never follows redirects or stores cookies on its
//! own: every hop goes through [`CookieClient::send`], which attaches the
//! jar's cookies, absorbs `Set-Cookie` headers, and re-issues the request
//! on 30x responses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::cookie::CookieJar;
use crate::error::{RelayError, RelayResult, StepRole};

pub use reqwest::Method;

/// Redirect hops followed before giving up with [`RelayError::RedirectLoop`].
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Immutable description of one request in the login sequence or a data call.
#[derive(Debug, Clone)]
pub struct RequestStep {
    pub role: StepRole,
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestStep {
    /// A bare GET.
    pub fn get(role: StepRole, url: Url) -> Self {
        Self {
            role,
            method: Method::GET,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST whose body is the url-encoded `fields`, in order.
    pub fn post_form(role: StepRole, url: Url, fields: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        Self {
            role,
            method: Method::POST,
            url,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Append one header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a preset of headers.
    pub fn headers<'a>(mut self, preset: impl IntoIterator<Item = &'a (&'a str, &'a str)>) -> Self {
        self.headers
            .extend(preset.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// Case-insensitive header presence check.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// One request as handed to the transport.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// One response as returned by the transport.
///
/// `set_cookies` is always the ordered list of raw `Set-Cookie` values, no
/// matter how the underlying HTTP stack exposes repeated headers.
#[derive(Debug, Clone, Default)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl WireResponse {
    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A network-level failure reported by a transport.
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub message: String,
    pub timed_out: bool,
}

/// Seam between the cookie/redirect logic and the actual HTTP stack.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform exactly one HTTP exchange. Must not follow redirects.
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportFailure>;
}

/// Production transport backed by reqwest, with redirects disabled.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose every request carries `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }
}

fn failure(e: reqwest::Error) -> TransportFailure {
    TransportFailure {
        timed_out: e.is_timeout(),
        // The exec step carries credentials in its query string.
        message: e.without_url().to_string(),
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportFailure> {
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in &request.headers {
            // hyper owns the connection-level headers.
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("connection") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let r = builder.send().await.map_err(failure)?;
        let status = r.status().as_u16();

        let set_cookies: Vec<String> = r
            .headers()
            .get_all(reqwest::header::SET_COOKIE)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();

        let headers: Vec<(String, String)> = r
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();

        let body = r.text().await.map_err(failure)?;

        Ok(WireResponse {
            status,
            headers,
            set_cookies,
            body,
        })
    }
}

/// Final (non-redirect) response of a [`CookieClient::send`] call.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    /// URL of the last hop.
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Number of redirects followed to get here.
    pub redirects: usize,
}

impl PortalResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

/// HTTP client that replays a shared cookie jar across requests and redirects.
#[derive(Clone)]
pub struct CookieClient {
    transport: Arc<dyn Transport>,
    jar: Arc<CookieJar>,
    max_redirects: usize,
}

impl CookieClient {
    pub fn new(transport: Arc<dyn Transport>, jar: Arc<CookieJar>) -> Self {
        Self {
            transport,
            jar,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Override the redirect ceiling.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// The jar this client reads and writes.
    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// Send `step`, following redirects until a non-redirect response.
    ///
    /// Every hop merges returned cookies into the shared jar, so this is
    /// never side-effect free.
    pub async fn send(&self, step: &RequestStep) -> RelayResult<PortalResponse> {
        let explicit_cookie = step.has_header("cookie");
        let mut method = step.method.clone();
        let mut url = step.url.clone();
        let mut body = step.body.clone();
        let mut hops = 0usize;

        loop {
            let mut headers = step.headers.clone();
            if !explicit_cookie {
                if let Some(cookie) = self.jar.header_for(&url) {
                    headers.push(("Cookie".to_string(), cookie));
                }
            }

            tracing::debug!(step = %step.role, %method, url = %redact(&url), hop = hops, "sending");

            let response = self
                .transport
                .execute(WireRequest {
                    method: method.clone(),
                    url: url.clone(),
                    headers,
                    body: body.clone(),
                })
                .await
                .map_err(|f| RelayError::Transport {
                    step: step.role,
                    message: f.message,
                    timed_out: f.timed_out,
                })?;

            for raw in &response.set_cookies {
                self.jar.store_set_cookie(raw, &url);
            }

            let location = match response.status {
                301 | 302 | 303 | 307 | 308 => response.header("location"),
                _ => None,
            };

            let Some(location) = location else {
                return Ok(PortalResponse {
                    status: response.status,
                    url,
                    headers: response.headers,
                    body: response.body,
                    redirects: hops,
                });
            };

            let next = url
                .join(location)
                .map_err(|e| RelayError::InvalidUrl(format!("redirect target: {e}")))?;

            hops += 1;
            if hops > self.max_redirects {
                return Err(RelayError::RedirectLoop {
                    step: step.role,
                    hops: self.max_redirects,
                    last_target: redact(&next),
                });
            }

            if response.status == 303 {
                method = Method::GET;
                body = None;
            }
            url = next;
        }
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// URL without query or fragment, safe to log.
pub fn redact(url: &Url) -> String {
    format!(
        "{}://{}{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.path()
    )
}
