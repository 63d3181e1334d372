//! In-memory cookie store keyed by (domain, path, name).
//!
//! Implements the subset of RFC 6265 a browser session against the portal
//! relies on: host-only vs. domain cookies, default paths, `Max-Age` /
//! `Expires`, and `Secure`. Storage is last-write-wins per key.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use url::Url;

/// A single stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
    /// Set when no `Domain` attribute was given: only the exact host matches.
    pub host_only: bool,
    pub secure: bool,
    pub http_only: bool,
    creation: u64,
}

impl CookieRecord {
    /// Whether the cookie has expired as of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    /// Whether this cookie should accompany a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let host_ok = if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        };
        if !host_ok {
            return false;
        }
        if self.secure && url.scheme() != "https" {
            return false;
        }
        path_match(url.path(), &self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CookieKey {
    domain: String,
    path: String,
    name: String,
}

impl From<&CookieRecord> for CookieKey {
    fn from(record: &CookieRecord) -> Self {
        Self {
            domain: record.domain.clone(),
            path: record.path.clone(),
            name: record.name.clone(),
        }
    }
}

/// Thread-safe cookie store shared by every request of a session.
#[derive(Debug, Default)]
pub struct CookieJar {
    entries: Mutex<BTreeMap<CookieKey, CookieRecord>>,
    next_creation: AtomicU64,
}

impl CookieJar {
    /// Create an empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<CookieKey, CookieRecord>> {
        // A panic while holding the lock cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Parse one `Set-Cookie` value received from `request_url` and merge it.
    ///
    /// Returns `false` when the header was malformed or rejected.
    pub fn store_set_cookie(&self, raw: &str, request_url: &Url) -> bool {
        self.store_set_cookie_at(raw, request_url, Utc::now())
    }

    pub(crate) fn store_set_cookie_at(
        &self,
        raw: &str,
        request_url: &Url,
        now: DateTime<Utc>,
    ) -> bool {
        match parse_set_cookie(raw, request_url, now) {
            Some(record) => {
                self.insert_at(record, now);
                true
            }
            None => {
                tracing::debug!("Ignoring unusable Set-Cookie from {}", request_url.path());
                false
            }
        }
    }

    /// Merge a record: replaces any cookie with the same (domain, path, name),
    /// or removes it when the new record is already expired.
    pub fn insert(&self, record: CookieRecord) {
        self.insert_at(record, Utc::now());
    }

    fn insert_at(&self, mut record: CookieRecord, now: DateTime<Utc>) {
        let key = CookieKey::from(&record);
        let mut entries = self.entries();
        if record.is_expired_at(now) {
            entries.remove(&key);
            return;
        }
        record.creation = match entries.get(&key) {
            Some(existing) => existing.creation,
            None => self.next_creation.fetch_add(1, Ordering::Relaxed),
        };
        entries.insert(key, record);
    }

    /// Build the `Cookie` header value for a request to `url`.
    ///
    /// Longer paths come first, then older cookies; `None` when nothing applies.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        self.header_for_at(url, Utc::now())
    }

    pub(crate) fn header_for_at(&self, url: &Url, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.entries();
        entries.retain(|_, c| !c.is_expired_at(now));

        let mut matching: Vec<&CookieRecord> = entries.values().filter(|c| c.matches(url)).collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then(a.creation.cmp(&b.creation))
        });

        let header = matching
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    /// Look up a cookie by its full key.
    pub fn get(&self, domain: &str, path: &str, name: &str) -> Option<CookieRecord> {
        let key = CookieKey {
            domain: domain.to_ascii_lowercase(),
            path: path.to_string(),
            name: name.to_string(),
        };
        self.entries().get(&key).cloned()
    }

    /// Snapshot of all stored cookies.
    pub fn records(&self) -> Vec<CookieRecord> {
        self.entries().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every cookie.
    pub fn clear(&self) {
        self.entries().clear();
    }
}

/// Parse a `Set-Cookie` header value in the context of the request URL.
pub fn parse_set_cookie(raw: &str, request_url: &Url, now: DateTime<Utc>) -> Option<CookieRecord> {
    let host = request_url.host_str()?.to_ascii_lowercase();
    let mut parts = raw.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"');

    let mut domain: Option<String> = None;
    let mut path: Option<String> = None;
    let mut max_age: Option<i64> = None;
    let mut expires: Option<DateTime<Utc>> = None;
    let mut secure = false;
    let mut http_only = false;

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => {
                let d = val.trim_start_matches('.').to_ascii_lowercase();
                if !d.is_empty() {
                    domain = Some(d);
                }
            }
            "path" if val.starts_with('/') => path = Some(val.to_string()),
            "max-age" => max_age = val.parse().ok(),
            "expires" => expires = parse_cookie_date(val),
            "secure" => secure = true,
            "httponly" => http_only = true,
            _ => {}
        }
    }

    let host_only = domain.is_none();
    let domain = match domain {
        Some(d) if domain_match(&host, &d) => d,
        Some(_) => return None,
        None => host,
    };

    // Max-Age takes precedence over Expires.
    let expires = match max_age {
        Some(secs) if secs <= 0 => Some(DateTime::<Utc>::MIN_UTC),
        Some(secs) => Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d)),
        None => expires,
    };

    Some(CookieRecord {
        name: name.to_string(),
        value: value.to_string(),
        domain,
        path: path.unwrap_or_else(|| default_path(request_url)),
        expires,
        host_only,
        secure,
        http_only,
        creation: 0,
    })
}

fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%a, %d-%b-%Y %H:%M:%S GMT", "%a, %d-%b-%y %H:%M:%S GMT"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// RFC 6265 domain-match.
fn domain_match(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    let is_ip = host.parse::<std::net::IpAddr>().is_ok();
    !is_ip
        && host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

/// RFC 6265 path-match: the cookie path is a prefix ending on a segment boundary.
fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

/// Directory of the request path, used when `Path` is absent.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}
