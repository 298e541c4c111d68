//! Persistent per-user cookie jar.
//!
//! Backs `reqwest`'s cookie handling with a JSON file under
//! `<root>/users/<nick>/cookies`. The `Discard` attribute is deliberately
//! ignored so session cookies survive process exit; expired cookies are
//! dropped at load time. [`CookieJar::expires_within`] feeds the poster's
//! login-refresh heuristic.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::error::ForumError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix seconds; `None` for session cookies (kept anyway).
    pub expires: Option<i64>,
    pub secure: bool,
}

impl StoredCookie {
    fn expired_at(&self, now: i64) -> bool {
        self.expires.is_some_and(|t| t <= now)
    }

    fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or("");
        let domain_ok = host == self.domain || host.ends_with(&format!(".{}", self.domain));
        let path_ok = url.path().starts_with(&self.path);
        let scheme_ok = !self.secure || url.scheme() == "https";
        domain_ok && path_ok && scheme_ok
    }
}

#[derive(Debug)]
pub struct CookieJar {
    path: PathBuf,
    cookies: Mutex<Vec<StoredCookie>>,
}

impl CookieJar {
    /// Load the jar, starting empty when the file does not exist yet.
    pub fn load(path: PathBuf) -> Result<Self, ForumError> {
        let cookies = match std::fs::read(&path) {
            Ok(data) => {
                let all: Vec<StoredCookie> = serde_json::from_slice(&data)?;
                let now = Utc::now().timestamp();
                all.into_iter().filter(|c| !c.expired_at(now)).collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            cookies: Mutex::new(cookies),
        })
    }

    pub fn save(&self) -> Result<(), ForumError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cookies = self.cookies.lock().expect("cookie jar lock");
        let data = serde_json::to_vec_pretty(&*cookies)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        let now = Utc::now().timestamp();
        let cookies = self.cookies.lock().expect("cookie jar lock");
        cookies
            .iter()
            .find(|c| c.name == name && !c.expired_at(now))
            .map(|c| c.value.clone())
    }

    /// Does any cookie expire within the next `secs` seconds? Session
    /// cookies carry no expiry and never trigger a refresh by themselves.
    pub fn expires_within(&self, secs: i64) -> bool {
        let deadline = Utc::now().timestamp() + secs;
        let cookies = self.cookies.lock().expect("cookie jar lock");
        cookies
            .iter()
            .any(|c| c.expires.is_some_and(|t| t <= deadline))
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.lock().expect("cookie jar lock").is_empty()
    }

    fn store(&self, cookie: StoredCookie) {
        let mut cookies = self.cookies.lock().expect("cookie jar lock");
        cookies.retain(|c| {
            !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path)
        });
        if !cookie.expired_at(Utc::now().timestamp()) {
            cookies.push(cookie);
        }
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else { continue };
            match parse_set_cookie(raw, url) {
                Some(cookie) => self.store(cookie),
                None => tracing::debug!("ignoring unparsable cookie: {raw}"),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let now = Utc::now().timestamp();
        let cookies = self.cookies.lock().expect("cookie jar lock");
        let header = cookies
            .iter()
            .filter(|c| c.matches(url) && !c.expired_at(now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        if header.is_empty() {
            return None;
        }
        HeaderValue::from_str(&header).ok()
    }
}

/// Parse one `Set-Cookie` header. `Max-Age` wins over `Expires`; the
/// `Discard` attribute is ignored by design.
fn parse_set_cookie(raw: &str, url: &Url) -> Option<StoredCookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = StoredCookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: url.host_str().unwrap_or("").to_string(),
        path: "/".to_string(),
        expires: None,
        secure: false,
    };

    let mut max_age = None;
    for attr in parts {
        let attr = attr.trim();
        let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" => {
                let domain = val.trim().trim_start_matches('.');
                if !domain.is_empty() {
                    cookie.domain = domain.to_string();
                }
            }
            "path" => {
                if val.starts_with('/') {
                    cookie.path = val.trim().to_string();
                }
            }
            "max-age" => max_age = val.trim().parse::<i64>().ok(),
            "expires" => {
                if cookie.expires.is_none()
                    && let Ok(when) = DateTime::parse_from_rfc2822(val.trim())
                {
                    cookie.expires = Some(when.timestamp());
                }
            }
            "secure" => cookie.secure = true,
            // HttpOnly is irrelevant here; Discard is ignored on purpose.
            _ => {}
        }
    }
    if let Some(age) = max_age {
        cookie.expires = Some(Utc::now().timestamp() + age);
    }
    Some(cookie)
}
