//! The forum HTTP client shared by the puller and the poster.
//!
//! Wraps a [`reqwest::Client`] with the gateway's defaults: configurable
//! timeout (20 s unless overridden), a `lornews/<version>` User-Agent and
//! the persistent [`CookieJar`](crate::CookieJar).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{StatusCode, Url};

use crate::cookies::CookieJar;
use crate::error::ForumError;

pub const BASE_URL: &str = "http://www.linux.org.ru";
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

const USER_AGENT: &str = concat!("lornews/", env!("CARGO_PKG_VERSION"));

/// A fetched page: the poster inspects both the status and the body, the
/// puller treats any non-2xx as fatal.
#[derive(Debug)]
pub struct Page {
    pub status: StatusCode,
    pub body: String,
}

impl Page {
    pub fn status_line(&self) -> String {
        format!(
            "HTTP {} {}",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("error")
        )
    }
}

pub struct Forum {
    client: reqwest::Client,
    jar: Arc<CookieJar>,
    base: Url,
}

impl Forum {
    pub fn new(jar: Arc<CookieJar>, timeout: Duration) -> Result<Self, ForumError> {
        Self::with_base(jar, timeout, BASE_URL)
    }

    pub fn with_base(
        jar: Arc<CookieJar>,
        timeout: Duration,
        base: &str,
    ) -> Result<Self, ForumError> {
        let base = Url::parse(base).map_err(|_| ForumError::BadBaseUrl(base.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .cookie_provider(jar.clone())
            .build()?;
        Ok(Self { client, jar, base })
    }

    pub fn jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    pub fn session_id(&self) -> Option<String> {
        self.jar.get("JSESSIONID")
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ForumError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|_| ForumError::BadBaseUrl(path.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// GET a page, failing on any non-2xx status.
    pub async fn fetch(&self, path: &str, query: &[(&str, String)]) -> Result<String, ForumError> {
        let url = self.url(path, query)?;
        tracing::debug!("GET {url}");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ForumError::Status(status));
        }
        Ok(response.text().await?)
    }

    /// POST a form and hand back the page regardless of status.
    pub async fn post_form(
        &self,
        path: &str,
        fields: &[(&str, String)],
    ) -> Result<Page, ForumError> {
        let url = self.url(path, &[])?;
        tracing::debug!("POST {url}");
        let response = self.client.post(url).form(fields).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(Page { status, body })
    }

    /// POST a multipart form with an optional `image` file part.
    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, String)],
        image: Option<&Path>,
    ) -> Result<Page, ForumError> {
        let url = self.url(path, &[])?;
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in fields {
            form = form.text(name.to_string(), value.clone());
        }
        if let Some(image) = image {
            let data = std::fs::read(image)?;
            let filename = image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            form = form.part(
                "image",
                reqwest::multipart::Part::bytes(data).file_name(filename),
            );
        }
        tracing::debug!("POST {url} (multipart)");
        let response = self.client.post(url).multipart(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(Page { status, body })
    }

    // Endpoint helpers.

    pub async fn touch(&self) -> Result<(), ForumError> {
        self.fetch("/", &[]).await?;
        Ok(())
    }

    pub async fn login(&self, nick: &str, passwd: &str) -> Result<Page, ForumError> {
        self.post_form(
            "/login.jsp",
            &[("nick", nick.to_string()), ("passwd", passwd.to_string())],
        )
        .await
    }

    pub async fn lastmod_page(&self, group: u32, offset: u32) -> Result<String, ForumError> {
        self.fetch(
            "/group-lastmod.jsp",
            &[("group", group.to_string()), ("offset", offset.to_string())],
        )
        .await
    }

    pub async fn thread_page(&self, topic: u64, page: u32) -> Result<String, ForumError> {
        self.fetch(
            "/view-message.jsp",
            &[("msgid", topic.to_string()), ("page", page.to_string())],
        )
        .await
    }
}
