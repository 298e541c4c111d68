//! Session refresh and form submission.
//!
//! The session heuristic: when any cookie would expire before the submission
//! could plausibly complete (within `timeout` seconds), log in afresh;
//! otherwise a bare `GET /` keeps the session warm. Either way the jar is
//! re-saved, and the `JSESSIONID` value rides along as the `session` form
//! field.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use lornews_forum::{CookieJar, Forum, Page};
use lornews_store::Store;

use crate::error::PostError;
use crate::message::Submission;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("regex"));
static ERROR_DIV_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<div class="error">(.*?)</div>"#).expect("regex"));
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("regex"));

pub async fn submit(store: &Store, submission: &Submission, timeout: u64) -> Result<(), PostError> {
    submit_to(store, submission, timeout, lornews_forum::BASE_URL).await
}

/// Like [`submit`] with an explicit forum base URL, the seam the tests use.
pub async fn submit_to(
    store: &Store,
    submission: &Submission,
    timeout: u64,
    base: &str,
) -> Result<(), PostError> {
    let catalog = store.catalog()?;
    let group = catalog
        .get(&submission.group)
        .ok_or_else(|| PostError::UnknownGroup(submission.group.clone()))?;

    let passwd = store.password(&submission.nick)?;
    // Concurrent postings for the same user serialize on the jar.
    let _user_lock = lock_user(store, &submission.nick)?;
    let jar = Arc::new(CookieJar::load(store.cookies_path(&submission.nick))?);
    let forum = Forum::with_base(jar.clone(), Duration::from_secs(timeout), base)?;

    refresh_session(&forum, &jar, &submission.nick, &passwd, timeout as i64).await?;
    jar.save()?;
    let session = forum.session_id().ok_or(PostError::NoSession)?;

    let page = post_submission(&forum, submission, group.forum_id, &session).await?;
    if !page.status.is_success() {
        return Err(PostError::Http(page.status_line()));
    }
    if let Some(error) = extract_error(&page.body) {
        return Err(PostError::Rejected(error));
    }
    Ok(())
}

fn lock_user(store: &Store, nick: &str) -> Result<std::fs::File, PostError> {
    use fs2::FileExt;

    let dir = store.user_dir(nick);
    std::fs::create_dir_all(&dir).map_err(lornews_store::StoreError::from)?;
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join("cookies.lock"))
        .map_err(lornews_store::StoreError::from)?;
    lock.lock_exclusive()
        .map_err(lornews_store::StoreError::from)?;
    Ok(lock)
}

async fn refresh_session(
    forum: &Forum,
    jar: &CookieJar,
    nick: &str,
    passwd: &str,
    timeout: i64,
) -> Result<(), PostError> {
    if jar.get("JSESSIONID").is_some() && !jar.expires_within(timeout) {
        forum.touch().await?;
        return Ok(());
    }

    tracing::debug!("session missing or expiring, logging in as {nick}");
    let page = forum.login(nick, passwd).await?;
    if !page.status.is_success() {
        return Err(PostError::Http(page.status_line()));
    }
    if let Some(title) = extract_title(&page.body)
        && !is_front_page_title(&title)
    {
        return Err(PostError::LoginFailed(title));
    }
    Ok(())
}

async fn post_submission(
    forum: &Forum,
    submission: &Submission,
    forum_group: u32,
    session: &str,
) -> Result<Page, PostError> {
    let new_topic = submission.topic.is_none();
    let mut fields: Vec<(&str, String)> = vec![("session", session.to_string())];
    if new_topic {
        fields.push(("group", forum_group.to_string()));
    }
    fields.extend([
        (
            "topic",
            submission.topic.map(|t| t.to_string()).unwrap_or_default(),
        ),
        (
            "replyto",
            submission
                .replyto
                .map(|c| c.to_string())
                .unwrap_or_default(),
        ),
        ("title", submission.title.clone()),
        ("msg", submission.body.clone()),
        ("linktext", submission.linktext.clone()),
        ("url", submission.url.clone()),
        ("tags", submission.tags.clone()),
        ("mode", if new_topic { "tex" } else { "ntobrq" }.to_string()),
        ("autourl", "1".to_string()),
    ]);

    let path = if new_topic { "/add.jsp" } else { "/add_comment.jsp" };
    let page = match &submission.image {
        Some(image) => forum.post_multipart(path, &fields, Some(image)).await?,
        None => forum.post_form(path, &fields).await?,
    };
    Ok(page)
}

fn extract_title(body: &str) -> Option<String> {
    TITLE_RE
        .captures(body)
        .map(|caps| clean_fragment(&caps[1]))
}

/// Anything but the front page after login means the credentials were
/// rejected and the page title is the diagnostic.
fn is_front_page_title(title: &str) -> bool {
    title.to_lowercase().contains("linux.org.ru")
}

pub fn extract_error(body: &str) -> Option<String> {
    ERROR_DIV_RE
        .captures(body)
        .map(|caps| clean_fragment(&caps[1]))
}

fn clean_fragment(html: &str) -> String {
    let text = TAG_RE.replace_all(html, " ");
    let text = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
