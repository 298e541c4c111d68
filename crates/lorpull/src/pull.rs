//! The per-group pull pipeline: expiry first, then the listing walk.
//!
//! The listing is paged in offsets of 30; a non-clipped entry older than the
//! pull window ends the walk. Thread pages are numbered newest-first, so the
//! puller fetches them in reverse index order and appends in the forum's
//! chronological order. All writes go through the store's locked index.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};

use lornews_forum::Forum;
use lornews_store::index::IndexHandle;
use lornews_store::{Article, MessageId, Newsgroup, OpenMode, Store};

use crate::error::PullError;
use crate::parse::{ListingEntry, RawMessage, parse_listing, parse_thread_page};
use crate::render::{Rendered, render_body};

/// Threads per listing page.
const LISTING_PAGE: usize = 30;

/// Comments per thread page, used to convert the stored per-topic article
/// count into a page count for the "is this thread newer?" test. The test is
/// page-grained: growth within the newest page is invisible until a new page
/// appears.
const COMMENTS_PER_PAGE: u64 = 50;

pub struct Puller {
    store: Store,
    forum: Forum,
    /// Pull window in days; negative disables pulling.
    pub pull_days: i64,
    /// Expiry age in days; negative disables expiry, zero expires everything.
    pub expire_days: i64,
    interrupted: Arc<AtomicBool>,
}

impl Puller {
    pub fn new(
        store: Store,
        forum: Forum,
        pull_days: i64,
        expire_days: i64,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            forum,
            pull_days,
            expire_days,
            interrupted,
        }
    }

    fn check_interrupt(&self) -> Result<(), PullError> {
        if self.interrupted.load(Ordering::Relaxed) {
            return Err(PullError::Interrupted);
        }
        Ok(())
    }

    pub async fn process_group(&self, group: &Newsgroup) -> Result<(), PullError> {
        let mut index = self.store.open_index(&group.name, OpenMode::Create)?;

        if self.expire_days >= 0 {
            let cutoff = if self.expire_days == 0 {
                None
            } else {
                Some(Utc::now() - Duration::days(self.expire_days))
            };
            let deleted = index.expire(cutoff)?;
            if deleted > 0 {
                tracing::info!("{}: expired {deleted} articles", group.name);
            }
        }

        if self.pull_days < 0 {
            return Ok(());
        }
        let window = Duration::days(self.pull_days);

        let mut offset = 0u32;
        'walk: loop {
            self.check_interrupt()?;
            let html = self.forum.lastmod_page(group.forum_id, offset).await?;
            let entries = parse_listing(&html)?;
            if entries.is_empty() {
                break;
            }
            for entry in &entries {
                // Clipped threads show unreliable ages and never end the walk.
                if !entry.clipped && entry.age > window {
                    break 'walk;
                }
                self.check_interrupt()?;
                self.pull_thread(&mut index, group, entry).await?;
            }
            if entries.len() < LISTING_PAGE {
                break;
            }
            offset += LISTING_PAGE as u32;
        }
        Ok(())
    }

    async fn pull_thread(
        &self,
        index: &mut IndexHandle,
        group: &Newsgroup,
        entry: &ListingEntry,
    ) -> Result<(), PullError> {
        let stored = index.topic_count(entry.topic);
        if stored > 0 && entry.pages <= known_pages(stored) {
            tracing::debug!("{}: thread {} is up to date", group.name, entry.topic);
            return Ok(());
        }
        tracing::info!(
            "{}: pulling thread {} ({} pages)",
            group.name,
            entry.topic,
            entry.pages
        );

        for page in (0..entry.pages).rev() {
            let html = self.forum.thread_page(entry.topic, page).await?;
            let parsed = parse_thread_page(&html)?;

            // The oldest page is fetched first and carries the topic body.
            if page == entry.pages - 1
                && let Some(topic) = parsed.topic
                && !index.has_comment(entry.topic, 0)
            {
                let article = build_topic_article(group, entry.topic, &topic)?;
                index.append_article(&article)?;
            }
            for comment in parsed.comments {
                if index.has_comment(entry.topic, comment.comment) {
                    continue;
                }
                let article = build_comment_article(index, group, entry.topic, &comment)?;
                index.append_article(&article)?;
            }
        }
        Ok(())
    }
}

fn known_pages(stored_articles: u64) -> u32 {
    let comments = stored_articles.saturating_sub(1);
    (1 + comments / COMMENTS_PER_PAGE) as u32
}

fn common_headers(
    group: &Newsgroup,
    id: MessageId,
    message: &RawMessage,
) -> Vec<(String, String)> {
    use lornews_store::encoded::encode_header;

    let nick = &message.nick;
    let display = if message.banned {
        format!("{nick}*")
    } else {
        nick.clone()
    };
    vec![
        ("Newsgroups".into(), group.name.clone()),
        ("Subject".into(), encode_header(&message.subject)),
        (
            "From".into(),
            encode_header(&format!("{display} <{nick}@linux.org.ru>")),
        ),
        ("Date".into(), message.date.to_rfc2822()),
        ("Message-ID".into(), id.to_string()),
    ]
}

fn trailing_headers(message: &RawMessage, rendered: &Rendered) -> Vec<(String, String)> {
    let mut headers = vec![
        ("MIME-Version".into(), "1.0".into()),
        (
            "Content-Type".into(),
            "text/plain; charset=utf-8".into(),
        ),
        ("Content-Transfer-Encoding".into(), "8bit".into()),
        ("Injection-Date".into(), Utc::now().to_rfc2822()),
        ("Path".into(), "linux.org.ru!not-for-mail".into()),
    ];
    if let Some(link) = &rendered.link {
        if link.is_vote() {
            headers.push(("X-Vote-URL".into(), link.url.clone()));
        } else {
            headers.push(("X-Link-URL".into(), link.url.clone()));
            headers.push((
                "X-Link-Text".into(),
                lornews_store::encoded::encode_header(&link.label),
            ));
        }
    }
    if !message.stars.is_empty() {
        headers.push(("X-Stars".into(), message.stars.clone()));
    }
    headers
}

pub fn build_topic_article(
    group: &Newsgroup,
    topic: u64,
    message: &RawMessage,
) -> Result<Article, PullError> {
    let rendered = render_body(&message.body_html)?;
    let mut headers = common_headers(group, MessageId::topic(topic), message);
    headers.extend(trailing_headers(message, &rendered));
    Ok(Article::new(headers, rendered.text))
}

/// A comment's `References` chain: the parent's own chain (when the parent
/// article is still in the store) followed by the immediate parent, or just
/// the topic's message-id for first-level comments.
pub fn build_comment_article(
    index: &IndexHandle,
    group: &Newsgroup,
    topic: u64,
    message: &RawMessage,
) -> Result<Article, PullError> {
    let rendered = render_body(&message.body_html)?;
    let topic_id = MessageId::topic(topic);

    let references = match message.reply_to {
        None => topic_id.to_string(),
        Some(parent) => {
            let parent_id = MessageId::comment(topic, parent);
            match parent_references(index, topic, parent)? {
                Some(refs) if !refs.is_empty() => format!("{refs} {parent_id}"),
                _ => format!("{topic_id} {parent_id}"),
            }
        }
    };

    let mut headers = common_headers(group, MessageId::comment(topic, message.comment), message);
    headers.push(("References".into(), references));
    headers.extend(trailing_headers(message, &rendered));
    Ok(Article::new(headers, rendered.text))
}

fn parent_references(
    index: &IndexHandle,
    topic: u64,
    parent: u64,
) -> Result<Option<String>, PullError> {
    let Some(n) = index.find_location(topic, parent) else {
        return Ok(None);
    };
    let path = index.article_path(n).expect("live article path");
    let text = std::fs::read_to_string(path).map_err(lornews_store::StoreError::from)?;
    let article = Article::parse(&text)?;
    Ok(article.header("References").map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn group() -> Newsgroup {
        Newsgroup {
            name: "lor.forum.talks".into(),
            forum_id: 42,
            description: "Talks".into(),
        }
    }

    fn message(comment: u64, reply_to: Option<u64>, body: &str) -> RawMessage {
        RawMessage {
            comment,
            subject: "Проблема с ядром".into(),
            nick: "vasya".into(),
            banned: false,
            stars: String::new(),
            date: Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap(),
            reply_to,
            body_html: body.to_string(),
        }
    }

    fn open_index(tmp: &tempfile::TempDir) -> IndexHandle {
        IndexHandle::open(tmp.path().join("group"), "lor.forum.talks", OpenMode::Create)
            .expect("open")
    }

    #[test]
    fn known_pages_is_page_grained() {
        assert_eq!(known_pages(1), 1); // topic only
        assert_eq!(known_pages(2), 1); // one comment
        assert_eq!(known_pages(51), 1);
        assert_eq!(known_pages(52), 2);
        assert_eq!(known_pages(101), 2);
        assert_eq!(known_pages(102), 3);
    }

    #[test]
    fn topic_article_carries_required_headers() {
        let topic = message(0, None, "<p>Ядро не собирается.</p>");
        let article = build_topic_article(&group(), 12345, &topic).expect("build");

        assert_eq!(article.header("Newsgroups"), Some("lor.forum.talks"));
        assert_eq!(
            article.header("Message-ID"),
            Some("<lor12345@linux.org.ru>")
        );
        assert_eq!(article.header("MIME-Version"), Some("1.0"));
        assert_eq!(
            article.header("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(article.header("Content-Transfer-Encoding"), Some("8bit"));
        assert_eq!(article.header("Path"), Some("linux.org.ru!not-for-mail"));
        assert!(article.header("Injection-Date").is_some());
        assert!(article.header("References").is_none());
        assert_eq!(article.body(), "Ядро не собирается.\n");

        let from = article.header("From").expect("from");
        assert!(from.contains("vasya@linux.org.ru"));
    }

    #[test]
    fn banned_author_is_marked_in_from() {
        let mut topic = message(0, None, "<p>x</p>");
        topic.banned = true;
        let article = build_topic_article(&group(), 1, &topic).expect("build");
        assert!(article.header("From").expect("from").starts_with("vasya*"));
    }

    #[test]
    fn promoted_trailer_becomes_link_headers() {
        let topic = message(
            0,
            None,
            r#"<p>тема</p><p>&gt;&gt;&gt; <a href="https://example.com/x">Подробности</a></p>"#,
        );
        let article = build_topic_article(&group(), 1, &topic).expect("build");
        assert_eq!(article.header("X-Link-URL"), Some("https://example.com/x"));
        assert_eq!(
            lornews_store::encoded::decode_header(
                article.header("X-Link-Text").expect("text")
            ),
            "Подробности"
        );
        assert_eq!(article.body(), "тема\n");
    }

    #[test]
    fn vote_trailer_becomes_vote_header() {
        let topic = message(
            0,
            None,
            r#"<p>опрос</p><p>&gt;&gt;&gt; <a href="https://www.linux.org.ru/vote.jsp?id=5">Голосовать</a></p>"#,
        );
        let article = build_topic_article(&group(), 1, &topic).expect("build");
        assert_eq!(
            article.header("X-Vote-URL"),
            Some("https://www.linux.org.ru/vote.jsp?id=5")
        );
        assert!(article.header("X-Link-URL").is_none());
    }

    #[test]
    fn first_level_comment_references_topic() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let index = open_index(&tmp);
        let comment = message(678, None, "<p>ответ</p>");
        let article =
            build_comment_article(&index, &group(), 12345, &comment).expect("build");
        assert_eq!(
            article.header("References"),
            Some("<lor12345@linux.org.ru>")
        );
    }

    #[test]
    fn nested_comment_extends_parent_chain() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut index = open_index(&tmp);

        let topic = build_topic_article(&group(), 12345, &message(0, None, "<p>тема</p>"))
            .expect("build");
        index.append_article(&topic).expect("append");
        let first = build_comment_article(&index, &group(), 12345, &message(678, None, "<p>ответ</p>"))
            .expect("build");
        index.append_article(&first).expect("append");

        let second = message(679, Some(678), "<p>снова</p>");
        let article =
            build_comment_article(&index, &group(), 12345, &second).expect("build");
        assert_eq!(
            article.header("References"),
            Some("<lor12345@linux.org.ru> <lor12345.678@linux.org.ru>")
        );
    }

    #[test]
    fn expired_parent_falls_back_to_topic_reference() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let index = open_index(&tmp);
        let reply = message(700, Some(678), "<p>ответ</p>");
        let article = build_comment_article(&index, &group(), 12345, &reply).expect("build");
        assert_eq!(
            article.header("References"),
            Some("<lor12345@linux.org.ru> <lor12345.678@linux.org.ru>")
        );
    }
}
