//! Forum page parsers.
//!
//! Two surfaces: the `group-lastmod.jsp` listing (thread id, comment-page
//! count, clip marker, displayed age) and `view-message.jsp` thread pages
//! (`<div class="msg" id="topic-T">` / `id="comment-N">` blocks). Anything
//! that does not match the expected shape is a layout error: the forum
//! changed its markup and the parser needs a human.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::PullError;

/// One thread entry on the listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub topic: u64,
    pub pages: u32,
    pub clipped: bool,
    pub age: Duration,
}

/// A topic or comment extracted from a thread page, body still in HTML.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub comment: u64,
    pub subject: String,
    pub nick: String,
    pub banned: bool,
    pub stars: String,
    pub date: DateTime<Utc>,
    pub reply_to: Option<u64>,
    pub body_html: String,
}

#[derive(Debug, Default)]
pub struct ThreadPage {
    pub topic: Option<RawMessage>,
    pub comments: Vec<RawMessage>,
}

static MSGID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"view-message\.jsp\?msgid=(\d+)").expect("regex"));
static PAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"page=(\d+)").expect("regex"));
static AGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<td class="dateinterval">([^<]*)</td>"#).expect("regex"));
static RELATIVE_AGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(\S+)\s+назад$").expect("regex"));
static MSG_DIV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<div class="msg" id="(topic|comment)-(\d+)">"#).expect("regex")
});
static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<h[12][^>]*>(?:<a[^>]*>)?([^<]+)").expect("regex"));
static NICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"/people/([^/"]+)/profile"#).expect("regex"));
static STARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<span class="stars">([^<]*)</span>"#).expect("regex"));
static SIGN_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{2}\.\d{2}\.\d{4} \d{2}:\d{2}:\d{2})\)").expect("regex"));
static REPLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<div class="title">[^<]*<a href="[^"]*cid=(\d+)"#).expect("regex"));

/// Parse one listing page into thread entries, document order preserved.
pub fn parse_listing(html: &str) -> Result<Vec<ListingEntry>, PullError> {
    let mut entries = Vec::new();
    for row in html.split("<tr").skip(1) {
        let row = &row[..row.find("</tr>").unwrap_or(row.len())];
        let Some(topic) = MSGID_RE.captures(row) else {
            continue;
        };
        let topic: u64 = topic[1].parse().expect("digits");

        let pages = PAGE_RE
            .captures_iter(row)
            .filter_map(|c| c[1].parse::<u32>().ok())
            .max()
            .map(|last| last + 1)
            .unwrap_or(1);

        let clipped = row.contains("clip.gif");

        let age_cell = AGE_RE
            .captures(row)
            .ok_or_else(|| PullError::Layout(format!("no age cell for thread {topic}")))?;
        let age = parse_age(age_cell[1].trim())
            .ok_or_else(|| PullError::Layout(format!("bad age {:?}", &age_cell[1])))?;

        entries.push(ListingEntry {
            topic,
            pages,
            clipped,
            age,
        });
    }
    Ok(entries)
}

/// Parse a displayed age: relative Russian forms or an absolute date.
pub fn parse_age(text: &str) -> Option<Duration> {
    parse_age_at(text, Utc::now())
}

fn parse_age_at(text: &str, now: DateTime<Utc>) -> Option<Duration> {
    match text {
        "сегодня" => return Some(Duration::zero()),
        "вчера" => return Some(Duration::days(1)),
        _ => {}
    }
    if let Some(caps) = RELATIVE_AGE_RE.captures(text) {
        let amount: i64 = caps[1].parse().ok()?;
        let unit = &caps[2];
        return if unit.starts_with("мин") {
            Some(Duration::minutes(amount))
        } else if unit.starts_with("час") {
            Some(Duration::hours(amount))
        } else if unit.starts_with("недел") {
            Some(Duration::weeks(amount))
        } else if unit.starts_with("месяц") {
            Some(Duration::days(amount * 30))
        } else if unit.starts_with("год") || unit.starts_with("лет") {
            Some(Duration::days(amount * 365))
        } else if unit.starts_with("д") {
            Some(Duration::days(amount))
        } else {
            None
        };
    }
    if let Ok(when) = NaiveDateTime::parse_from_str(text, "%d.%m.%Y %H:%M:%S") {
        return Some(now - when.and_utc());
    }
    for format in ["%d.%m.%Y", "%d.%m.%y"] {
        if let Ok(day) = NaiveDate::parse_from_str(text, format) {
            return Some(now - day.and_hms_opt(0, 0, 0).expect("midnight").and_utc());
        }
    }
    None
}

/// Split a thread page into its topic (when present on this page) and
/// comments. This is the seam that absorbs markup drift.
pub fn parse_thread_page(html: &str) -> Result<ThreadPage, PullError> {
    let mut page = ThreadPage::default();

    let blocks: Vec<(bool, u64, usize)> = MSG_DIV_RE
        .captures_iter(html)
        .map(|caps| {
            let is_topic = &caps[1] == "topic";
            let id: u64 = caps[2].parse().expect("digits");
            let start = caps.get(0).expect("match").end();
            (is_topic, id, start)
        })
        .collect();

    for (i, &(is_topic, id, start)) in blocks.iter().enumerate() {
        let end = blocks
            .get(i + 1)
            .map(|&(_, _, next)| next)
            .unwrap_or(html.len());
        let block = &html[start..end];
        let message = parse_message_block(block, if is_topic { 0 } else { id })?;
        if is_topic {
            page.topic = Some(message);
        } else {
            page.comments.push(message);
        }
    }
    Ok(page)
}

fn parse_message_block(block: &str, comment: u64) -> Result<RawMessage, PullError> {
    let layout = |what: &str| PullError::Layout(format!("message block without {what}"));

    let subject = SUBJECT_RE
        .captures(block)
        .map(|c| unescape_entities(c[1].trim()))
        .ok_or_else(|| layout("subject"))?;

    let body_html = extract_div_inner(block, "msg_body")
        .ok_or_else(|| layout("body"))?
        .to_string();

    let sign = extract_div_inner(block, "sign").ok_or_else(|| layout("signature"))?;
    let nick = NICK_RE
        .captures(sign)
        .map(|c| unescape_entities(&c[1]))
        .ok_or_else(|| layout("author"))?;
    let banned = sign.contains("<s>");
    let stars = STARS_RE
        .captures(sign)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let date = SIGN_DATE_RE
        .captures(sign)
        .and_then(|c| NaiveDateTime::parse_from_str(&c[1], "%d.%m.%Y %H:%M:%S").ok())
        .map(|dt| dt.and_utc())
        .ok_or_else(|| layout("date"))?;

    let reply_to = REPLY_RE
        .captures(block)
        .map(|c| c[1].parse().expect("digits"));

    Ok(RawMessage {
        comment,
        subject,
        nick,
        banned,
        stars,
        date,
        reply_to,
        body_html,
    })
}

/// Inner HTML of the first `<div class="{class}">`, matching nested divs.
fn extract_div_inner<'a>(block: &'a str, class: &str) -> Option<&'a str> {
    let open = format!("<div class=\"{class}\">");
    let start = block.find(&open)? + open.len();
    let rest = &block[start..];

    let mut depth = 1usize;
    let mut pos = 0usize;
    while depth > 0 {
        let open_at = rest[pos..].find("<div");
        let close_at = rest[pos..].find("</div>")?;
        match open_at {
            Some(o) if o < close_at => {
                depth += 1;
                pos += o + 4;
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..pos + close_at]);
                }
                pos += close_at + 6;
            }
        }
    }
    None
}

pub fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
