//! Article model: the message-ID scheme and the RFC-5322-style article file
//! ([RFC 5536](https://datatracker.ietf.org/doc/html/rfc5536)).
//!
//! Articles live on disk as UTF-8 text with LF line endings; the server owns
//! the CRLF rewrite and dot-stuffing on the wire.

use std::fmt;

use crate::error::StoreError;

const ID_DOMAIN: &str = "linux.org.ru";

/// A forum message identity: `<lor{TOPIC}@linux.org.ru>` for topics,
/// `<lor{TOPIC}.{COMMENT}@linux.org.ru>` for comments. Comment 0 is the
/// topic body itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId {
    pub topic: u64,
    pub comment: u64,
}

impl MessageId {
    pub fn topic(topic: u64) -> Self {
        Self { topic, comment: 0 }
    }

    pub fn comment(topic: u64, comment: u64) -> Self {
        Self { topic, comment }
    }

    pub fn is_topic(&self) -> bool {
        self.comment == 0
    }

    /// Parse a message-id, with or without angle brackets.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let bad = || StoreError::BadMessageId(raw.to_string());
        let inner = raw
            .trim()
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or_else(|| raw.trim());
        let local = inner
            .strip_suffix(&format!("@{ID_DOMAIN}"))
            .ok_or_else(bad)?;
        let ids = local.strip_prefix("lor").ok_or_else(bad)?;
        let (topic, comment) = match ids.split_once('.') {
            Some((t, c)) => (t, Some(c)),
            None => (ids, None),
        };
        let topic: u64 = topic.parse().map_err(|_| bad())?;
        if topic == 0 {
            return Err(bad());
        }
        let comment: u64 = match comment {
            Some(c) => {
                let c: u64 = c.parse().map_err(|_| bad())?;
                if c == 0 {
                    return Err(bad());
                }
                c
            }
            None => 0,
        };
        Ok(Self { topic, comment })
    }

    /// The article's location inside its group directory, `{TOPIC}/{COMMENT}`.
    pub fn location(&self) -> String {
        format!("{}/{}", self.topic, self.comment)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.comment == 0 {
            write!(f, "<lor{}@{ID_DOMAIN}>", self.topic)
        } else {
            write!(f, "<lor{}.{}@{ID_DOMAIN}>", self.topic, self.comment)
        }
    }
}

/// An article: ordered headers, blank line, body.
#[derive(Debug, Clone)]
pub struct Article {
    headers: Vec<(String, String)>,
    body: String,
}

impl Article {
    pub fn new(headers: Vec<(String, String)>, body: String) -> Self {
        Self { headers, body }
    }

    /// Parse an article from its text form. Folded header continuation lines
    /// (leading whitespace) are joined with a single space.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let mut headers: Vec<(String, String)> = Vec::new();
        let mut lines = text.lines();
        let mut body = String::new();

        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                match headers.last_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim_start());
                    }
                    None => {
                        return Err(StoreError::BadArticle(
                            "continuation line before first header".into(),
                        ));
                    }
                }
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StoreError::BadArticle(format!("not a header: {line}")))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
        if headers.is_empty() {
            return Err(StoreError::BadArticle("no headers".into()));
        }

        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        Ok(Self { headers, body })
    }

    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn message_id(&self) -> Result<MessageId, StoreError> {
        let raw = self
            .header("Message-ID")
            .ok_or_else(|| StoreError::BadArticle("no Message-ID".into()))?;
        MessageId::parse(raw)
    }

    /// The on-disk form: header lines, blank separator, body, LF endings.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out
    }

    pub fn body_line_count(&self) -> u64 {
        self.body.lines().count() as u64
    }
}
