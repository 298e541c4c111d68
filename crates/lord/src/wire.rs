//! NNTP wire helpers: CRLF line endings, dot-stuffing, multi-line blocks
//! ([RFC 3977 §3.1](https://datatracker.ietf.org/doc/html/rfc3977#section-3.1)).
//!
//! Articles live on disk with LF endings; everything is rewritten to CRLF on
//! the way out and dot-stuffed in both directions.

use std::borrow::Cow;
use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

pub async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await
}

/// Send a dot-stuffed multi-line block followed by the `.` terminator.
pub async fn write_block<W, I, S>(writer: &mut W, lines: I) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for line in lines {
        let line = stuff(line.as_ref());
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.write_all(b".\r\n").await
}

pub fn stuff(line: &str) -> Cow<'_, str> {
    if line.starts_with('.') {
        Cow::Owned(format!(".{line}"))
    } else {
        Cow::Borrowed(line)
    }
}

/// Remove one leading dot from a stuffed line. The lone `.` terminator is
/// never passed here, but a stray one comes back unchanged.
pub fn unstuff(line: &str) -> &str {
    match line.strip_prefix('.') {
        Some(rest) if !rest.is_empty() => rest,
        _ => line,
    }
}

/// Split an article's text into header lines and body lines at the first
/// blank line.
pub fn split_article(text: &str) -> (Vec<&str>, Vec<&str>) {
    let mut head = Vec::new();
    let mut body = Vec::new();
    let mut in_body = false;
    for line in text.lines() {
        if in_body {
            body.push(line);
        } else if line.is_empty() {
            in_body = true;
        } else {
            head.push(line);
        }
    }
    (head, body)
}
