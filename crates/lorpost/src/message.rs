//! Validation of the article read on stdin.
//!
//! Required shape: exactly one `From` address (not `anonymous`), exactly one
//! `Newsgroups` group, a `Subject`. An optional `References` header must
//! follow the gateway's message-id scheme; its last reference selects the
//! thread and the reply target. `Keywords`, `X-Link-URL`, `X-Link-Text` and
//! `X-Image-Path` pass through into the submission form.

use std::path::PathBuf;

use lornews_store::encoded::decode_header;
use lornews_store::{Article, MessageId};

use crate::error::PostError;

#[derive(Debug, Clone)]
pub struct Submission {
    pub nick: String,
    pub group: String,
    /// `None` starts a new topic.
    pub topic: Option<u64>,
    /// Parent comment id, when replying to a comment rather than the topic.
    pub replyto: Option<u64>,
    pub title: String,
    pub body: String,
    pub linktext: String,
    pub url: String,
    pub tags: String,
    pub image: Option<PathBuf>,
}

pub fn validate(article: &Article) -> Result<Submission, PostError> {
    let from = decode_header(article.header("From").ok_or(PostError::BadFrom)?);
    let nick = single_address(&from)?;
    if nick.eq_ignore_ascii_case("anonymous") {
        return Err(PostError::Anonymous);
    }

    let group = article
        .header("Newsgroups")
        .ok_or(PostError::BadNewsgroups)?
        .trim();
    if group.is_empty() || group.contains(',') || group.contains(char::is_whitespace) {
        return Err(PostError::BadNewsgroups);
    }

    let title = decode_header(article.header("Subject").ok_or(PostError::NoSubject)?);
    if title.trim().is_empty() {
        return Err(PostError::NoSubject);
    }

    let (topic, replyto) = match article.header("References") {
        None => (None, None),
        Some(refs) => {
            let last = refs
                .split_whitespace()
                .map(MessageId::parse)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| PostError::BadReferences(refs.to_string()))?
                .pop()
                .ok_or_else(|| PostError::BadReferences(refs.to_string()))?;
            let replyto = (!last.is_topic()).then_some(last.comment);
            (Some(last.topic), replyto)
        }
    };

    let image = match article.header("X-Image-Path") {
        None => None,
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(PostError::NoImage(path));
            }
            Some(path)
        }
    };

    Ok(Submission {
        nick: nick.to_string(),
        group: group.to_string(),
        topic,
        replyto,
        title: title.trim().to_string(),
        body: article.body().to_string(),
        linktext: article
            .header("X-Link-Text")
            .map(decode_header)
            .unwrap_or_default(),
        url: article.header("X-Link-URL").unwrap_or("").to_string(),
        tags: article
            .header("Keywords")
            .map(decode_header)
            .unwrap_or_default(),
        image,
    })
}

/// Extract the local part of the single address in a `From` value; more than
/// one address is an error.
fn single_address(from: &str) -> Result<&str, PostError> {
    if from.contains(',') {
        return Err(PostError::BadFrom);
    }
    let addr = match (from.find('<'), from.rfind('>')) {
        (Some(open), Some(close)) if open < close => &from[open + 1..close],
        (None, None) => from.trim(),
        _ => return Err(PostError::BadFrom),
    };
    let local = addr.split_once('@').map(|(local, _)| local).unwrap_or(addr);
    let local = local.trim();
    if local.is_empty() || local.contains(char::is_whitespace) {
        return Err(PostError::BadFrom);
    }
    Ok(local)
}
