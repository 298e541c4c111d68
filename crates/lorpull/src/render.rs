//! Forum message bodies to plain UTF-8 text.
//!
//! Formatting rules: hard wrap at 72 columns (quote and list prefixes not
//! counted), nested unordered lists alternate `*`/`-` bullets, blockquotes
//! prefix `>` per depth, `pre` blocks pass through verbatim between blank
//! lines, and anchors collapse to the bare URL when their text adds nothing.
//! A trailing `>>> label (url)` line is stripped off the body and promoted
//! into the topic's link headers.

use std::sync::LazyLock;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;

use crate::error::PullError;

pub const WRAP_COLUMNS: usize = 72;

/// The label the forum puts on poll links.
pub const VOTE_MARKER: &str = "Голосовать";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotedLink {
    pub label: String,
    pub url: String,
}

impl PromotedLink {
    pub fn is_vote(&self) -> bool {
        self.label == VOTE_MARKER
    }
}

#[derive(Debug)]
pub struct Rendered {
    pub text: String,
    pub link: Option<PromotedLink>,
}

static TRAILER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>>> (.+) \((\S+)\)$").expect("regex"));
static TRAILER_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^>>> (\S+)$").expect("regex"));

pub fn render_body(html: &str) -> Result<Rendered, PullError> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;

    let mut r = Renderer::default();
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => r.open(tag_name(e), href_of(e)),
            Ok(Event::Empty(ref e)) => {
                if tag_name(e) == "br" {
                    r.line_break();
                }
            }
            Ok(Event::End(ref e)) => {
                let name = e.name().as_ref().to_vec();
                r.close(&String::from_utf8_lossy(&name).to_lowercase());
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map(|t| t.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(e.as_ref()).into_owned());
                r.text(&text);
            }
            Ok(Event::CData(ref e)) => {
                r.text(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(PullError::Layout(format!("unparsable body: {err}"))),
        }
    }
    r.flush_para();

    let mut blocks = r.blocks;
    let link = take_trailer(&mut blocks);
    let mut text = blocks.join("\n\n");
    if !text.is_empty() {
        text.push('\n');
    }
    Ok(Rendered { text, link })
}

fn take_trailer(blocks: &mut Vec<String>) -> Option<PromotedLink> {
    let last = blocks.last()?;
    let line = last.lines().last()?.to_string();

    let link = if let Some(caps) = TRAILER_RE.captures(&line) {
        PromotedLink {
            label: caps[1].to_string(),
            url: caps[2].to_string(),
        }
    } else if let Some(caps) = TRAILER_BARE_RE.captures(&line) {
        let url = caps[1].to_string();
        if !url.starts_with("http") {
            return None;
        }
        PromotedLink {
            label: url.clone(),
            url,
        }
    } else {
        return None;
    };

    let last = blocks.last_mut().expect("non-empty");
    match last.rfind('\n') {
        Some(cut) => last.truncate(cut),
        None => {
            blocks.pop();
        }
    }
    Some(link)
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_lowercase()
}

fn href_of(e: &BytesStart) -> Option<String> {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"href" {
            return attr.unescape_value().ok().map(|v| v.into_owned());
        }
    }
    None
}

#[derive(Default)]
struct Renderer {
    blocks: Vec<String>,
    para: String,
    list_depth: usize,
    quote_depth: usize,
    item_head: bool,
    in_pre: bool,
    pre_buf: String,
    anchors: Vec<(usize, String)>,
}

impl Renderer {
    fn open(&mut self, tag: String, href: Option<String>) {
        if self.in_pre {
            return;
        }
        match tag.as_str() {
            "p" => self.flush_para(),
            "br" => self.line_break(),
            "ul" => {
                self.flush_para();
                self.list_depth += 1;
            }
            "li" => {
                self.flush_para();
                self.item_head = true;
            }
            "blockquote" => {
                self.flush_para();
                self.quote_depth += 1;
            }
            "pre" => {
                self.flush_para();
                self.in_pre = true;
                self.pre_buf.clear();
            }
            "a" => self.anchors.push((self.para.len(), href.unwrap_or_default())),
            _ => {}
        }
    }

    fn close(&mut self, tag: &str) {
        if self.in_pre && tag != "pre" {
            return;
        }
        match tag {
            "p" | "li" => self.flush_para(),
            "ul" => {
                self.flush_para();
                self.list_depth = self.list_depth.saturating_sub(1);
            }
            "blockquote" => {
                self.flush_para();
                self.quote_depth = self.quote_depth.saturating_sub(1);
            }
            "pre" => {
                let code = self.pre_buf.trim_matches('\n').to_string();
                if !code.is_empty() {
                    self.blocks.push(code);
                }
                self.in_pre = false;
            }
            "a" => {
                if let Some((mark, href)) = self.anchors.pop() {
                    let text = self.para[mark..].to_string();
                    self.para.truncate(mark);
                    self.para.push_str(&collapse_anchor(text.trim(), &href));
                }
            }
            _ => {}
        }
    }

    fn line_break(&mut self) {
        if !self.in_pre {
            self.para.push('\n');
        }
    }

    fn text(&mut self, text: &str) {
        if self.in_pre {
            self.pre_buf.push_str(text);
            return;
        }
        let mut words = text.split_whitespace();
        let Some(first) = words.next() else {
            if self.wants_space() && !text.is_empty() {
                self.para.push(' ');
            }
            return;
        };
        if text.starts_with(char::is_whitespace) && self.wants_space() {
            self.para.push(' ');
        }
        self.para.push_str(first);
        for word in words {
            self.para.push(' ');
            self.para.push_str(word);
        }
        if text.ends_with(char::is_whitespace) {
            self.para.push(' ');
        }
    }

    fn wants_space(&self) -> bool {
        !self.para.is_empty() && !self.para.ends_with([' ', '\n'])
    }

    fn flush_para(&mut self) {
        let para = std::mem::take(&mut self.para);
        let item_head = std::mem::take(&mut self.item_head);
        self.anchors.clear();
        if para.trim().is_empty() {
            return;
        }

        let quote = if self.quote_depth > 0 {
            format!("{} ", ">".repeat(self.quote_depth))
        } else {
            String::new()
        };
        let (head, cont) = if self.list_depth > 0 {
            let indent = "  ".repeat(self.list_depth - 1);
            let bullet = if self.list_depth % 2 == 1 { "* " } else { "- " };
            let cont = format!("{indent}  ");
            if item_head {
                (format!("{indent}{bullet}"), cont)
            } else {
                (cont.clone(), cont)
            }
        } else {
            (String::new(), String::new())
        };

        let mut lines = Vec::new();
        for segment in para.split('\n') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            lines.extend(wrap(segment, WRAP_COLUMNS));
        }

        let block = lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let prefix = if i == 0 { &head } else { &cont };
                format!("{quote}{prefix}{line}")
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.blocks.push(block);
    }
}

fn collapse_anchor(text: &str, href: &str) -> String {
    if text.is_empty() || text == href {
        return href.to_string();
    }
    for ellipsis in ["…", "..."] {
        if let Some(prefix) = text.strip_suffix(ellipsis)
            && !prefix.is_empty()
            && href.starts_with(prefix)
        {
            return href.to_string();
        }
    }
    format!("{text} ({href})")
}

/// Greedy word wrap; a single word longer than `width` gets its own line.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut line_width = 0usize;

    for word in text.split_whitespace() {
        let word_width = word.chars().count();
        if line_width > 0 && line_width + 1 + word_width > width {
            lines.push(std::mem::take(&mut line));
            line_width = 0;
        }
        if line_width > 0 {
            line.push(' ');
            line_width += 1;
        }
        line.push_str(word);
        line_width += word_width;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
