//! MIME encoded-words ([RFC 2047](https://datatracker.ietf.org/doc/html/rfc2047))
//! for `Subject` and `From` header values.
//!
//! Articles and overview records are stored header-encoded; the server
//! decodes before transmitting `OVER` responses. Only UTF-8 charsets are
//! produced; `B` and `Q` encodings are both accepted on decode.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Raw bytes per encoded word, chosen so the full `=?utf-8?B?..?=` token
/// stays within the 75-character limit of RFC 2047 §2.
const WORD_BYTES: usize = 45;

/// Encode a header value for storage. ASCII-only values pass through.
pub fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in value.chars() {
        if chunk.len() + ch.len_utf8() > WORD_BYTES {
            words.push(encode_word(&chunk));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(encode_word(&chunk));
    }
    words.join(" ")
}

fn encode_word(chunk: &str) -> String {
    format!("=?utf-8?B?{}?=", BASE64.encode(chunk.as_bytes()))
}

/// Decode every encoded word in a header value. Whitespace between two
/// adjacent encoded words is transparent per RFC 2047 §6.2; undecodable
/// words are left as-is.
pub fn decode_header(value: &str) -> String {
    let mut out = String::new();
    let mut pending_space = String::new();
    let mut last_was_word = false;

    for token in value.split(' ') {
        match decode_word(token) {
            Some(decoded) => {
                if !last_was_word {
                    out.push_str(&pending_space);
                }
                out.push_str(&decoded);
                last_was_word = true;
            }
            None => {
                out.push_str(&pending_space);
                out.push_str(token);
                last_was_word = false;
            }
        }
        pending_space = " ".to_string();
    }
    out
}

fn decode_word(token: &str) -> Option<String> {
    let inner = token.strip_prefix("=?")?.strip_suffix("?=")?;
    let mut parts = inner.splitn(3, '?');
    let charset = parts.next()?;
    let encoding = parts.next()?;
    let payload = parts.next()?;
    if !charset.eq_ignore_ascii_case("utf-8") {
        return None;
    }
    let bytes = match encoding {
        "B" | "b" => BASE64.decode(payload).ok()?,
        "Q" | "q" => decode_quoted(payload)?,
        _ => return None,
    };
    String::from_utf8(bytes).ok()
}

fn decode_quoted(payload: &str) -> Option<Vec<u8>> {
    let raw = payload.as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' => {
                let hex = raw.get(i + 1..i + 3)?;
                let byte = u8::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?;
                out.push(byte);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Some(out)
}
