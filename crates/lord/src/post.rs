//! The POST pipeline: buffer the client's article, feed it to the poster
//! subprocess, and report its verdict.
//!
//! The article is fully buffered before the subprocess starts, so a dropped
//! connection mid-POST never reaches the poster at all.

use std::io;
use std::process::Stdio;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::wire::unstuff;

/// Read a dot-terminated article block: un-stuff leading dots and rewrite
/// line endings to LF. `None` means the client disconnected mid-article.
pub async fn read_article<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut article = String::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "." {
            return Ok(Some(article));
        }
        article.push_str(unstuff(trimmed));
        article.push('\n');
    }
}

#[derive(Debug)]
pub struct PosterVerdict {
    pub success: bool,
    /// Last line the poster wrote to stderr, its one-line diagnostic.
    pub error: Option<String>,
}

/// Run the posting command (split on whitespace) with the article on its
/// stdin. Stdout is discarded; stderr is captured for the `441` reply.
pub async fn run_poster(postcmd: &str, article: &str) -> io::Result<PosterVerdict> {
    let mut parts = postcmd.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty post command"))?;

    let mut child = Command::new(program)
        .args(parts)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child.stdin.take().expect("piped stdin");
    // The poster may exit before reading everything; a broken pipe here is
    // its verdict, not ours.
    let _ = stdin.write_all(article.as_bytes()).await;
    drop(stdin);

    let output = child.wait_with_output().await?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    let error = stderr
        .lines()
        .filter(|l| !l.trim().is_empty())
        .next_back()
        .map(str::to_string);

    Ok(PosterVerdict {
        success: output.status.success(),
        error,
    })
}
