//! Per-connection NNTP reader sessions
//! ([RFC 3977](https://datatracker.ietf.org/doc/html/rfc3977), pragmatic subset).
//!
//! The accept loop hands each connection to its own task; `current group`
//! and `current article number` live in that task's [`Session`], never in
//! process globals. Workers recover from everything except store-integrity
//! errors and I/O failure on the client socket.

use std::io;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use lornews_store::index::IndexHandle;
use lornews_store::{Catalog, MessageId, OpenMode, Pattern, Store, StoreError};

use crate::post;
use crate::wire::{split_article, write_block, write_line};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Command line (split on whitespace) for the posting subprocess.
    pub postcmd: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            postcmd: "lorpost".to_string(),
        }
    }
}

/// Accept loop: one task per connection, no shared mutable state between
/// peers. Exits only on a fatal accept error.
pub async fn serve(
    listener: TcpListener,
    store: Store,
    catalog: Catalog,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let store = Arc::new(store);
    let catalog = Arc::new(catalog);
    let config = Arc::new(config);

    loop {
        let (stream, peer) = listener.accept().await?;
        let store = store.clone();
        let catalog = catalog.clone();
        let config = config.clone();
        tokio::spawn(async move {
            tracing::info!("client connected: {peer}");
            if let Err(err) = handle_client(stream, store, catalog, config).await {
                tracing::warn!("client {peer}: {err}");
            }
            tracing::info!("client disconnected: {peer}");
        });
    }
}

enum Flow {
    Continue,
    Quit,
}

async fn handle_client(
    stream: tokio::net::TcpStream,
    store: Arc<Store>,
    catalog: Arc<Catalog>,
    config: Arc<ServerConfig>,
) -> io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut session = Session {
        store,
        catalog,
        config,
        writer: write_half,
        group: None,
        number: None,
    };

    session.reply(&format!("200 lord/{VERSION}")).await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end_matches(['\r', '\n']).to_string();
        match session.dispatch(&command, &mut reader).await? {
            Flow::Continue => {}
            Flow::Quit => return Ok(()),
        }
    }
}

struct Session {
    store: Arc<Store>,
    catalog: Arc<Catalog>,
    config: Arc<ServerConfig>,
    writer: OwnedWriteHalf,
    group: Option<String>,
    number: Option<u64>,
}

impl Session {
    async fn reply(&mut self, line: &str) -> io::Result<()> {
        write_line(&mut self.writer, line).await
    }

    async fn dispatch(
        &mut self,
        line: &str,
        reader: &mut BufReader<OwnedReadHalf>,
    ) -> io::Result<Flow> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            self.reply("500 Unknown command").await?;
            return Ok(Flow::Continue);
        };
        let verb = verb.to_uppercase();
        let args: Vec<&str> = parts.collect();

        match verb.as_str() {
            "QUIT" => {
                self.reply("205 Bye").await?;
                return Ok(Flow::Quit);
            }
            "HELP" => self.cmd_help().await?,
            "CAPABILITIES" => self.cmd_capabilities().await?,
            "DATE" => {
                let now = Utc::now().format("%Y%m%d%H%M%S");
                self.reply(&format!("111 {now}")).await?;
            }
            "MODE" => {
                if args.len() == 1 && args[0].eq_ignore_ascii_case("reader") {
                    self.reply("200 Posting allowed").await?;
                } else {
                    self.reply("501 Bad syntax").await?;
                }
            }
            "GROUP" => self.cmd_group(&args).await?,
            "LISTGROUP" => self.cmd_listgroup(&args).await?,
            "LAST" => self.cmd_seek(false).await?,
            "NEXT" => self.cmd_seek(true).await?,
            "ARTICLE" | "HEAD" | "BODY" | "STAT" => self.cmd_article(&verb, &args).await?,
            "NEWGROUPS" => self.cmd_newgroups(&args).await?,
            "NEWNEWS" => self.cmd_newnews(&args).await?,
            "LIST" => self.cmd_list(&args).await?,
            "OVER" | "XOVER" => self.cmd_over(&args).await?,
            "POST" => self.cmd_post(reader).await?,
            _ => self.reply("500 Unknown command").await?,
        }
        Ok(Flow::Continue)
    }

    /// Open a group's index, replying `403` on failure. A broken index is a
    /// store-integrity error and terminates the connection.
    async fn open_read(&mut self, group: &str) -> io::Result<Option<IndexHandle>> {
        let handle = self.store.open_index(group, OpenMode::Read);
        match handle {
            Ok(handle) => Ok(Some(handle)),
            Err(err) => {
                tracing::error!("index for {group}: {err}");
                self.reply("403 Internal fault").await?;
                match err {
                    StoreError::BrokenIndex { .. } => Err(io::Error::other(err)),
                    _ => Ok(None),
                }
            }
        }
    }

    async fn cmd_help(&mut self) -> io::Result<()> {
        self.reply("100 Legal commands").await?;
        write_block(
            &mut self.writer,
            [
                "ARTICLE [message-id|number]",
                "BODY [message-id|number]",
                "CAPABILITIES [keyword]",
                "DATE",
                "GROUP newsgroup",
                "HEAD [message-id|number]",
                "HELP",
                "LAST",
                "LIST [ACTIVE|NEWSGROUPS [wildmat]|OVERVIEW.FMT]",
                "LISTGROUP [newsgroup [range]]",
                "MODE READER",
                "NEWGROUPS yymmdd hhmmss [GMT]",
                "NEWNEWS wildmat yymmdd hhmmss [GMT]",
                "NEXT",
                "OVER [range]",
                "POST",
                "QUIT",
                "STAT [message-id|number]",
                "XOVER [range]",
            ],
        )
        .await
    }

    async fn cmd_capabilities(&mut self) -> io::Result<()> {
        self.reply("101 Capability list:").await?;
        write_block(
            &mut self.writer,
            [
                "VERSION 2".to_string(),
                format!("IMPLEMENTATION lord/{VERSION}"),
                "READER".to_string(),
                "NEWNEWS".to_string(),
                "LIST ACTIVE NEWSGROUPS OVERVIEW.FMT".to_string(),
                "OVER".to_string(),
                "POST".to_string(),
            ],
        )
        .await
    }

    async fn cmd_group(&mut self, args: &[&str]) -> io::Result<()> {
        let [name] = args else {
            return self.reply("501 Bad syntax").await;
        };
        if self.catalog.get(name).is_none() {
            return self.reply("411 No such newsgroup").await;
        }
        let Some(index) = self.open_read(name).await? else {
            return Ok(());
        };
        self.group = Some(name.to_string());
        self.number = (!index.is_empty()).then(|| index.min());
        let status = format!(
            "211 {} {} {} {name}",
            index.count(),
            index.min(),
            index.max()
        );
        self.reply(&status).await
    }

    async fn cmd_listgroup(&mut self, args: &[&str]) -> io::Result<()> {
        if args.len() > 2 {
            return self.reply("501 Bad syntax").await;
        }
        let range = match args.get(1) {
            Some(arg) => match parse_range(arg) {
                Some(range) => Some(range),
                None => return self.reply("501 Bad syntax").await,
            },
            None => None,
        };

        let name = match args.first() {
            Some(name) => {
                if self.catalog.get(name).is_none() {
                    return self.reply("411 No such newsgroup").await;
                }
                name.to_string()
            }
            None => match &self.group {
                Some(group) => group.clone(),
                None => return self.reply("412 No newsgroup selected").await,
            },
        };

        let Some(index) = self.open_read(&name).await? else {
            return Ok(());
        };
        self.group = Some(name.clone());
        self.number = (!index.is_empty()).then(|| index.min());

        let status = format!(
            "211 {} {} {} {name}",
            index.count(),
            index.min(),
            index.max()
        );
        self.reply(&status).await?;
        let (lo, hi) = range.unwrap_or((1, None));
        let numbers: Vec<String> = index
            .scan(lo, hi)
            .into_iter()
            .map(|n| n.to_string())
            .collect();
        write_block(&mut self.writer, numbers).await
    }

    async fn cmd_seek(&mut self, forward: bool) -> io::Result<()> {
        let Some(group) = self.group.clone() else {
            return self.reply("412 No newsgroup selected").await;
        };
        let Some(current) = self.number else {
            return self.reply("420 Current article number is invalid").await;
        };
        let Some(index) = self.open_read(&group).await? else {
            return Ok(());
        };
        let target = if forward {
            index.next_after(current)
        } else {
            index.prev_before(current)
        };
        match target {
            Some(n) => {
                self.number = Some(n);
                let id = index.entry(n).expect("live entry").message_id();
                self.reply(&format!("223 {n} {id}")).await
            }
            None if forward => self.reply("421 No next article").await,
            None => self.reply("422 No previous article").await,
        }
    }

    async fn cmd_article(&mut self, verb: &str, args: &[&str]) -> io::Result<()> {
        if args.len() > 1 {
            return self.reply("501 Bad syntax").await;
        }
        let code = match verb {
            "ARTICLE" => 220,
            "HEAD" => 221,
            "BODY" => 222,
            _ => 223,
        };

        let (n, id, path) = match args.first() {
            Some(arg) if arg.starts_with('<') || arg.contains('@') => {
                let Ok(id) = MessageId::parse(arg) else {
                    return self.reply("430 No article with that message-id").await;
                };
                match self.store.lookup_message_id(&self.catalog, id) {
                    Ok(Some(located)) => {
                        // Number 0 when the article lives outside the
                        // currently selected group.
                        let n = if self.group.as_deref() == Some(located.group.as_str()) {
                            located.number
                        } else {
                            0
                        };
                        (n, id, located.path)
                    }
                    Ok(None) => {
                        return self.reply("430 No article with that message-id").await;
                    }
                    Err(err) => {
                        tracing::error!("message-id lookup: {err}");
                        self.reply("403 Internal fault").await?;
                        return match err {
                            StoreError::BrokenIndex { .. } => Err(io::Error::other(err)),
                            _ => Ok(()),
                        };
                    }
                }
            }
            Some(arg) => {
                let Ok(n) = arg.parse::<u64>() else {
                    return self.reply("501 Bad syntax").await;
                };
                let Some(group) = self.group.clone() else {
                    return self.reply("412 No newsgroup selected").await;
                };
                let Some(index) = self.open_read(&group).await? else {
                    return Ok(());
                };
                let Some(path) = index.article_path(n) else {
                    return self.reply("423 No article with that number").await;
                };
                self.number = Some(n);
                (n, index.entry(n).expect("live entry").message_id(), path)
            }
            None => {
                let Some(group) = self.group.clone() else {
                    return self.reply("412 No newsgroup selected").await;
                };
                let Some(current) = self.number else {
                    return self.reply("420 Current article number is invalid").await;
                };
                let Some(index) = self.open_read(&group).await? else {
                    return Ok(());
                };
                let Some(path) = index.article_path(current) else {
                    return self.reply("420 Current article number is invalid").await;
                };
                (
                    current,
                    index.entry(current).expect("live entry").message_id(),
                    path,
                )
            }
        };

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) => {
                tracing::error!("reading {}: {err}", path.display());
                return self.reply("403 Internal fault").await;
            }
        };

        self.reply(&format!("{code} {n} {id}")).await?;
        if verb == "STAT" {
            return Ok(());
        }
        let (head, body) = split_article(&text);
        match verb {
            "HEAD" => write_block(&mut self.writer, head).await,
            "BODY" => write_block(&mut self.writer, body).await,
            _ => write_block(&mut self.writer, text.lines()).await,
        }
    }

    async fn cmd_newgroups(&mut self, args: &[&str]) -> io::Result<()> {
        let since = match args {
            [date, time] | [date, time, _] => parse_datetime(date, time),
            _ => None,
        };
        let Some(since) = since else {
            return self.reply("501 Bad syntax").await;
        };

        let created = match self.store.creation_date() {
            Ok(created) => created,
            Err(err) => {
                tracing::error!("creation date: {err}");
                return self.reply("403 Internal fault").await;
            }
        };

        self.reply("231 List of new newsgroups follows").await?;
        let mut lines = Vec::new();
        let catalog = self.catalog.clone();
        if created >= since {
            for group in catalog.iter() {
                let Some(index) = self.open_read(&group.name).await? else {
                    continue;
                };
                lines.push(format!("{} {} {} y", group.name, index.max(), index.min()));
            }
        }
        write_block(&mut self.writer, lines).await
    }

    async fn cmd_newnews(&mut self, args: &[&str]) -> io::Result<()> {
        let (pattern, since) = match args {
            [pattern, date, time] | [pattern, date, time, _] => {
                (Pattern::parse(pattern), parse_datetime(date, time))
            }
            _ => return self.reply("501 Bad syntax").await,
        };
        let (Ok(pattern), Some(since)) = (pattern, since) else {
            return self.reply("501 Bad syntax").await;
        };

        self.reply("230 List of new articles follows").await?;
        let mut lines = Vec::new();
        let catalog = self.catalog.clone();
        for group in catalog.filtered(&pattern) {
            let Some(index) = self.open_read(&group.name).await? else {
                continue;
            };
            for n in index.scan(1, None) {
                if index.injected(n).is_some_and(|t| t >= since) {
                    lines.push(index.entry(n).expect("live entry").message_id().to_string());
                }
            }
        }
        write_block(&mut self.writer, lines).await
    }

    async fn cmd_list(&mut self, args: &[&str]) -> io::Result<()> {
        let keyword = args.first().map(|k| k.to_uppercase());
        let pattern = match args.get(1) {
            Some(text) => match Pattern::parse(text) {
                Ok(pattern) => Some(pattern),
                Err(_) => return self.reply("501 Bad syntax").await,
            },
            None => None,
        };
        if args.len() > 2 {
            return self.reply("501 Bad syntax").await;
        }

        match keyword.as_deref() {
            None | Some("ACTIVE") => {
                self.reply("215 Newsgroups follow").await?;
                let catalog = self.catalog.clone();
                let mut lines = Vec::new();
                for group in catalog.iter() {
                    if let Some(pattern) = &pattern
                        && !pattern.matches(&group.name)
                    {
                        continue;
                    }
                    let Some(index) = self.open_read(&group.name).await? else {
                        continue;
                    };
                    lines.push(format!("{} {} {} y", group.name, index.max(), index.min()));
                }
                write_block(&mut self.writer, lines).await
            }
            Some("NEWSGROUPS") => {
                self.reply("215 Newsgroup descriptions follow").await?;
                let lines: Vec<String> = self
                    .catalog
                    .iter()
                    .filter(|g| pattern.as_ref().is_none_or(|p| p.matches(&g.name)))
                    .map(|g| format!("{} {}", g.name, g.description))
                    .collect();
                write_block(&mut self.writer, lines).await
            }
            Some("OVERVIEW.FMT") if pattern.is_none() => {
                self.reply("215 Order of fields in overview database").await?;
                write_block(
                    &mut self.writer,
                    [
                        "Subject:",
                        "From:",
                        "Date:",
                        "Message-ID:",
                        "References:",
                        "Bytes:",
                        "Lines:",
                        "X-Stars:full",
                    ],
                )
                .await
            }
            _ => self.reply("501 Bad syntax").await,
        }
    }

    async fn cmd_over(&mut self, args: &[&str]) -> io::Result<()> {
        if args.len() > 1 {
            return self.reply("501 Bad syntax").await;
        }
        if args.first().is_some_and(|a| a.starts_with('<') || a.contains('@')) {
            return self.reply("503 Overview by message-id unsupported").await;
        }
        let Some(group) = self.group.clone() else {
            return self.reply("412 No newsgroup selected").await;
        };
        let range = match args.first() {
            Some(arg) => match parse_range(arg) {
                Some(range) => range,
                None => return self.reply("501 Bad syntax").await,
            },
            None => match self.number {
                Some(n) => (n, Some(n)),
                None => return self.reply("420 Current article number is invalid").await,
            },
        };

        let Some(index) = self.open_read(&group).await? else {
            return Ok(());
        };
        self.reply("224 Overview information follows").await?;
        let mut lines = Vec::new();
        for n in index.scan(range.0, range.1) {
            match index.overview(n) {
                Some(overview) => lines.push(overview.wire_line(n)),
                None => tracing::warn!("{group}: corrupt overview for {n}"),
            }
        }
        write_block(&mut self.writer, lines).await
    }

    async fn cmd_post(&mut self, reader: &mut BufReader<OwnedReadHalf>) -> io::Result<()> {
        self.reply("340 Send article; end with <CR-LF>.<CR-LF>").await?;
        let Some(article) = post::read_article(reader).await? else {
            // Connection dropped mid-article; the poster never runs.
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection lost during POST",
            ));
        };

        match post::run_poster(&self.config.postcmd, &article).await {
            Ok(verdict) if verdict.success => self.reply("240 Article posted at LOR").await,
            Ok(verdict) => {
                let reason = verdict.error.unwrap_or_else(|| "Something failed".to_string());
                self.reply(&format!("441 {reason}")).await
            }
            Err(err) => {
                tracing::error!("post command {:?}: {err}", self.config.postcmd);
                self.reply("441 Something failed").await
            }
        }
    }
}

/// `N`, `N-` and `N-M` ranges.
fn parse_range(arg: &str) -> Option<(u64, Option<u64>)> {
    match arg.split_once('-') {
        Some((lo, "")) => Some((lo.parse().ok()?, None)),
        Some((lo, hi)) => Some((lo.parse().ok()?, Some(hi.parse().ok()?))),
        None => {
            let n = arg.parse().ok()?;
            Some((n, Some(n)))
        }
    }
}

/// `yymmdd` (or `yyyymmdd`) plus `hhmmss`, interpreted as UTC. Two-digit
/// years 00-69 land in the 2000s, 70-99 in the 1900s.
fn parse_datetime(date: &str, time: &str) -> Option<DateTime<Utc>> {
    if !date.bytes().all(|b| b.is_ascii_digit()) || time.len() != 6 {
        return None;
    }
    let (year, rest) = match date.len() {
        6 => {
            let yy: i32 = date[..2].parse().ok()?;
            let year = if yy < 70 { 2000 + yy } else { 1900 + yy };
            (year, &date[2..])
        }
        8 => (date[..4].parse().ok()?, &date[4..]),
        _ => return None,
    };
    let month: u32 = rest[..2].parse().ok()?;
    let day: u32 = rest[2..].parse().ok()?;
    let hour: u32 = time[..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    let second: u32 = time[4..].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(date.and_time(time).and_utc())
}
