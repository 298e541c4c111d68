//! Per-group article index.
//!
//! One typed index file per group, colocated with the group's article tree
//! and guarded by an exclusive advisory lock on `index.lock`. The lock is
//! taken before the index file is read and held for the lifetime of the
//! handle; invariants are re-validated on every open. Readers and writers
//! use the same lock.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::article::{Article, MessageId};
use crate::error::StoreError;
use crate::overview::Overview;

pub const INDEX_FILE: &str = "index";
pub const LOCK_FILE: &str = "index.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; a group with no pulled data yet reads as empty.
    Read,
    /// Read/write; the index must already exist.
    Write,
    /// Read/write; the group directory and index are created when missing.
    Create,
}

/// The typed successor of the original four key families: `articles` carries
/// the number→location, injection-time and overview records, `topics` the
/// per-topic live counters.
#[derive(Debug, Serialize, Deserialize)]
struct GroupIndex {
    count: u64,
    min: u64,
    max: u64,
    articles: BTreeMap<u64, IndexEntry>,
    topics: HashMap<u64, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub topic: u64,
    pub comment: u64,
    pub injected: i64,
    pub overview: String,
}

impl IndexEntry {
    pub fn message_id(&self) -> MessageId {
        MessageId {
            topic: self.topic,
            comment: self.comment,
        }
    }
}

impl GroupIndex {
    fn fresh() -> Self {
        Self {
            count: 0,
            min: 1,
            max: 0,
            articles: BTreeMap::new(),
            topics: HashMap::new(),
        }
    }

    fn validate(&self, group_dir: &Path) -> Result<(), StoreError> {
        let broken = |message: String| StoreError::BrokenIndex {
            group: group_dir.to_path_buf(),
            message,
        };
        if self.count as usize != self.articles.len() {
            return Err(broken(format!(
                "count {} does not match {} live entries",
                self.count,
                self.articles.len()
            )));
        }
        if self.count == 0 {
            if self.min != self.max + 1 {
                return Err(broken(format!(
                    "empty group must have min == max+1, got min {} max {}",
                    self.min, self.max
                )));
            }
        } else {
            if self.min == 0 || self.min > self.max {
                return Err(broken(format!("min {} out of range", self.min)));
            }
            if self.max - self.min + 1 < self.count {
                return Err(broken(format!(
                    "window [{}, {}] too small for {} articles",
                    self.min, self.max, self.count
                )));
            }
            if let Some((&lo, _)) = self.articles.first_key_value()
                && lo < self.min
            {
                return Err(broken(format!("live number {lo} below min {}", self.min)));
            }
            if let Some((&hi, _)) = self.articles.last_key_value()
                && hi > self.max
            {
                return Err(broken(format!("live number {hi} above max {}", self.max)));
            }
        }
        let topic_total: u64 = self.topics.values().sum();
        if topic_total != self.count {
            return Err(broken(format!(
                "stale topic counters: {} vs {} articles",
                topic_total, self.count
            )));
        }
        Ok(())
    }
}

/// A locked handle to one group's index and article files.
#[derive(Debug)]
pub struct IndexHandle {
    group: String,
    dir: PathBuf,
    index: GroupIndex,
    _lock: Option<File>,
    writable: bool,
}

impl IndexHandle {
    pub fn open(dir: PathBuf, group: &str, mode: OpenMode) -> Result<Self, StoreError> {
        if !dir.exists() {
            match mode {
                OpenMode::Read => {
                    return Ok(Self {
                        group: group.to_string(),
                        dir,
                        index: GroupIndex::fresh(),
                        _lock: None,
                        writable: false,
                    });
                }
                OpenMode::Write => return Err(StoreError::NoIndex(group.to_string())),
                OpenMode::Create => fs::create_dir_all(&dir)?,
            }
        }

        let lock = acquire_lock(&dir)?;
        let index_path = dir.join(INDEX_FILE);
        let index = match fs::read(&index_path) {
            Ok(data) => serde_json::from_slice(&data).map_err(|err| StoreError::BrokenIndex {
                group: dir.clone(),
                message: err.to_string(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => match mode {
                OpenMode::Write => return Err(StoreError::NoIndex(group.to_string())),
                OpenMode::Read | OpenMode::Create => GroupIndex::fresh(),
            },
            Err(err) => return Err(err.into()),
        };
        index.validate(&dir)?;

        Ok(Self {
            group: group.to_string(),
            dir,
            index,
            _lock: Some(lock),
            writable: !matches!(mode, OpenMode::Read),
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn count(&self) -> u64 {
        self.index.count
    }

    pub fn min(&self) -> u64 {
        self.index.min
    }

    pub fn max(&self) -> u64 {
        self.index.max
    }

    pub fn is_empty(&self) -> bool {
        self.index.count == 0
    }

    pub fn entry(&self, n: u64) -> Option<&IndexEntry> {
        self.index.articles.get(&n)
    }

    pub fn overview(&self, n: u64) -> Option<Overview> {
        let entry = self.entry(n)?;
        Overview::parse_record(&entry.overview).ok()
    }

    pub fn injected(&self, n: u64) -> Option<DateTime<Utc>> {
        let entry = self.entry(n)?;
        DateTime::from_timestamp(entry.injected, 0)
    }

    pub fn topic_count(&self, topic: u64) -> u64 {
        self.index.topics.get(&topic).copied().unwrap_or(0)
    }

    pub fn has_comment(&self, topic: u64, comment: u64) -> bool {
        self.index
            .articles
            .values()
            .any(|e| e.topic == topic && e.comment == comment)
    }

    /// Live numbers within `[lo, hi]` (unbounded above when `hi` is `None`).
    pub fn scan(&self, lo: u64, hi: Option<u64>) -> Vec<u64> {
        let hi = hi.unwrap_or(u64::MAX);
        self.index.articles.range(lo..=hi).map(|(&n, _)| n).collect()
    }

    pub fn next_after(&self, n: u64) -> Option<u64> {
        self.index.articles.range(n + 1..).next().map(|(&n, _)| n)
    }

    pub fn prev_before(&self, n: u64) -> Option<u64> {
        self.index.articles.range(..n).next_back().map(|(&n, _)| n)
    }

    /// Local number of the article at `{topic}/{comment}`, if live.
    pub fn find_location(&self, topic: u64, comment: u64) -> Option<u64> {
        self.index
            .articles
            .iter()
            .find(|(_, e)| e.topic == topic && e.comment == comment)
            .map(|(&n, _)| n)
    }

    pub fn article_path(&self, n: u64) -> Option<PathBuf> {
        let entry = self.entry(n)?;
        Some(
            self.dir
                .join(entry.topic.to_string())
                .join(entry.comment.to_string()),
        )
    }

    pub fn append_article(&mut self, article: &Article) -> Result<u64, StoreError> {
        self.append_article_at(article, Utc::now())
    }

    /// Append within a single locked section: write the article file, assign
    /// `max + 1`, record location, injection time and overview, and bump the
    /// per-topic counter.
    pub fn append_article_at(
        &mut self,
        article: &Article,
        injected: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly(self.group.clone()));
        }
        let id = article.message_id()?;

        let topic_dir = self.dir.join(id.topic.to_string());
        fs::create_dir_all(&topic_dir)?;
        fs::write(topic_dir.join(id.comment.to_string()), article.to_text())?;

        let n = self.index.max + 1;
        self.index.articles.insert(
            n,
            IndexEntry {
                topic: id.topic,
                comment: id.comment,
                injected: injected.timestamp(),
                overview: Overview::from_article(article).to_record(),
            },
        );
        self.index.max = n;
        self.index.count += 1;
        *self.index.topics.entry(id.topic).or_insert(0) += 1;
        self.save()?;
        Ok(n)
    }

    /// Expire articles older than `cutoff` (every article when `cutoff` is
    /// `None`), walking live numbers upward from `min` and stopping at the
    /// first survivor. Article-file removal failures are warnings. `min`
    /// ends one past the last deleted number, possibly `max + 1`.
    pub fn expire(&mut self, cutoff: Option<DateTime<Utc>>) -> Result<u64, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly(self.group.clone()));
        }
        let cutoff = cutoff.map(|t| t.timestamp());
        let mut deleted = 0u64;
        let mut last_deleted = None;

        let live: Vec<u64> = self.index.articles.keys().copied().collect();
        for n in live {
            let entry = &self.index.articles[&n];
            if let Some(cutoff) = cutoff
                && entry.injected >= cutoff
            {
                break;
            }
            let entry = self.index.articles.remove(&n).expect("live entry");
            let topic_dir = self.dir.join(entry.topic.to_string());
            let path = topic_dir.join(entry.comment.to_string());
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!("removing {}: {err}", path.display());
            }

            self.index.count -= 1;
            match self.index.topics.get_mut(&entry.topic) {
                Some(counter) if *counter > 1 => *counter -= 1,
                _ => {
                    self.index.topics.remove(&entry.topic);
                    if let Err(err) = fs::remove_dir(&topic_dir) {
                        if err.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!("removing {}: {err}", topic_dir.display());
                        }
                    }
                }
            }
            deleted += 1;
            last_deleted = Some(n);
        }

        if let Some(last) = last_deleted {
            self.index.min = last + 1;
            self.save()?;
        }
        Ok(deleted)
    }

    fn save(&self) -> Result<(), StoreError> {
        let data = serde_json::to_vec(&self.index)?;
        atomic_write(&self.dir.join(INDEX_FILE), &data)?;
        Ok(())
    }
}

fn acquire_lock(dir: &Path) -> Result<File, StoreError> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    lock.lock_exclusive()?;
    Ok(lock)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn topic_article(topic: u64) -> Article {
        Article::new(
            vec![
                ("Newsgroups".into(), "lor.test".into()),
                ("Subject".into(), format!("topic {topic}")),
                ("From".into(), "user <user@linux.org.ru>".into()),
                ("Date".into(), "Sun, 12 May 2024 10:11:12 +0000".into()),
                ("Message-ID".into(), MessageId::topic(topic).to_string()),
            ],
            "topic body\n".into(),
        )
    }

    fn comment_article(topic: u64, comment: u64) -> Article {
        Article::new(
            vec![
                ("Newsgroups".into(), "lor.test".into()),
                ("Subject".into(), format!("Re: topic {topic}")),
                ("From".into(), "user <user@linux.org.ru>".into()),
                ("Date".into(), "Sun, 12 May 2024 10:12:12 +0000".into()),
                (
                    "Message-ID".into(),
                    MessageId::comment(topic, comment).to_string(),
                ),
                ("References".into(), MessageId::topic(topic).to_string()),
            ],
            "comment body\n".into(),
        )
    }

    fn open_create(dir: &TempDir) -> IndexHandle {
        IndexHandle::open(dir.path().join("group"), "lor.test", OpenMode::Create).expect("open")
    }

    #[test]
    fn fresh_index_reads_as_empty() {
        let tmp = TempDir::new().expect("tempdir");
        let handle =
            IndexHandle::open(tmp.path().join("group"), "lor.test", OpenMode::Read).expect("open");
        assert_eq!(handle.count(), 0);
        assert_eq!(handle.min(), 1);
        assert_eq!(handle.max(), 0);
    }

    #[test]
    fn write_mode_requires_existing_index() {
        let tmp = TempDir::new().expect("tempdir");
        let err = IndexHandle::open(tmp.path().join("group"), "lor.test", OpenMode::Write)
            .expect_err("should fail");
        assert!(matches!(err, StoreError::NoIndex(_)));
    }

    #[test]
    fn append_assigns_monotone_numbers_and_writes_files() {
        let tmp = TempDir::new().expect("tempdir");
        let mut handle = open_create(&tmp);

        let n1 = handle.append_article(&topic_article(12345)).expect("append");
        let n2 = handle
            .append_article(&comment_article(12345, 678))
            .expect("append");
        assert_eq!((n1, n2), (1, 2));
        assert_eq!(handle.count(), 2);
        assert_eq!(handle.min(), 1);
        assert_eq!(handle.max(), 2);
        assert_eq!(handle.topic_count(12345), 2);
        assert!(handle.has_comment(12345, 678));

        let path = handle.article_path(2).expect("path");
        let text = fs::read_to_string(path).expect("read article");
        assert!(text.contains("<lor12345.678@linux.org.ru>"));
    }

    #[test]
    fn reopen_revalidates_and_preserves_state() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let mut handle = open_create(&tmp);
            handle.append_article(&topic_article(1)).expect("append");
        }
        let handle =
            IndexHandle::open(tmp.path().join("group"), "lor.test", OpenMode::Read).expect("open");
        assert_eq!(handle.count(), 1);
        assert_eq!(handle.find_location(1, 0), Some(1));
    }

    #[test]
    fn corrupt_counters_are_fatal_on_open() {
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("group");
        {
            let mut handle = open_create(&tmp);
            handle.append_article(&topic_article(1)).expect("append");
        }
        let index_path = dir.join(INDEX_FILE);
        let data = fs::read_to_string(&index_path).expect("read");
        fs::write(&index_path, data.replace("\"count\":1", "\"count\":7")).expect("write");

        let err = IndexHandle::open(dir, "lor.test", OpenMode::Read).expect_err("broken");
        assert!(matches!(err, StoreError::BrokenIndex { .. }));
    }

    #[test]
    fn expire_preserves_numbering_and_advances_min() {
        let tmp = TempDir::new().expect("tempdir");
        let mut handle = open_create(&tmp);
        let old = Utc::now() - Duration::days(30);

        for topic in 1..=3u64 {
            handle
                .append_article_at(&topic_article(topic), old)
                .expect("append");
        }
        for topic in 4..=5u64 {
            handle
                .append_article(&topic_article(topic))
                .expect("append");
        }

        let cutoff = Utc::now() - Duration::days(7);
        let deleted = handle.expire(Some(cutoff)).expect("expire");
        assert_eq!(deleted, 3);
        assert_eq!(handle.count(), 2);
        assert_eq!(handle.min(), 4);
        assert_eq!(handle.max(), 5);
        assert_eq!(handle.scan(1, None), vec![4, 5]);

        let n = handle.append_article(&topic_article(6)).expect("append");
        assert_eq!(n, 6);
    }

    #[test]
    fn expire_all_leaves_min_past_max() {
        let tmp = TempDir::new().expect("tempdir");
        let mut handle = open_create(&tmp);
        handle.append_article(&topic_article(1)).expect("append");
        handle
            .append_article(&comment_article(1, 2))
            .expect("append");

        let deleted = handle.expire(None).expect("expire all");
        assert_eq!(deleted, 2);
        assert_eq!(handle.count(), 0);
        assert_eq!(handle.min(), handle.max() + 1);
        assert_eq!(handle.topic_count(1), 0);
        assert!(!tmp.path().join("group").join("1").exists());
    }

    #[test]
    fn expire_stops_at_first_survivor() {
        let tmp = TempDir::new().expect("tempdir");
        let mut handle = open_create(&tmp);
        let old = Utc::now() - Duration::days(30);

        handle
            .append_article_at(&topic_article(1), old)
            .expect("append");
        handle.append_article(&topic_article(2)).expect("append");
        // Older than the cutoff but shielded by the newer article before it.
        handle
            .append_article_at(&topic_article(3), old)
            .expect("append");

        let cutoff = Utc::now() - Duration::days(7);
        assert_eq!(handle.expire(Some(cutoff)).expect("expire"), 1);
        assert_eq!(handle.scan(1, None), vec![2, 3]);
        assert_eq!(handle.min(), 2);
    }

    #[test]
    fn invariants_hold_across_interleaved_append_and_expire() {
        let tmp = TempDir::new().expect("tempdir");
        let mut handle = open_create(&tmp);
        let old = Utc::now() - Duration::days(30);
        let cutoff = Utc::now() - Duration::days(7);
        let mut next_topic = 1u64;

        for round in 0..5 {
            for _ in 0..=round {
                handle
                    .append_article_at(&topic_article(next_topic), old)
                    .expect("append");
                next_topic += 1;
            }
            handle.expire(Some(cutoff)).expect("expire");

            let live = handle.scan(1, None);
            assert_eq!(handle.count() as usize, live.len());
            if handle.count() == 0 {
                assert_eq!(handle.min(), handle.max() + 1);
            } else {
                assert!(handle.max() - handle.min() + 1 >= handle.count());
            }
        }
        // Numbers were never reused: the next append continues past max.
        let n = handle.append_article(&topic_article(next_topic)).expect("append");
        assert_eq!(n, 16);
    }

    #[test]
    fn navigation_walks_live_numbers_only() {
        let tmp = TempDir::new().expect("tempdir");
        let mut handle = open_create(&tmp);
        let old = Utc::now() - Duration::days(30);
        handle
            .append_article_at(&topic_article(1), old)
            .expect("append");
        handle.append_article(&topic_article(2)).expect("append");
        handle.append_article(&topic_article(3)).expect("append");
        handle.expire(Some(Utc::now() - Duration::days(7))).expect("expire");

        assert_eq!(handle.next_after(2), Some(3));
        assert_eq!(handle.prev_before(3), Some(2));
        assert_eq!(handle.prev_before(2), None);
        assert_eq!(handle.next_after(3), None);
    }

    #[test]
    fn read_only_handle_rejects_writes() {
        let tmp = TempDir::new().expect("tempdir");
        {
            let mut handle = open_create(&tmp);
            handle.append_article(&topic_article(1)).expect("append");
        }
        let mut handle =
            IndexHandle::open(tmp.path().join("group"), "lor.test", OpenMode::Read).expect("open");
        assert!(matches!(
            handle.append_article(&topic_article(2)),
            Err(StoreError::ReadOnly(_))
        ));
        assert!(matches!(handle.expire(None), Err(StoreError::ReadOnly(_))));
    }

    #[test]
    fn overview_record_matches_article_file() {
        let tmp = TempDir::new().expect("tempdir");
        let mut handle = open_create(&tmp);
        let article = topic_article(7);
        let n = handle.append_article(&article).expect("append");

        let stored = handle.entry(n).expect("entry").overview.clone();
        let from_file = Article::parse(
            &fs::read_to_string(handle.article_path(n).expect("path")).expect("read"),
        )
        .expect("parse");
        assert_eq!(Overview::from_article(&from_file).to_record(), stored);
    }
}
