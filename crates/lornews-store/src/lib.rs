//! The on-disk article store shared by `lord`, `lorpull` and `lorpost`.
//!
//! Rooted at `~/.lornews`:
//!
//! ```text
//! <root>/groups                    newsgroup catalog
//! <root>/cdate                     creation date (YYYYMMDDhhmmss, UTC)
//! <root>/users/<nick>/passwd       cleartext password
//! <root>/users/<nick>/cookies      persistent cookie jar
//! <root>/news/<g1>/<g2>/.../index  per-group index (dot-split group name)
//! <root>/news/<g1>/.../<T>/<N>     article files (N=0 is the topic body)
//! ```

pub mod article;
pub mod catalog;
pub mod encoded;
mod error;
pub mod index;
pub mod overview;
pub mod pattern;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

pub use crate::article::{Article, MessageId};
pub use crate::catalog::{Catalog, Newsgroup};
pub use crate::error::StoreError;
pub use crate::index::{IndexHandle, OpenMode};
pub use crate::overview::Overview;
pub use crate::pattern::Pattern;

pub const STORE_DIR: &str = ".lornews";

/// A located article: which group holds it, at which local number, and where
/// the file lives.
#[derive(Debug, Clone)]
pub struct Located {
    pub group: String,
    pub number: u64,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Open the store under `$HOME/.lornews`. A missing `HOME` is a fatal
    /// configuration error.
    pub fn from_home() -> Result<Self, StoreError> {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .ok_or(StoreError::NoHome)?;
        Self::open(home.join(STORE_DIR))
    }

    /// Open a store at an explicit root, creating the directory skeleton and
    /// the creation-date record on first use.
    pub fn open(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.join("news"))?;
        std::fs::create_dir_all(root.join("users"))?;
        let cdate = root.join("cdate");
        if !cdate.exists() {
            catalog::write_creation_date(&cdate, Utc::now())?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> Result<Catalog, StoreError> {
        Catalog::load(&self.root.join("groups"))
    }

    pub fn creation_date(&self) -> Result<DateTime<Utc>, StoreError> {
        catalog::read_creation_date(&self.root.join("cdate"))
    }

    /// The group's article directory: the dot-split group name under `news/`.
    pub fn group_dir(&self, group: &str) -> PathBuf {
        let mut dir = self.root.join("news");
        for part in group.split('.') {
            dir.push(part);
        }
        dir
    }

    pub fn user_dir(&self, nick: &str) -> PathBuf {
        self.root.join("users").join(nick)
    }

    pub fn cookies_path(&self, nick: &str) -> PathBuf {
        self.user_dir(nick).join("cookies")
    }

    pub fn password(&self, nick: &str) -> Result<String, StoreError> {
        let path = self.user_dir(nick).join("passwd");
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(text.trim_end().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NoPassword(nick.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn open_index(&self, group: &str, mode: OpenMode) -> Result<IndexHandle, StoreError> {
        IndexHandle::open(self.group_dir(group), group, mode)
    }

    /// Find an article by message-id: scan each catalog group's index for the
    /// exact `{topic}/{comment}` location and return the first hit.
    pub fn lookup_message_id(
        &self,
        catalog: &Catalog,
        id: MessageId,
    ) -> Result<Option<Located>, StoreError> {
        for group in catalog.iter() {
            let handle = self.open_index(&group.name, OpenMode::Read)?;
            if let Some(number) = handle.find_location(id.topic, id.comment) {
                let path = handle.article_path(number).expect("live article path");
                return Ok(Some(Located {
                    group: group.name.clone(),
                    number,
                    path,
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_catalog(catalog: &str) -> (tempfile::TempDir, Store) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("lornews")).expect("open");
        std::fs::write(store.root().join("groups"), catalog).expect("catalog");
        (tmp, store)
    }

    fn article_for(group: &str, id: MessageId) -> Article {
        Article::new(
            vec![
                ("Newsgroups".into(), group.into()),
                ("Subject".into(), "s".into()),
                ("From".into(), "user <user@linux.org.ru>".into()),
                ("Date".into(), "Sun, 12 May 2024 10:11:12 +0000".into()),
                ("Message-ID".into(), id.to_string()),
            ],
            "body\n".into(),
        )
    }

    #[test]
    fn open_creates_skeleton_and_cdate() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("lornews")).expect("open");
        assert!(store.root().join("news").is_dir());
        assert!(store.root().join("users").is_dir());
        store.creation_date().expect("creation date");
    }

    #[test]
    fn group_dir_splits_on_dots() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("lornews")).expect("open");
        assert_eq!(
            store.group_dir("lor.forum.talks"),
            store.root().join("news").join("lor").join("forum").join("talks")
        );
    }

    #[test]
    fn password_reads_and_reports_missing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("lornews")).expect("open");
        assert!(matches!(
            store.password("nobody"),
            Err(StoreError::NoPassword(_))
        ));

        let dir = store.user_dir("vasya");
        std::fs::create_dir_all(&dir).expect("user dir");
        std::fs::write(dir.join("passwd"), "secret\n").expect("passwd");
        assert_eq!(store.password("vasya").expect("password"), "secret");
    }

    #[test]
    fn lookup_message_id_agrees_with_append() {
        let (_tmp, store) =
            store_with_catalog("lor.one 1 One\nlor.two 2 Two\n");
        let catalog = store.catalog().expect("catalog");

        let mut two = store.open_index("lor.two", OpenMode::Create).expect("open");
        let id = MessageId::comment(555, 7);
        let n = two
            .append_article(&article_for("lor.two", id))
            .expect("append");
        drop(two);

        let located = store
            .lookup_message_id(&catalog, id)
            .expect("lookup")
            .expect("found");
        assert_eq!(located.group, "lor.two");
        assert_eq!(located.number, n);
        assert!(located.path.ends_with("two/555/7"));

        assert!(store
            .lookup_message_id(&catalog, MessageId::topic(99999))
            .expect("lookup")
            .is_none());
    }
}
