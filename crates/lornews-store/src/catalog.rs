//! Newsgroup catalog and creation-date record.
//!
//! The catalog is authoritative: only groups listed in `<root>/groups` exist.
//! One line per group, `<name> <forum-id> <description>`.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::StoreError;
use crate::pattern::Pattern;

#[derive(Debug, Clone)]
pub struct Newsgroup {
    pub name: String,
    pub forum_id: u32,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    groups: Vec<Newsgroup>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::CatalogNotFound(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, StoreError> {
        let mut groups = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(3, char::is_whitespace);
            let name = parts.next().unwrap_or("");
            let id = parts.next().ok_or_else(|| StoreError::CatalogSyntax {
                line: line_num + 1,
                message: "expected <name> <id> <description>".into(),
            })?;
            let description = parts.next().unwrap_or("").trim().to_string();

            if !valid_group_name(name) {
                return Err(StoreError::CatalogSyntax {
                    line: line_num + 1,
                    message: format!("invalid group name: {name}"),
                });
            }
            let forum_id: u32 = id.parse().map_err(|_| StoreError::CatalogSyntax {
                line: line_num + 1,
                message: format!("invalid group id: {id}"),
            })?;

            groups.push(Newsgroup {
                name: name.to_string(),
                forum_id,
                description,
            });
        }
        Ok(Self { groups })
    }

    pub fn get(&self, name: &str) -> Option<&Newsgroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Newsgroup> {
        self.groups.iter()
    }

    pub fn filtered<'a>(&'a self, pattern: &'a Pattern) -> impl Iterator<Item = &'a Newsgroup> {
        self.groups.iter().filter(|g| pattern.matches(&g.name))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group names exclude whitespace, commas, brackets, backslashes and the
/// wildcard characters, so every catalog name is a literal pattern item.
fn valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| {
            !c.is_whitespace() && !matches!(c, ',' | '[' | ']' | '\\' | '/' | '*' | '?')
        })
}

const CDATE_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn read_creation_date(path: &Path) -> Result<DateTime<Utc>, StoreError> {
    let raw = std::fs::read_to_string(path)?;
    parse_creation_date(raw.trim())
}

pub fn parse_creation_date(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(raw, CDATE_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|_| StoreError::BadCreationDate(raw.to_string()))
}

pub fn write_creation_date(path: &Path, when: DateTime<Utc>) -> Result<(), StoreError> {
    std::fs::write(path, format!("{}\n", when.format(CDATE_FORMAT)))?;
    Ok(())
}
