//! Overview records: the tab-separated article summary served by `OVER`
//! without opening the article file.
//!
//! Storage order: subject, from, date, message-id, references, stars
//! (`X-Stars: …` or empty), byte length of the encoded article, body line
//! count. Header fields are stored MIME-encoded; [`Overview::wire_line`]
//! decodes them and re-orders to the OVERVIEW.FMT wire layout.

use crate::article::Article;
use crate::encoded::decode_header;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overview {
    pub subject: String,
    pub from: String,
    pub date: String,
    pub message_id: String,
    pub references: String,
    pub stars: String,
    pub bytes: u64,
    pub lines: u64,
}

impl Overview {
    pub fn from_article(article: &Article) -> Self {
        let header = |name: &str| article.header(name).unwrap_or("").to_string();
        Self {
            subject: header("Subject"),
            from: header("From"),
            date: header("Date"),
            message_id: header("Message-ID"),
            references: header("References"),
            stars: header("X-Stars"),
            bytes: article.to_text().len() as u64,
            lines: article.body_line_count(),
        }
    }

    pub fn to_record(&self) -> String {
        let stars = if self.stars.is_empty() {
            String::new()
        } else {
            format!("X-Stars: {}", self.stars)
        };
        [
            &self.subject,
            &self.from,
            &self.date,
            &self.message_id,
            &self.references,
            &stars,
            &self.bytes.to_string(),
            &self.lines.to_string(),
        ]
        .map(|field| field.replace('\t', " "))
        .join("\t")
    }

    pub fn parse_record(record: &str) -> Result<Self, StoreError> {
        let fields: Vec<&str> = record.split('\t').collect();
        if fields.len() != 8 {
            return Err(StoreError::BadOverview(record.to_string()));
        }
        let stars = fields[5]
            .strip_prefix("X-Stars: ")
            .unwrap_or(fields[5])
            .to_string();
        Ok(Self {
            subject: fields[0].to_string(),
            from: fields[1].to_string(),
            date: fields[2].to_string(),
            message_id: fields[3].to_string(),
            references: fields[4].to_string(),
            stars,
            bytes: fields[6]
                .parse()
                .map_err(|_| StoreError::BadOverview(record.to_string()))?,
            lines: fields[7]
                .parse()
                .map_err(|_| StoreError::BadOverview(record.to_string()))?,
        })
    }

    /// One `OVER` response line for article number `n`, decoded, in
    /// OVERVIEW.FMT order: subject, from, date, message-id, references,
    /// bytes, lines, full `X-Stars` metadata field.
    pub fn wire_line(&self, n: u64) -> String {
        let stars = if self.stars.is_empty() {
            String::new()
        } else {
            format!("X-Stars: {}", self.stars)
        };
        format!(
            "{n}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{stars}",
            decode_header(&self.subject),
            decode_header(&self.from),
            self.date,
            self.message_id,
            self.references,
            self.bytes,
            self.lines,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoded::encode_header;

    fn sample_article() -> Article {
        Article::new(
            vec![
                ("Subject".into(), encode_header("тема")),
                ("From".into(), "user <user@linux.org.ru>".into()),
                ("Date".into(), "Sun, 12 May 2024 10:11:12 +0000".into()),
                ("Message-ID".into(), "<lor12345.678@linux.org.ru>".into()),
                ("References".into(), "<lor12345@linux.org.ru>".into()),
                ("X-Stars".into(), "**".into()),
            ],
            "body line\n".into(),
        )
    }

    #[test]
    fn record_roundtrip() {
        let overview = Overview::from_article(&sample_article());
        let record = overview.to_record();
        let parsed = Overview::parse_record(&record).expect("parse");
        assert_eq!(parsed, overview);
    }

    #[test]
    fn record_regenerates_identically_from_article_text() {
        let article = sample_article();
        let stored = Overview::from_article(&article).to_record();
        let reparsed = Article::parse(&article.to_text()).expect("parse");
        assert_eq!(Overview::from_article(&reparsed).to_record(), stored);
    }

    #[test]
    fn empty_stars_field_stays_empty() {
        let article = Article::new(
            vec![
                ("Subject".into(), "s".into()),
                ("From".into(), "f".into()),
                ("Date".into(), "d".into()),
                ("Message-ID".into(), "<lor1@linux.org.ru>".into()),
            ],
            String::new(),
        );
        let record = Overview::from_article(&article).to_record();
        let fields: Vec<&str> = record.split('\t').collect();
        assert_eq!(fields[4], "");
        assert_eq!(fields[5], "");
    }

    #[test]
    fn wire_line_decodes_and_reorders() {
        let overview = Overview::from_article(&sample_article());
        let line = overview.wire_line(7);
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields[0], "7");
        assert_eq!(fields[1], "тема");
        assert_eq!(fields[4], "<lor12345.678@linux.org.ru>");
        assert_eq!(fields[6], overview.bytes.to_string().as_str());
        assert_eq!(fields[8], "X-Stars: **");
    }

    #[test]
    fn tabs_in_headers_are_flattened() {
        let article = Article::new(
            vec![
                ("Subject".into(), "a\tb".into()),
                ("From".into(), "f".into()),
                ("Date".into(), "d".into()),
                ("Message-ID".into(), "<lor1@linux.org.ru>".into()),
            ],
            String::new(),
        );
        let record = Overview::from_article(&article).to_record();
        assert_eq!(record.split('\t').count(), 8);
    }

    #[test]
    fn parse_rejects_short_records() {
        assert!(Overview::parse_record("a\tb\tc").is_err());
        assert!(Overview::parse_record("a\tb\tc\td\te\tf\tx\t1").is_err());
    }
}
