//! Wildmat-style newsgroup patterns ([RFC 3977 §4](https://datatracker.ietf.org/doc/html/rfc3977#section-4)).
//!
//! A pattern is a comma-separated list of glob items. An item may be negated
//! with a leading `!`; `*` matches any run of characters and `?` exactly one.
//! Items are tried in order and the first whose glob matches the group name
//! decides the outcome.

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct Pattern {
    items: Vec<PatternItem>,
}

#[derive(Debug, Clone)]
struct PatternItem {
    negated: bool,
    glob: String,
}

impl Pattern {
    /// Parse a pattern, rejecting characters that can never occur in a group
    /// name (whitespace, brackets, backslashes) and empty items.
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        let mut items = Vec::new();
        for raw in text.split(',') {
            let (negated, glob) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            if glob.is_empty() {
                return Err(StoreError::BadPattern(text.to_string()));
            }
            if glob
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '[' | ']' | '\\' | ','))
            {
                return Err(StoreError::BadPattern(text.to_string()));
            }
            items.push(PatternItem {
                negated,
                glob: glob.to_string(),
            });
        }
        Ok(Self { items })
    }

    /// A pattern matching every group.
    pub fn all() -> Self {
        Self {
            items: vec![PatternItem {
                negated: false,
                glob: "*".to_string(),
            }],
        }
    }

    pub fn matches(&self, group: &str) -> bool {
        for item in &self.items {
            if glob_match(&item.glob, group) {
                return !item.negated;
            }
        }
        false
    }
}

/// Iterative glob match with `*` backtracking.
fn glob_match(glob: &str, text: &str) -> bool {
    let glob: Vec<char> = glob.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut g, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if g < glob.len() && (glob[g] == '?' || glob[g] == text[t]) {
            g += 1;
            t += 1;
        } else if g < glob.len() && glob[g] == '*' {
            star = Some((g, t));
            g += 1;
        } else if let Some((sg, st)) = star {
            g = sg + 1;
            t = st + 1;
            star = Some((sg, st + 1));
        } else {
            return false;
        }
    }
    while g < glob.len() && glob[g] == '*' {
        g += 1;
    }
    g == glob.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_item_matches_exactly() {
        let p = Pattern::parse("lor.talks").expect("parse");
        assert!(p.matches("lor.talks"));
        assert!(!p.matches("lor.talks.misc"));
    }

    #[test]
    fn star_spans_dots() {
        let p = Pattern::parse("lor.*").expect("parse");
        assert!(p.matches("lor.talks"));
        assert!(p.matches("lor.forum.general"));
        assert!(!p.matches("ru.talks"));
    }

    #[test]
    fn question_mark_matches_one_char() {
        let p = Pattern::parse("lor.talk?").expect("parse");
        assert!(p.matches("lor.talks"));
        assert!(!p.matches("lor.talk"));
        assert!(!p.matches("lor.talkss"));
    }

    #[test]
    fn first_matching_item_wins() {
        let p = Pattern::parse("!lor.talks,lor.*").expect("parse");
        assert!(!p.matches("lor.talks"));
        assert!(p.matches("lor.forum"));

        let p = Pattern::parse("lor.talks,!lor.*").expect("parse");
        assert!(p.matches("lor.talks"));
        assert!(!p.matches("lor.forum"));
    }

    #[test]
    fn unmatched_group_is_rejected() {
        let p = Pattern::parse("!lor.talks").expect("parse");
        assert!(!p.matches("lor.forum"));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        assert!(Pattern::parse("").is_err());
        assert!(Pattern::parse("a,,b").is_err());
        assert!(Pattern::parse("lor.[talks]").is_err());
        assert!(Pattern::parse("lor talks").is_err());
        assert!(Pattern::parse("lor\\talks").is_err());
    }

    #[test]
    fn all_matches_everything() {
        assert!(Pattern::all().matches("lor.talks"));
    }

    #[test]
    fn trailing_stars_collapse() {
        let p = Pattern::parse("lor.talks**").expect("parse");
        assert!(p.matches("lor.talks"));
    }
}
