//! Normalizes raw front matter into a [`PostMetadata`] record.
//!
//! Every field has a default, so normalization never fails: a missing title
//! falls back to the file stem, tags may be a list or a delimited string, and
//! a missing or malformed date falls back to the file's modification time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_yaml::{Mapping, Value};

/// Front matter keys consulted, in order, for the effective date. The first
/// key that is present wins even if its value turns out to be malformed.
const DATE_KEYS: [&str; 3] = ["date", "date created", "date modified"];

/// The normalized metadata for one source document.
#[derive(Clone, Debug, PartialEq)]
pub struct PostMetadata {
    /// The title of the post, or the file stem if the front matter has none.
    pub title: String,

    /// The date used for sorting and for the `<year>/<month>` path prefix.
    pub date: DateTime<Utc>,

    /// `true` if a date key was present but its value couldn't be parsed.
    /// Such posts are left out of the year-grouped archive.
    pub date_malformed: bool,

    /// The creation date shown on the post page (`date created`, else `date`,
    /// else the effective date).
    pub created: DateTime<Utc>,

    /// The modification date shown on the post page, if `date modified` is
    /// present and parses.
    pub modified: Option<DateTime<Utc>>,

    /// Tags in source order.
    pub tags: Vec<String>,

    /// The summary (`summary`, else `description`), possibly empty.
    pub summary: String,

    /// The explicit `slug` from the front matter, if any.
    pub slug: Option<String>,
}

impl PostMetadata {
    /// Builds a [`PostMetadata`] from a raw front matter mapping. `stem` is the
    /// source file name without its extension and `modified` is the source
    /// file's modification time.
    pub fn normalize(
        frontmatter: &Mapping,
        stem: &str,
        modified: DateTime<Utc>,
    ) -> PostMetadata {
        let title = scalar(frontmatter, "title")
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.trim().to_owned())
            .unwrap_or_else(|| stem.to_owned());

        let (date, date_malformed) = match DATE_KEYS
            .iter()
            .find_map(|key| present(frontmatter, key))
        {
            None => (modified, false),
            Some(value) => match value_to_date(value) {
                Some(date) => (date, false),
                None => (modified, true),
            },
        };

        let created = ["date created", "date"]
            .iter()
            .find_map(|key| present(frontmatter, key).and_then(value_to_date))
            .unwrap_or(date);

        PostMetadata {
            title,
            date,
            date_malformed,
            created,
            modified: present(frontmatter, "date modified").and_then(value_to_date),
            tags: frontmatter.get("tags").map(tags).unwrap_or_default(),
            summary: scalar(frontmatter, "summary")
                .or_else(|| scalar(frontmatter, "description"))
                .map(|s| s.trim().to_owned())
                .unwrap_or_default(),
            slug: scalar(frontmatter, "slug").filter(|s| !s.trim().is_empty()),
        }
    }

    /// The calendar date used for archive grouping: the effective date, unless
    /// the declared date was malformed.
    pub fn archive_date(&self) -> Option<DateTime<Utc>> {
        match self.date_malformed {
            true => None,
            false => Some(self.date),
        }
    }
}

// Returns the value for `key` unless it's absent or null.
fn present<'a>(frontmatter: &'a Mapping, key: &str) -> Option<&'a Value> {
    frontmatter.get(key).filter(|v| !v.is_null())
}

// Returns the value for `key` as a string if it's a string, number or bool.
fn scalar(frontmatter: &Mapping, key: &str) -> Option<String> {
    present(frontmatter, key).and_then(scalar_to_string)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        _ => None,
    }
}

/// Converts a `tags` value into a list. Sequences are taken item by item;
/// strings are split on commas, or on whitespace when there are no commas.
/// Leading `#`s are stripped and empty tags dropped.
pub fn tags(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_to_string).collect(),
        Value::String(s) if s.contains(',') => s.split(',').map(str::to_owned).collect(),
        Value::String(s) => s.split_whitespace().map(str::to_owned).collect(),
        other => scalar_to_string(other).into_iter().collect(),
    };
    raw.iter()
        .map(|t| t.trim().trim_start_matches('#').trim())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

fn value_to_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_date(s),
        Value::Tagged(tagged) => value_to_date(&tagged.value),
        _ => None,
    }
}

/// Parses a front matter date. Accepts RFC 3339 as well as `YYYY-MM-DD`,
/// `YYYY/MM/DD` and `YYYY-MM-DD HH:MM[:SS]` (with a space or a `T`). Values
/// without an offset are taken to be UTC.
pub fn parse_date(input: &str) -> Option<DateTime<Utc>> {
    const DATETIME_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

    let input = input.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(input) {
        return Some(date.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(naive) = NaiveDate::parse_from_str(input, format) {
            return naive.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}
