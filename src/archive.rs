//! Aggregates [`ArchiveEntry`] records into the index listing, the
//! year-grouped archive and the `README.md` mirror of the index.

use chrono::{Datelike, NaiveDate};
use maud::{html, Markup};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// The message shown in place of a listing when there are no posts.
pub const NO_POSTS: &str = "No posts yet.";

/// The per-post record used to build listings.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchiveEntry {
    /// The site-relative link to the post.
    pub url: String,

    /// The absolute URL of the post.
    pub permalink: String,

    /// The post title (unescaped).
    pub title: String,

    /// The date as shown in listings.
    pub date_display: String,

    /// Milliseconds since the Unix epoch of the effective date.
    pub sort_key: i64,

    /// The calendar date used for year grouping. `None` when the declared
    /// date couldn't be parsed.
    pub date: Option<NaiveDate>,

    /// The summary, possibly empty.
    pub summary: String,

    /// The tags in source order.
    pub tags: Vec<String>,
}

/// Index order: newest first, ties broken by URL so that the order is stable.
pub fn index_order(a: &ArchiveEntry, b: &ArchiveEntry) -> Ordering {
    b.sort_key.cmp(&a.sort_key).then_with(|| a.url.cmp(&b.url))
}

/// The archive entries of a single calendar year.
#[derive(Debug, PartialEq)]
pub struct YearGroup<'a> {
    pub year: i32,
    pub entries: Vec<&'a ArchiveEntry>,
}

/// Groups entries by the year of their date, newest year first. Entries
/// without a date are left out. Entries within a group are newest first.
pub fn group_by_year(entries: &[ArchiveEntry]) -> Vec<YearGroup<'_>> {
    let mut years: BTreeMap<i32, Vec<&ArchiveEntry>> = BTreeMap::new();
    for entry in entries {
        if let Some(date) = entry.date {
            years.entry(date.year()).or_default().push(entry);
        }
    }
    years
        .into_iter()
        .rev()
        .map(|(year, mut entries)| {
            entries.sort_by(|a, b| index_order(a, b));
            YearGroup { year, entries }
        })
        .collect()
}

fn entry_item(entry: &ArchiveEntry) -> Markup {
    html! {
        li.post-item {
            a.post-link href=(entry.url) { (entry.title) }
            " "
            time.post-date datetime=(entry.date_display) { (entry.date_display) }
            @if !entry.summary.is_empty() {
                p.post-summary { (entry.summary) }
            }
            @if !entry.tags.is_empty() {
                ul.post-tags {
                    @for tag in &entry.tags {
                        li.tag { (tag) }
                    }
                }
            }
        }
    }
}

/// Renders the index listing for entries that are already in index order.
pub fn listing_html(entries: &[ArchiveEntry]) -> String {
    html! {
        @if entries.is_empty() {
            p.no-posts { (NO_POSTS) }
        } @else {
            ul.post-list {
                @for entry in entries {
                    (entry_item(entry))
                }
            }
        }
    }
    .into_string()
}

/// Renders the year sections of the archive page. No groups renders nothing.
pub fn archive_html(groups: &[YearGroup<'_>]) -> String {
    html! {
        @for group in groups {
            section.archive-year id={ "year-" (group.year) } {
                h2 {
                    (group.year)
                    " "
                    span.count { (group.entries.len()) }
                }
                ul.post-list {
                    @for entry in &group.entries {
                        (entry_item(entry))
                    }
                }
            }
        }
    }
    .into_string()
}

/// Renders a Markdown mirror of the index. Links are absolute so they work
/// when the file is viewed outside the site.
pub fn readme(title: &str, description: &str, entries: &[ArchiveEntry]) -> String {
    let mut out = format!("# {}\n\n", title);
    if !description.is_empty() {
        out.push_str(description);
        out.push_str("\n\n");
    }
    if entries.is_empty() {
        out.push_str(NO_POSTS);
        out.push('\n');
        return out;
    }
    for entry in entries {
        out.push_str(&format!(
            "- [{}]({}) ({})",
            escape_link_text(&entry.title),
            entry.permalink,
            entry.date_display
        ));
        if !entry.summary.is_empty() {
            out.push_str(&format!(": {}", entry.summary));
        }
        out.push('\n');
    }
    out
}

fn escape_link_text(text: &str) -> String {
    text.replace('[', "\\[").replace(']', "\\]")
}
