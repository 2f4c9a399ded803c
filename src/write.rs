//! Composes pages from templates and writes them to the output directory.

use crate::archive::{self, ArchiveEntry};
use crate::config::Config;
use crate::post::{format_date, Post};
use crate::template::{Context, PageKind, Templates};
use chrono::{DateTime, Utc};
use log::debug;
use maud::html;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Responsible for templating and writing pages to disk.
pub struct Writer<'a> {
    /// The page templates.
    pub templates: &'a Templates,

    /// The site configuration. Supplies the values shared by every page.
    pub config: &'a Config,

    /// The root of the output directory. Every page path is relative to it.
    pub output_directory: &'a Path,

    /// The build year, shown in the footer.
    pub year: i32,
}

impl Writer<'_> {
    /// Writes a post page to `{output_directory}/{post.file_path}`.
    pub fn write_post(&self, post: &Post) -> Result<()> {
        let meta = &post.metadata;
        let inner = Context::new()
            .with("title", escape(&meta.title))
            .with("dateHtml", date_html(meta.created, meta.modified))
            .with("tagsHtml", tags_html(&meta.tags))
            .with("content", post.content.as_str())
            .with("metadata", script_safe_json(&post.metadata_json()));

        let description = match meta.summary.is_empty() {
            true => &self.config.description,
            false => &meta.summary,
        };
        let keywords: Vec<&str> = meta
            .tags
            .iter()
            .chain(self.config.keywords.iter())
            .map(String::as_str)
            .collect();
        let shell = self
            .shell(
                &format!("{} | {}", meta.title, self.config.title),
                description,
                &keywords.join(", "),
                post.url.as_str(),
            )
            .with("ogType", "article");

        self.write_file(
            &post.file_path,
            &self.templates.compose(PageKind::Post, &inner, &shell),
        )
    }

    /// Writes `index.html` listing `entries`, which must already be in index
    /// order.
    pub fn write_index(&self, entries: &[ArchiveEntry]) -> Result<()> {
        let inner = self
            .listing_context(entries.len())
            .with("content", archive::listing_html(entries));
        let shell = self.shell(
            &self.config.title,
            &self.config.description,
            &self.config.keywords.join(", "),
            self.config.site_url.as_str(),
        );
        self.write_file(
            Path::new("index.html"),
            &self.templates.compose(PageKind::Index, &inner, &shell),
        )
    }

    /// Writes `archive.html` with one section per year.
    pub fn write_archive(&self, entries: &[ArchiveEntry]) -> Result<()> {
        let groups = archive::group_by_year(entries);
        let count: usize = groups.iter().map(|g| g.entries.len()).sum();
        let inner = self
            .listing_context(count)
            .with("content", archive::archive_html(&groups));
        let shell = self.shell(
            &format!("Archive | {}", self.config.title),
            &self.config.description,
            &self.config.keywords.join(", "),
            &self.page_url("archive.html"),
        );
        self.write_file(
            Path::new("archive.html"),
            &self.templates.compose(PageKind::Archive, &inner, &shell),
        )
    }

    /// Writes `404.html`.
    pub fn write_not_found(&self) -> Result<()> {
        let inner = self.listing_context(0);
        let shell = self.shell(
            &format!("Not Found | {}", self.config.title),
            &self.config.description,
            &self.config.keywords.join(", "),
            &self.page_url("404.html"),
        );
        self.write_file(
            Path::new("404.html"),
            &self.templates.compose(PageKind::NotFound, &inner, &shell),
        )
    }

    /// Writes `README.md`, a Markdown mirror of the index.
    pub fn write_readme(&self, entries: &[ArchiveEntry]) -> Result<()> {
        self.write_file(
            Path::new("README.md"),
            &archive::readme(&self.config.title, &self.config.description, entries),
        )
    }

    // Values available to the index, archive and not-found templates.
    fn listing_context(&self, count: usize) -> Context {
        Context::new()
            .with("count", count)
            .with("siteTitle", escape(&self.config.title))
            .with("siteDescription", escape(&self.config.description))
            .with("basePath", self.config.base_path.as_str())
    }

    // Values available to the base template.
    fn shell(&self, title: &str, description: &str, keywords: &str, page_url: &str) -> Context {
        let config = self.config;
        Context::new()
            .with("pageTitle", escape(title))
            .with("pageDescription", escape(description))
            .with("pageKeywords", escape(keywords))
            .with(
                "siteAuthor",
                escape(config.author.as_ref().map_or("", |a| a.name.as_str())),
            )
            .with("ogType", "website")
            .with("pageUrl", page_url)
            .with("siteUrl", config.site_url.as_str())
            .with("siteTitle", escape(&config.title))
            .with("basePath", config.base_path.as_str())
            .with("cssLinks", css_links(&config.base_path, &config.stylesheets))
            .with("githubUsername", escape(&config.github_username))
            .with("year", self.year)
    }

    fn page_url(&self, relative: &str) -> String {
        self.config
            .site_url
            .join(relative)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.config.site_url, relative))
    }

    fn write_file(&self, relative: &Path, contents: &str) -> Result<()> {
        let path = self.output_directory.join(relative);
        debug!("Writing `{}`", path.display());
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|err| Error::Io {
                path: dir.to_owned(),
                err,
            })?;
        }
        std::fs::write(&path, contents).map_err(|err| Error::Io { path, err })
    }
}

/// HTML-escapes text before it enters a template context.
pub fn escape(text: &str) -> String {
    html! { (text) }.into_string()
}

/// Renders `<link>` tags for the configured stylesheets. Relative stylesheet
/// paths are prefixed with `base_path`; absolute paths and URLs are kept.
pub fn css_links(base_path: &str, stylesheets: &[String]) -> String {
    html! {
        @for sheet in stylesheets {
            @if sheet.starts_with('/') || sheet.contains("://") {
                link rel="stylesheet" href=(sheet);
            } @else {
                link rel="stylesheet" href={ (base_path) (sheet) };
            }
        }
    }
    .into_string()
}

fn date_html(created: DateTime<Utc>, modified: Option<DateTime<Utc>>) -> String {
    html! {
        time.post-date datetime=(created.to_rfc3339()) { (format_date(created)) }
        @if let Some(modified) = modified {
            " "
            span.post-modified {
                "Updated "
                time datetime=(modified.to_rfc3339()) { (format_date(modified)) }
            }
        }
    }
    .into_string()
}

fn tags_html(tags: &[String]) -> String {
    html! {
        @if !tags.is_empty() {
            ul.post-tags {
                @for tag in tags {
                    li.tag { (tag) }
                }
            }
        }
    }
    .into_string()
}

/// Encodes a value as JSON that can be embedded in a `<script>` element. No
/// `<` survives, so neither `</script>` nor `<!--` can change how the element
/// is parsed. `<` only ever occurs inside JSON strings, where `\u003c` is an
/// equivalent escape.
pub fn script_safe_json(value: &serde_json::Value) -> String {
    value.to_string().replace('<', "\\u003c")
}

/// The result of a fallible page-writing operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error in a page-writing operation.
#[derive(Debug)]
pub enum Error {
    /// An error writing an output file or creating its directory.
    Io { path: PathBuf, err: io::Error },
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as presentable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { path, err } => {
                write!(f, "Writing '{}': {}", path.display(), err)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { path: _, err } => Some(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&</a>"#), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }

    #[test]
    fn test_css_links() {
        let links = css_links(
            "/blog/",
            &[
                String::from("assets/css/style.css"),
                String::from("https://cdn.example.com/x.css"),
            ],
        );
        assert_eq!(
            links,
            r#"<link rel="stylesheet" href="/blog/assets/css/style.css"><link rel="stylesheet" href="https://cdn.example.com/x.css">"#
        );
    }

    #[test]
    fn test_script_safe_json() {
        let json = script_safe_json(&json!({"title": "</script><b>", "summary": "<!-- x"}));
        assert!(!json.contains('<'), "{}", json);
        let decoded: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded["title"], "</script><b>");
        assert_eq!(decoded["summary"], "<!-- x");
    }

    #[test]
    fn test_date_html() {
        let created = Utc.with_ymd_and_hms(2025, 3, 5, 0, 0, 0).unwrap();
        let html = date_html(created, None);
        assert!(html.contains(">2025-03-05</time>"), "{}", html);
        assert!(!html.contains("Updated"));

        let modified = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let html = date_html(created, Some(modified));
        assert!(html.contains("Updated"), "{}", html);
        assert!(html.contains(">2025-04-01</time>"), "{}", html);
    }

    #[test]
    fn test_tags_html() {
        assert_eq!(tags_html(&[]), "");
        assert_eq!(
            tags_html(&[String::from("a<b")]),
            r#"<ul class="post-tags"><li class="tag">a&lt;b</li></ul>"#
        );
    }
}
