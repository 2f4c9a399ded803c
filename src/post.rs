//! Defines the [`Source`], [`Post`], [`Parser`], and [`Error`] types. Parsing
//! happens in two phases: every source file under the posts directory is read
//! and normalized into a [`Source`] first, so a bad file fails the build before
//! anything is written. Only then is each [`Source`] given an output path and
//! rendered into a [`Post`] (see [`Source::into_post`]).

use crate::archive::ArchiveEntry;
use crate::frontmatter;
use crate::markdown::{self, Highlighter};
use crate::metadata::PostMetadata;
use crate::slug::{slugify, PathAllocator};
use chrono::{DateTime, Datelike, Utc};
use log::{debug, warn};
use serde_json::{json, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;
use walkdir::WalkDir;

const MARKDOWN_EXTENSION: &str = "md";

/// A source document that has been read and normalized but not yet assigned
/// an output path.
#[derive(Clone, Debug)]
pub struct Source {
    /// The path of the source file relative to the posts source directory.
    pub relative_path: PathBuf,

    /// The 1-based position of the document in sorted file name order. Used
    /// to name posts whose title produces an empty slug.
    pub position: usize,

    /// The normalized metadata.
    pub metadata: PostMetadata,

    /// The raw front matter, kept so that keys we don't normalize still reach
    /// the page's embedded metadata.
    pub frontmatter: Value,

    /// The Markdown body.
    pub body: String,
}

/// A post with its output location and rendered body.
#[derive(Clone, Debug)]
pub struct Post {
    /// The normalized metadata.
    pub metadata: PostMetadata,

    /// The output file path relative to the output directory (e.g.,
    /// `posts/2025/03/hello-world.html`).
    pub file_path: PathBuf,

    /// The site-relative link to the post, including the base path (e.g.,
    /// `/blog/posts/2025/03/hello-world.html`).
    pub href: String,

    /// The absolute URL of the post.
    pub url: Url,

    /// The rendered HTML body.
    pub content: String,

    /// The raw front matter of the source document.
    pub frontmatter: Value,
}

impl Source {
    /// The slug the post should be published under: the explicit `slug`, else
    /// the title, else `post-<position>` when neither yields any usable
    /// characters.
    pub fn slug(&self) -> String {
        let slug = slugify(
            self.metadata
                .slug
                .as_deref()
                .unwrap_or(&self.metadata.title),
        );
        match slug.is_empty() {
            true => format!("post-{}", self.position),
            false => slug,
        }
    }

    /// Allocates an output path for the post, renders its body and returns
    /// the finished [`Post`]. `site_url` is the absolute URL of the site root
    /// and `base_path` is the path prefix used for site-relative links.
    pub fn into_post(
        self,
        allocator: &mut PathAllocator,
        site_url: &Url,
        base_path: &str,
        highlighter: &Highlighter,
    ) -> Result<Post> {
        let date = self.metadata.date;
        let prefix = format!("{:04}/{:02}", date.year(), date.month());
        let file_path = allocator.allocate(&prefix, &self.slug());
        let url_path = to_url_path(&file_path);
        let url = site_url
            .join(&url_path)
            .map_err(|err| annotate(&self.relative_path, Error::UrlParse(err)))?;
        debug!(
            "Rendering `{}` as `{}`",
            self.relative_path.display(),
            url_path
        );

        let mut content = String::with_capacity(self.body.len() * 3 / 2);
        markdown::to_html(&mut content, &self.body, highlighter);
        Ok(Post {
            metadata: self.metadata,
            href: format!("{}{}", base_path, url_path),
            file_path,
            url,
            content,
            frontmatter: self.frontmatter,
        })
    }
}

impl Post {
    /// The record used to list the post on the index and archive pages.
    pub fn archive_entry(&self) -> ArchiveEntry {
        ArchiveEntry {
            url: self.href.clone(),
            permalink: self.url.to_string(),
            title: self.metadata.title.clone(),
            date_display: format_date(self.metadata.date),
            sort_key: self.metadata.date.timestamp_millis(),
            date: self.metadata.archive_date().map(|d| d.date_naive()),
            summary: self.metadata.summary.clone(),
            tags: self.metadata.tags.clone(),
        }
    }

    /// The metadata embedded in the post page as JSON: the normalized fields
    /// plus the raw front matter.
    pub fn metadata_json(&self) -> Value {
        json!({
            "title": self.metadata.title,
            "date": self.metadata.date.to_rfc3339(),
            "created": self.metadata.created.to_rfc3339(),
            "modified": self.metadata.modified.map(|d| d.to_rfc3339()),
            "tags": self.metadata.tags,
            "summary": self.metadata.summary,
            "url": self.url.as_str(),
            "frontmatter": self.frontmatter,
        })
    }
}

/// Formats a date the way it's displayed on pages and listings.
pub fn format_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

// Joins the components of a relative path with `/`, regardless of platform.
fn to_url_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parses [`Source`] documents from a posts directory.
pub struct Parser<'a> {
    /// `source_directory` is the directory that is searched (recursively) for
    /// `.md` files.
    source_directory: &'a Path,
}

impl<'a> Parser<'a> {
    /// Constructs a new parser. See fields on [`Parser`] for argument
    /// descriptions.
    pub fn new(source_directory: &'a Path) -> Parser<'a> {
        Parser { source_directory }
    }

    /// Reads every `.md` file under the source directory, in sorted file name
    /// order, and normalizes it into a [`Source`]. A missing source directory
    /// yields no documents; any file that can't be read or parsed fails the
    /// whole call.
    pub fn parse_sources(&self) -> Result<Vec<Source>> {
        if !self.source_directory.is_dir() {
            warn!(
                "Posts directory `{}` not found; building an empty site",
                self.source_directory.display()
            );
            return Ok(Vec::new());
        }

        let mut sources = Vec::new();
        for result in WalkDir::new(self.source_directory).sort_by_file_name() {
            let entry = result?;
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(MARKDOWN_EXTENSION)
            {
                continue;
            }
            let position = sources.len() + 1;
            sources.push(
                self.parse_source(path, position)
                    .map_err(|e| annotate(path, e))?,
            );
        }
        Ok(sources)
    }

    fn parse_source(&self, path: &Path, position: usize) -> Result<Source> {
        let contents = std::fs::read_to_string(path)?;
        let document = frontmatter::split(&contents)?;
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = PostMetadata::normalize(&document.metadata, &stem, modified);
        if metadata.date_malformed {
            warn!(
                "`{}` has an unparseable date; using its modification time",
                path.display()
            );
        }

        let frontmatter = serde_json::to_value(&document.metadata).unwrap_or_else(|err| {
            warn!(
                "Front matter of `{}` can't be embedded as JSON: {}",
                path.display(),
                err
            );
            Value::Null
        });

        Ok(Source {
            // strip_prefix() shouldn't fail since `path` comes from walking
            // `source_directory`
            relative_path: path
                .strip_prefix(self.source_directory)
                .unwrap_or(path)
                .to_owned(),
            position,
            metadata,
            frontmatter,
            body: document.body.to_owned(),
        })
    }
}

fn annotate(path: &Path, err: Error) -> Error {
    Error::Annotated(format!("parsing post `{}`", path.display()), Box::new(err))
}

/// Represents the result of a [`Source`]- or [`Post`]-parse operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error parsing a post.
#[derive(Debug)]
pub enum Error {
    /// Returned when the front matter couldn't be split from the body.
    Frontmatter(frontmatter::Error),

    /// Returned when there is a problem building a post URL.
    UrlParse(url::ParseError),

    /// Returned for other I/O errors.
    Io(std::io::Error),

    /// Returned for WalkDir I/O errors.
    WalkDir(walkdir::Error),

    /// An error with an annotation.
    Annotated(String, Box<Error>),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Frontmatter(err) => err.fmt(f),
            Error::UrlParse(err) => err.fmt(f),
            Error::Io(err) => err.fmt(f),
            Error::WalkDir(err) => err.fmt(f),
            Error::Annotated(annotation, err) => {
                write!(f, "{}: {}", &annotation, err)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Frontmatter(err) => Some(err),
            Error::UrlParse(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Annotated(_, err) => Some(err),
        }
    }
}

impl From<frontmatter::Error> for Error {
    /// Converts a [`frontmatter::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator for [`frontmatter::split`].
    fn from(err: frontmatter::Error) -> Error {
        Error::Frontmatter(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts a [`walkdir::Error`] into an [`Error`]. It allows us to
    /// use the `?` operator while walking the source directory.
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}

impl From<std::io::Error> for Error {
    /// Converts a [`std::io::Error`] into an [`Error`]. It allows us to
    /// use the `?` operator for fallible I/O functions.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}
