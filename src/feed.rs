//! Support for creating Atom feeds from a list of posts.

use crate::config::{Author, Config};
use crate::post::Post;
use atom_syndication::{
    Entry, EntryBuilder, Error as AtomError, Feed, FeedBuilder, FixedDateTime, GeneratorBuilder,
    Link, LinkBuilder, Person, PersonBuilder, Text,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::io::Write;

/// The feed's file name in the output directory.
pub const FEED_FILE: &str = "feed.xml";

/// Bundled configuration for creating a feed.
pub struct FeedConfig {
    pub title: String,
    pub subtitle: String,
    pub id: String,
    pub author: Option<Author>,
    pub home_page: String,
    pub feed_url: String,
}

impl From<&Config> for FeedConfig {
    /// Takes the feed-level fields from the site [`Config`].
    fn from(config: &Config) -> FeedConfig {
        FeedConfig {
            title: config.title.clone(),
            subtitle: config.description.clone(),
            id: config.site_url.to_string(),
            author: config.author.clone(),
            home_page: config.site_url.to_string(),
            feed_url: config
                .site_url
                .join(FEED_FILE)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| format!("{}{}", config.site_url, FEED_FILE)),
        }
    }
}

/// Creates a feed from some configuration ([`FeedConfig`]) and a list of
/// [`Post`]s (in the order they should appear) and writes the result to a
/// [`std::io::Write`].
pub fn write_feed<W: Write>(config: &FeedConfig, posts: &[&Post], w: W) -> Result<()> {
    feed(config, posts).write_to(w)?.flush()?;
    Ok(())
}

fn feed(config: &FeedConfig, posts: &[&Post]) -> Feed {
    // The newest post date keeps rebuilds of unchanged input byte-identical.
    let updated = posts
        .iter()
        .map(|p| p.metadata.date)
        .max()
        .unwrap_or(DateTime::<Utc>::from(std::time::UNIX_EPOCH));

    FeedBuilder::default()
        .title(Text::plain(config.title.clone()))
        .subtitle(match config.subtitle.is_empty() {
            true => None,
            false => Some(Text::plain(config.subtitle.clone())),
        })
        .id(config.id.clone())
        .updated(fixed(updated))
        .authors(author_to_people(config.author.as_ref()))
        .links(vec![
            link(&config.feed_url, "self"),
            link(&config.home_page, "alternate"),
        ])
        .generator(Some(
            GeneratorBuilder::default()
                .value(env!("CARGO_PKG_NAME"))
                .build(),
        ))
        .entries(
            posts
                .iter()
                .map(|post| feed_entry(config, post))
                .collect::<Vec<Entry>>(),
        )
        .build()
}

fn feed_entry(config: &FeedConfig, post: &Post) -> Entry {
    let date = fixed(post.metadata.date);
    let summary = &post.metadata.summary;
    EntryBuilder::default()
        .id(post.url.to_string())
        .title(Text::plain(post.metadata.title.clone()))
        .updated(date)
        .published(Some(date))
        .authors(author_to_people(config.author.as_ref()))
        .links(vec![link(post.url.as_str(), "alternate")])
        .summary(match summary.is_empty() {
            true => None,
            false => Some(Text::plain(summary.clone())),
        })
        .build()
}

fn fixed(date: DateTime<Utc>) -> FixedDateTime {
    date.fixed_offset()
}

fn link(href: &str, rel: &str) -> Link {
    LinkBuilder::default()
        .href(href.to_owned())
        .rel(rel.to_owned())
        .build()
}

fn author_to_people(author: Option<&Author>) -> Vec<Person> {
    match author {
        Some(author) => vec![PersonBuilder::default()
            .name(author.name.clone())
            .email(author.email.clone())
            .build()],
        None => Vec::new(),
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Represents a problem creating a feed. Variants inlude I/O and Atom issues.
#[derive(Debug)]
pub enum Error {
    /// Returned when there is a generic I/O error.
    Io(std::io::Error),

    /// Returned when there is an Atom-related error.
    Atom(AtomError),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => err.fmt(f),
            Error::Atom(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Atom(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for Error {
    /// Converts [`std::io::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator in fallible feed operations.
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<AtomError> for Error {
    /// Converts [`AtomError`]s into [`Error`]. This allows us to use the `?`
    /// operator in fallible feed operations.
    fn from(err: AtomError) -> Error {
        Error::Atom(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::PostMetadata;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use url::Url;

    fn post(title: &str, url: &str, day: u32) -> Post {
        let mut metadata =
            PostMetadata::normalize(&Default::default(), title, Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap());
        metadata.summary = format!("About {}", title);
        Post {
            metadata,
            file_path: PathBuf::new(),
            href: String::new(),
            url: Url::parse(url).unwrap(),
            content: String::new(),
            frontmatter: serde_json::Value::Null,
        }
    }

    fn feed_config() -> FeedConfig {
        FeedConfig {
            title: String::from("Blog"),
            subtitle: String::new(),
            id: String::from("https://example.com/"),
            author: Some(Author {
                name: String::from("Ada"),
                email: None,
            }),
            home_page: String::from("https://example.com/"),
            feed_url: String::from("https://example.com/feed.xml"),
        }
    }

    #[test]
    fn test_write_feed() -> Result<()> {
        let first = post("First", "https://example.com/posts/2025/03/first.html", 1);
        let second = post("Second", "https://example.com/posts/2025/03/second.html", 2);
        let mut out = Vec::new();
        write_feed(&feed_config(), &[&second, &first], &mut out)?;

        let feed: Feed = String::from_utf8(out).unwrap().parse().unwrap();
        assert_eq!(feed.title().as_str(), "Blog");
        assert_eq!(feed.entries().len(), 2);
        assert_eq!(feed.entries()[0].title().as_str(), "Second");
        assert_eq!(
            feed.entries()[0].id(),
            "https://example.com/posts/2025/03/second.html"
        );
        assert_eq!(
            feed.updated(),
            &Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap().fixed_offset()
        );
        assert_eq!(feed.authors()[0].name(), "Ada");
        Ok(())
    }

    #[test]
    fn test_empty_feed() -> Result<()> {
        let mut out = Vec::new();
        write_feed(&feed_config(), &[], &mut out)?;
        let feed: Feed = String::from_utf8(out).unwrap().parse().unwrap();
        assert!(feed.entries().is_empty());
        Ok(())
    }
}
