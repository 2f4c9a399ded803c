//! Exports the [`build_site`] function which stitches together the high-level
//! steps of building the output static site: parsing the posts
//! ([`crate::post`]), allocating their output paths, rendering post, index,
//! archive and not-found pages ([`crate::write`]), mirroring the index into
//! `README.md`, generating the Atom feed, copying the assets directory and,
//! optionally, minifying the result ([`crate::optimize`]).

use crate::archive::{self, ArchiveEntry};
use crate::config::Config;
use crate::feed::{write_feed, Error as FeedError, FeedConfig, FEED_FILE};
use crate::markdown::Highlighter;
use crate::optimize::{self, Error as OptimizeError, Report};
use crate::post::{Error as ParseError, Parser as PostParser, Post};
use crate::slug::{PathAllocator, POSTS_DIRECTORY};
use crate::template::{Error as TemplateError, Templates};
use crate::write::{Error as WriteError, Writer};
use chrono::{Datelike, Utc};
use log::{info, warn};
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// What a build produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// The number of post pages written.
    pub posts: usize,

    /// The number of asset files copied.
    pub assets: usize,

    /// The optimization report, if the optimization pass ran.
    pub optimized: Option<Report>,
}

/// Builds the site from a [`Config`] into `config.output_directory`. When
/// `minify` is `true` the optimization pass runs after everything is written.
///
/// Every post is parsed before anything is written, so a malformed post fails
/// the build without leaving half a site behind.
pub fn build_site(config: &Config, minify: bool) -> Result<Summary> {
    let output_directory = &config.output_directory;
    check_output_directory(config)?;

    // collect all posts
    let sources = PostParser::new(&config.posts_source_directory).parse_sources()?;
    info!("Parsed {} posts", sources.len());

    let templates = Templates::load(&config.theme_directory)?;
    let highlighter = Highlighter::new(&config.highlight_theme);

    // Blow away the old post pages so that path allocation doesn't collide
    // with the previous build's output. We don't delete the whole output
    // directory in case the user accidentally passes the wrong one.
    rmdir(&output_directory.join(POSTS_DIRECTORY))?;
    rmdir(&output_directory.join(ASSETS_DIRECTORY))?;

    let mut allocator = PathAllocator::new(output_directory);
    let posts = sources
        .into_iter()
        .map(|source| {
            source.into_post(
                &mut allocator,
                &config.site_url,
                &config.base_path,
                &highlighter,
            )
        })
        .collect::<std::result::Result<Vec<Post>, ParseError>>()?;

    // The footer year follows the newest post so unchanged input rebuilds to
    // the same bytes. An empty site has nothing dated to go by.
    let year = posts
        .iter()
        .map(|p| p.metadata.date.year())
        .max()
        .unwrap_or_else(|| Utc::now().year());
    let writer = Writer {
        templates: &templates,
        config,
        output_directory,
        year,
    };
    for post in &posts {
        writer.write_post(post)?;
    }

    // index order is shared by the index, the README and the feed
    let mut ordered: Vec<(ArchiveEntry, &Post)> =
        posts.iter().map(|p| (p.archive_entry(), p)).collect();
    ordered.sort_by(|(a, _), (b, _)| archive::index_order(a, b));
    let (entries, ordered_posts): (Vec<ArchiveEntry>, Vec<&Post>) = ordered.into_iter().unzip();

    writer.write_index(&entries)?;
    writer.write_archive(&entries)?;
    writer.write_not_found()?;
    writer.write_readme(&entries)?;

    let feed_path = output_directory.join(FEED_FILE);
    let feed_file = File::create(&feed_path).map_err(|err| Error::Io {
        path: feed_path.clone(),
        err,
    })?;
    write_feed(
        &FeedConfig::from(config),
        &ordered_posts,
        BufWriter::new(feed_file),
    )?;

    let assets = copy_assets(
        &config.assets_directory,
        &output_directory.join(ASSETS_DIRECTORY),
    )?;
    info!(
        "Wrote {} posts to `{}`",
        posts.len(),
        output_directory.display()
    );

    let optimized = match minify {
        true => Some(optimize::optimize_directory(output_directory)?),
        false => None,
    };

    Ok(Summary {
        posts: posts.len(),
        assets,
        optimized,
    })
}

const ASSETS_DIRECTORY: &str = "assets";

// Refuses an output directory whose cleaned subdirectories would take the
// project's sources with them, e.g. `--output` pointing at the project root.
fn check_output_directory(config: &Config) -> Result<()> {
    // an output directory that doesn't exist yet can't contain any sources
    let Ok(output) = config.output_directory.canonicalize() else {
        return Ok(());
    };
    let overlap = |source: &Path| Error::UnsafeOutput {
        output: config.output_directory.clone(),
        source_directory: source.to_owned(),
    };

    if let Ok(root) = config.root_directory.canonicalize() {
        if root == output {
            return Err(overlap(&config.root_directory));
        }
    }
    let cleaned = [output.join(POSTS_DIRECTORY), output.join(ASSETS_DIRECTORY)];
    for source in [
        &config.posts_source_directory,
        &config.assets_directory,
        &config.theme_directory,
    ] {
        let Ok(canonical) = source.canonicalize() else {
            continue;
        };
        if cleaned.iter().any(|dir| canonical.starts_with(dir)) {
            return Err(overlap(source));
        }
    }
    Ok(())
}

// Copies `src` into `dst` recursively and returns the number of files copied.
// A missing `src` is not an error: the site is built without assets.
fn copy_assets(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        warn!(
            "Assets directory `{}` not found; building without assets",
            src.display()
        );
        return Ok(0);
    }

    let mut copied = 0;
    for result in WalkDir::new(src).sort_by_file_name() {
        let entry = result?;
        // strip_prefix shouldn't fail since `src` is always an ancestor of
        // the walked entries
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);
        let io_error = |err| Error::Io {
            path: target.clone(),
            err,
        };
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(io_error)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(io_error)?;
            copied += 1;
        }
    }
    Ok(copied)
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for building a site. Errors can be during parsing, template
/// loading, writing, cleaning output directories, and other I/O.
#[derive(Debug)]
pub enum Error {
    /// Returned for errors during parsing.
    Parse(ParseError),

    /// Returned when building into `output` would delete the project's
    /// sources in `source_directory`.
    UnsafeOutput {
        output: PathBuf,
        source_directory: PathBuf,
    },

    /// Returned for errors loading template overrides.
    Template(TemplateError),

    /// Returned for errors writing pages to disk.
    Write(WriteError),

    /// Returned for I/O problems while cleaning output directories.
    Clean { path: PathBuf, err: std::io::Error },

    /// Returned for errors writing the feed.
    Feed(FeedError),

    /// Returned when the optimization pass can't run.
    Optimize(OptimizeError),

    /// Returned for WalkDir I/O errors while copying assets.
    WalkDir(walkdir::Error),

    /// Returned for other I/O errors.
    Io { path: PathBuf, err: std::io::Error },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Parse(err) => err.fmt(f),
            Error::UnsafeOutput {
                output,
                source_directory,
            } => write!(
                f,
                "Refusing to build into '{}': it would delete '{}'",
                output.display(),
                source_directory.display()
            ),
            Error::Template(err) => err.fmt(f),
            Error::Write(err) => err.fmt(f),
            Error::Clean { path, err } => {
                write!(f, "Cleaning directory '{}': {}", path.display(), err)
            }
            Error::Feed(err) => write!(f, "Writing feed: {}", err),
            Error::Optimize(err) => err.fmt(f),
            Error::WalkDir(err) => err.fmt(f),
            Error::Io { path, err } => write!(f, "'{}': {}", path.display(), err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(err) => Some(err),
            Error::UnsafeOutput { .. } => None,
            Error::Template(err) => Some(err),
            Error::Write(err) => Some(err),
            Error::Clean { path: _, err } => Some(err),
            Error::Feed(err) => Some(err),
            Error::Optimize(err) => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Io { path: _, err } => Some(err),
        }
    }
}

impl From<ParseError> for Error {
    /// Converts [`ParseError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: ParseError) -> Error {
        Error::Parse(err)
    }
}

impl From<TemplateError> for Error {
    /// Converts [`TemplateError`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: TemplateError) -> Error {
        Error::Template(err)
    }
}

impl From<WriteError> for Error {
    /// Converts [`WriteError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: WriteError) -> Error {
        Error::Write(err)
    }
}

impl From<FeedError> for Error {
    /// Converts [`FeedError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: FeedError) -> Error {
        Error::Feed(err)
    }
}

impl From<OptimizeError> for Error {
    /// Converts [`OptimizeError`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: OptimizeError) -> Error {
        Error::Optimize(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts [`walkdir::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}

fn rmdir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(x) => Ok(x),
        Err(e) => match e.kind() {
            std::io::ErrorKind::NotFound => Ok(()),
            _ => Err(Error::Clean {
                path: dir.to_owned(),
                err: e,
            }),
        },
    }
}
