//! A minimal `{{dotted.key}}` template language.
//!
//! A [`Template`] is parsed once into literal text and placeholders. Rendering
//! is a single pass: each placeholder is resolved against a [`Context`] and
//! substituted; substituted text is never scanned for further placeholders.
//! Unresolved keys render as the empty string.

use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// A parsed template.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Text(String),
    Key(String),
}

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

impl Template {
    /// Parses template source. Anything that doesn't look like a placeholder
    /// is kept as literal text.
    pub fn parse(source: &str) -> Template {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in placeholder().captures_iter(source) {
            let whole = caps.get(0).expect("capture 0 always matches");
            if whole.start() > last {
                segments.push(Segment::Text(source[last..whole.start()].to_owned()));
            }
            segments.push(Segment::Key(caps[1].to_owned()));
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Text(source[last..].to_owned()));
        }
        Template { segments }
    }

    /// Renders the template against `context`.
    pub fn render(&self, context: &Context) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Key(key) => {
                    if let Some(value) = context.get(key) {
                        out.push_str(&value);
                    }
                }
            }
        }
        out
    }

    /// The keys referenced by the template, in order of appearance.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Key(key) => Some(key.as_str()),
            Segment::Text(_) => None,
        })
    }
}

/// The values available to a template. Keys are looked up by dotted path
/// (`author.name` looks up `name` inside the `author` object).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    /// Sets a top-level key, replacing any previous value.
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> &mut Context {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder-style [`Context::insert`].
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Context {
        self.insert(key, value);
        self
    }

    /// Resolves a dotted path to a raw value.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Resolves a dotted path to the text that gets substituted. Strings are
    /// used as-is, numbers and booleans are formatted, objects and arrays are
    /// JSON-encoded. Null and missing values resolve to `None`.
    pub fn get(&self, path: &str) -> Option<Cow<'_, str>> {
        match self.lookup(path)? {
            Value::Null => None,
            Value::String(s) => Some(Cow::Borrowed(s.as_str())),
            Value::Bool(b) => Some(Cow::Owned(b.to_string())),
            Value::Number(n) => Some(Cow::Owned(n.to_string())),
            other => Some(Cow::Owned(other.to_string())),
        }
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Context {
        Context(map)
    }
}

/// The kinds of page the site is made of. Every kind is rendered inside the
/// [`PageKind::Base`] shell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    Base,
    Post,
    Index,
    Archive,
    NotFound,
}

impl PageKind {
    /// Whether pages of this kind nest rendered content via `{{content}}`.
    pub fn wraps_content(self) -> bool {
        self != PageKind::NotFound
    }

    /// The template's file name inside the theme directory.
    pub fn file_name(self) -> &'static str {
        match self {
            PageKind::Base => "base.html",
            PageKind::Post => "post.html",
            PageKind::Index => "index.html",
            PageKind::Archive => "archive.html",
            PageKind::NotFound => "404.html",
        }
    }

    fn builtin(self) -> &'static str {
        match self {
            PageKind::Base => include_str!("../theme/base.html"),
            PageKind::Post => include_str!("../theme/post.html"),
            PageKind::Index => include_str!("../theme/index.html"),
            PageKind::Archive => include_str!("../theme/archive.html"),
            PageKind::NotFound => include_str!("../theme/404.html"),
        }
    }
}

/// The full set of page templates for a site.
#[derive(Clone, Debug)]
pub struct Templates {
    base: Template,
    post: Template,
    index: Template,
    archive: Template,
    not_found: Template,
}

impl Templates {
    /// The templates compiled into the binary.
    pub fn builtin() -> Templates {
        Templates::from_fn(|kind| Ok(Template::parse(kind.builtin())))
            .expect("built-in templates don't touch the file system")
    }

    /// Loads templates from `theme_directory`, falling back to the built-in
    /// template for any file that doesn't exist there.
    pub fn load(theme_directory: &Path) -> Result<Templates> {
        Templates::from_fn(|kind| {
            let path = theme_directory.join(kind.file_name());
            if !path.is_file() {
                return Ok(Template::parse(kind.builtin()));
            }
            log::debug!("Using template override `{}`", path.display());
            let template = std::fs::read_to_string(&path)
                .map(|source| Template::parse(&source))
                .map_err(|err| Error::OpenTemplateFile {
                    path: path.clone(),
                    err,
                })?;
            if kind.wraps_content() && !template.keys().any(|key| key == "content") {
                log::warn!(
                    "Template override `{}` has no {{{{content}}}} placeholder",
                    path.display()
                );
            }
            Ok(template)
        })
    }

    fn from_fn<F: FnMut(PageKind) -> Result<Template>>(mut f: F) -> Result<Templates> {
        Ok(Templates {
            base: f(PageKind::Base)?,
            post: f(PageKind::Post)?,
            index: f(PageKind::Index)?,
            archive: f(PageKind::Archive)?,
            not_found: f(PageKind::NotFound)?,
        })
    }

    pub fn get(&self, kind: PageKind) -> &Template {
        match kind {
            PageKind::Base => &self.base,
            PageKind::Post => &self.post,
            PageKind::Index => &self.index,
            PageKind::Archive => &self.archive,
            PageKind::NotFound => &self.not_found,
        }
    }

    /// Renders a full page: the `kind` template is rendered against `inner`,
    /// then embedded as `content` in the base template rendered against
    /// `shell`.
    pub fn compose(&self, kind: PageKind, inner: &Context, shell: &Context) -> String {
        let content = self.get(kind).render(inner);
        let mut shell = shell.clone();
        shell.insert("content", content);
        self.base.render(&shell)
    }
}

/// Represents the result of a template-loading operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error loading templates.
#[derive(Debug)]
pub enum Error {
    /// Returned for I/O problems while opening template files.
    OpenTemplateFile { path: PathBuf, err: std::io::Error },
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::OpenTemplateFile { path, err } => {
                write!(f, "Opening template file '{}': {}", path.display(), err)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::OpenTemplateFile { path: _, err } => Some(err),
        }
    }
}
