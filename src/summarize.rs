//! Fills in missing post summaries with a hosted text-generation API.
//!
//! Every post without a `summary` (or `description`) is sent to the API as a
//! system prompt plus a user prompt built from its title and body. The reply
//! is flattened to plain text, cut to the configured maximum length, and
//! written back into the post's front matter. The body is kept as it was.
//!
//! The API sits behind the [`Summarizer`] trait; [`Client`] speaks the
//! chat-completions protocol over HTTP.

use crate::config::Summarize;
use crate::frontmatter::{self, Error as FrontmatterError};
use crate::metadata::PostMetadata;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Used when the project doesn't configure its own system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You write summaries for blog posts. \
    Reply with one or two plain sentences saying what the post is about, in \
    the language the post is written in. No Markdown, no quotes, no preamble.";

const TIMEOUT_SECONDS: u64 = 60;

// Only the start of long posts is sent.
const MAX_BODY_CHARS: usize = 8000;

/// One summary request.
#[derive(Clone, Debug, PartialEq)]
pub struct Request<'a> {
    pub system: &'a str,
    pub user: String,

    /// The longest acceptable summary, in characters.
    pub max_length: usize,
}

/// Something that turns a [`Request`] into summary text.
pub trait Summarizer {
    fn summarize(&self, request: &Request) -> Result<String>;
}

/// A chat-completions API client.
pub struct Client {
    http_client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl Client {
    /// Creates a client for the API described by `settings`.
    pub fn new(settings: &Summarize, api_key: String) -> Result<Client> {
        Client::with_builder(settings, api_key, reqwest::blocking::Client::builder())
    }

    fn with_builder(
        settings: &Summarize,
        api_key: String,
        builder: reqwest::blocking::ClientBuilder,
    ) -> Result<Client> {
        Ok(Client {
            http_client: builder.timeout(Duration::from_secs(TIMEOUT_SECONDS)).build()?,
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    max_tokens: usize,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Reply,
}

#[derive(Deserialize)]
struct Reply {
    content: Option<String>,
}

impl Summarizer for Client {
    fn summarize(&self, request: &Request) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            // a token is never shorter than a character
            max_tokens: request.max_length,
        };
        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }
        let reply: ChatResponse = response.json()?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(Error::EmptyReply)
    }
}

/// What a summarizing pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Posts that got a new summary.
    pub summarized: usize,

    /// Posts that already had one.
    pub unchanged: usize,

    /// Posts the API couldn't summarize. They are left untouched.
    pub failed: usize,
}

/// Gives every post under `posts_directory` that lacks a summary one from
/// `summarizer`, no longer than `max_length` characters.
///
/// API failures are logged and counted per post. Files that can't be read,
/// split or written stop the pass.
pub fn fill_missing_summaries<S: Summarizer>(
    posts_directory: &Path,
    summarizer: &S,
    system_prompt: &str,
    max_length: usize,
) -> Result<Report> {
    let mut report = Report::default();
    if !posts_directory.is_dir() {
        warn!(
            "Posts directory `{}` not found; nothing to summarize",
            posts_directory.display()
        );
        return Ok(report);
    }

    for result in WalkDir::new(posts_directory).sort_by_file_name() {
        let entry = result?;
        let path = entry.path();
        if !entry.file_type().is_file() || !matches!(path.extension(), Some(ext) if ext == "md") {
            continue;
        }

        let io_error = |err| Error::Io {
            path: path.to_owned(),
            err,
        };
        let input = std::fs::read_to_string(path).map_err(io_error)?;
        let mut document = frontmatter::split(&input).map_err(|err| Error::Frontmatter {
            path: path.to_owned(),
            err,
        })?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let metadata = PostMetadata::normalize(
            &document.metadata,
            &stem,
            DateTime::<Utc>::from(std::time::UNIX_EPOCH),
        );
        if !metadata.summary.is_empty() {
            report.unchanged += 1;
            continue;
        }

        let request = Request {
            system: system_prompt,
            user: user_prompt(&metadata.title, document.body, max_length),
            max_length,
        };
        let summary = match summarizer.summarize(&request).map(|s| clean(&s, max_length)) {
            Ok(Some(summary)) => summary,
            Ok(None) => {
                warn!("Empty summary for `{}`; leaving it as is", path.display());
                report.failed += 1;
                continue;
            }
            Err(err) => {
                warn!("Summarizing `{}` failed: {}", path.display(), err);
                report.failed += 1;
                continue;
            }
        };

        debug!("Summarized `{}`: {}", path.display(), summary);
        document
            .metadata
            .insert(Value::from("summary"), Value::from(summary));
        let output = format!(
            "---\n{}---\n{}",
            serde_yaml::to_string(&document.metadata)?,
            document.body
        );
        std::fs::write(path, output).map_err(io_error)?;
        report.summarized += 1;
    }

    info!(
        "Summarized {} posts ({} already had one, {} failed)",
        report.summarized, report.unchanged, report.failed
    );
    Ok(report)
}

/// The user prompt for one post.
pub fn user_prompt(title: &str, body: &str, max_length: usize) -> String {
    let body: String = body.trim().chars().take(MAX_BODY_CHARS).collect();
    format!(
        "Summarize this blog post in at most {} characters.\n\nTitle: {}\n\n{}",
        max_length, title, body
    )
}

/// Flattens a reply to a single line of plain text no longer than
/// `max_length` characters. Text that has to be cut is cut at a word boundary
/// where possible and ends with `…`. Returns `None` for a blank reply.
pub fn clean(reply: &str, max_length: usize) -> Option<String> {
    let text = reply.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = text
        .trim_matches(|c| matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}'))
        .trim();
    if text.is_empty() || max_length == 0 {
        return None;
    }
    if text.chars().count() <= max_length {
        return Some(text.to_owned());
    }

    let kept: String = text.chars().take(max_length - 1).collect();
    let kept = match kept.rfind(' ') {
        Some(space) if space > 0 => &kept[..space],
        _ => kept.as_str(),
    };
    Some(format!("{}…", kept.trim_end_matches([',', ';', ':', '.', ' '])))
}

/// Represents the result of a summarizing operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error summarizing posts.
#[derive(Debug)]
pub enum Error {
    /// Returned when a post can't be read or written.
    Io { path: PathBuf, err: std::io::Error },

    /// Returned when a post's front matter can't be split from its body.
    Frontmatter {
        path: PathBuf,
        err: FrontmatterError,
    },

    /// Returned when updated front matter can't be serialized.
    Yaml(serde_yaml::Error),

    /// Returned for WalkDir I/O errors.
    WalkDir(walkdir::Error),

    /// Returned when the request fails or the reply isn't the expected JSON.
    Http(reqwest::Error),

    /// Returned when the API answers with a non-success status.
    Status { status: u16, body: String },

    /// Returned when the reply has no text in it.
    EmptyReply,
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { path, err } => write!(f, "'{}': {}", path.display(), err),
            Error::Frontmatter { path, err } => {
                write!(f, "Reading front matter of '{}': {}", path.display(), err)
            }
            Error::Yaml(err) => err.fmt(f),
            Error::WalkDir(err) => err.fmt(f),
            Error::Http(err) => err.fmt(f),
            Error::Status { status, body } => {
                write!(f, "The API answered HTTP {}: {}", status, body.trim())
            }
            Error::EmptyReply => write!(f, "The API reply contained no text"),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { path: _, err } => Some(err),
            Error::Frontmatter { path: _, err } => Some(err),
            Error::Yaml(err) => Some(err),
            Error::WalkDir(err) => Some(err),
            Error::Http(err) => Some(err),
            Error::Status { .. } => None,
            Error::EmptyReply => None,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    /// Converts a [`serde_yaml::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator when serializing front matter.
    fn from(err: serde_yaml::Error) -> Error {
        Error::Yaml(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts a [`walkdir::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator while walking the posts directory.
    fn from(err: walkdir::Error) -> Error {
        Error::WalkDir(err)
    }
}

impl From<reqwest::Error> for Error {
    /// Converts a [`reqwest::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator for API requests.
    fn from(err: reqwest::Error) -> Error {
        Error::Http(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    struct Canned {
        reply: std::result::Result<String, u16>,
        requests: RefCell<Vec<String>>,
    }

    impl Canned {
        fn replying(reply: &str) -> Canned {
            Canned {
                reply: Ok(reply.to_owned()),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn failing(status: u16) -> Canned {
            Canned {
                reply: Err(status),
                requests: RefCell::new(Vec::new()),
            }
        }
    }

    impl Summarizer for Canned {
        fn summarize(&self, request: &Request) -> Result<String> {
            assert_eq!(request.system, DEFAULT_SYSTEM_PROMPT);
            self.requests.borrow_mut().push(request.user.clone());
            match &self.reply {
                Ok(reply) => Ok(reply.clone()),
                Err(status) => Err(Error::Status {
                    status: *status,
                    body: String::new(),
                }),
            }
        }
    }

    fn posts() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.md"),
            "---\ntitle: Tide Tables\ntags: [sea]\n---\n# Tides\n\nHigh water at noon.\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("b.md"),
            "---\ntitle: Done\nsummary: Already here.\n---\nbody\n",
        )
        .unwrap();
        fs::write(dir.path().join("c.md"), "Just a body.\n").unwrap();
        dir
    }

    #[test]
    fn test_fill_missing_summaries() -> Result<()> {
        let dir = posts();
        let summarizer = Canned::replying("  \"A note on\n  tides.\"  ");
        let report = fill_missing_summaries(dir.path(), &summarizer, DEFAULT_SYSTEM_PROMPT, 80)?;
        assert_eq!(
            report,
            Report {
                summarized: 2,
                unchanged: 1,
                failed: 0
            }
        );

        let requests = summarizer.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("Title: Tide Tables"), "{}", requests[0]);
        assert!(requests[0].contains("High water at noon."));
        assert!(requests[1].contains("Title: c"), "{}", requests[1]);

        let a = fs::read_to_string(dir.path().join("a.md")).unwrap();
        let document = frontmatter::split(&a).unwrap();
        assert_eq!(document.metadata.get("summary"), Some(&Value::from("A note on tides.")));
        assert_eq!(document.metadata.get("title"), Some(&Value::from("Tide Tables")));
        assert_eq!(document.body, "# Tides\n\nHigh water at noon.\n");

        let c = fs::read_to_string(dir.path().join("c.md")).unwrap();
        let document = frontmatter::split(&c).unwrap();
        assert_eq!(document.metadata.get("summary"), Some(&Value::from("A note on tides.")));
        assert_eq!(document.body, "Just a body.\n");

        assert_eq!(
            fs::read_to_string(dir.path().join("b.md")).unwrap(),
            "---\ntitle: Done\nsummary: Already here.\n---\nbody\n"
        );
        Ok(())
    }

    #[test]
    fn test_failures_leave_posts_untouched() -> Result<()> {
        let dir = posts();
        let before = fs::read_to_string(dir.path().join("a.md")).unwrap();
        let report =
            fill_missing_summaries(dir.path(), &Canned::failing(500), DEFAULT_SYSTEM_PROMPT, 80)?;
        assert_eq!(report.failed, 2);
        assert_eq!(report.summarized, 0);
        assert_eq!(fs::read_to_string(dir.path().join("a.md")).unwrap(), before);

        let report =
            fill_missing_summaries(dir.path(), &Canned::replying(" \n "), DEFAULT_SYSTEM_PROMPT, 80)?;
        assert_eq!(report.failed, 2);
        assert_eq!(fs::read_to_string(dir.path().join("a.md")).unwrap(), before);
        Ok(())
    }

    #[test]
    fn test_missing_posts_directory() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let report = fill_missing_summaries(
            &dir.path().join("posts"),
            &Canned::replying("unused"),
            DEFAULT_SYSTEM_PROMPT,
            80,
        )?;
        assert_eq!(report, Report::default());
        Ok(())
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("  one\n two  ", 80).as_deref(), Some("one two"));
        assert_eq!(clean("\u{201c}quoted\u{201d}", 80).as_deref(), Some("quoted"));
        assert_eq!(clean(" \n\t", 80), None);

        let cut = clean("the quick brown fox jumps over the lazy dog", 20).unwrap();
        assert_eq!(cut, "the quick brown…");
        assert!(cut.chars().count() <= 20);

        let cut = clean("一二三四五六七八九十", 5).unwrap();
        assert_eq!(cut, "一二三四…");
    }

    #[test]
    fn test_user_prompt() {
        let prompt = user_prompt("Title", &"x".repeat(MAX_BODY_CHARS + 10), 120);
        assert!(prompt.starts_with("Summarize this blog post in at most 120 characters."));
        assert!(prompt.contains("Title: Title"));
        assert_eq!(prompt.matches('x').count(), MAX_BODY_CHARS);
    }

    // Serves one canned HTTP response and hands back the raw request.
    fn serve_once(status: &str, body: &str) -> (String, std::thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).into_owned();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            match name.eq_ignore_ascii_case("content-length") {
                                true => value.trim().parse::<usize>().ok(),
                                false => None,
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (url, handle)
    }

    fn client(endpoint: String) -> Client {
        let settings = Summarize {
            model: String::from("small-model"),
            endpoint,
            api_key_env: String::from("UNUSED"),
            max_length: 80,
            system_prompt: None,
        };
        Client::with_builder(
            &settings,
            String::from("secret"),
            reqwest::blocking::Client::builder().no_proxy(),
        )
        .unwrap()
    }

    #[test]
    fn test_client_round_trip() -> Result<()> {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Tides, briefly."}}]}"#,
        );
        let request = Request {
            system: DEFAULT_SYSTEM_PROMPT,
            user: user_prompt("Tides", "High water.", 80),
            max_length: 80,
        };
        assert_eq!(client(url).summarize(&request)?, "Tides, briefly.");

        let raw = server.join().unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"), "{}", raw);
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer secret"), "{}", raw);
        let body: serde_json::Value =
            serde_json::from_str(&raw[raw.find("\r\n\r\n").unwrap() + 4..]).unwrap();
        assert_eq!(body["model"], "small-model");
        assert_eq!(body["max_tokens"], 80);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], request.user.as_str());
        Ok(())
    }

    #[test]
    fn test_client_error_status() {
        let (url, server) = serve_once("429 Too Many Requests", r#"{"error":"slow down"}"#);
        let request = Request {
            system: DEFAULT_SYSTEM_PROMPT,
            user: String::from("x"),
            max_length: 80,
        };
        match client(url).summarize(&request) {
            Err(Error::Status { status, body }) => {
                assert_eq!(status, 429);
                assert!(body.contains("slow down"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        server.join().unwrap();
    }
}
