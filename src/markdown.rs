//! Converts post bodies from Markdown to HTML.
//!
//! On top of [`pulldown_cmark`]'s own rendering, the event stream goes through
//! three passes: bare URLs in text become links, fenced code blocks are
//! highlighted with [`syntect`], and every heading without an explicit id gets
//! a unique anchor id.

use crate::slug::{slugify, unique_in};
use log::{debug, warn};
use pulldown_cmark::{
    html, CodeBlockKind, CowStr, Event, LinkType, Options, Parser, Tag, TagEnd,
    TextMergeStream,
};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

/// The theme used when the configured one doesn't exist.
pub const DEFAULT_THEME: &str = "InspiredGitHub";

/// Converts markdown to HTML, appending the result to `out`.
pub fn to_html(out: &mut String, markdown: &str, highlighter: &Highlighter) {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

    let event_converter = EventConverter { highlighter };
    let events = event_converter
        .convert(TextMergeStream::new(Parser::new_ext(markdown, options)));
    html::push_html(out, assign_heading_ids(events).into_iter());
}

/// Syntax highlighting for fenced code blocks. Loading the syntax and theme
/// sets is expensive, so one [`Highlighter`] is shared by a whole build.
pub struct Highlighter {
    syntaxes: SyntaxSet,
    theme: Theme,
}

impl Highlighter {
    /// Loads the default syntaxes and the theme named `theme_name`. An unknown
    /// theme name falls back to [`DEFAULT_THEME`].
    pub fn new(theme_name: &str) -> Highlighter {
        let mut themes = ThemeSet::load_defaults().themes;
        let theme = match themes.remove(theme_name) {
            Some(theme) => theme,
            None => {
                warn!(
                    "Unknown highlight theme `{}`; using `{}`",
                    theme_name, DEFAULT_THEME
                );
                themes.remove(DEFAULT_THEME).unwrap_or_default()
            }
        };
        Highlighter {
            syntaxes: SyntaxSet::load_defaults_newlines(),
            theme,
        }
    }

    /// Highlights `code` as `language` (a name or file extension, e.g. `rust`
    /// or `rs`).
    pub fn highlight(&self, code: &str, language: &str) -> Result<String> {
        let syntax = self
            .syntaxes
            .find_syntax_by_token(language)
            .ok_or_else(|| Error::UnknownLanguage(language.to_owned()))?;
        Ok(highlighted_html_for_string(
            code,
            &self.syntaxes,
            syntax,
            &self.theme,
        )?)
    }
}

impl Default for Highlighter {
    fn default() -> Highlighter {
        Highlighter::new(DEFAULT_THEME)
    }
}

struct FencedCode<'a> {
    info: CowStr<'a>,
    text: String,
}

struct EventConverter<'h> {
    highlighter: &'h Highlighter,
}

impl EventConverter<'_> {
    fn convert<'a>(&self, events: impl Iterator<Item = Event<'a>>) -> Vec<Event<'a>> {
        let mut out = Vec::new();
        let mut verbatim_depth = 0usize;
        let mut raw_depth = 0usize;
        let mut code: Option<FencedCode<'a>> = None;

        for event in events {
            if let Some(block) = code.as_mut() {
                match event {
                    Event::Text(text) => block.text.push_str(&text),
                    Event::End(TagEnd::CodeBlock) => {
                        if let Some(block) = code.take() {
                            out.extend(self.fenced_code(block));
                        }
                    }
                    // fenced code blocks only ever contain text
                    _ => {}
                }
                continue;
            }

            match event {
                Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                    code = Some(FencedCode {
                        info,
                        text: String::new(),
                    });
                }
                // text inside these is never autolinked
                Event::Start(
                    tag @ (Tag::Link { .. }
                    | Tag::Image { .. }
                    | Tag::CodeBlock(CodeBlockKind::Indented)),
                ) => {
                    verbatim_depth += 1;
                    out.push(Event::Start(tag));
                }
                Event::End(end @ (TagEnd::Link | TagEnd::Image | TagEnd::CodeBlock)) => {
                    verbatim_depth = verbatim_depth.saturating_sub(1);
                    out.push(Event::End(end));
                }
                Event::InlineHtml(raw) => {
                    for caps in raw_tag_pattern().captures_iter(&raw) {
                        match caps[1].is_empty() {
                            true => raw_depth += 1,
                            false => raw_depth = raw_depth.saturating_sub(1),
                        }
                    }
                    out.push(Event::InlineHtml(raw));
                }
                Event::Text(text) if verbatim_depth == 0 && raw_depth == 0 => {
                    out.extend(autolink(text))
                }
                event => out.push(event),
            }
        }
        out
    }

    // Replaces a fenced code block with highlighted HTML, or passes it
    // through as a plain (escaped) block if that isn't possible.
    fn fenced_code<'a>(&self, block: FencedCode<'a>) -> Vec<Event<'a>> {
        let language = code_language(&block.info);
        if !language.is_empty() {
            match self.highlighter.highlight(&block.text, &language) {
                Ok(highlighted) => {
                    return vec![Event::Html(
                        format!(
                            "<div class=\"highlight\" data-lang=\"{}\">{}</div>\n",
                            language, highlighted
                        )
                        .into(),
                    )]
                }
                Err(Error::UnknownLanguage(language)) => {
                    debug!("No grammar for `{}`; rendering as plain text", language)
                }
                Err(err) => warn!("Highlighting `{}` code block failed: {}", language, err),
            }
        }
        vec![
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(block.info))),
            Event::Text(block.text.into()),
            Event::End(TagEnd::CodeBlock),
        ]
    }
}

// The first token of a fence's info string, restricted to characters that are
// safe to drop into an attribute.
fn code_language(info: &str) -> String {
    info.split(|c: char| c.is_whitespace() || c == ',' || c == '{')
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '+' | '-' | '#' | '_' | '.'))
        .collect()
}

// Raw inline tags whose text content is left alone.
fn raw_tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        Regex::new(r"(?i)<(/?)(?:a|code|pre)(?:\s|>|$)").expect("raw tag pattern is valid")
    })
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| {
        Regex::new(r#"https?://[^\s<>"'`]+"#).expect("url pattern is valid")
    })
}

// Splits a text event around bare URLs, wrapping each URL in a link.
fn autolink(text: CowStr<'_>) -> Vec<Event<'_>> {
    if !url_pattern().is_match(&text) {
        return vec![Event::Text(text)];
    }

    let mut events = Vec::new();
    let mut last = 0;
    for found in url_pattern().find_iter(&text) {
        let url = trim_url(found.as_str());
        if url.len() <= "https://".len() {
            continue;
        }
        if found.start() > last {
            events.push(Event::Text(text[last..found.start()].to_owned().into()));
        }
        events.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: url.to_owned().into(),
            title: CowStr::from(""),
            id: CowStr::from(""),
        }));
        events.push(Event::Text(url.to_owned().into()));
        events.push(Event::End(TagEnd::Link));
        last = found.start() + url.len();
    }
    if last < text.len() {
        events.push(Event::Text(text[last..].to_owned().into()));
    }
    events
}

// Drops trailing sentence punctuation, and closing parentheses that don't
// have an opening partner inside the URL.
fn trim_url(url: &str) -> &str {
    let mut url = url;
    loop {
        let trimmed = url.trim_end_matches(['.', ',', ';', ':', '!', '?']);
        let trimmed = match trimmed.strip_suffix(')') {
            Some(inner) if inner.matches('(').count() < inner.matches(')').count() + 1 => inner,
            _ => trimmed,
        };
        if trimmed.len() == url.len() {
            return url;
        }
        url = trimmed;
    }
}

fn html_id_pattern() -> &'static Regex {
    static ID: OnceLock<Regex> = OnceLock::new();
    ID.get_or_init(|| {
        Regex::new(r#"(?:^|\s)id\s*=\s*["']([^"']+)["']"#).expect("id pattern is valid")
    })
}

// Gives every heading without an id a unique one derived from its text. Ids
// that already exist in the document (explicit heading ids and ids in raw
// HTML) are reserved first.
fn assign_heading_ids(mut events: Vec<Event<'_>>) -> Vec<Event<'_>> {
    let mut taken: HashSet<String> = HashSet::new();
    for event in &events {
        match event {
            Event::Start(Tag::Heading { id: Some(id), .. }) => {
                taken.insert(id.to_string());
            }
            Event::Html(raw) | Event::InlineHtml(raw) => {
                for caps in html_id_pattern().captures_iter(raw) {
                    taken.insert(caps[1].to_owned());
                }
            }
            _ => {}
        }
    }

    for i in 0..events.len() {
        if !matches!(events[i], Event::Start(Tag::Heading { id: None, .. })) {
            continue;
        }
        let base = match slugify(&heading_text(&events[i + 1..])) {
            slug if slug.is_empty() => String::from("section"),
            slug => slug,
        };
        let anchor = unique_in(&mut taken, &base);
        if let Event::Start(Tag::Heading { id, .. }) = &mut events[i] {
            *id = Some(anchor.into());
        }
    }
    events
}

// Collects the text of a heading from the events following its start tag.
fn heading_text(events: &[Event<'_>]) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            Event::End(TagEnd::Heading(_)) => break,
            Event::Text(t) | Event::Code(t) => text.push_str(t),
            _ => {}
        }
    }
    text
}

/// The result of a highlighting operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error highlighting a code block. Neither variant is fatal;
/// the block is rendered as plain text instead.
#[derive(Debug)]
pub enum Error {
    /// Returned when no grammar matches the code block's language.
    UnknownLanguage(String),

    /// Returned when [`syntect`] fails while highlighting.
    Highlight(syntect::Error),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownLanguage(language) => {
                write!(f, "no syntax found for language `{}`", language)
            }
            Error::Highlight(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UnknownLanguage(_) => None,
            Error::Highlight(err) => Some(err),
        }
    }
}

impl From<syntect::Error> for Error {
    /// Converts a [`syntect::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator for highlighting functions.
    fn from(err: syntect::Error) -> Error {
        Error::Highlight(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn render(markdown: &str) -> String {
        let mut out = String::new();
        to_html(&mut out, markdown, &Highlighter::default());
        out
    }

    #[test]
    fn test_heading_ids() {
        let html = render("# Hello World!\n\n## Second `part`\n");
        assert!(html.contains(r#"<h1 id="hello-world">"#), "{}", html);
        assert!(html.contains(r#"<h2 id="second-part">"#), "{}", html);
    }

    #[test]
    fn test_duplicate_headings_get_suffixes() {
        let html = render("## API 设计\n\ntext\n\n## API 设计\n");
        assert!(html.contains(r#"<h2 id="api-设计">"#), "{}", html);
        assert!(html.contains(r#"<h2 id="api-设计-1">"#), "{}", html);
    }

    #[test]
    fn test_existing_ids_are_reserved() {
        let html = render(
            "<div id=\"intro\"></div>\n\n# Intro\n\n# Custom {#custom}\n\n# Custom\n",
        );
        assert!(html.contains(r#"<h1 id="intro-1">"#), "{}", html);
        assert!(html.contains(r#"<h1 id="custom">"#), "{}", html);
        assert!(html.contains(r#"<h1 id="custom-1">"#), "{}", html);
    }

    #[test]
    fn test_empty_heading_gets_fallback_id() {
        let html = render("# !!!\n");
        assert!(html.contains(r#"<h1 id="section">"#), "{}", html);
    }

    #[test]
    fn test_code_block_highlighting() {
        let html = render("```rust\nfn main() {}\n```\n");
        assert!(html.contains(r#"<div class="highlight" data-lang="rust">"#), "{}", html);
        assert!(html.contains("<pre"), "{}", html);
        assert!(!html.contains("language-rust"), "{}", html);
    }

    #[test]
    fn test_unknown_language_falls_back_to_plain() {
        let html = render("```klingon\nif x < 1 && y > 2\n```\n");
        assert!(
            html.contains(r#"<pre><code class="language-klingon">"#),
            "{}",
            html
        );
        assert!(html.contains("if x &lt; 1 &amp;&amp; y &gt; 2"), "{}", html);
    }

    #[test]
    fn test_raw_html_passthrough() {
        let html = render("<span class=\"x\">raw</span>\n");
        assert!(html.contains(r#"<span class="x">raw</span>"#), "{}", html);
    }

    #[test]
    fn test_smart_punctuation() {
        let html = render("\"quoted\" -- dash\n");
        assert!(html.contains("\u{201c}quoted\u{201d}"), "{}", html);
        assert!(html.contains("\u{2013}"), "{}", html);
    }

    #[test]
    fn test_autolink() {
        let html = render("See https://example.com/a_b?x=1. And (https://rust-lang.org).\n");
        assert!(
            html.contains(r#"<a href="https://example.com/a_b?x=1">https://example.com/a_b?x=1</a>."#),
            "{}",
            html
        );
        assert!(
            html.contains(r#"(<a href="https://rust-lang.org">https://rust-lang.org</a>)."#),
            "{}",
            html
        );
    }

    #[test]
    fn test_autolink_skips_existing_links_and_code() {
        let html = render("[site](https://example.com) `https://code.example`\n");
        assert_eq!(html.matches("<a ").count(), 1, "{}", html);
        assert!(html.contains("<code>https://code.example</code>"), "{}", html);

        let html = render("    https://indented.example\n");
        assert!(!html.contains("<a "), "{}", html);
    }

    #[test]
    fn test_autolink_skips_raw_html_links() {
        let html = render("See <a href=\"https://x.org\">https://x.org</a> now.\n");
        assert_eq!(html.matches("<a ").count(), 1, "{}", html);

        let html = render("Run <code>curl https://x.org</code> then https://y.org\n");
        assert!(html.contains("<code>curl https://x.org</code>"), "{}", html);
        assert!(html.contains(r#"<a href="https://y.org">"#), "{}", html);
    }

    #[test]
    fn test_data_attributes_are_not_reserved() {
        let html = render("<div data-id=\"intro\"></div>\n\n# Intro\n");
        assert!(html.contains(r#"<h1 id="intro">"#), "{}", html);
    }

    #[test]
    fn test_unknown_theme_falls_back_to_default() -> Result<()> {
        let code = "fn main() {}\n";
        let fallback = Highlighter::new("no-such-theme").highlight(code, "rs")?;
        assert_eq!(fallback, Highlighter::default().highlight(code, "rs")?);
        assert_ne!(
            fallback,
            Highlighter::new("base16-ocean.dark").highlight(code, "rs")?
        );
        Ok(())
    }

    #[test]
    fn test_trim_url() {
        assert_eq!(trim_url("https://x.org/a."), "https://x.org/a");
        assert_eq!(trim_url("https://x.org/a)"), "https://x.org/a");
        assert_eq!(trim_url("https://x.org/(a)"), "https://x.org/(a)");
        assert_eq!(trim_url("https://x.org/a)."), "https://x.org/a");
    }

    #[test]
    fn test_highlight_unknown_language() {
        let highlighter = Highlighter::default();
        assert!(matches!(
            highlighter.highlight("x", "klingon"),
            Err(Error::UnknownLanguage(_))
        ));
        assert!(highlighter.highlight("let x = 1;\n", "rs").is_ok());
    }
}
