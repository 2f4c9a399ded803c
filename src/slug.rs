//! Slug generation and output path allocation.
//!
//! [`slugify`] turns a title into a URL-safe token that keeps ASCII
//! alphanumerics and CJK characters. [`PathAllocator`] turns a slug plus a
//! date into a unique `posts/<year>/<month>/<slug>.html` path, appending `-1`,
//! `-2`, etc. on collision.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The output subdirectory that post pages live under.
pub const POSTS_DIRECTORY: &str = "posts";

const HTML_EXTENSION: &str = ".html";

/// Lowercases `input` and reduces it to ASCII letters, digits, CJK characters,
/// `-`, `_` and `.`. Whitespace and path separators become hyphens, runs of
/// hyphens collapse, and leading/trailing hyphens and dots are trimmed. The
/// result may be empty.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.chars().flat_map(char::to_lowercase) {
        let c = if c.is_whitespace() || c == '/' || c == '\\' {
            '-'
        } else {
            c
        };
        if !is_slug_char(c) {
            continue;
        }
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug.trim_matches(|c| c == '-' || c == '.').to_owned()
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.') || is_cjk(c)
}

/// Reports whether `c` falls in one of the CJK blocks: unified ideographs
/// (including extension A and compatibility ideographs), kana and hangul.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30ff}'
        | '\u{3400}'..='\u{4dbf}'
        | '\u{4e00}'..='\u{9fff}'
        | '\u{ac00}'..='\u{d7af}'
        | '\u{f900}'..='\u{faff}'
        | '\u{20000}'..='\u{2a6df}')
}

/// Hands out unique output paths for posts. A candidate path is taken only if
/// it hasn't been handed out before in this build and no file exists at that
/// location under the output directory.
pub struct PathAllocator<'a> {
    /// The root output directory, probed for pre-existing files.
    output_directory: &'a Path,

    /// Paths (relative to `output_directory`) already handed out.
    emitted: HashSet<PathBuf>,
}

impl<'a> PathAllocator<'a> {
    pub fn new(output_directory: &'a Path) -> PathAllocator<'a> {
        PathAllocator {
            output_directory,
            emitted: HashSet::new(),
        }
    }

    /// Allocates a path of the form `posts/{prefix}/{slug}.html`, where the
    /// slug is `base_slug` or `base_slug-N` for the smallest free `N`. The
    /// returned path is relative to the output directory.
    pub fn allocate(&mut self, prefix: &str, base_slug: &str) -> PathBuf {
        let directory = Path::new(POSTS_DIRECTORY).join(prefix);
        let mut counter = 0usize;
        loop {
            let candidate = match counter {
                0 => format!("{}{}", base_slug, HTML_EXTENSION),
                n => format!("{}-{}{}", base_slug, n, HTML_EXTENSION),
            };
            let relative = directory.join(candidate);
            if !self.emitted.contains(&relative)
                && !self.output_directory.join(&relative).exists()
            {
                self.emitted.insert(relative.clone());
                return relative;
            }
            counter += 1;
        }
    }
}

/// Makes a slug unique among `taken`, appending `-1`, `-2`, etc. as needed,
/// and records the result in `taken`.
pub fn unique_in(taken: &mut HashSet<String>, base: &str) -> String {
    let mut candidate = base.to_owned();
    let mut counter = 0usize;
    while taken.contains(&candidate) {
        counter += 1;
        candidate = format!("{}-{}", base, counter);
    }
    taken.insert(candidate.clone());
    candidate
}
