//! Splits a source document into its YAML front matter and its Markdown body.
//!
//! A document may begin with a fenced block:
//!
//! ```md
//! ---
//! title: Hello, world!
//! date: 2025-03-05
//! tags: [greet]
//! ---
//! # Hello
//! ```
//!
//! Documents that don't open with a fence have no front matter; the whole file
//! is the body.

use serde_yaml::{Mapping, Value};
use std::fmt;

const FENCE: &str = "---";

/// A document split into its raw metadata mapping and its body text.
#[derive(Debug, Clone, PartialEq)]
pub struct Document<'a> {
    /// The parsed front matter. Empty when the document has no fence.
    pub metadata: Mapping,

    /// Everything after the closing fence.
    pub body: &'a str,
}

/// Splits `input` into front matter and body.
pub fn split(input: &str) -> Result<Document<'_>> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let (yaml, body) = match fence_indices(input)? {
        None => {
            return Ok(Document {
                metadata: Mapping::new(),
                body: input,
            })
        }
        Some((yaml_start, yaml_stop, body_start)) => {
            (&input[yaml_start..yaml_stop], &input[body_start..])
        }
    };

    let metadata = match serde_yaml::from_str::<Value>(yaml)? {
        Value::Null => Mapping::new(),
        Value::Mapping(mapping) => mapping,
        _ => return Err(Error::NotAMapping),
    };
    Ok(Document { metadata, body })
}

// Returns `(yaml_start, yaml_stop, body_start)` or `None` when the input
// doesn't start with a fence line.
fn fence_indices(input: &str) -> Result<Option<(usize, usize, usize)>> {
    let first_line_end = input.find('\n').unwrap_or(input.len());
    if input[..first_line_end].trim_end() != FENCE {
        return Ok(None);
    }

    let yaml_start = (first_line_end + 1).min(input.len());
    let mut offset = yaml_start;
    for line in input[yaml_start..].split_inclusive('\n') {
        if line.trim_end() == FENCE {
            return Ok(Some((yaml_start, offset, offset + line.len())));
        }
        offset += line.len();
    }
    Err(Error::FrontmatterMissingEndFence)
}

/// Represents the result of a front matter split.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error splitting front matter from a document.
#[derive(Debug)]
pub enum Error {
    /// Returned when the opening fence (`---`) was found but the closing one
    /// was missing.
    FrontmatterMissingEndFence,

    /// Returned when the front matter parsed but wasn't a key-value mapping.
    NotAMapping,

    /// Returned when there was an error parsing the front matter as YAML.
    DeserializeYaml(serde_yaml::Error),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::FrontmatterMissingEndFence => {
                write!(f, "Missing closing `---` for front matter")
            }
            Error::NotAMapping => {
                write!(f, "Front matter must be a mapping of keys to values")
            }
            Error::DeserializeYaml(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::FrontmatterMissingEndFence => None,
            Error::NotAMapping => None,
            Error::DeserializeYaml(err) => Some(err),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    /// Converts a [`serde_yaml::Error`] into an [`Error`]. It allows us to use
    /// the `?` operator for [`serde_yaml`] deserialization functions.
    fn from(err: serde_yaml::Error) -> Error {
        Error::DeserializeYaml(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_with_frontmatter() -> Result<()> {
        let doc = split("---\ntitle: Hello\ntags: [a, b]\n---\n# Body\n")?;
        assert_eq!(doc.body, "# Body\n");
        assert_eq!(
            doc.metadata.get("title").and_then(Value::as_str),
            Some("Hello")
        );
        assert_eq!(
            doc.metadata
                .get("tags")
                .and_then(Value::as_sequence)
                .map(|s| s.len()),
            Some(2)
        );
        Ok(())
    }

    #[test]
    fn test_split_without_frontmatter() -> Result<()> {
        let doc = split("# Just a body\n\nwith text")?;
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, "# Just a body\n\nwith text");
        Ok(())
    }

    #[test]
    fn test_split_crlf_and_empty_block() -> Result<()> {
        let doc = split("---\r\n---\r\nbody")?;
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, "body");
        Ok(())
    }

    #[test]
    fn test_horizontal_rule_in_body_is_kept() -> Result<()> {
        let doc = split("---\ntitle: x\n---\nabove\n\n---\n\nbelow\n")?;
        assert_eq!(doc.body, "above\n\n---\n\nbelow\n");
        Ok(())
    }

    #[test]
    fn test_missing_end_fence() {
        match split("---\ntitle: Hello\n# Body") {
            Err(Error::FrontmatterMissingEndFence) => {}
            other => panic!("expected missing end fence, got {:?}", other),
        }
    }

    #[test]
    fn test_non_mapping_frontmatter() {
        assert!(matches!(split("---\n- a\n- b\n---\n"), Err(Error::NotAMapping)));
    }

    #[test]
    fn test_malformed_yaml() {
        assert!(matches!(
            split("---\ntitle: [unclosed\n---\n"),
            Err(Error::DeserializeYaml(_))
        ));
    }
}
