//! The post-build optimization pass: minifies every HTML, CSS and JavaScript
//! file under the output directory in place.
//!
//! Minification is best effort per file. A file that can't be read, parsed or
//! written is logged and left as it was; the rest of the batch carries on.

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use log::{debug, info, warn};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// The outcome of an optimization pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Report {
    /// Files that were minified and rewritten.
    pub optimized: usize,

    /// Files that were left untouched because something went wrong.
    pub skipped: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Html,
    Css,
    Js,
}

impl Kind {
    fn from_path(path: &Path) -> Option<Kind> {
        match path.extension()?.to_str()? {
            "html" | "htm" => Some(Kind::Html),
            "css" => Some(Kind::Css),
            "js" => Some(Kind::Js),
            _ => None,
        }
    }
}

/// Minifies every `.html`, `.css` and `.js` file under `directory`.
pub fn optimize_directory(directory: &Path) -> Result<Report> {
    if !directory.is_dir() {
        return Err(Error::MissingDirectory(directory.to_owned()));
    }

    let mut report = Report::default();
    for result in WalkDir::new(directory).sort_by_file_name() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry during optimization: {}", err);
                report.skipped += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = Kind::from_path(entry.path()) else {
            continue;
        };
        match optimize_file(entry.path(), kind) {
            Ok(()) => {
                debug!("Optimized `{}`", entry.path().display());
                report.optimized += 1;
            }
            Err(err) => {
                warn!("Leaving `{}` unoptimized: {}", entry.path().display(), err);
                report.skipped += 1;
            }
        }
    }
    info!(
        "Optimized {} files ({} skipped)",
        report.optimized, report.skipped
    );
    Ok(report)
}

fn optimize_file(path: &Path, kind: Kind) -> std::result::Result<(), String> {
    let source = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let minified = match kind {
        Kind::Html => minify_html(&source),
        Kind::Css => minify_css(&source)?,
        Kind::Js => minify_js(&source)?,
    };
    std::fs::write(path, minified).map_err(|e| e.to_string())
}

/// Minifies an HTML document, including inline CSS and JavaScript.
pub fn minify_html(source: &str) -> String {
    let cfg = minify_html::Cfg {
        do_not_minify_doctype: true,
        ensure_spec_compliant_unquoted_attribute_values: true,
        keep_closing_tags: true,
        keep_html_and_head_opening_tags: true,
        keep_spaces_between_attributes: false,
        keep_comments: false,
        keep_input_type_text_attr: true,
        keep_ssi_comments: false,
        preserve_brace_template_syntax: false,
        preserve_chevron_percent_template_syntax: false,
        minify_css: true,
        minify_js: true,
        remove_bangs: false,
        remove_processing_instructions: false,
    };
    String::from_utf8_lossy(&minify_html::minify(source.as_bytes(), &cfg)).into_owned()
}

/// Minifies a stylesheet.
pub fn minify_css(source: &str) -> std::result::Result<String, String> {
    let mut stylesheet =
        StyleSheet::parse(source, ParserOptions::default()).map_err(|e| e.to_string())?;
    stylesheet
        .minify(MinifyOptions::default())
        .map_err(|e| e.to_string())?;
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;
    Ok(result.code)
}

/// Minifies a script. Top-level names are left alone so that scripts sharing
/// globals keep working.
pub fn minify_js(source: &str) -> std::result::Result<String, String> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, SourceType::cjs()).parse();
    if !ret.errors.is_empty() {
        return Err(format!("{} JavaScript syntax error(s)", ret.errors.len()));
    }
    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);
    Ok(Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code)
}

/// Represents the result of an optimization pass.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error that stops the optimization pass altogether.
/// Per-file problems are logged rather than returned.
#[derive(Debug)]
pub enum Error {
    /// Returned when the directory to optimize doesn't exist.
    MissingDirectory(PathBuf),
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MissingDirectory(path) => {
                write!(f, "Output directory '{}' does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MissingDirectory(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn test_minify_html() {
        let html = minify_html("<!DOCTYPE html>\n<html>\n  <body>\n    <p>  Hello   </p>\n  </body>\n</html>\n");
        assert!(html.len() < 70, "{}", html);
        assert!(!html.contains("\n"), "{}", html);
        assert!(html.contains("Hello"));
    }

    #[test]
    fn test_minify_css() {
        let css = minify_css("body {\n  color: #ffffff;\n  margin: 0px;\n}\n").unwrap();
        assert!(!css.contains('\n'), "{}", css);
        assert!(css.starts_with("body{"), "{}", css);
    }

    #[test]
    fn test_minify_js() {
        let js = minify_js("function add(first, second) {\n  return first + second;\n}\n").unwrap();
        assert!(js.len() < 50, "{}", js);
        assert!(minify_js("function (").is_err());
    }

    #[test]
    fn test_optimize_directory_is_best_effort() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<p>  hi  </p>\n\n").unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/app.js"), "let x = (;").unwrap();
        fs::write(dir.path().join("assets/site.css"), "a {\n  color: red;\n}\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "  untouched  ").unwrap();

        let report = optimize_directory(dir.path())?;
        assert_eq!(report, Report { optimized: 2, skipped: 1 });
        assert_eq!(
            fs::read_to_string(dir.path().join("assets/app.js")).unwrap(),
            "let x = (;"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
            "  untouched  "
        );
        Ok(())
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            optimize_directory(&dir.path().join("nope")),
            Err(Error::MissingDirectory(_))
        ));
    }
}
