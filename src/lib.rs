//! The library code for the `scriptorium` static blog generator. A build is a
//! one-way pipeline:
//!
//! 1. Reading posts from `posts/` and normalizing their front matter
//!    ([`crate::post`], [`crate::frontmatter`], [`crate::metadata`])
//! 2. Giving each post a unique `posts/<year>/<month>/<slug>.html` path
//!    ([`crate::slug`])
//! 3. Rendering Markdown bodies with heading anchors and highlighted code
//!    ([`crate::markdown`])
//! 4. Composing pages from `{{key}}` templates and writing them to disk
//!    ([`crate::template`], [`crate::write`]), along with the index, the
//!    year-grouped archive ([`crate::archive`]) and the Atom feed
//!    ([`crate::feed`])
//!
//! [`crate::build::build_site`] runs the whole thing. Every post is parsed
//! before any page is written, so a bad post never leaves a half-built site.
//! The optional [`crate::optimize`] pass minifies the output afterwards, and
//! [`crate::deploy`] pushes it to a git branch. Outside the build,
//! [`crate::summarize`] writes missing post summaries with a hosted
//! text-generation API.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod archive;
pub mod build;
pub mod config;
pub mod deploy;
pub mod feed;
pub mod frontmatter;
pub mod markdown;
pub mod metadata;
pub mod optimize;
pub mod post;
pub mod slug;
pub mod summarize;
pub mod template;
pub mod write;
