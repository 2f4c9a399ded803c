//! Loads the project file (`site.yaml`) into a [`Config`].

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// The name of the project file searched for by [`Config::from_directory`].
pub const PROJECT_FILE: &str = "site.yaml";

/// The author of the site, used in page metadata and the Atom feed.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Author {
    pub name: String,

    #[serde(default)]
    pub email: Option<String>,
}

/// Where and how `deploy` pushes the output directory.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Deploy {
    /// The git remote URL.
    pub remote: String,

    /// The branch to force-push to.
    #[serde(default = "default_branch")]
    pub branch: String,

    /// The commit message. Defaults to `Deploy <UTC timestamp>`.
    #[serde(default)]
    pub message: Option<String>,
}

/// The hosted text-generation API used by `summarize` to fill in missing post
/// summaries. Any endpoint speaking the chat-completions protocol works.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Summarize {
    /// The model name sent with every request.
    pub model: String,

    /// The chat-completions URL.
    #[serde(default = "default_summarize_endpoint")]
    pub endpoint: String,

    /// The environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// The longest summary accepted, in characters.
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Replaces the built-in system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_summarize_endpoint() -> String {
    String::from("https://api.openai.com/v1/chat/completions")
}

fn default_api_key_env() -> String {
    String::from("OPENAI_API_KEY")
}

fn default_max_length() -> usize {
    160
}

fn default_branch() -> String {
    String::from("gh-pages")
}

fn default_base_path() -> String {
    String::from("/")
}

fn default_stylesheets() -> Vec<String> {
    vec![String::from("assets/css/style.css")]
}

fn default_highlight_theme() -> String {
    String::from(crate::markdown::DEFAULT_THEME)
}

#[derive(Deserialize)]
struct Project {
    title: String,

    #[serde(default)]
    description: String,

    #[serde(default)]
    author: Option<Author>,

    #[serde(default)]
    keywords: Vec<String>,

    site_url: Url,

    #[serde(default = "default_base_path")]
    base_path: String,

    #[serde(default)]
    github_username: String,

    #[serde(default = "default_stylesheets")]
    stylesheets: Vec<String>,

    #[serde(default = "default_highlight_theme")]
    highlight_theme: String,

    #[serde(default)]
    minify: bool,

    #[serde(default)]
    deploy: Option<Deploy>,

    #[serde(default)]
    summarize: Option<Summarize>,
}

/// The resolved configuration for one invocation. Built once at start-up and
/// passed by reference to every stage.
#[derive(Clone, Debug)]
pub struct Config {
    pub title: String,
    pub description: String,
    pub author: Option<Author>,
    pub keywords: Vec<String>,

    /// The absolute URL of the site root. Always ends with `/`.
    pub site_url: Url,

    /// The path prefix for site-relative links. Always starts and ends with
    /// `/`.
    pub base_path: String,

    pub github_username: String,
    pub stylesheets: Vec<String>,
    pub highlight_theme: String,
    pub minify: bool,
    pub deploy: Option<Deploy>,
    pub summarize: Option<Summarize>,

    /// The directory containing the project file.
    pub root_directory: PathBuf,

    /// `{root_directory}/posts`
    pub posts_source_directory: PathBuf,

    /// `{root_directory}/theme`
    pub theme_directory: PathBuf,

    /// `{root_directory}/assets`
    pub assets_directory: PathBuf,

    /// Where the site is written. Defaults to `{root_directory}/dist`.
    pub output_directory: PathBuf,
}

impl Config {
    /// Searches `dir` and then each of its ancestors for a project file and
    /// loads the first one found.
    pub fn from_directory(dir: &Path, output_directory: Option<&Path>) -> Result<Config> {
        let dir = dir
            .canonicalize()
            .with_context(|| format!("Resolving project directory `{}`", dir.display()))?;
        let mut current = Some(dir.as_path());
        while let Some(dir) = current {
            let path = dir.join(PROJECT_FILE);
            if path.is_file() {
                return Config::from_project_file(&path, output_directory)
                    .with_context(|| format!("Loading configuration from `{}`", path.display()));
            }
            current = dir.parent();
        }
        Err(anyhow!(
            "Could not find `{}` in any parent directory",
            PROJECT_FILE
        ))
    }

    /// Loads a specific project file. Directories are resolved relative to
    /// the file's parent directory.
    pub fn from_project_file(path: &Path, output_directory: Option<&Path>) -> Result<Config> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Opening project file `{}`", path.display()))?;
        let project_root = path.parent().ok_or_else(|| {
            anyhow!(
                "Can't get parent directory for provided project file path '{:?}'",
                path
            )
        })?;
        Config::from_yaml(&contents, project_root, output_directory)
    }

    /// Resolves project file contents against `project_root`.
    pub fn from_yaml(
        yaml: &str,
        project_root: &Path,
        output_directory: Option<&Path>,
    ) -> Result<Config> {
        let project: Project = serde_yaml::from_str(yaml)?;
        if project.title.trim().is_empty() {
            return Err(anyhow!("`title` must not be empty"));
        }
        Ok(Config {
            title: project.title,
            description: project.description,
            author: project.author,
            keywords: project.keywords,
            site_url: with_trailing_slash(project.site_url),
            base_path: normalize_base_path(&project.base_path),
            github_username: project.github_username,
            stylesheets: project.stylesheets,
            highlight_theme: project.highlight_theme,
            minify: project.minify,
            deploy: project.deploy,
            summarize: project.summarize,
            root_directory: project_root.to_owned(),
            posts_source_directory: project_root.join("posts"),
            theme_directory: project_root.join("theme"),
            assets_directory: project_root.join("assets"),
            output_directory: match output_directory {
                Some(dir) => dir.to_owned(),
                None => project_root.join("dist"),
            },
        })
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Normalizes a base path so that it starts and ends with `/` (`blog` becomes
/// `/blog/`, an empty path becomes `/`).
pub fn normalize_base_path(base_path: &str) -> String {
    match base_path.trim().trim_matches('/') {
        "" => String::from("/"),
        trimmed => format!("/{}/", trimmed),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() -> Result<()> {
        let root = Path::new("/project");
        let config = Config::from_yaml(
            "title: Blog\nsite_url: https://example.com/blog\n",
            root,
            None,
        )?;
        assert_eq!(config.site_url.as_str(), "https://example.com/blog/");
        assert_eq!(config.base_path, "/");
        assert_eq!(config.stylesheets, vec!["assets/css/style.css"]);
        assert_eq!(config.highlight_theme, "InspiredGitHub");
        assert!(!config.minify);
        assert_eq!(config.deploy, None);
        assert_eq!(config.summarize, None);
        assert_eq!(config.posts_source_directory, root.join("posts"));
        assert_eq!(config.output_directory, root.join("dist"));
        Ok(())
    }

    #[test]
    fn test_full_project() -> Result<()> {
        let config = Config::from_yaml(
            "title: Blog\n\
             description: Words\n\
             author: {name: Ada, email: ada@example.com}\n\
             keywords: [rust]\n\
             site_url: https://example.com/\n\
             base_path: blog\n\
             minify: true\n\
             deploy: {remote: 'git@example.com:me/me.git'}\n\
             summarize: {model: small-model}\n",
            Path::new("/p"),
            Some(Path::new("/out")),
        )?;
        assert_eq!(config.base_path, "/blog/");
        assert_eq!(config.author.unwrap().email.as_deref(), Some("ada@example.com"));
        assert!(config.minify);
        let deploy = config.deploy.unwrap();
        assert_eq!(deploy.branch, "gh-pages");
        assert_eq!(deploy.message, None);
        let summarize = config.summarize.unwrap();
        assert_eq!(summarize.model, "small-model");
        assert_eq!(
            summarize.endpoint,
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(summarize.api_key_env, "OPENAI_API_KEY");
        assert_eq!(summarize.max_length, 160);
        assert_eq!(config.output_directory, PathBuf::from("/out"));
        Ok(())
    }

    #[test]
    fn test_missing_required_field() {
        assert!(Config::from_yaml("title: Blog\n", Path::new("/p"), None).is_err());
    }

    #[test]
    fn test_from_directory_searches_upward() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join(PROJECT_FILE),
            "title: Blog\nsite_url: https://example.com/\n",
        )?;
        let nested = dir.path().join("posts/2025");
        std::fs::create_dir_all(&nested)?;
        let config = Config::from_directory(&nested, None)?;
        assert_eq!(config.root_directory, dir.path().canonicalize()?);
        Ok(())
    }

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "/");
        assert_eq!(normalize_base_path("/"), "/");
        assert_eq!(normalize_base_path("blog"), "/blog/");
        assert_eq!(normalize_base_path("/a/b"), "/a/b/");
    }
}
