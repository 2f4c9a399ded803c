//! Publishes the output directory by force-pushing it to a branch of a git
//! remote. The output directory itself becomes the working tree of a
//! throwaway repository; the project's own repository is never touched.

use crate::config::Deploy;
use chrono::Utc;
use log::{debug, info};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

const REMOTE_NAME: &str = "origin";

/// What a deploy did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// A commit was created and pushed.
    Pushed,

    /// The output directory matched the last deployed commit.
    NothingToDeploy,
}

/// Runs `git` inside one directory.
struct Git<'a> {
    directory: &'a Path,
}

impl Git<'_> {
    /// Runs `git {args}` and returns its standard output. A non-zero exit is
    /// an error carrying the command's standard error.
    fn run(&self, args: &[&str]) -> Result<String> {
        let command = format!("git {}", args.join(" "));
        debug!("Running `{}` in `{}`", command, self.directory.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(self.directory)
            .output()
            .map_err(|err| Error::Spawn {
                command: command.clone(),
                err,
            })?;
        if !output.status.success() {
            return Err(Error::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Commits the contents of `output_directory` and force-pushes them to
/// `deploy.branch` on `deploy.remote`.
pub fn deploy(output_directory: &Path, deploy: &Deploy) -> Result<Outcome> {
    if !output_directory.is_dir() {
        return Err(Error::MissingOutput(output_directory.to_owned()));
    }
    let git = Git {
        directory: output_directory,
    };

    if !output_directory.join(".git").exists() {
        git.run(&["init"])?;
    }

    let has_origin = git
        .run(&["remote"])?
        .lines()
        .any(|remote| remote.trim() == REMOTE_NAME);
    match has_origin {
        true => git.run(&["remote", "set-url", REMOTE_NAME, &deploy.remote])?,
        false => git.run(&["remote", "add", REMOTE_NAME, &deploy.remote])?,
    };

    git.run(&["checkout", "-B", &deploy.branch])?;
    git.run(&["add", "-A"])?;
    if git.run(&["status", "--porcelain"])?.trim().is_empty() {
        info!("Nothing to deploy");
        return Ok(Outcome::NothingToDeploy);
    }

    let message = match &deploy.message {
        Some(message) => message.clone(),
        None => default_message(),
    };
    git.run(&["commit", "-m", &message])?;
    git.run(&["push", "-f", REMOTE_NAME, &deploy.branch])?;
    info!("Deployed to `{}` ({})", deploy.remote, deploy.branch);
    Ok(Outcome::Pushed)
}

fn default_message() -> String {
    format!("Deploy {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))
}

/// Represents the result of a deploy.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents an error deploying the site.
#[derive(Debug)]
pub enum Error {
    /// Returned when the output directory doesn't exist.
    MissingOutput(PathBuf),

    /// Returned when `git` couldn't be started.
    Spawn {
        command: String,
        err: std::io::Error,
    },

    /// Returned when a `git` command exits unsuccessfully.
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

impl fmt::Display for Error {
    /// Displays an [`Error`] as human-readable text.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::MissingOutput(path) => write!(
                f,
                "Output directory '{}' does not exist; build the site first",
                path.display()
            ),
            Error::Spawn { command, err } => write!(f, "Running `{}`: {}", command, err),
            Error::Failed {
                command,
                status,
                stderr,
            } => write!(f, "`{}` failed ({}): {}", command, status, stderr),
        }
    }
}

impl std::error::Error for Error {
    /// Implements the [`std::error::Error`] trait for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MissingOutput(_) => None,
            Error::Spawn { command: _, err } => Some(err),
            Error::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn git(dir: &Path, args: &[&str]) -> String {
        Git { directory: dir }.run(args).unwrap()
    }

    #[test]
    fn test_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = Deploy {
            remote: String::from("unused"),
            branch: String::from("gh-pages"),
            message: None,
        };
        assert!(matches!(
            deploy(&dir.path().join("dist"), &config),
            Err(Error::MissingOutput(_))
        ));
    }

    #[test]
    fn test_deploy_to_local_remote() -> Result<()> {
        if !git_available() {
            return Ok(());
        }
        let remote = tempfile::tempdir().unwrap();
        git(remote.path(), &["init", "--bare"]);

        let output = tempfile::tempdir().unwrap();
        fs::write(output.path().join("index.html"), "<p>hi</p>").unwrap();
        git(output.path(), &["init"]);
        git(output.path(), &["config", "user.name", "Test"]);
        git(output.path(), &["config", "user.email", "test@example.com"]);

        let config = Deploy {
            remote: remote.path().to_string_lossy().into_owned(),
            branch: String::from("gh-pages"),
            message: Some(String::from("Publish")),
        };
        assert_eq!(deploy(output.path(), &config)?, Outcome::Pushed);
        let log = git(remote.path(), &["log", "--format=%s", "gh-pages"]);
        assert_eq!(log.trim(), "Publish");

        // unchanged output doesn't produce a new commit
        assert_eq!(deploy(output.path(), &config)?, Outcome::NothingToDeploy);

        fs::write(output.path().join("index.html"), "<p>changed</p>").unwrap();
        assert_eq!(deploy(output.path(), &config)?, Outcome::Pushed);
        let log = git(remote.path(), &["log", "--format=%s", "gh-pages"]);
        assert_eq!(log.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn test_default_message() {
        assert!(default_message().starts_with("Deploy "));
        assert!(default_message().ends_with(" UTC"));
    }
}
