use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use scriptorium::build::build_site;
use scriptorium::config::Config;
use scriptorium::deploy::{deploy, Outcome};
use scriptorium::summarize::{fill_missing_summaries, Client, DEFAULT_SYSTEM_PROMPT};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "scriptorium", version)]
#[command(about = "Builds a blog from Markdown posts and publishes it with git")]
struct Cli {
    /// Project directory; `site.yaml` is searched for here and in every parent
    #[arg(long, default_value = ".", global = true)]
    project: PathBuf,

    /// Output directory [default: <project root>/dist]
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the site into the output directory
    Build {
        /// Minify HTML, CSS and JavaScript even if `minify` is off in site.yaml
        #[arg(long)]
        minify: bool,
    },
    /// Push the output directory to the configured git remote
    Deploy {
        /// Build the site before deploying
        #[arg(long)]
        build: bool,
    },
    /// Write summaries for posts that have none, using the configured API
    Summarize {
        /// Longest summary to accept, in characters [default: `max_length` in site.yaml]
        #[arg(long)]
        max_length: Option<usize>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = Config::from_directory(&cli.project, cli.output.as_deref())?;

    match cli.command {
        Command::Build { minify } => {
            build_site(&config, minify || config.minify)?;
        }
        Command::Deploy { build } => {
            let settings = config
                .deploy
                .as_ref()
                .ok_or_else(|| anyhow!("`deploy` is not configured in site.yaml"))?;
            if build {
                build_site(&config, config.minify)?;
            }
            if deploy(&config.output_directory, settings)? == Outcome::NothingToDeploy {
                info!("Output unchanged since the last deploy");
            }
        }
        Command::Summarize { max_length } => {
            let settings = config
                .summarize
                .as_ref()
                .ok_or_else(|| anyhow!("`summarize` is not configured in site.yaml"))?;
            let api_key = std::env::var(&settings.api_key_env).with_context(|| {
                format!("Reading the API key from `{}`", settings.api_key_env)
            })?;
            fill_missing_summaries(
                &config.posts_source_directory,
                &Client::new(settings, api_key)?,
                settings
                    .system_prompt
                    .as_deref()
                    .unwrap_or(DEFAULT_SYSTEM_PROMPT),
                max_length.unwrap_or(settings.max_length),
            )?;
        }
    }
    Ok(())
}
