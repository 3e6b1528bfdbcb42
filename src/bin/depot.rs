//! Depot CLI - resolve artifacts into the local cache
//!
//! Usage:
//!   depot resolve <coords> [--repo NAME] [--metadata]   Resolve and print the cached path
//!   depot exists <coords> [--repo NAME] [--metadata]    Probe the repository
//!   depot list <repo> <path>                            List a repository directory
//!   depot path <coords> [--pattern P] [--flat]          Show the path a pattern produces
//!
//! Coordinates are `group:module:version[:classifier][@ext]`.
//!
//! Exit status: 0 on success, 2 when nothing matched, 1 on any error.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use levitate_depot::util::output;
use levitate_depot::{ArtifactIdentity, DepotConfig, Layout, LayoutPattern, Lookup};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Resolve, verify and cache build artifacts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file, merged over the standard locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache directory (overrides cache_dir from the configuration)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an artifact (or its metadata) into the cache
    Resolve {
        /// group:module:version[:classifier][@ext]
        coords: String,

        /// Repository to use (first configured if omitted)
        #[arg(short, long)]
        repo: Option<String>,

        /// Resolve the module metadata instead of the artifact
        #[arg(short, long)]
        metadata: bool,
    },

    /// Check whether a repository has an artifact, without downloading
    Exists {
        coords: String,

        #[arg(short, long)]
        repo: Option<String>,

        #[arg(short, long)]
        metadata: bool,
    },

    /// List the children of a repository directory
    List {
        /// Repository name
        repo: String,

        /// Directory path relative to the repository root
        #[arg(default_value = "")]
        path: String,
    },

    /// Print the repository path a pattern produces for coordinates
    Path {
        coords: String,

        /// Layout pattern (defaults to the layout's artifact pattern)
        #[arg(short, long)]
        pattern: Option<String>,

        /// Use the flat layout instead of the hierarchical one
        #[arg(long)]
        flat: bool,
    },
}

/// Outcome of a command that can legitimately find nothing.
enum Status {
    Done,
    NotFound,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(Status::Done) => ExitCode::SUCCESS,
        Ok(Status::NotFound) => ExitCode::from(2),
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Status> {
    match cli.command {
        Commands::Path {
            coords,
            pattern,
            flat,
        } => {
            let layout = if flat { Layout::Flat } else { Layout::Hierarchical };
            let pattern = pattern.unwrap_or_else(|| layout.default_patterns().1.to_string());
            let id = ArtifactIdentity::parse(&coords)?;
            let pattern = LayoutPattern::new(&pattern, layout)?;
            println!("{}", pattern.resolve(&id));
            Ok(Status::Done)
        }

        Commands::Resolve {
            coords,
            repo,
            metadata,
        } => {
            let config = load_config(cli.config, cli.cache_dir)?;
            let id = ArtifactIdentity::parse(&coords)?;
            let repo = config.repository(repo.as_deref())?;
            let resolver = config.resolver(repo, std::io::stderr().is_terminal())?;

            if metadata {
                output::action(&format!("Resolving metadata for {}", id));
            } else {
                output::action(&format!("Resolving {}", id));
            }
            output::detail(&format!("from {} ({})", repo.name, repo.url));

            let result = if metadata {
                resolver.resolve_metadata(&id)
            } else {
                resolver.resolve_artifact(&id)
            }
            .with_context(|| format!("Failed to resolve {}", id))?;

            match result {
                Lookup::Found(entry) => {
                    output::success(&entry.path.display().to_string());
                    if let Some(sha1) = &entry.sha1 {
                        output::detail(&format!("sha1 {}", sha1));
                    }
                    Ok(Status::Done)
                }
                Lookup::NotFound => {
                    output::skip(&format!("{} not found in {}", id, repo.name));
                    Ok(Status::NotFound)
                }
            }
        }

        Commands::Exists {
            coords,
            repo,
            metadata,
        } => {
            let config = load_config(cli.config, cli.cache_dir)?;
            let id = ArtifactIdentity::parse(&coords)?;
            let repo = config.repository(repo.as_deref())?;
            let resolver = config.resolver(repo, false)?;

            let exists = if metadata {
                resolver.metadata_exists(&id)
            } else {
                resolver.artifact_exists(&id)
            }
            .with_context(|| format!("Failed to probe {}", repo.name))?;

            if exists {
                println!("yes");
                Ok(Status::Done)
            } else {
                println!("no");
                Ok(Status::NotFound)
            }
        }

        Commands::List { repo, path } => {
            let config = load_config(cli.config, cli.cache_dir)?;
            let repo = config.repository(Some(&repo))?;
            let transport = config.transport(repo)?;

            match transport
                .list(&path)
                .with_context(|| format!("Failed to list {}", repo.name))?
            {
                Lookup::Found(names) if names.is_empty() => {
                    output::info(&format!("{}/{} is empty", repo.name, path));
                    Ok(Status::Done)
                }
                Lookup::Found(names) => {
                    for name in &names {
                        output::list_item(name, "");
                    }
                    Ok(Status::Done)
                }
                Lookup::NotFound => {
                    output::skip(&format!("{}/{} does not exist", repo.name, path));
                    Ok(Status::NotFound)
                }
            }
        }
    }
}

fn load_config(explicit: Option<PathBuf>, cache_dir: Option<PathBuf>) -> Result<DepotConfig> {
    let mut config = DepotConfig::load(explicit.as_deref())?;
    if let Some(dir) = cache_dir {
        config.cache_dir = dir;
    }
    tracing::debug!(cache_dir = %config.cache_dir.display(), "configuration loaded");
    Ok(config)
}
