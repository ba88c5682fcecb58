use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sessopt_core::config::{load_manifest, resolve_manifest_path_with_source};
use sessopt_core::{GroupError, ParserError, SessionGroup};

const LOG_ENV: &str = "SESSOPT_LOG";

#[derive(Parser)]
#[command(
    name = "sessopt",
    version,
    about = "Inspect session options and tags declared in sessopt.toml"
)]
struct Cli {
    /// Manifest to load instead of searching upwards for sessopt.toml
    #[arg(long, short = 'f', global = true)]
    file: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions with their tags and flags
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show every tag and the sessions carrying it
    Tags {
        #[arg(long)]
        json: bool,
    },
    /// Parse arguments the way a session would receive them
    Resolve {
        session: String,
        #[arg(long)]
        json: bool,
        /// Arguments after `--` are handed to the session parser
        #[arg(last = true)]
        posargs: Vec<String>,
    },
    /// Build every session and report declaration errors
    Check,
    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };
    match command {
        Command::Version => {
            println!("sessopt {}", sessopt_core::version());
        }
        Command::List { json } => {
            let (_, group) = load_group(cli.file.as_deref())?;
            print_list(&group, json)?;
        }
        Command::Tags { json } => {
            let (_, group) = load_group(cli.file.as_deref())?;
            let index = group.tag_index();
            if json {
                println!("{}", serde_json::to_string_pretty(&index)?);
            } else {
                for (tag, sessions) in index {
                    println!("{tag}: {}", sessions.join(", "));
                }
            }
        }
        Command::Resolve {
            session,
            json,
            posargs,
        } => {
            let (_, group) = load_group(cli.file.as_deref())?;
            let args = match group.parse_args(&session, &posargs) {
                Ok(args) => args,
                Err(GroupError::Parser(ParserError::Help(text))) => {
                    print!("{text}");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&args)?);
            } else {
                for (name, value) in args.iter() {
                    println!("{name}={value}");
                }
            }
        }
        Command::Check => {
            let (path, group) = load_group(cli.file.as_deref())?;
            println!(
                "ok: {} sessions, {} options in {}",
                group.len(),
                group.parser().options().len(),
                path.display()
            );
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_group(file: Option<&Path>) -> Result<(PathBuf, SessionGroup)> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    let (path, source) = resolve_manifest_path_with_source(file, &cwd)?;
    debug!(path = %path.display(), source, "using manifest");
    let manifest =
        load_manifest(&path).with_context(|| format!("failed to load {}", path.display()))?;
    let group = manifest
        .build_group()
        .with_context(|| format!("invalid sessions in {}", path.display()))?;
    Ok((path, group))
}

fn print_list(group: &SessionGroup, json: bool) -> Result<()> {
    let summaries = group.summaries();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    for summary in summaries {
        let mut line = summary.name.clone();
        if !summary.tags.is_empty() {
            line.push_str(&format!("  [{}]", summary.tags.join(", ")));
        }
        if !summary.flags.is_empty() {
            line.push_str(&format!("  {}", summary.flags.join(" ")));
        }
        println!("{line}");
    }
    Ok(())
}
