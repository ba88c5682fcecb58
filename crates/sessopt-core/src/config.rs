use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::group::GroupError;
use crate::manifest::Manifest;
use crate::tagging::DEFAULT_SEPARATOR;

pub const MANIFEST_ENV: &str = "SESSOPT_FILE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Manifest IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("No sessopt.toml found in {0} or any parent directory")]
    NotFound(PathBuf),
    #[error("Invalid manifest: {0}")]
    Invalid(String),
    #[error(transparent)]
    Group(#[from] GroupError),
}

/// How session names turn into tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoTagMode {
    #[default]
    Off,
    /// Tag every branching prefix shared by two or more sessions.
    Branching,
    /// Tag every leading prefix up to the given number of segments.
    Depth(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub auto_tag: AutoTagMode,
    /// Only parameters with explicit option metadata become flags.
    pub explicit_options: bool,
    /// Prepended to every session name, joined with the separator.
    pub prefix: Option<String>,
    pub separator: String,
    /// Added to every session of the group.
    pub tags: Vec<String>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            auto_tag: AutoTagMode::Off,
            explicit_options: false,
            prefix: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            tags: Vec::new(),
        }
    }
}

pub fn manifest_filename_candidates() -> [&'static str; 2] {
    ["sessopt.toml", ".sessopt.toml"]
}

pub fn manifest_in(dir: &Path) -> Option<PathBuf> {
    manifest_filename_candidates()
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

pub fn find_manifest_root(start: &Path) -> Option<PathBuf> {
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|candidate| manifest_in(candidate).is_some())
        .map(Path::to_path_buf)
}

/// Picks the manifest to load: an explicit path, then `SESSOPT_FILE`, then
/// the nearest manifest above `cwd`. Also reports where it came from.
pub fn resolve_manifest_path_with_source(
    explicit: Option<&Path>,
    cwd: &Path,
) -> Result<(PathBuf, &'static str), ConfigError> {
    if let Some(path) = explicit {
        return Ok((path.to_path_buf(), "flag"));
    }
    if let Ok(value) = std::env::var(MANIFEST_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Ok((PathBuf::from(trimmed), "env"));
        }
    }
    find_manifest_root(cwd)
        .and_then(|root| manifest_in(&root))
        .map(|path| (path, "discovered"))
        .ok_or_else(|| ConfigError::NotFound(cwd.to_path_buf()))
}

pub fn resolve_manifest_path(explicit: Option<&Path>, cwd: &Path) -> Result<PathBuf, ConfigError> {
    resolve_manifest_path_with_source(explicit, cwd).map(|(path, _)| path)
}

pub fn parse_manifest(text: &str) -> Result<Manifest, ConfigError> {
    Ok(toml::from_str::<Manifest>(text)?)
}

pub fn load_manifest(path: &Path) -> Result<Manifest, ConfigError> {
    let text = fs::read_to_string(path)?;
    parse_manifest(&text)
}
