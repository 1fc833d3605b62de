use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{BeadsError, ExitError};
use crate::redirect::DEFAULT_MAX_HOPS;

/// Town-level control directory.
pub const MAYOR_DIR: &str = "mayor";
pub const TOWN_FILE: &str = "town.json";
pub const RIGS_FILE: &str = "rigs.json";
pub const SETTINGS_FILE: &str = "rigbeads.toml";

/// Overrides `[store] program` when set.
pub const BD_ENV: &str = "RIGBEADS_BD";

/// A directory is a town root when its mayor directory carries either the
/// town marker or the fleet registry.
pub fn is_town_root(dir: &Path) -> bool {
    let mayor = dir.join(MAYOR_DIR);
    mayor.join(TOWN_FILE).is_file() || mayor.join(RIGS_FILE).is_file()
}

/// Walk up from `start` to the nearest town root.
pub fn find_town_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| is_town_root(dir))
        .map(Path::to_path_buf)
}

/// Use `explicit` if given, otherwise discover the town from the current
/// directory.
pub fn require_town_root(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    find_town_root(&cwd).ok_or_else(|| {
        ExitError::Config(format!(
            "no town root found above {} (looked for {MAYOR_DIR}/{TOWN_FILE} or {MAYOR_DIR}/{RIGS_FILE})",
            cwd.display()
        ))
        .into()
    })
}

// --- Fleet registry (mayor/rigs.json) ---

/// Read-only registry of the rigs in a town.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetRegistry {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub rigs: BTreeMap<String, RigEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigEntry {
    #[serde(default)]
    pub git_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beads: Option<RigBeadsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigBeadsConfig {
    #[serde(default)]
    pub prefix: String,
}

impl FleetRegistry {
    pub fn path(town_root: &Path) -> PathBuf {
        town_root.join(MAYOR_DIR).join(RIGS_FILE)
    }

    pub fn load(town_root: &Path) -> Result<Self, BeadsError> {
        let path = Self::path(town_root);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BeadsError::ConfigMissing { path });
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("reading {}", path.display()))
                    .into());
            }
        };
        Self::parse_json(&contents).map_err(BeadsError::from)
    }

    /// A town with no registry simply has no rigs.
    pub fn load_or_empty(town_root: &Path) -> Result<Self, BeadsError> {
        match Self::load(town_root) {
            Err(BeadsError::ConfigMissing { path }) => {
                tracing::debug!(path = %path.display(), "no fleet registry; treating as empty");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn parse_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ExitError::Config(format!("invalid {MAYOR_DIR}/{RIGS_FILE}: {e}")).into())
    }

    /// Route prefix (`gt-`) declared for `rig`, if any.
    pub fn route_prefix(&self, rig: &str) -> Option<String> {
        let beads = self.rigs.get(rig)?.beads.as_ref()?;
        let bare = beads.prefix.trim().trim_end_matches('-');
        (!bare.is_empty()).then(|| format!("{bare}-"))
    }

    /// `(rig, route prefix)` for every rig with a declared prefix.
    pub fn rig_prefixes(&self) -> Vec<(String, String)> {
        self.rigs
            .keys()
            .filter_map(|rig| self.route_prefix(rig).map(|p| (rig.clone(), p)))
            .collect()
    }
}

// --- Tool settings (mayor/rigbeads.toml) ---

/// Optional `mayor/rigbeads.toml`. Every key has a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub redirect: RedirectSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoreSettings {
    /// Record store executable.
    #[serde(default = "default_program")]
    pub program: String,
    /// Per-subcommand timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RedirectSettings {
    /// Redirect hops followed before the chain is treated as corrupt.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
}

impl Default for RedirectSettings {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
        }
    }
}

fn default_program() -> String { "bd".into() }
fn default_timeout_secs() -> u64 { 30 }
fn default_max_hops() -> usize { DEFAULT_MAX_HOPS }

impl Settings {
    pub fn path(town_root: &Path) -> PathBuf {
        town_root.join(MAYOR_DIR).join(SETTINGS_FILE)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse_toml(&contents)
    }

    pub fn parse_toml(toml_str: &str) -> anyhow::Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| ExitError::Config(format!("invalid {SETTINGS_FILE}: {e}")).into())
    }

    /// Settings for a town (defaults when it has no settings file, or when
    /// there is no town), with the environment override applied.
    pub fn for_town(town_root: Option<&Path>) -> anyhow::Result<Self> {
        let settings = match town_root.map(Self::path) {
            Some(path) if path.is_file() => Self::load(&path)?,
            _ => Self::default(),
        };
        Ok(settings.with_program_override(std::env::var(BD_ENV).ok()))
    }

    fn with_program_override(mut self, program: Option<String>) -> Self {
        if let Some(program) = program.filter(|p| !p.trim().is_empty()) {
            self.store.program = program;
        }
        self
    }
}
