pub mod agent;
pub mod doctor;
pub mod redirect;
pub mod routes;
pub mod schema;

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::{self, Settings};
use crate::fsutil::absolute_clean;

/// `dir` if given, else the current directory; absolute either way.
pub(crate) fn dir_or_cwd(dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    match dir {
        Some(d) => Ok(absolute_clean(d)),
        None => std::env::current_dir().context("could not determine current directory"),
    }
}

/// Settings of the town enclosing `start`, or defaults outside a town.
pub(crate) fn settings_near(start: &Path) -> anyhow::Result<Settings> {
    let town = config::find_town_root(start);
    Settings::for_town(town.as_deref())
}
