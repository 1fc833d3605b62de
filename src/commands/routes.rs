use std::path::{Path, PathBuf};

use clap::Subcommand;

use crate::config;
use crate::error::ExitError;
use crate::routes::{self, Route};

#[derive(Debug, Subcommand)]
pub enum RoutesCommand {
    /// List the town's prefix routes
    List {
        /// Town root (default: discovered from the current directory)
        #[arg(long)]
        town_root: Option<PathBuf>,
        /// Output JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Add a route, replacing any route with the same prefix
    Add {
        /// Bead id prefix, e.g. gt- (a trailing hyphen is added if missing)
        prefix: String,
        /// Store path relative to the town root
        path: String,
        #[arg(long)]
        town_root: Option<PathBuf>,
    },
    /// Remove the route for a prefix
    Remove {
        prefix: String,
        #[arg(long)]
        town_root: Option<PathBuf>,
    },
    /// Show which route owns a bead id
    Which {
        bead_id: String,
        #[arg(long)]
        town_root: Option<PathBuf>,
    },
}

impl RoutesCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            RoutesCommand::List { town_root, json } => list(town_root.as_deref(), *json),
            RoutesCommand::Add {
                prefix,
                path,
                town_root,
            } => add(town_root.as_deref(), prefix, path),
            RoutesCommand::Remove { prefix, town_root } => remove(town_root.as_deref(), prefix),
            RoutesCommand::Which { bead_id, town_root } => which(town_root.as_deref(), bead_id),
        }
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let bare = prefix.trim().trim_end_matches('-');
    format!("{bare}-")
}

fn list(town_root: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let town = config::require_town_root(town_root)?;
    let routes = routes::load_routes(&routes::town_store_dir(&town))?;
    if json {
        for route in &routes {
            println!("{}", serde_json::to_string(route)?);
        }
        return Ok(());
    }
    let width = routes.iter().map(|r| r.prefix.len()).max().unwrap_or(0);
    for route in &routes {
        println!("{:width$}  {}", route.prefix, route.path);
    }
    Ok(())
}

fn add(town_root: Option<&Path>, prefix: &str, path: &str) -> anyhow::Result<()> {
    let town = config::require_town_root(town_root)?;
    let route = Route::new(&normalize_prefix(prefix), path);
    if route.path != routes::TOWN_PATH && !route.resolve(&town).is_dir() {
        tracing::warn!(path = %route.path, "route path does not exist yet");
    }
    routes::append_route(&routes::town_store_dir(&town), route.clone())?;
    println!("{} -> {}", route.prefix, route.path);
    Ok(())
}

fn remove(town_root: Option<&Path>, prefix: &str) -> anyhow::Result<()> {
    let town = config::require_town_root(town_root)?;
    let prefix = normalize_prefix(prefix);
    if routes::remove_route(&routes::town_store_dir(&town), &prefix)? {
        println!("removed {prefix}");
        Ok(())
    } else {
        Err(ExitError::new(1, format!("no route for {prefix}")).into())
    }
}

fn which(town_root: Option<&Path>, bead_id: &str) -> anyhow::Result<()> {
    let town = config::require_town_root(town_root)?;
    let routes = routes::load_routes(&routes::town_store_dir(&town))?;
    match routes::route_for_id(&routes, bead_id) {
        Some(route) => {
            println!("{}", route.resolve(&town).display());
            Ok(())
        }
        None => Err(ExitError::new(1, format!("no route owns {bead_id}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_get_one_trailing_hyphen() {
        assert_eq!(normalize_prefix("gt"), "gt-");
        assert_eq!(normalize_prefix("gt-"), "gt-");
        assert_eq!(normalize_prefix(" hq-cv "), "hq-cv-");
    }
}
