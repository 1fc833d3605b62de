//! Fleet routing table: which store owns which bead id prefix.
//!
//! The table lives at `<town>/.beads/routes.jsonl`, one
//! `{"prefix": "gt-", "path": "gastown/mayor/rig"}` object per line, with
//! paths relative to the town root.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::FleetRegistry;
use crate::fsutil::atomic_write;
use crate::redirect::{self, BEADS_DIR};

pub const ROUTES_FILE: &str = "routes.jsonl";
/// Town-level beads.
pub const TOWN_PREFIX: &str = "hq-";
/// Convoy beads, also stored at town level.
pub const CONVOY_PREFIX: &str = "hq-cv-";
pub const TOWN_PATH: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub path: String,
}

impl Route {
    pub fn new(prefix: &str, path: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            path: path.to_string(),
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.prefix == TOWN_PREFIX || self.prefix == CONVOY_PREFIX
    }

    /// First path component, which names the rig for rig routes.
    pub fn rig(&self) -> Option<&str> {
        match Path::new(&self.path).components().next()? {
            Component::Normal(name) => name.to_str(),
            _ => None,
        }
    }

    /// Absolute directory this route points at.
    pub fn resolve(&self, town_root: &Path) -> PathBuf {
        if self.path == TOWN_PATH {
            town_root.to_path_buf()
        } else {
            town_root.join(&self.path)
        }
    }
}

/// The two routes every town must carry.
pub fn reserved_routes() -> [Route; 2] {
    [
        Route::new(TOWN_PREFIX, TOWN_PATH),
        Route::new(CONVOY_PREFIX, TOWN_PATH),
    ]
}

/// The town-level store directory that holds the routing table.
pub fn town_store_dir(town_root: &Path) -> PathBuf {
    town_root.join(BEADS_DIR)
}

pub fn routes_path(store_dir: &Path) -> PathBuf {
    store_dir.join(ROUTES_FILE)
}

/// Read the routing table. A missing file is an empty table and lines that
/// do not decode are skipped.
pub fn load_routes(store_dir: &Path) -> anyhow::Result<Vec<Route>> {
    let path = routes_path(store_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };

    let mut routes = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Route>(line) {
            Ok(route) => routes.push(route),
            Err(e) => {
                tracing::debug!(path = %path.display(), line = lineno + 1, error = %e, "skipping bad route");
            }
        }
    }
    Ok(routes)
}

/// Replace the routing table with `routes`, in order.
pub fn write_routes(store_dir: &Path, routes: &[Route]) -> anyhow::Result<()> {
    std::fs::create_dir_all(store_dir)
        .with_context(|| format!("creating {}", store_dir.display()))?;
    let mut out = String::new();
    for route in routes {
        out.push_str(&serde_json::to_string(route)?);
        out.push('\n');
    }
    atomic_write(&routes_path(store_dir), out.as_bytes())
}

/// Add `route`, replacing any existing route with the same prefix.
pub fn append_route(store_dir: &Path, route: Route) -> anyhow::Result<()> {
    let mut routes = load_routes(store_dir)?;
    match routes.iter_mut().find(|r| r.prefix == route.prefix) {
        Some(existing) if *existing == route => return Ok(()),
        Some(existing) => *existing = route.clone(),
        None => routes.push(route.clone()),
    }
    write_routes(store_dir, &routes)?;
    tracing::info!(prefix = %route.prefix, path = %route.path, "route recorded");
    Ok(())
}

/// Drop every route with `prefix`. Returns whether anything was removed.
pub fn remove_route(store_dir: &Path, prefix: &str) -> anyhow::Result<bool> {
    let mut routes = load_routes(store_dir)?;
    let before = routes.len();
    routes.retain(|r| r.prefix != prefix);
    if routes.len() == before {
        return Ok(false);
    }
    write_routes(store_dir, &routes)?;
    tracing::info!(prefix, "route removed");
    Ok(true)
}

/// Namespace of a bead id, up to and including its first hyphen.
pub fn extract_prefix(bead_id: &str) -> Option<&str> {
    let end = bead_id.find('-')?;
    if end == 0 {
        return None;
    }
    Some(&bead_id[..=end])
}

/// The route owning `bead_id`, preferring the longest matching prefix so
/// that `hq-cv-` wins over `hq-`.
pub fn route_for_id<'a>(routes: &'a [Route], bead_id: &str) -> Option<&'a Route> {
    routes
        .iter()
        .filter(|r| !r.prefix.is_empty() && bead_id.starts_with(&r.prefix))
        .max_by_key(|r| r.prefix.len())
}

/// Absolute directory routed for `prefix` in a town.
pub fn rig_path_for_prefix(town_root: &Path, prefix: &str) -> anyhow::Result<Option<PathBuf>> {
    let routes = load_routes(&town_store_dir(town_root))?;
    Ok(routes
        .iter()
        .find(|r| r.prefix == prefix)
        .map(|r| r.resolve(town_root)))
}

/// Prefix of the first route whose path lies in `rig`.
pub fn prefix_for_rig(town_root: &Path, rig: &str) -> anyhow::Result<Option<String>> {
    let routes = load_routes(&town_store_dir(town_root))?;
    Ok(routes
        .into_iter()
        .find(|r| !r.is_reserved() && r.rig() == Some(rig))
        .map(|r| r.prefix))
}

/// Prefixes that appear more than once, with every path they claim.
pub fn find_conflicting_prefixes(routes: &[Route]) -> BTreeMap<String, Vec<String>> {
    let mut by_prefix: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for route in routes {
        by_prefix
            .entry(route.prefix.clone())
            .or_default()
            .push(route.path.clone());
    }
    by_prefix.retain(|_, paths| paths.len() > 1);
    by_prefix
}

// --- Check and repair ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteIssue {
    MissingReserved { prefix: String },
    MisroutedReserved { prefix: String, path: String },
    DuplicatePrefix { prefix: String, paths: Vec<String> },
    UnroutedRig { rig: String, prefix: Option<String> },
    MissingPath { prefix: String, path: String },
    NoStore { prefix: String, path: String },
    BrokenRedirect { prefix: String, path: String, target: String },
}

impl RouteIssue {
    /// Whether [`repair_routes`] can fix this issue.
    pub fn is_fixable(&self) -> bool {
        matches!(
            self,
            RouteIssue::MissingReserved { .. } | RouteIssue::UnroutedRig { prefix: Some(_), .. }
        )
    }
}

impl fmt::Display for RouteIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteIssue::MissingReserved { prefix } => {
                write!(f, "reserved route {prefix} is missing")
            }
            RouteIssue::MisroutedReserved { prefix, path } => {
                write!(f, "reserved route {prefix} points at {path} instead of the town root")
            }
            RouteIssue::DuplicatePrefix { prefix, paths } => {
                write!(f, "prefix {prefix} is routed to several paths: {}", paths.join(", "))
            }
            RouteIssue::UnroutedRig { rig, prefix: Some(prefix) } => {
                write!(f, "rig {rig} ({prefix}) has no route")
            }
            RouteIssue::UnroutedRig { rig, prefix: None } => {
                write!(f, "rig {rig} has no route and declares no bead prefix")
            }
            RouteIssue::MissingPath { prefix, path } => {
                write!(f, "route {prefix} points at missing path {path}")
            }
            RouteIssue::NoStore { prefix, path } => {
                write!(f, "route {prefix} path {path} has no {BEADS_DIR} directory")
            }
            RouteIssue::BrokenRedirect { prefix, path, target } => {
                write!(f, "route {prefix} path {path} redirects to missing {target}")
            }
        }
    }
}

fn is_routed(routes: &[Route], rig: &str, prefix: Option<&str>) -> bool {
    routes
        .iter()
        .any(|r| Some(r.prefix.as_str()) == prefix || (!r.is_reserved() && r.rig() == Some(rig)))
}

/// Path (relative to the town) where a rig's store is expected: the
/// mayor clone if it carries a store, else the rig root.
pub fn expected_store_path(town_root: &Path, rig: &str) -> Option<String> {
    let mayor_rig = format!("{rig}/mayor/rig");
    if town_root.join(&mayor_rig).join(BEADS_DIR).is_dir() {
        Some(mayor_rig)
    } else if town_root.join(rig).join(BEADS_DIR).is_dir() {
        Some(rig.to_string())
    } else {
        None
    }
}

/// Validate the routing table against the registry and the filesystem.
///
/// Read-only: corrupt redirects are reported, not repaired.
pub fn check_routes(town_root: &Path, registry: &FleetRegistry) -> anyhow::Result<Vec<RouteIssue>> {
    let routes = load_routes(&town_store_dir(town_root))?;
    let mut issues = Vec::new();

    for reserved in reserved_routes() {
        if !routes.iter().any(|r| r.prefix == reserved.prefix) {
            issues.push(RouteIssue::MissingReserved {
                prefix: reserved.prefix,
            });
        }
    }
    for route in routes.iter().filter(|r| r.is_reserved() && r.path != TOWN_PATH) {
        issues.push(RouteIssue::MisroutedReserved {
            prefix: route.prefix.clone(),
            path: route.path.clone(),
        });
    }

    for (prefix, paths) in find_conflicting_prefixes(&routes) {
        issues.push(RouteIssue::DuplicatePrefix { prefix, paths });
    }

    for rig in registry.rigs.keys() {
        let prefix = registry.route_prefix(rig);
        if !is_routed(&routes, rig, prefix.as_deref()) {
            issues.push(RouteIssue::UnroutedRig {
                rig: rig.clone(),
                prefix,
            });
        }
    }

    for route in routes.iter().filter(|r| !r.is_reserved()) {
        let dir = route.resolve(town_root);
        let store = dir.join(BEADS_DIR);
        if !dir.is_dir() {
            issues.push(RouteIssue::MissingPath {
                prefix: route.prefix.clone(),
                path: route.path.clone(),
            });
        } else if !store.is_dir() {
            issues.push(RouteIssue::NoStore {
                prefix: route.prefix.clone(),
                path: route.path.clone(),
            });
        } else if let Some(target) = redirect::redirect_target(&store) {
            if !target.is_dir() {
                issues.push(RouteIssue::BrokenRedirect {
                    prefix: route.prefix.clone(),
                    path: route.path.clone(),
                    target: target.display().to_string(),
                });
            }
        }
    }

    Ok(issues)
}

/// Add missing reserved routes and routes for registry rigs whose store
/// exists. Existing routes are never removed or rewritten, and the file is
/// untouched when nothing is added. Returns the added routes.
pub fn repair_routes(town_root: &Path, registry: &FleetRegistry) -> anyhow::Result<Vec<Route>> {
    let store_dir = town_store_dir(town_root);
    let mut routes = load_routes(&store_dir)?;
    let mut added = Vec::new();

    for reserved in reserved_routes() {
        if !routes.iter().any(|r| r.prefix == reserved.prefix) {
            routes.push(reserved.clone());
            added.push(reserved);
        }
    }

    for (rig, prefix) in registry.rig_prefixes() {
        if is_routed(&routes, &rig, Some(prefix.as_str())) {
            continue;
        }
        let Some(path) = expected_store_path(town_root, &rig) else {
            tracing::debug!(rig, "no store on disk; leaving rig unrouted");
            continue;
        };
        let route = Route::new(&prefix, &path);
        routes.push(route.clone());
        added.push(route);
    }

    if !added.is_empty() {
        write_routes(&store_dir, &routes)?;
        for route in &added {
            tracing::info!(prefix = %route.prefix, path = %route.path, "added route");
        }
    }
    Ok(added)
}
