//! Locating the canonical `.beads` store for a working directory.
//!
//! A worktree's `.beads/redirect` holds one relative path to another
//! `.beads` directory. Resolution follows these pointers with a hop bound,
//! removes the single pointer that closes a cycle, and falls back to the
//! worktree's own `.beads` when it does.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::BeadsError;
use crate::fsutil::{absolute_clean, atomic_write, clean, relative_path};

pub const BEADS_DIR: &str = ".beads";
pub const REDIRECT_FILE: &str = "redirect";
pub const DEFAULT_MAX_HOPS: usize = 3;

/// Runtime artifacts a worktree must not keep once it defers to a shared
/// store. Tracked files (config, formulas, README) are never in this list.
pub const EPHEMERAL_FILES: &[&str] = &["beads.db", "beads.db-wal", "beads.db-shm", "issues.jsonl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairReason {
    Cycle,
    TooManyHops,
}

impl fmt::Display for RepairReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairReason::Cycle => write!(f, "circular redirect"),
            RepairReason::TooManyHops => write!(f, "redirect chain too deep"),
        }
    }
}

/// A corrupt pointer that resolution removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerRepair {
    pub pointer: PathBuf,
    pub reason: RepairReason,
    /// Whether the pointer file was actually deleted.
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub store_dir: PathBuf,
    pub hops: usize,
    pub repair: Option<PointerRepair>,
}

/// Read a redirect pointer. Missing, unreadable, or blank files mean none.
pub fn read_redirect(beads_dir: &Path) -> Option<String> {
    let content = fs::read_to_string(beads_dir.join(REDIRECT_FILE)).ok()?;
    let target = content.trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}

/// Absolute location a `.beads` directory's pointer names, if it has one.
///
/// Pointers are relative to the directory that owns the `.beads` dir.
pub fn redirect_target(beads_dir: &Path) -> Option<PathBuf> {
    let target = read_redirect(beads_dir)?;
    let owner = beads_dir.parent().unwrap_or(beads_dir);
    Some(clean(&owner.join(target)))
}

/// Canonical store directory for `work_dir`.
pub fn resolve_store_dir(work_dir: &Path) -> PathBuf {
    resolve_store_dir_detailed(work_dir, DEFAULT_MAX_HOPS).store_dir
}

/// Resolve like [`resolve_store_dir`], reporting hops and any repair made.
pub fn resolve_store_dir_detailed(work_dir: &Path, max_hops: usize) -> Resolution {
    let local = absolute_clean(work_dir).join(BEADS_DIR);
    let mut current = local.clone();
    let mut visited = HashSet::from([local.clone()]);
    let mut hops = 0;

    loop {
        let Some(next) = redirect_target(&current) else {
            return Resolution {
                store_dir: current,
                hops,
                repair: None,
            };
        };

        let reason = if visited.contains(&next) {
            Some(RepairReason::Cycle)
        } else if hops >= max_hops {
            Some(RepairReason::TooManyHops)
        } else {
            None
        };

        if let Some(reason) = reason {
            let pointer = current.join(REDIRECT_FILE);
            let removed = match fs::remove_file(&pointer) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(pointer = %pointer.display(), error = %e, "could not remove corrupt redirect");
                    false
                }
            };
            tracing::warn!(
                pointer = %pointer.display(),
                redirect_to = %next.display(),
                "{reason}; falling back to {}",
                local.display()
            );
            return Resolution {
                store_dir: local,
                hops: 0,
                repair: Some(PointerRepair {
                    pointer,
                    reason,
                    removed,
                }),
            };
        }

        visited.insert(next.clone());
        current = next;
        hops += 1;
    }
}

/// Read-only view of a worktree's redirect chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    /// No pointer; the worktree owns its store.
    Local,
    /// The chain ends at an existing store after `hops` pointers.
    Terminal { store_dir: PathBuf, hops: usize },
    /// The chain ends at a directory that does not exist.
    Dangling { target: PathBuf },
    /// Resolution would remove `pointer`.
    Corrupt { pointer: PathBuf, reason: RepairReason },
}

/// Walk `work_dir`'s chain like [`resolve_store_dir_detailed`] without
/// repairing anything.
pub fn inspect_chain(work_dir: &Path, max_hops: usize) -> ChainStatus {
    let local = absolute_clean(work_dir).join(BEADS_DIR);
    let mut current = local.clone();
    let mut visited = HashSet::from([local]);
    let mut hops = 0;

    while let Some(next) = redirect_target(&current) {
        let reason = if visited.contains(&next) {
            Some(RepairReason::Cycle)
        } else if hops >= max_hops {
            Some(RepairReason::TooManyHops)
        } else {
            None
        };
        if let Some(reason) = reason {
            return ChainStatus::Corrupt {
                pointer: current.join(REDIRECT_FILE),
                reason,
            };
        }
        visited.insert(next.clone());
        current = next;
        hops += 1;
    }

    match hops {
        0 => ChainStatus::Local,
        _ if current.is_dir() => ChainStatus::Terminal {
            store_dir: current,
            hops,
        },
        _ => ChainStatus::Dangling { target: current },
    }
}

/// What [`setup_redirect`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectSetup {
    /// Absolute canonical store the worktree now defers to.
    pub store_dir: PathBuf,
    /// Relative path written into the pointer file.
    pub pointer: PathBuf,
    /// Ephemeral files removed from the worktree's `.beads`.
    pub removed: Vec<String>,
}

/// Point `work_dir/.beads` at its rig's canonical store with a single hop.
///
/// `work_dir` must sit at least two levels below `town_root`
/// (`<rig>/<role>[/<name>]`) and must not be the rig's canonical
/// `mayor/rig` clone.
pub fn setup_redirect(town_root: &Path, work_dir: &Path) -> Result<RedirectSetup, BeadsError> {
    let town = absolute_clean(town_root);
    let work = absolute_clean(work_dir);

    let rel = work
        .strip_prefix(&town)
        .map_err(|_| BeadsError::InvalidLocation {
            path: work.clone(),
            reason: format!("not inside town root {}", town.display()),
        })?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if parts.len() < 2 {
        return Err(BeadsError::InvalidLocation {
            path: work,
            reason: "worktree must be at least 2 levels deep from town root".to_string(),
        });
    }
    if parts.len() == 3 && parts[1] == "mayor" && parts[2] == "rig" {
        return Err(BeadsError::CanonicalLocation { path: work });
    }

    let rig_root = town.join(&parts[0]);
    let store_dir = find_canonical_store(&rig_root)?;
    let local = work.join(BEADS_DIR);
    if store_dir == local {
        return Err(BeadsError::InvalidLocation {
            path: work,
            reason: "rig store redirects back into this worktree".to_string(),
        });
    }

    fs::create_dir_all(&local)?;
    let mut removed = Vec::new();
    for name in EPHEMERAL_FILES {
        match fs::remove_file(local.join(name)) {
            Ok(()) => removed.push((*name).to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    let pointer = relative_path(&work, &store_dir);
    let content = format!("{}\n", pointer.display());
    atomic_write(&local.join(REDIRECT_FILE), content.as_bytes())?;

    tracing::info!(
        worktree = %work.display(),
        pointer = %pointer.display(),
        "redirect written"
    );

    Ok(RedirectSetup {
        store_dir,
        pointer,
        removed,
    })
}

/// Terminal store for a rig: the rig-level `.beads` (following any pointer
/// it carries to its end), else `mayor/rig/.beads`.
fn find_canonical_store(rig_root: &Path) -> Result<PathBuf, BeadsError> {
    let rig_beads = rig_root.join(BEADS_DIR);
    let mayor_rig = rig_root.join("mayor").join("rig");
    let mayor_beads = mayor_rig.join(BEADS_DIR);

    let holder = if rig_beads.is_dir() {
        rig_root
    } else if mayor_beads.is_dir() {
        mayor_rig.as_path()
    } else {
        return Err(BeadsError::InvalidLocation {
            path: rig_root.to_path_buf(),
            reason: format!(
                "no rig .beads found at {} or {}",
                rig_beads.display(),
                mayor_beads.display()
            ),
        });
    };

    let store_dir = resolve_store_dir(holder);
    if !store_dir.is_dir() {
        return Err(BeadsError::InvalidLocation {
            path: store_dir,
            reason: "canonical store is not reachable".to_string(),
        });
    }
    Ok(store_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pointer(dir: &Path, target: &str) {
        let beads = dir.join(BEADS_DIR);
        fs::create_dir_all(&beads).unwrap();
        fs::write(beads.join(REDIRECT_FILE), target).unwrap();
    }

    #[test]
    fn no_pointer_resolves_to_own_beads() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_store_dir(dir.path()), dir.path().join(BEADS_DIR));
    }

    #[test]
    fn blank_pointer_is_no_redirect() {
        let dir = tempfile::tempdir().unwrap();
        write_pointer(dir.path(), "  \n\t\n");
        let res = resolve_store_dir_detailed(dir.path(), DEFAULT_MAX_HOPS);
        assert_eq!(res.store_dir, dir.path().join(BEADS_DIR));
        assert_eq!(res.hops, 0);
        assert!(res.repair.is_none());
    }

    #[test]
    fn one_hop_resolves_to_target() {
        let town = tempfile::tempdir().unwrap();
        let canonical = town.path().join("gastown/mayor/rig");
        fs::create_dir_all(canonical.join(BEADS_DIR)).unwrap();
        let crew = town.path().join("gastown/crew/max");
        write_pointer(&crew, "../../mayor/rig/.beads\n");

        let res = resolve_store_dir_detailed(&crew, DEFAULT_MAX_HOPS);
        assert_eq!(res.store_dir, canonical.join(BEADS_DIR));
        assert_eq!(res.hops, 1);
    }

    #[test]
    fn chain_is_followed_within_bound() {
        let town = tempfile::tempdir().unwrap();
        let canonical = town.path().join("gastown/mayor/rig");
        fs::create_dir_all(canonical.join(BEADS_DIR)).unwrap();
        write_pointer(&town.path().join("gastown"), "mayor/rig/.beads");
        let crew = town.path().join("gastown/crew/max");
        write_pointer(&crew, "../../.beads");

        let res = resolve_store_dir_detailed(&crew, DEFAULT_MAX_HOPS);
        assert_eq!(res.store_dir, canonical.join(BEADS_DIR));
        assert_eq!(res.hops, 2);
    }

    #[test]
    fn self_cycle_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        write_pointer(dir.path(), ".beads");
        let pointer = dir.path().join(BEADS_DIR).join(REDIRECT_FILE);

        let res = resolve_store_dir_detailed(dir.path(), DEFAULT_MAX_HOPS);
        assert_eq!(res.store_dir, dir.path().join(BEADS_DIR));
        let repair = res.repair.unwrap();
        assert_eq!(repair.reason, RepairReason::Cycle);
        assert!(repair.removed);
        assert!(!pointer.exists());
    }

    #[test]
    fn two_node_cycle_removes_only_closing_pointer() {
        let town = tempfile::tempdir().unwrap();
        let a = town.path().join("rig/crew/a");
        let b = town.path().join("rig/crew/b");
        write_pointer(&a, "../b/.beads");
        write_pointer(&b, "../a/.beads");

        let res = resolve_store_dir_detailed(&a, DEFAULT_MAX_HOPS);
        assert_eq!(res.store_dir, a.join(BEADS_DIR));
        assert_eq!(res.repair.unwrap().reason, RepairReason::Cycle);
        assert!(a.join(BEADS_DIR).join(REDIRECT_FILE).exists());
        assert!(!b.join(BEADS_DIR).join(REDIRECT_FILE).exists());

        // Once repaired, resolution is stable.
        let again = resolve_store_dir_detailed(&a, DEFAULT_MAX_HOPS);
        assert_eq!(again.store_dir, b.join(BEADS_DIR));
        assert!(again.repair.is_none());
        assert_eq!(
            resolve_store_dir(&a),
            resolve_store_dir_detailed(&a, DEFAULT_MAX_HOPS).store_dir
        );
    }

    #[test]
    fn hop_bound_falls_back_to_local() {
        let town = tempfile::tempdir().unwrap();
        let dirs: Vec<PathBuf> = (0..5).map(|i| town.path().join(format!("w{i}"))).collect();
        for pair in dirs.windows(2) {
            let name = pair[1].file_name().unwrap().to_string_lossy();
            write_pointer(&pair[0], &format!("../{name}/.beads"));
        }
        fs::create_dir_all(dirs[4].join(BEADS_DIR)).unwrap();

        let res = resolve_store_dir_detailed(&dirs[0], 2);
        assert_eq!(res.store_dir, dirs[0].join(BEADS_DIR));
        let repair = res.repair.unwrap();
        assert_eq!(repair.reason, RepairReason::TooManyHops);
        assert_eq!(repair.pointer, dirs[2].join(BEADS_DIR).join(REDIRECT_FILE));

        let full = resolve_store_dir_detailed(&dirs[3], DEFAULT_MAX_HOPS);
        assert_eq!(full.store_dir, dirs[4].join(BEADS_DIR));
    }

    fn town_with_mayor_store() -> tempfile::TempDir {
        let town = tempfile::tempdir().unwrap();
        fs::create_dir_all(town.path().join("gastown/mayor/rig/.beads")).unwrap();
        town
    }

    #[test]
    fn setup_rejects_canonical_location() {
        let town = town_with_mayor_store();
        let err = setup_redirect(town.path(), &town.path().join("gastown/mayor/rig")).unwrap_err();
        assert!(matches!(err, BeadsError::CanonicalLocation { .. }));
        assert!(err.to_string().contains("canonical"));
        assert!(err.to_string().contains("mayor/rig"));
    }

    #[test]
    fn setup_rejects_shallow_paths() {
        let town = town_with_mayor_store();
        let err = setup_redirect(town.path(), &town.path().join("gastown")).unwrap_err();
        assert!(err.to_string().contains("at least 2 levels"));
        let outside = tempfile::tempdir().unwrap();
        assert!(setup_redirect(town.path(), outside.path()).is_err());
    }

    #[test]
    fn setup_fails_without_any_store() {
        let town = tempfile::tempdir().unwrap();
        let crew = town.path().join("gastown/crew/max");
        fs::create_dir_all(&crew).unwrap();
        let err = setup_redirect(town.path(), &crew).unwrap_err();
        assert!(err.to_string().contains("no rig .beads found"));
        assert!(!crew.join(BEADS_DIR).join(REDIRECT_FILE).exists());
    }

    #[test]
    fn setup_points_at_mayor_store_and_cleans_runtime_files() {
        let town = town_with_mayor_store();
        let crew = town.path().join("gastown/crew/max");
        let local = crew.join(BEADS_DIR);
        fs::create_dir_all(&local).unwrap();
        fs::write(local.join("beads.db"), "db").unwrap();
        fs::write(local.join("issues.jsonl"), "{}").unwrap();
        fs::write(local.join("config.yaml"), "prefix: gt").unwrap();
        fs::write(local.join("README.md"), "tracked").unwrap();

        let setup = setup_redirect(town.path(), &crew).unwrap();
        assert_eq!(setup.pointer, PathBuf::from("../../mayor/rig/.beads"));
        assert_eq!(setup.removed, vec!["beads.db", "issues.jsonl"]);
        assert!(local.join("config.yaml").exists());
        assert!(local.join("README.md").exists());
        assert_eq!(
            fs::read_to_string(local.join(REDIRECT_FILE)).unwrap(),
            "../../mayor/rig/.beads\n"
        );
        assert_eq!(
            resolve_store_dir(&crew),
            town.path().join("gastown/mayor/rig/.beads")
        );
    }

    #[test]
    fn setup_prefers_rig_store_and_collapses_chains() {
        let town = town_with_mayor_store();
        write_pointer(&town.path().join("gastown"), "mayor/rig/.beads");
        let polecat = town.path().join("gastown/polecats/nux");
        fs::create_dir_all(&polecat).unwrap();

        let setup = setup_redirect(town.path(), &polecat).unwrap();
        assert_eq!(setup.pointer, PathBuf::from("../../mayor/rig/.beads"));
        let res = resolve_store_dir_detailed(&polecat, DEFAULT_MAX_HOPS);
        assert_eq!(res.hops, 1);
    }

    #[test]
    fn setup_uses_rig_level_store_when_present() {
        let town = tempfile::tempdir().unwrap();
        fs::create_dir_all(town.path().join("beads/.beads")).unwrap();
        let crew = town.path().join("beads/crew/joe");
        fs::create_dir_all(&crew).unwrap();

        let setup = setup_redirect(town.path(), &crew).unwrap();
        assert_eq!(setup.pointer, PathBuf::from("../../.beads"));
        assert_eq!(setup.store_dir, town.path().join("beads/.beads"));
    }

    #[test]
    fn inspect_does_not_repair() {
        let town = tempfile::tempdir().unwrap();
        let a = town.path().join("a");
        let b = town.path().join("b");
        write_pointer(&a, "../b/.beads");
        write_pointer(&b, "../a/.beads");

        let status = inspect_chain(&a, DEFAULT_MAX_HOPS);
        assert!(matches!(
            status,
            ChainStatus::Corrupt { reason: RepairReason::Cycle, .. }
        ));
        assert!(a.join(BEADS_DIR).join(REDIRECT_FILE).exists());
        assert!(b.join(BEADS_DIR).join(REDIRECT_FILE).exists());
    }

    #[test]
    fn inspect_classifies_chains() {
        let town = town_with_mayor_store();
        let crew = town.path().join("gastown/crew/max");
        assert_eq!(inspect_chain(&crew, DEFAULT_MAX_HOPS), ChainStatus::Local);

        write_pointer(&crew, "../../mayor/rig/.beads");
        assert_eq!(
            inspect_chain(&crew, DEFAULT_MAX_HOPS),
            ChainStatus::Terminal {
                store_dir: town.path().join("gastown/mayor/rig/.beads"),
                hops: 1
            }
        );

        write_pointer(&crew, "../../nowhere/.beads");
        assert_eq!(
            inspect_chain(&crew, DEFAULT_MAX_HOPS),
            ChainStatus::Dangling {
                target: town.path().join("gastown/nowhere/.beads")
            }
        );
    }
}
