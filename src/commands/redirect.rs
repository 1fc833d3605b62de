use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_json::json;

use crate::config;
use crate::fsutil::absolute_clean;
use crate::redirect::{resolve_store_dir_detailed, setup_redirect};

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Working directory to resolve (default: current directory)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    /// Print hops and any repair as JSON
    #[arg(long)]
    pub json: bool,
}

impl ResolveArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let work_dir = super::dir_or_cwd(self.work_dir.as_deref())?;
        let settings = super::settings_near(&work_dir)?;
        let resolution = resolve_store_dir_detailed(&work_dir, settings.redirect.max_hops);

        if self.json {
            let repair = resolution.repair.as_ref().map(|r| {
                json!({
                    "pointer": r.pointer,
                    "reason": r.reason.to_string(),
                    "removed": r.removed,
                })
            });
            let out = json!({
                "store_dir": resolution.store_dir,
                "hops": resolution.hops,
                "repair": repair,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            if let Some(ref repair) = resolution.repair {
                eprintln!("repaired {}: {}", repair.pointer.display(), repair.reason);
            }
            println!("{}", resolution.store_dir.display());
        }
        Ok(())
    }
}

#[derive(Debug, Subcommand)]
pub enum RedirectCommand {
    /// Point a worktree's .beads at its rig's canonical store
    Setup {
        /// Worktree directory, at least <rig>/<role> below the town root
        worktree: PathBuf,
        /// Town root (default: discovered from the worktree)
        #[arg(long)]
        town_root: Option<PathBuf>,
    },
}

impl RedirectCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            RedirectCommand::Setup {
                worktree,
                town_root,
            } => {
                let worktree = absolute_clean(worktree);
                let town = match town_root {
                    Some(t) => t.clone(),
                    None => match config::find_town_root(&worktree) {
                        Some(t) => t,
                        None => config::require_town_root(None)?,
                    },
                };
                let setup = setup_redirect(&town, &worktree)?;
                for name in &setup.removed {
                    println!("removed {}", worktree.join(".beads").join(name).display());
                }
                println!(
                    "{}/.beads -> {}",
                    worktree.display(),
                    setup.pointer.display()
                );
                Ok(())
            }
        }
    }
}
