use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::Args;
use serde::Serialize;

use crate::config::{self, FleetRegistry, Settings};
use crate::redirect::{self, BEADS_DIR, ChainStatus, REDIRECT_FILE};
use crate::routes;

#[derive(Debug, Args)]
pub struct DoctorArgs {
    /// Town root (default: discovered from the current directory)
    #[arg(long)]
    pub town_root: Option<PathBuf>,
    /// Add missing routes and re-point broken worktree redirects
    #[arg(long)]
    pub fix: bool,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Text,
    Json,
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub town_root: String,
    pub rigs: Vec<String>,
    pub routes: usize,
    pub worktrees: Vec<WorktreeStatus>,
    pub fixed: Vec<String>,
    pub issues: Vec<String>,
    /// Issues among `issues` that `--fix` would repair.
    pub fixable: usize,
}

#[derive(Debug, Serialize)]
pub struct WorktreeStatus {
    pub path: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<String>,
}

impl DoctorArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let town = config::require_town_root(self.town_root.as_deref())?;
        let registry = FleetRegistry::load_or_empty(&town)?;
        let settings = Settings::for_town(Some(&town))?;

        let format = self.format.unwrap_or_else(|| {
            if std::io::stdout().is_terminal() {
                OutputFormat::Pretty
            } else {
                OutputFormat::Text
            }
        });

        let mut report = DoctorReport {
            town_root: town.display().to_string(),
            rigs: registry.rigs.keys().cloned().collect(),
            routes: 0,
            worktrees: vec![],
            fixed: vec![],
            issues: vec![],
            fixable: 0,
        };

        // Routes
        if self.fix {
            for route in routes::repair_routes(&town, &registry)? {
                report
                    .fixed
                    .push(format!("added route {} -> {}", route.prefix, route.path));
            }
        }
        for issue in routes::check_routes(&town, &registry)? {
            if issue.is_fixable() {
                report.fixable += 1;
            }
            report.issues.push(issue.to_string());
        }
        report.routes = routes::load_routes(&routes::town_store_dir(&town))?.len();

        // Worktree redirects
        for rig in registry.rigs.keys() {
            let rig_root = town.join(rig);
            if !rig_root.is_dir() {
                report.issues.push(format!("rig {rig}: directory {} missing", rig_root.display()));
                continue;
            }
            for worktree in redirected_worktrees(&rig_root) {
                let status = self.check_worktree(&town, &worktree, settings.redirect.max_hops, &mut report);
                report.worktrees.push(status);
            }
        }

        let issue_count = report.issues.len();

        match format {
            OutputFormat::Pretty => print_pretty(&report),
            OutputFormat::Text => print_text(&report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        }

        // Exit code carries the issue count
        if issue_count > 0 {
            return Err(crate::error::ExitError::new(
                u8::try_from(issue_count.min(125)).unwrap_or(125),
                format!("{issue_count} issue(s) found"),
            )
            .into());
        }

        Ok(())
    }

    fn check_worktree(
        &self,
        town: &Path,
        worktree: &Path,
        max_hops: usize,
        report: &mut DoctorReport,
    ) -> WorktreeStatus {
        let rel = worktree
            .strip_prefix(town)
            .unwrap_or(worktree)
            .display()
            .to_string();

        let problem = match redirect::inspect_chain(worktree, max_hops) {
            ChainStatus::Local => None,
            ChainStatus::Terminal { store_dir, hops: 1 } => {
                return WorktreeStatus {
                    path: rel,
                    status: "ok".into(),
                    store_dir: Some(store_dir.display().to_string()),
                };
            }
            ChainStatus::Terminal { hops, .. } => Some(format!("redirect chain of {hops} hops")),
            ChainStatus::Dangling { target } => {
                Some(format!("redirect target {} missing", target.display()))
            }
            ChainStatus::Corrupt { reason, .. } => Some(reason.to_string()),
        };
        let Some(problem) = problem else {
            return WorktreeStatus {
                path: rel,
                status: "local".into(),
                store_dir: None,
            };
        };

        if self.fix {
            match redirect::setup_redirect(town, worktree) {
                Ok(setup) => {
                    report.fixed.push(format!("{rel}: {problem}; re-pointed to {}", setup.pointer.display()));
                    return WorktreeStatus {
                        path: rel,
                        status: "fixed".into(),
                        store_dir: Some(setup.store_dir.display().to_string()),
                    };
                }
                Err(e) => report.issues.push(format!("{rel}: {problem}; could not fix: {e}")),
            }
        } else {
            report.fixable += 1;
            report.issues.push(format!("{rel}: {problem}"));
        }
        WorktreeStatus {
            path: rel,
            status: problem,
            store_dir: None,
        }
    }
}

/// `<rig>/<role>` and `<rig>/<role>/<name>` directories whose `.beads`
/// carries a redirect pointer.
fn redirected_worktrees(rig_root: &Path) -> Vec<PathBuf> {
    let has_pointer = |dir: &Path| dir.join(BEADS_DIR).join(REDIRECT_FILE).is_file();
    let mut found = Vec::new();
    for role_dir in subdirs(rig_root) {
        if has_pointer(&role_dir) {
            found.push(role_dir.clone());
        }
        for named in subdirs(&role_dir) {
            if has_pointer(&named) {
                found.push(named);
            }
        }
    }
    found
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .collect();
    dirs.sort();
    dirs
}

fn print_pretty(report: &DoctorReport) {
    println!("=== rigbeads doctor ===\n");
    println!("Town:   {}", report.town_root);
    println!("Rigs:   {}", report.rigs.join(", "));
    println!("Routes: {}", report.routes);

    if !report.worktrees.is_empty() {
        println!("\nWorktrees:");
        for wt in &report.worktrees {
            let mark = match wt.status.as_str() {
                "ok" | "local" | "fixed" => "✓",
                _ => "✗",
            };
            println!("  {mark} {}: {}", wt.path, wt.status);
        }
    }

    if !report.fixed.is_empty() {
        println!("\nFixed ({}):", report.fixed.len());
        for fix in &report.fixed {
            println!("  • {fix}");
        }
    }

    if report.issues.is_empty() {
        println!("\n✓ No issues found");
    } else {
        println!("\nIssues ({}):", report.issues.len());
        for issue in &report.issues {
            println!("  • {issue}");
        }
        if report.fixable > 0 {
            println!("\n{} fixable with `rigbeads doctor --fix`", report.fixable);
        }
    }
}

fn print_text(report: &DoctorReport) {
    println!(
        "rigbeads-doctor  town={}  rigs={}  routes={}",
        report.town_root,
        report.rigs.len(),
        report.routes
    );
    for wt in &report.worktrees {
        println!("worktree  {}  {}", wt.path, wt.status);
    }
    for fix in &report.fixed {
        println!("fixed  {fix}");
    }
    if !report.issues.is_empty() {
        println!("issues  count={}  fixable={}", report.issues.len(), report.fixable);
        for issue in &report.issues {
            println!("issue  {issue}");
        }
    }
}
