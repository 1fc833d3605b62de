use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde_json::json;

use crate::fields::{self, AgentFields};
use crate::lifecycle::{
    AgentBeadId, AgentBeads, AgentState, CloseOutcome, SpawnOutcome, parse_agent_bead_id,
    role_bead_id,
};
use crate::store::BdClient;

#[derive(Debug, Subcommand)]
pub enum AgentCommand {
    /// Split an agent bead id into prefix, rig, role and name
    Parse {
        id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show an agent bead with its parsed fields
    Show {
        id: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
        /// Working directory whose store to use (default: current directory)
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Create or reopen an agent bead for a new session
    Spawn {
        id: String,
        /// Bead title (default: derived from the id)
        #[arg(long)]
        title: Option<String>,
        /// Work bead to hook on spawn
        #[arg(long)]
        hook: Option<String>,
        /// Role definition bead (default: hq-<role>-role)
        #[arg(long)]
        role_bead: Option<String>,
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Clear session state and close an agent bead
    Close {
        id: String,
        /// Close reason recorded by the store
        #[arg(long, default_value = "session ended")]
        reason: String,
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Move an agent to a new state (spawning, running, idle, processing, closed)
    State {
        id: String,
        state: AgentState,
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Hook a work bead onto an agent, or clear the hook when omitted
    Hook {
        id: String,
        bead: Option<String>,
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Hard-delete an agent bead. The id can never be created again.
    Delete {
        id: String,
        /// Required: confirms the id is being retired for good
        #[arg(long)]
        force: bool,
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
}

impl AgentCommand {
    pub fn execute(&self) -> anyhow::Result<()> {
        match self {
            AgentCommand::Parse { id, json } => parse(id, *json),
            AgentCommand::Show { id, json, work_dir } => {
                let beads = open(work_dir.as_deref())?;
                let (record, fields) = beads.get_agent_bead(id)?;
                if *json {
                    let out = json!({ "record": record, "fields": fields });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                } else {
                    println!("{}  {}  [{:?}]", record.id, record.title, record.status);
                    let block = fields::format(&fields);
                    if !block.is_empty() {
                        println!("{block}");
                    }
                }
                Ok(())
            }
            AgentCommand::Spawn {
                id,
                title,
                hook,
                role_bead,
                work_dir,
            } => {
                let parsed = require_session_id(id)?;
                let fields = spawn_fields(&parsed, hook.as_deref(), role_bead.as_deref());
                let title = title.clone().unwrap_or_else(|| default_title(&parsed));
                let beads = open(work_dir.as_deref())?;
                let outcome = beads.create_or_reopen_agent_bead(id, &title, &fields)?;
                let verb = match outcome {
                    SpawnOutcome::Created => "created",
                    SpawnOutcome::Reopened => "reopened",
                    SpawnOutcome::Updated => "updated",
                };
                println!("{verb} {id}");
                Ok(())
            }
            AgentCommand::Close {
                id,
                reason,
                work_dir,
            } => {
                let beads = open(work_dir.as_deref())?;
                match beads.close_and_clear_agent_bead(id, reason)? {
                    CloseOutcome::Closed => println!("closed {id}"),
                    CloseOutcome::AlreadyClosed => println!("{id} was already closed; fields cleared"),
                }
                Ok(())
            }
            AgentCommand::State {
                id,
                state,
                work_dir,
            } => {
                let beads = open(work_dir.as_deref())?;
                let fields = beads.update_agent_state(id, *state)?;
                println!("{id} {}", fields.agent_state);
                Ok(())
            }
            AgentCommand::Hook { id, bead, work_dir } => {
                let beads = open(work_dir.as_deref())?;
                let fields = beads.set_hook_bead(id, bead.as_deref())?;
                if fields.hook_bead.is_empty() {
                    println!("{id} unhooked");
                } else {
                    println!("{id} hooked {}", fields.hook_bead);
                }
                Ok(())
            }
            AgentCommand::Delete { id, force, work_dir } => {
                if !*force {
                    anyhow::bail!(
                        "refusing to hard-delete {id}: the store keeps a marker and the id can never be reused. \
                         Use `rigbeads agent close` instead, or pass --force"
                    );
                }
                open(work_dir.as_deref())?.delete_agent_bead(id)?;
                println!("deleted {id}");
                Ok(())
            }
        }
    }
}

fn open(work_dir: Option<&Path>) -> anyhow::Result<AgentBeads<BdClient>> {
    let work_dir = super::dir_or_cwd(work_dir)?;
    let settings = super::settings_near(&work_dir)?;
    let client = BdClient::for_work_dir(&work_dir, &settings.store, settings.redirect.max_hops);
    tracing::debug!(store = %client.store_dir().display(), "using store");
    Ok(AgentBeads::new(client))
}

fn parse(id: &str, json: bool) -> anyhow::Result<()> {
    let Some(parsed) = parse_agent_bead_id(id) else {
        anyhow::bail!("{id} is not an agent bead id");
    };
    let session = parsed.role_kind().is_some();
    if json {
        let out = json!({ "id": id, "parsed": parsed, "session": session });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("prefix: {}", parsed.prefix);
        if let Some(ref rig) = parsed.rig {
            println!("rig: {rig}");
        }
        println!("role: {}", parsed.role);
        if let Some(ref name) = parsed.name {
            println!("name: {name}");
        }
        println!("session: {session}");
    }
    Ok(())
}

fn require_session_id(id: &str) -> anyhow::Result<AgentBeadId> {
    match parse_agent_bead_id(id) {
        Some(parsed) if parsed.role_kind().is_some() => Ok(parsed),
        _ => anyhow::bail!("{id} is not an agent session bead id"),
    }
}

fn spawn_fields(parsed: &AgentBeadId, hook: Option<&str>, role_bead: Option<&str>) -> AgentFields {
    let mut fields = AgentFields {
        role_type: parsed.role.clone(),
        rig: parsed.rig.clone().unwrap_or_default(),
        hook_bead: hook.unwrap_or_default().to_string(),
        role_bead: role_bead.map_or_else(
            || parsed.role_kind().map(role_bead_id).unwrap_or_default(),
            str::to_string,
        ),
        ..Default::default()
    };
    fields.set_state(AgentState::Spawning);
    fields
}

fn default_title(parsed: &AgentBeadId) -> String {
    match (&parsed.name, &parsed.rig) {
        (Some(name), _) => format!("{} {name}", parsed.role),
        (None, Some(rig)) => format!("{} for {rig}", parsed.role),
        (None, None) => parsed.role.clone(),
    }
}
