//! Client for the `bd` record store.
//!
//! All durable record state lives in the external `bd` process. This module
//! turns store subcommands into typed calls, parses its JSON tolerantly, and
//! classifies its error text into [`BeadsError`] variants.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::StoreSettings;
use crate::error::BeadsError;
use crate::redirect;
use crate::subprocess::{RunOutput, Tool};

// --- Records ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Deferred,
    Hooked,
    Pinned,
    Closed,
    Tombstone,
    #[serde(other)]
    Unknown,
}

impl RecordStatus {
    /// Visible to normal queries and not closed.
    pub fn is_live(self) -> bool {
        !matches!(self, RecordStatus::Closed | RecordStatus::Tombstone)
    }
}

/// One record as reported by `bd show` / `bd list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: RecordStatus,
    #[serde(
        default,
        rename = "type",
        alias = "issue_type",
        deserialize_with = "null_as_default"
    )]
    pub record_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub priority: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub record_type: String,
    pub priority: Option<u8>,
    pub labels: Vec<String>,
    pub parent: Option<String>,
}

impl NewRecord {
    fn into_record(self) -> Record {
        Record {
            id: self.id,
            title: self.title,
            description: self.description,
            status: RecordStatus::Open,
            record_type: self.record_type,
            priority: self.priority.map_or(0, i64::from),
            labels: self.labels,
            parent: self.parent,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl RecordUpdate {
    pub fn description(description: String) -> Self {
        Self {
            title: None,
            description: Some(description),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<String>,
    pub label: Option<String>,
    pub record_type: Option<String>,
    /// Include closed records.
    pub all: bool,
}

/// Operations the lifecycle manager needs from a record store.
///
/// Each call is one store subcommand, treated as atomic.
pub trait RecordStore {
    fn show(&self, id: &str) -> Result<Record, BeadsError>;
    fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, BeadsError>;
    fn create(&self, new: &NewRecord) -> Result<Record, BeadsError>;
    fn update(&self, id: &str, update: &RecordUpdate) -> Result<(), BeadsError>;
    fn close(&self, id: &str, reason: &str) -> Result<(), BeadsError>;
    fn reopen(&self, id: &str, reason: &str) -> Result<(), BeadsError>;
    /// Hard delete. The store leaves an invisible marker that blocks reuse
    /// of `id`.
    fn delete(&self, id: &str) -> Result<(), BeadsError>;
}

// --- Output adapters ---

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Record>),
    One(Box<Record>),
}

/// Parse `bd show --json`, which emits either one object or an array.
pub fn parse_show(json: &str, id: &str) -> Result<Record, BeadsError> {
    let parsed: OneOrMany = serde_json::from_str(json).map_err(|e| BeadsError::Store {
        subcommand: "show",
        message: format!("unparseable output: {e}"),
    })?;
    match parsed {
        OneOrMany::One(record) => Ok(*record),
        OneOrMany::Many(records) => records
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| BeadsError::NotFound { id: id.to_string() }),
    }
}

/// Parse `bd list --json`. Empty output is an empty list.
pub fn parse_list(json: &str) -> Result<Vec<Record>, BeadsError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).map_err(|e| BeadsError::Store {
        subcommand: "list",
        message: format!("unparseable output: {e}"),
    })
}

const NOT_FOUND_PHRASES: &[&str] = &["not found", "no issue found", "no issues found matching"];
const CONFLICT_PHRASES: &[&str] = &["unique constraint failed", "already exists", "duplicate"];

/// Map `bd` error text onto the error taxonomy.
pub fn classify_failure(subcommand: &'static str, id: &str, stderr: &str) -> BeadsError {
    let lower = stderr.to_ascii_lowercase();
    if NOT_FOUND_PHRASES.iter().any(|p| lower.contains(p)) {
        BeadsError::NotFound { id: id.to_string() }
    } else if CONFLICT_PHRASES.iter().any(|p| lower.contains(p)) {
        BeadsError::Conflict { id: id.to_string() }
    } else {
        BeadsError::Store {
            subcommand,
            message: stderr.trim().to_string(),
        }
    }
}

// --- bd client ---

/// A `bd` client bound to one resolved store directory.
///
/// Build one per logical session and pass it to whatever needs the store.
#[derive(Debug, Clone)]
pub struct BdClient {
    program: String,
    work_dir: PathBuf,
    store_dir: PathBuf,
    timeout: Duration,
}

impl BdClient {
    /// Resolve `work_dir`'s store through its redirect chain and bind to it.
    pub fn for_work_dir(work_dir: &Path, settings: &StoreSettings, max_hops: usize) -> Self {
        let resolution = redirect::resolve_store_dir_detailed(work_dir, max_hops);
        if let Some(ref repair) = resolution.repair {
            tracing::info!(pointer = %repair.pointer.display(), "{}", repair.reason);
        }
        Self::with_store_dir(work_dir, resolution.store_dir, settings)
    }

    pub fn with_store_dir(work_dir: &Path, store_dir: PathBuf, settings: &StoreSettings) -> Self {
        Self {
            program: settings.program.clone(),
            work_dir: work_dir.to_path_buf(),
            store_dir,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    fn command(&self, args: &[String]) -> Tool {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Tool::new(&self.program)
            .args(&args)
            .env("BEADS_DIR", &self.store_dir.to_string_lossy())
            .current_dir(&self.work_dir)
            .timeout(self.timeout)
    }

    fn exec(&self, subcommand: &'static str, id: &str, args: &[String]) -> Result<RunOutput, BeadsError> {
        let output = self.command(args).run()?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify_failure(subcommand, id, &output.stderr))
        }
    }

    fn show_args(id: &str) -> Vec<String> {
        vec!["show".into(), id.into(), "--json".into()]
    }

    fn list_args(filter: &ListFilter) -> Vec<String> {
        let mut args = vec!["list".to_string(), "--json".to_string()];
        if let Some(ref status) = filter.status {
            args.push(format!("--status={status}"));
        }
        if let Some(ref label) = filter.label {
            args.push(format!("--label={label}"));
        }
        if let Some(ref t) = filter.record_type {
            args.push(format!("--type={t}"));
        }
        if filter.all {
            args.push("--all".into());
        }
        args
    }

    fn create_args(new: &NewRecord) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--json".to_string(),
            format!("--id={}", new.id),
            format!("--title={}", new.title),
            format!("--description={}", new.description),
        ];
        if !new.record_type.is_empty() {
            args.push(format!("--type={}", new.record_type));
        }
        if let Some(p) = new.priority {
            args.push(format!("--priority={p}"));
        }
        if !new.labels.is_empty() {
            args.push(format!("--labels={}", new.labels.join(",")));
        }
        if let Some(ref parent) = new.parent {
            args.push(format!("--parent={parent}"));
        }
        args
    }

    fn update_args(id: &str, update: &RecordUpdate) -> Vec<String> {
        let mut args = vec!["update".to_string(), id.to_string()];
        if let Some(ref title) = update.title {
            args.push(format!("--title={title}"));
        }
        if let Some(ref description) = update.description {
            args.push(format!("--description={description}"));
        }
        args
    }
}

impl RecordStore for BdClient {
    fn show(&self, id: &str) -> Result<Record, BeadsError> {
        let output = self.exec("show", id, &Self::show_args(id))?;
        parse_show(&output.stdout, id)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, BeadsError> {
        let output = self.exec("list", "", &Self::list_args(filter))?;
        parse_list(&output.stdout)
    }

    fn create(&self, new: &NewRecord) -> Result<Record, BeadsError> {
        let output = self.exec("create", &new.id, &Self::create_args(new))?;
        // Older bd builds print a human summary even with --json.
        Ok(serde_json::from_str(&output.stdout).unwrap_or_else(|_| new.clone().into_record()))
    }

    fn update(&self, id: &str, update: &RecordUpdate) -> Result<(), BeadsError> {
        if update.is_empty() {
            return Ok(());
        }
        self.exec("update", id, &Self::update_args(id, update))?;
        Ok(())
    }

    fn close(&self, id: &str, reason: &str) -> Result<(), BeadsError> {
        let args = vec!["close".into(), id.into(), format!("--reason={reason}")];
        self.exec("close", id, &args)?;
        Ok(())
    }

    fn reopen(&self, id: &str, reason: &str) -> Result<(), BeadsError> {
        let args = vec!["reopen".into(), id.into(), format!("--reason={reason}")];
        self.exec("reopen", id, &args)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), BeadsError> {
        let args = vec!["delete".into(), id.into(), "--hard".into(), "--force".into()];
        self.exec("delete", id, &args)?;
        Ok(())
    }
}
