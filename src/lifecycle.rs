//! Agent session beads: identity grammar, state machine and lifecycle.
//!
//! A hard delete in the store leaves a marker that keeps the id reserved
//! forever while hiding it from lookups. Session beads are therefore never
//! deleted in normal flow. They are closed with their session state cleared
//! and reopened on the next spawn, which keeps ids reusable.

use std::fmt;
use std::str::FromStr;

use crate::error::BeadsError;
use crate::fields::{self, AgentFields};
use crate::store::{NewRecord, Record, RecordStatus, RecordStore, RecordUpdate};

/// Label carried by every agent session bead.
pub const AGENT_LABEL: &str = "gt:agent";
/// Prefix of town-level beads.
pub const TOWN_PREFIX: &str = "hq";

const REOPEN_REASON: &str = "agent respawned";

// --- State machine ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Spawning,
    Running,
    Idle,
    Processing,
    Closed,
}

impl AgentState {
    pub const ALL: [AgentState; 5] = [
        AgentState::Spawning,
        AgentState::Running,
        AgentState::Idle,
        AgentState::Processing,
        AgentState::Closed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Spawning => "spawning",
            AgentState::Running => "running",
            AgentState::Idle => "idle",
            AgentState::Processing => "processing",
            AgentState::Closed => "closed",
        }
    }

    /// Whether a live update may move an agent from `self` to `next`.
    ///
    /// `closed -> spawning` is not listed: it only happens through reopen.
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::{Closed, Idle, Processing, Running, Spawning};
        matches!(
            (self, next),
            (Spawning, Running)
                | (Running, Idle | Processing)
                | (Idle, Processing)
                | (Processing, Idle)
                | (Spawning | Running | Idle | Processing, Closed)
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AgentState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown agent state: {s}"))
    }
}

// --- Identity ---

/// Session roles an agent bead can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Mayor,
    Deacon,
    Dog,
    Witness,
    Refinery,
    Crew,
    Polecat,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Mayor,
        Role::Deacon,
        Role::Dog,
        Role::Witness,
        Role::Refinery,
        Role::Crew,
        Role::Polecat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Mayor => "mayor",
            Role::Deacon => "deacon",
            Role::Dog => "dog",
            Role::Witness => "witness",
            Role::Refinery => "refinery",
            Role::Crew => "crew",
            Role::Polecat => "polecat",
        }
    }

    pub fn from_token(token: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == token)
    }

    /// Town-level roles live under the `hq` prefix with no rig.
    pub fn is_town_scoped(self) -> bool {
        matches!(self, Role::Mayor | Role::Deacon | Role::Dog)
    }

    /// Roles with several instances, told apart by name.
    pub fn is_named(self) -> bool {
        matches!(self, Role::Dog | Role::Crew | Role::Polecat)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Components of an agent bead id.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AgentBeadId {
    pub prefix: String,
    pub rig: Option<String>,
    pub role: String,
    pub name: Option<String>,
}

impl AgentBeadId {
    pub fn role_kind(&self) -> Option<Role> {
        Role::from_token(&self.role)
    }
}

/// Split an agent bead id into prefix, rig, role and name.
///
/// The prefix is everything before the first hyphen and must be two or
/// three characters. After it come one part (`role`), two parts (`rig-role`,
/// or town-level `dog-<name>`), or three or more parts (`rig-role-name`,
/// where the name may itself contain hyphens).
pub fn parse_agent_bead_id(id: &str) -> Option<AgentBeadId> {
    let (prefix, rest) = id.split_once('-')?;
    if !(2..=3).contains(&prefix.chars().count()) {
        return None;
    }
    let parts: Vec<&str> = rest.split('-').collect();
    let parsed = match parts.as_slice() {
        [role] => AgentBeadId {
            prefix: prefix.into(),
            rig: None,
            role: (*role).into(),
            name: None,
        },
        ["dog", name] => AgentBeadId {
            prefix: prefix.into(),
            rig: None,
            role: "dog".into(),
            name: Some((*name).to_string()),
        },
        [rig, role] => AgentBeadId {
            prefix: prefix.into(),
            rig: Some((*rig).to_string()),
            role: (*role).into(),
            name: None,
        },
        [rig, role, name @ ..] => AgentBeadId {
            prefix: prefix.into(),
            rig: Some((*rig).to_string()),
            role: (*role).into(),
            name: Some(name.join("-")),
        },
        [] => return None,
    };
    let empty = |s: &Option<String>| s.as_deref().is_some_and(str::is_empty);
    if parsed.role.is_empty() || empty(&parsed.rig) || empty(&parsed.name) {
        return None;
    }
    Some(parsed)
}

/// True when `id` parses and its role is a recognized session role.
pub fn is_agent_session_bead(id: &str) -> bool {
    parse_agent_bead_id(id).is_some_and(|p| p.role_kind().is_some())
}

/// Build an agent bead id. Town-scoped roles ignore `rig`.
pub fn agent_bead_id(prefix: &str, rig: Option<&str>, role: Role, name: Option<&str>) -> String {
    let mut id = format!("{prefix}-");
    if let Some(rig) = rig.filter(|_| !role.is_town_scoped()) {
        id.push_str(rig);
        id.push('-');
    }
    id.push_str(role.as_str());
    if let Some(name) = name {
        id.push('-');
        id.push_str(name);
    }
    id
}

pub fn mayor_bead_id() -> String {
    agent_bead_id(TOWN_PREFIX, None, Role::Mayor, None)
}

pub fn deacon_bead_id() -> String {
    agent_bead_id(TOWN_PREFIX, None, Role::Deacon, None)
}

pub fn dog_bead_id(name: &str) -> String {
    agent_bead_id(TOWN_PREFIX, None, Role::Dog, Some(name))
}

pub fn witness_bead_id(prefix: &str, rig: &str) -> String {
    agent_bead_id(prefix, Some(rig), Role::Witness, None)
}

pub fn refinery_bead_id(prefix: &str, rig: &str) -> String {
    agent_bead_id(prefix, Some(rig), Role::Refinery, None)
}

pub fn crew_bead_id(prefix: &str, rig: &str, name: &str) -> String {
    agent_bead_id(prefix, Some(rig), Role::Crew, Some(name))
}

pub fn polecat_bead_id(prefix: &str, rig: &str, name: &str) -> String {
    agent_bead_id(prefix, Some(rig), Role::Polecat, Some(name))
}

/// Town-level bead describing a role's configuration, e.g. `hq-polecat-role`.
pub fn role_bead_id(role: Role) -> String {
    format!("{TOWN_PREFIX}-{role}-role")
}

// --- Lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Created,
    Reopened,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    AlreadyClosed,
}

/// Agent bead lifecycle over any [`RecordStore`].
#[derive(Debug)]
pub struct AgentBeads<S> {
    store: S,
}

impl<S: RecordStore> AgentBeads<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create a fresh agent bead.
    ///
    /// A conflict on an id that no query can see is the hard-delete marker
    /// and comes back as [`BeadsError::UnrecoverableIdentity`].
    pub fn create_agent_bead(
        &self,
        id: &str,
        title: &str,
        fields: &AgentFields,
    ) -> Result<Record, BeadsError> {
        fields::validate(fields)?;
        let new = NewRecord {
            id: id.to_string(),
            title: title.to_string(),
            description: fields::format(fields),
            record_type: "agent".into(),
            priority: None,
            labels: vec![AGENT_LABEL.into()],
            parent: None,
        };
        match self.store.create(&new) {
            Ok(record) => {
                tracing::info!(id, "created agent bead");
                Ok(record)
            }
            Err(e) if e.is_conflict() => Err(self.explain_conflict(id)),
            Err(e) => Err(e),
        }
    }

    fn explain_conflict(&self, id: &str) -> BeadsError {
        match self.store.show(id) {
            Ok(record) if record.status == RecordStatus::Tombstone => unrecoverable(id),
            Ok(_) => BeadsError::Conflict { id: id.to_string() },
            Err(e) if e.is_not_found() => unrecoverable(id),
            Err(e) => e,
        }
    }

    /// Fetch a bead and its parsed agent block.
    pub fn get_agent_bead(&self, id: &str) -> Result<(Record, AgentFields), BeadsError> {
        let record = self.store.show(id)?;
        if record.status == RecordStatus::Tombstone {
            return Err(unrecoverable(id));
        }
        let fields = fields::parse(&record.description).unwrap_or_default();
        Ok((record, fields))
    }

    /// Clear session fields, mark closed, then close the record.
    ///
    /// Closing an already-closed bead still rewrites its field block but
    /// skips the store close.
    pub fn close_and_clear_agent_bead(
        &self,
        id: &str,
        reason: &str,
    ) -> Result<CloseOutcome, BeadsError> {
        let (record, mut fields) = self.get_agent_bead(id)?;
        fields.clear_for_close();
        self.write_fields(&record, None, &fields)?;

        if record.status == RecordStatus::Closed {
            tracing::debug!(id, "agent bead already closed");
            return Ok(CloseOutcome::AlreadyClosed);
        }
        self.store.close(id, reason)?;
        tracing::info!(id, reason, "closed agent bead");
        Ok(CloseOutcome::Closed)
    }

    /// Bring an agent bead into existence for a new session.
    ///
    /// Reopens a closed bead or refreshes a live one, replacing its field
    /// block entirely. Creates it when the id has never been used.
    pub fn create_or_reopen_agent_bead(
        &self,
        id: &str,
        title: &str,
        fields: &AgentFields,
    ) -> Result<SpawnOutcome, BeadsError> {
        fields::validate(fields)?;
        match self.store.show(id) {
            Ok(record) => self.respawn(&record, title, fields),
            Err(e) if e.is_not_found() => match self.create_agent_bead(id, title, fields) {
                Ok(_) => Ok(SpawnOutcome::Created),
                // Created by someone else between our show and create.
                Err(BeadsError::Conflict { .. }) => {
                    let record = self.store.show(id)?;
                    self.respawn(&record, title, fields)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Reopen `record` if closed, then replace its field block.
    fn respawn(
        &self,
        record: &Record,
        title: &str,
        fields: &AgentFields,
    ) -> Result<SpawnOutcome, BeadsError> {
        match record.status {
            RecordStatus::Tombstone => Err(unrecoverable(&record.id)),
            RecordStatus::Closed => {
                self.reopen(&record.id)?;
                self.write_fields(record, Some(title), fields)?;
                tracing::info!(id = %record.id, "reopened agent bead");
                Ok(SpawnOutcome::Reopened)
            }
            _ => {
                self.write_fields(record, Some(title), fields)?;
                tracing::info!(id = %record.id, "refreshed live agent bead");
                Ok(SpawnOutcome::Updated)
            }
        }
    }

    fn reopen(&self, id: &str) -> Result<(), BeadsError> {
        self.store.reopen(id, REOPEN_REASON).map_err(|e| {
            if e.is_not_found() {
                unrecoverable(id)
            } else {
                e
            }
        })
    }

    /// Hard-delete a bead. The id can never be created again.
    pub fn delete_agent_bead(&self, id: &str) -> Result<(), BeadsError> {
        tracing::warn!(id, "hard-deleting agent bead; the id cannot be reused");
        self.store.delete(id)
    }

    /// Move an agent to `next`, checking the transition is allowed.
    pub fn update_agent_state(&self, id: &str, next: AgentState) -> Result<AgentFields, BeadsError> {
        if next == AgentState::Closed {
            self.close_and_clear_agent_bead(id, "agent state set to closed")?;
            return self.get_agent_bead(id).map(|(_, fields)| fields);
        }

        let (record, mut fields) = self.get_agent_bead(id)?;
        let current = if record.status == RecordStatus::Closed {
            Some(AgentState::Closed)
        } else {
            fields.state()
        };
        if let Some(current) = current {
            if current != next && !current.can_transition_to(next) {
                return Err(BeadsError::InvalidTransition {
                    id: id.to_string(),
                    from: current.to_string(),
                    to: next.to_string(),
                });
            }
        }

        fields.set_state(next);
        self.write_fields(&record, None, &fields)?;
        tracing::debug!(id, state = %next, "updated agent state");
        Ok(fields)
    }

    /// Attach `hook` as the agent's current work, or clear it with `None`.
    pub fn set_hook_bead(&self, id: &str, hook: Option<&str>) -> Result<AgentFields, BeadsError> {
        let (record, mut fields) = self.get_agent_bead(id)?;
        if hook.is_some() && !record.status.is_live() {
            return Err(BeadsError::InvalidTransition {
                id: id.to_string(),
                from: AgentState::Closed.to_string(),
                to: "hooked".into(),
            });
        }
        fields.hook_bead = hook.unwrap_or_default().to_string();
        self.write_fields(&record, None, &fields)?;
        Ok(fields)
    }

    fn write_fields(
        &self,
        record: &Record,
        title: Option<&str>,
        fields: &AgentFields,
    ) -> Result<(), BeadsError> {
        fields::validate(fields)?;
        let description = fields::set_fields(&record.description, fields);
        let update = RecordUpdate {
            title: title.filter(|t| *t != record.title).map(str::to_string),
            description: (description != record.description).then_some(description),
        };
        self.store.update(&record.id, &update)
    }
}

fn unrecoverable(id: &str) -> BeadsError {
    BeadsError::UnrecoverableIdentity { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::store::ListFilter;
    use crate::store::testing::MemoryStore;

    fn polecat_fields(hook: &str) -> AgentFields {
        AgentFields {
            role_type: "polecat".into(),
            rig: "gastown".into(),
            agent_state: "spawning".into(),
            hook_bead: hook.into(),
            role_bead: role_bead_id(Role::Polecat),
            ..Default::default()
        }
    }

    const NUX: &str = "gt-gastown-polecat-nux";

    // --- ids ---

    #[test]
    fn parse_rig_scoped_ids() {
        let p = parse_agent_bead_id("gt-gastown-witness").unwrap();
        assert_eq!(p.prefix, "gt");
        assert_eq!(p.rig.as_deref(), Some("gastown"));
        assert_eq!(p.role, "witness");
        assert_eq!(p.name, None);

        let p = parse_agent_bead_id("gt-gastown-crew-joe").unwrap();
        assert_eq!(p.role, "crew");
        assert_eq!(p.name.as_deref(), Some("joe"));
    }

    #[test]
    fn parse_town_scoped_ids() {
        let p = parse_agent_bead_id("hq-mayor").unwrap();
        assert_eq!(p.rig, None);
        assert_eq!(p.role, "mayor");

        let p = parse_agent_bead_id("hq-dog-alpha").unwrap();
        assert_eq!(p.rig, None);
        assert_eq!(p.role, "dog");
        assert_eq!(p.name.as_deref(), Some("alpha"));
    }

    #[test]
    fn names_may_contain_hyphens() {
        let p = parse_agent_bead_id("gt-gastown-polecat-nux-2").unwrap();
        assert_eq!(p.name.as_deref(), Some("nux-2"));
    }

    #[test]
    fn parse_rejects_bad_prefix_and_empty_parts() {
        assert_eq!(parse_agent_bead_id("x-mayor"), None);
        assert_eq!(parse_agent_bead_id("abcd-mayor"), None);
        assert_eq!(parse_agent_bead_id("mayor"), None);
        assert_eq!(parse_agent_bead_id("gt-"), None);
        assert_eq!(parse_agent_bead_id("gt--witness"), None);
        assert_eq!(parse_agent_bead_id("gt-gastown-crew-"), None);
    }

    #[test]
    fn session_bead_detection() {
        assert!(is_agent_session_bead("hq-mayor"));
        assert!(is_agent_session_bead("gt-gastown-refinery"));
        assert!(is_agent_session_bead("gt-gastown-polecat-nux-2"));
        assert!(!is_agent_session_bead("gt-abc12"));
        assert!(!is_agent_session_bead("hq-polecat-role"));
        assert!(!is_agent_session_bead("x-mayor"));
    }

    #[test]
    fn id_builders_round_trip_through_parse() {
        let ids = [
            mayor_bead_id(),
            deacon_bead_id(),
            dog_bead_id("alpha"),
            witness_bead_id("gt", "gastown"),
            refinery_bead_id("gt", "gastown"),
            crew_bead_id("gt", "gastown", "max"),
            polecat_bead_id("bd", "beads", "nux-2"),
        ];
        assert_eq!(ids[0], "hq-mayor");
        assert_eq!(ids[2], "hq-dog-alpha");
        assert_eq!(ids[5], "gt-gastown-crew-max");
        for id in &ids {
            assert!(is_agent_session_bead(id), "{id}");
        }
        assert_eq!(agent_bead_id("hq", Some("ignored"), Role::Deacon, None), "hq-deacon");
        assert_eq!(role_bead_id(Role::Witness), "hq-witness-role");
    }

    // --- state machine ---

    #[test]
    fn state_parse_and_display() {
        assert_eq!("Running".parse::<AgentState>(), Ok(AgentState::Running));
        assert!("dancing".parse::<AgentState>().is_err());
        assert_eq!(AgentState::Processing.to_string(), "processing");
    }

    #[test]
    fn allowed_transitions() {
        use AgentState::*;
        assert!(Spawning.can_transition_to(Running));
        assert!(Running.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Closed));
        assert!(!Closed.can_transition_to(Spawning));
        assert!(!Spawning.can_transition_to(Idle));
        assert!(!Closed.can_transition_to(Running));
    }

    // --- lifecycle ---

    #[test]
    fn create_then_spawn_again_updates() {
        let beads = AgentBeads::new(MemoryStore::new());
        assert_eq!(
            beads
                .create_or_reopen_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-a"))
                .unwrap(),
            SpawnOutcome::Created
        );
        let rec = beads.store().get(NUX).unwrap();
        assert_eq!(rec.labels, vec![AGENT_LABEL]);
        assert_eq!(rec.record_type, "agent");

        assert_eq!(
            beads
                .create_or_reopen_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-b"))
                .unwrap(),
            SpawnOutcome::Updated
        );
        let (_, fields) = beads.get_agent_bead(NUX).unwrap();
        assert_eq!(fields.hook_bead, "gt-b");
    }

    #[test]
    fn close_then_reopen_reuses_id_with_fresh_fields() {
        let beads = AgentBeads::new(MemoryStore::new());
        beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-old"))
            .unwrap();
        beads
            .store()
            .update(
                NUX,
                &RecordUpdate::description(format!(
                    "{}\n\nWorker notes stay.",
                    beads.store().get(NUX).unwrap().description
                )),
            )
            .unwrap();

        assert_eq!(
            beads.close_and_clear_agent_bead(NUX, "session ended").unwrap(),
            CloseOutcome::Closed
        );
        let (rec, fields) = beads.get_agent_bead(NUX).unwrap();
        assert_eq!(rec.status, RecordStatus::Closed);
        assert_eq!(fields.state(), Some(AgentState::Closed));
        assert!(fields.hook_bead.is_empty());
        assert_eq!(fields.role_type, "polecat");

        assert_eq!(
            beads
                .create_or_reopen_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-new"))
                .unwrap(),
            SpawnOutcome::Reopened
        );
        let (rec, fields) = beads.get_agent_bead(NUX).unwrap();
        assert_eq!(rec.status, RecordStatus::Open);
        assert_eq!(fields.hook_bead, "gt-new");
        assert_eq!(fields.state(), Some(AgentState::Spawning));
        assert!(rec.description.ends_with("Worker notes stay."));
    }

    #[test]
    fn second_close_rewrites_fields_but_skips_store_close() {
        let beads = AgentBeads::new(MemoryStore::new());
        beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-a"))
            .unwrap();
        beads.close_and_clear_agent_bead(NUX, "done").unwrap();
        // Something re-hooked the closed bead behind our back.
        beads
            .store()
            .update(NUX, &RecordUpdate::description("hook_bead: gt-stale".into()))
            .unwrap();

        assert_eq!(
            beads.close_and_clear_agent_bead(NUX, "done").unwrap(),
            CloseOutcome::AlreadyClosed
        );
        let (_, fields) = beads.get_agent_bead(NUX).unwrap();
        assert!(fields.hook_bead.is_empty());
        let closes = beads
            .store()
            .calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("close "))
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn delete_then_create_is_unrecoverable() {
        let beads = AgentBeads::new(MemoryStore::new());
        beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields(""))
            .unwrap();
        beads.delete_agent_bead(NUX).unwrap();

        let err = beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields(""))
            .unwrap_err();
        assert!(matches!(err, BeadsError::UnrecoverableIdentity { .. }));

        let err = beads
            .create_or_reopen_agent_bead(NUX, "Polecat nux", &polecat_fields(""))
            .unwrap_err();
        assert!(matches!(err, BeadsError::UnrecoverableIdentity { .. }));
    }

    #[test]
    fn create_on_live_id_is_plain_conflict() {
        let beads = AgentBeads::new(MemoryStore::new());
        beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields(""))
            .unwrap();
        let err = beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields(""))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn close_missing_bead_is_not_found() {
        let beads = AgentBeads::new(MemoryStore::new());
        assert!(beads
            .close_and_clear_agent_bead("gt-gastown-witness", "x")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn state_updates_follow_transitions() {
        let beads = AgentBeads::new(MemoryStore::new());
        beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields(""))
            .unwrap();

        let err = beads.update_agent_state(NUX, AgentState::Idle).unwrap_err();
        assert!(matches!(err, BeadsError::InvalidTransition { .. }));

        beads.update_agent_state(NUX, AgentState::Running).unwrap();
        beads.update_agent_state(NUX, AgentState::Processing).unwrap();
        let fields = beads.update_agent_state(NUX, AgentState::Processing).unwrap();
        assert_eq!(fields.state(), Some(AgentState::Processing));

        let fields = beads.update_agent_state(NUX, AgentState::Closed).unwrap();
        assert_eq!(fields.state(), Some(AgentState::Closed));
        assert_eq!(
            beads.store().get(NUX).unwrap().status,
            RecordStatus::Closed
        );
        assert!(beads.update_agent_state(NUX, AgentState::Spawning).is_err());
    }

    #[test]
    fn hook_set_and_clear() {
        let beads = AgentBeads::new(MemoryStore::new());
        beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields(""))
            .unwrap();
        let fields = beads.set_hook_bead(NUX, Some("gt-abc12")).unwrap();
        assert_eq!(fields.hook_bead, "gt-abc12");
        let fields = beads.set_hook_bead(NUX, None).unwrap();
        assert!(fields.hook_bead.is_empty());

        beads.close_and_clear_agent_bead(NUX, "done").unwrap();
        assert!(beads.set_hook_bead(NUX, Some("gt-x")).is_err());
    }

    #[test]
    fn close_clears_notification_level() {
        let beads = AgentBeads::new(MemoryStore::new());
        let fields = AgentFields {
            notification_level: "verbose".into(),
            ..polecat_fields("gt-a")
        };
        beads.create_agent_bead(NUX, "Polecat nux", &fields).unwrap();
        beads.close_and_clear_agent_bead(NUX, "session ended").unwrap();

        let (_, after) = beads.get_agent_bead(NUX).unwrap();
        assert!(after.notification_level.is_empty());
        assert_eq!(after.role_bead, "hq-polecat-role");
    }

    #[test]
    fn multiline_values_never_reach_the_store() {
        let beads = AgentBeads::new(MemoryStore::new());
        let smuggled = polecat_fields("gt-a\nrig: injected");

        let err = beads
            .create_or_reopen_agent_bead(NUX, "Polecat nux", &smuggled)
            .unwrap_err();
        assert!(matches!(err, BeadsError::InvalidField(_)));
        assert!(beads.store().calls.borrow().is_empty());

        beads
            .create_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-a"))
            .unwrap();
        let err = beads.set_hook_bead(NUX, Some("gt-b\r\nrig: x")).unwrap_err();
        assert!(matches!(err, BeadsError::InvalidField(_)));
        let (_, fields) = beads.get_agent_bead(NUX).unwrap();
        assert_eq!(fields.rig, "gastown");
        assert_eq!(fields.hook_bead, "gt-a");

        beads.close_and_clear_agent_bead(NUX, "done").unwrap();
        assert!(beads
            .create_or_reopen_agent_bead(NUX, "Polecat nux", &smuggled)
            .is_err());
        assert_eq!(beads.store().get(NUX).unwrap().status, RecordStatus::Closed);
    }

    /// Another spawner creates the bead between our `show` and `create`.
    /// Reopening a record that is not closed fails, as `bd` does.
    struct RacingStore {
        inner: MemoryStore,
        peer: RefCell<Option<Record>>,
    }

    impl RacingStore {
        fn with_peer(status: RecordStatus) -> Self {
            let peer = Record {
                id: NUX.into(),
                title: "Polecat nux".into(),
                description: "role_type: polecat\nagent_state: running\nhook_bead: gt-peer".into(),
                status,
                record_type: "agent".into(),
                priority: 0,
                labels: vec![AGENT_LABEL.into()],
                parent: None,
            };
            Self {
                inner: MemoryStore::new(),
                peer: RefCell::new(Some(peer)),
            }
        }

        fn reopens(&self) -> usize {
            self.inner
                .calls
                .borrow()
                .iter()
                .filter(|c| c.starts_with("reopen "))
                .count()
        }
    }

    impl RecordStore for RacingStore {
        fn show(&self, id: &str) -> Result<Record, BeadsError> {
            self.inner.show(id)
        }

        fn list(&self, filter: &ListFilter) -> Result<Vec<Record>, BeadsError> {
            self.inner.list(filter)
        }

        fn create(&self, new: &NewRecord) -> Result<Record, BeadsError> {
            if let Some(peer) = self.peer.borrow_mut().take() {
                self.inner.insert(peer);
            }
            self.inner.create(new)
        }

        fn update(&self, id: &str, update: &RecordUpdate) -> Result<(), BeadsError> {
            self.inner.update(id, update)
        }

        fn close(&self, id: &str, reason: &str) -> Result<(), BeadsError> {
            self.inner.close(id, reason)
        }

        fn reopen(&self, id: &str, reason: &str) -> Result<(), BeadsError> {
            if self.inner.get(id).is_some_and(|r| r.status.is_live()) {
                return Err(BeadsError::Store {
                    subcommand: "reopen",
                    message: format!("{id} is not closed"),
                });
            }
            self.inner.reopen(id, reason)
        }

        fn delete(&self, id: &str) -> Result<(), BeadsError> {
            self.inner.delete(id)
        }
    }

    #[test]
    fn spawn_race_with_live_bead_updates_in_place() {
        let beads = AgentBeads::new(RacingStore::with_peer(RecordStatus::Open));
        assert_eq!(
            beads
                .create_or_reopen_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-new"))
                .unwrap(),
            SpawnOutcome::Updated
        );
        assert_eq!(beads.store().reopens(), 0);
        let (rec, fields) = beads.get_agent_bead(NUX).unwrap();
        assert_eq!(rec.status, RecordStatus::Open);
        assert_eq!(fields.hook_bead, "gt-new");
        assert_eq!(fields.state(), Some(AgentState::Spawning));
    }

    #[test]
    fn spawn_race_with_closed_bead_reopens() {
        let beads = AgentBeads::new(RacingStore::with_peer(RecordStatus::Closed));
        assert_eq!(
            beads
                .create_or_reopen_agent_bead(NUX, "Polecat nux", &polecat_fields("gt-new"))
                .unwrap(),
            SpawnOutcome::Reopened
        );
        assert_eq!(beads.store().reopens(), 1);
        let (rec, fields) = beads.get_agent_bead(NUX).unwrap();
        assert_eq!(rec.status, RecordStatus::Open);
        assert_eq!(fields.hook_bead, "gt-new");
    }
}
