use crate::lifecycle::AgentState;

field_set! {
    /// Lifecycle block of an agent session bead.
    ///
    /// `role_type`, `rig` and `role_bead` identify the agent and survive
    /// close/reopen. The rest describe the current session.
    pub struct AgentFields keyed by AgentKey {
        role_type => RoleType,
        rig => Rig,
        agent_state => AgentState,
        hook_bead => HookBead,
        role_bead => RoleBead,
        cleanup_status => CleanupStatus,
        active_mr => ActiveMr,
        notification_level => NotificationLevel,
    }
}

impl AgentFields {
    /// Parsed `agent_state`; `None` when absent or unrecognized.
    pub fn state(&self) -> Option<AgentState> {
        self.agent_state.parse().ok()
    }

    pub fn set_state(&mut self, state: AgentState) {
        self.agent_state = state.as_str().to_string();
    }

    /// Clear session state and mark closed, keeping identity fields.
    pub fn clear_for_close(&mut self) {
        self.hook_bead.clear();
        self.active_mr.clear();
        self.cleanup_status.clear();
        self.notification_level.clear();
        self.set_state(AgentState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{format, parse};

    #[test]
    fn clear_for_close_keeps_identity() {
        let mut fields = AgentFields {
            role_type: "polecat".into(),
            rig: "gastown".into(),
            agent_state: "processing".into(),
            hook_bead: "gt-abc12".into(),
            role_bead: "hq-polecat-role".into(),
            cleanup_status: "dirty".into(),
            active_mr: "gt-mr-9".into(),
            notification_level: "quiet".into(),
        };
        fields.clear_for_close();
        assert_eq!(fields.state(), Some(AgentState::Closed));
        assert_eq!(fields.role_type, "polecat");
        assert_eq!(fields.rig, "gastown");
        assert_eq!(fields.role_bead, "hq-polecat-role");
        assert!(fields.hook_bead.is_empty());
        assert!(fields.active_mr.is_empty());
        assert!(fields.cleanup_status.is_empty());
        assert!(fields.notification_level.is_empty());
    }

    #[test]
    fn canonical_order() {
        let fields = AgentFields {
            hook_bead: "gt-x".into(),
            role_type: "witness".into(),
            agent_state: "running".into(),
            ..Default::default()
        };
        assert_eq!(
            format(&fields),
            "role_type: witness\nagent_state: running\nhook_bead: gt-x"
        );
    }

    #[test]
    fn unknown_state_reads_as_none() {
        let fields: AgentFields = parse("agent_state: dancing").unwrap();
        assert_eq!(fields.state(), None);
    }
}
