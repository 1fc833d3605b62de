use serde::{Deserialize, Serialize};

use super::{FieldKey, FieldSet};

/// Launch configuration carried by a role-definition bead.
///
/// `env_var` repeats, one `KEY=VALUE` per line, and keeps declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_pattern: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_dir_pattern: String,
    #[serde(default)]
    pub needs_pre_sync: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start_command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoleConfigKey {
    SessionPattern,
    WorkDirPattern,
    NeedsPreSync,
    StartCommand,
    EnvVar,
}

impl FieldKey for RoleConfigKey {
    const ALL: &'static [Self] = &[
        Self::SessionPattern,
        Self::WorkDirPattern,
        Self::NeedsPreSync,
        Self::StartCommand,
        Self::EnvVar,
    ];

    fn wire_name(self) -> &'static str {
        match self {
            Self::SessionPattern => "session_pattern",
            Self::WorkDirPattern => "work_dir_pattern",
            Self::NeedsPreSync => "needs_pre_sync",
            Self::StartCommand => "start_command",
            Self::EnvVar => "env_var",
        }
    }

    fn repeating(self) -> bool {
        matches!(self, Self::EnvVar)
    }
}

impl FieldSet for RoleConfig {
    type Key = RoleConfigKey;

    fn values(&self, key: RoleConfigKey) -> Vec<String> {
        let single = |v: &String| {
            if v.is_empty() {
                Vec::new()
            } else {
                vec![v.clone()]
            }
        };
        match key {
            RoleConfigKey::SessionPattern => single(&self.session_pattern),
            RoleConfigKey::WorkDirPattern => single(&self.work_dir_pattern),
            RoleConfigKey::NeedsPreSync => {
                if self.needs_pre_sync {
                    vec!["true".to_string()]
                } else {
                    Vec::new()
                }
            }
            RoleConfigKey::StartCommand => single(&self.start_command),
            RoleConfigKey::EnvVar => self
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
        }
    }

    fn absorb(&mut self, key: RoleConfigKey, value: String) {
        match key {
            RoleConfigKey::SessionPattern => self.session_pattern = value,
            RoleConfigKey::WorkDirPattern => self.work_dir_pattern = value,
            RoleConfigKey::NeedsPreSync => {
                self.needs_pre_sync = matches!(
                    value.to_ascii_lowercase().as_str(),
                    "true" | "yes" | "1"
                );
            }
            RoleConfigKey::StartCommand => self.start_command = value,
            RoleConfigKey::EnvVar => {
                // Lines without `=` carry no variable name and are dropped.
                if let Some((k, v)) = value.split_once('=') {
                    let k = k.trim();
                    if !k.is_empty() {
                        self.env.push((k.to_string(), v.trim().to_string()));
                    }
                }
            }
        }
    }
}

impl RoleConfig {
    /// Last value declared for `name`, if any.
    pub fn env(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}
