//! Structured `key: value` blocks embedded in bead descriptions.
//!
//! Each field set declares its keys once (a [`FieldKey`] enum whose `ALL`
//! order is the canonical emission order) and the codec functions here work
//! generically over that declaration. Prose and lines belonging to other
//! vocabularies are left alone.

use std::sync::OnceLock;

use regex::Regex;

/// Declare a field set whose values are all plain strings.
///
/// The wire name of each key is the struct field name, and declaration order
/// is the canonical emission order.
macro_rules! field_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident keyed by $key:ident {
            $( $(#[$fmeta:meta])* $field:ident => $variant:ident, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, ::serde::Serialize, ::serde::Deserialize)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                #[serde(default, skip_serializing_if = "String::is_empty")]
                pub $field: String,
            )+
        }

        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $key {
            $( $variant, )+
        }

        impl $crate::fields::FieldKey for $key {
            const ALL: &'static [Self] = &[ $( $key::$variant, )+ ];

            fn wire_name(self) -> &'static str {
                match self {
                    $( $key::$variant => stringify!($field), )+
                }
            }
        }

        impl $crate::fields::FieldSet for $name {
            type Key = $key;

            fn values(&self, key: $key) -> Vec<String> {
                let value = match key {
                    $( $key::$variant => &self.$field, )+
                };
                if value.is_empty() {
                    Vec::new()
                } else {
                    vec![value.clone()]
                }
            }

            fn absorb(&mut self, key: $key, value: String) {
                match key {
                    $( $key::$variant => self.$field = value, )+
                }
            }
        }
    };
}

mod agent;
mod attachment;
mod mr;
mod role;

pub use agent::{AgentFields, AgentKey};
pub use attachment::{AttachmentFields, AttachmentKey};
pub use mr::{MrFields, MrKey};
pub use role::{RoleConfig, RoleConfigKey};

/// One recognized key of a field set.
pub trait FieldKey: Copy + Eq + std::fmt::Debug + 'static {
    /// Every key of the set, in canonical emission order.
    const ALL: &'static [Self];

    /// Canonical lowercase, underscore-separated name written on the wire.
    fn wire_name(self) -> &'static str;

    /// Whether the key may appear on several lines.
    fn repeating(self) -> bool {
        false
    }

    /// Look up a key by its written form (case-insensitive, `-` == `_`).
    fn lookup(raw: &str) -> Option<Self> {
        let normalized = normalize_key(raw);
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.wire_name() == normalized)
    }
}

/// A typed view over one field block.
pub trait FieldSet: Default {
    type Key: FieldKey;

    /// Values held for `key`, in order. Empty when absent.
    fn values(&self, key: Self::Key) -> Vec<String>;

    /// Record a parsed value. Repeating keys append; others overwrite.
    fn absorb(&mut self, key: Self::Key, value: String);
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('-', "_")
}

fn re_field_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*):[ \t]?(.*)$").expect("field line pattern compiles")
    })
}

/// Match one line against the vocabulary of `K`.
fn match_line<K: FieldKey>(line: &str) -> Option<(K, &str)> {
    let caps = re_field_line().captures(line.trim())?;
    let key = K::lookup(caps.get(1)?.as_str())?;
    Some((key, caps.get(2)?.as_str().trim()))
}

/// Parse a field block out of free text.
///
/// Returns `None` when no line carries a key of this set. A block whose keys
/// are all present but empty (or `null`) yields `Some(F::default())`.
pub fn parse<F: FieldSet>(text: &str) -> Option<F> {
    let mut fields = F::default();
    let mut seen = false;
    for line in text.lines() {
        let Some((key, value)) = match_line::<F::Key>(line) else {
            continue;
        };
        seen = true;
        if value.is_empty() || value == "null" {
            continue;
        }
        fields.absorb(key, value.to_string());
    }
    seen.then_some(fields)
}

/// A value that cannot be written as a single `key: value` line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field {key} must be a single line, got {value:?}")]
pub struct MultilineValue {
    pub key: &'static str,
    pub value: String,
}

/// Reject values holding `\r` or `\n`, which would spill extra lines into
/// the block and shadow other keys on the next parse.
pub fn validate<F: FieldSet>(fields: &F) -> Result<(), MultilineValue> {
    for &key in F::Key::ALL {
        if let Some(value) = fields
            .values(key)
            .into_iter()
            .find(|v| v.contains(['\r', '\n']))
        {
            return Err(MultilineValue {
                key: key.wire_name(),
                value,
            });
        }
    }
    Ok(())
}

/// Render the non-empty fields in canonical order, one `key: value` per line.
///
/// Values are expected to have passed [`validate`].
pub fn format<F: FieldSet>(fields: &F) -> String {
    let mut lines = Vec::new();
    for &key in F::Key::ALL {
        for value in fields.values(key) {
            let value = value.trim();
            if !value.is_empty() {
                lines.push(format!("{}: {value}", key.wire_name()));
            }
        }
    }
    lines.join("\n")
}

/// True when formatting `fields` would produce nothing.
pub fn is_empty<F: FieldSet>(fields: &F) -> bool {
    F::Key::ALL
        .iter()
        .all(|&k| fields.values(k).iter().all(|v| v.trim().is_empty()))
}

/// Replace this set's block in `existing`, keeping everything else.
///
/// Lines carrying any key of the set are dropped, the new block goes on top,
/// and the remaining text follows after a single blank line.
pub fn set_fields<F: FieldSet>(existing: &str, fields: &F) -> String {
    let kept: Vec<&str> = existing
        .lines()
        .filter(|line| match_line::<F::Key>(line).is_none())
        .collect();
    let remainder = trim_blank_lines(&kept).join("\n");
    let block = format(fields);

    if block.is_empty() {
        remainder
    } else if remainder.is_empty() {
        block
    } else {
        format!("{block}\n\n{remainder}")
    }
}

fn trim_blank_lines<'a, 'b>(lines: &'a [&'b str]) -> &'a [&'b str] {
    let start = lines
        .iter()
        .position(|l| !l.trim().is_empty())
        .unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(start, |i| i + 1);
    &lines[start..end]
}
