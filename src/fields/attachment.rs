use chrono::{SecondsFormat, Utc};

field_set! {
    /// Records which molecule is attached to a work bead and who dispatched it.
    pub struct AttachmentFields keyed by AttachmentKey {
        attached_molecule => AttachedMolecule,
        attached_at => AttachedAt,
        attached_args => AttachedArgs,
        dispatched_by => DispatchedBy,
        no_merge => NoMerge,
    }
}

impl AttachmentFields {
    pub fn is_no_merge(&self) -> bool {
        matches!(
            self.no_merge.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        )
    }

    /// Set `attached_at` to the current UTC time.
    pub fn stamp_attached_at(&mut self) {
        self.attached_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    }
}
