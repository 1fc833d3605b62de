field_set! {
    /// Merge-request metadata carried by refinery queue beads.
    pub struct MrFields keyed by MrKey {
        branch => Branch,
        target => Target,
        source_issue => SourceIssue,
        worker => Worker,
        rig => Rig,
        merge_commit => MergeCommit,
        close_reason => CloseReason,
        agent_bead => AgentBead,
        retry_count => RetryCount,
        last_conflict_sha => LastConflictSha,
        conflict_task_id => ConflictTaskId,
        convoy_id => ConvoyId,
        convoy_created_at => ConvoyCreatedAt,
    }
}

impl MrFields {
    /// Number of merge retries so far; unparseable counts read as zero.
    pub fn retries(&self) -> u32 {
        self.retry_count.trim().parse().unwrap_or(0)
    }

    pub fn bump_retries(&mut self) {
        self.retry_count = (self.retries() + 1).to_string();
    }
}
