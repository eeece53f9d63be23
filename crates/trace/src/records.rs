//! Canonical record identifiers shared across the workspace.

/// Event queue and receiver traffic.
pub mod queue {
    /// Event inserted into the global queue.
    pub const INSERT: u8 = 10;
    /// Event removed after admission.
    pub const TAKE: u8 = 11;
    /// Pending pure event withdrawn before admission.
    pub const WITHDRAW: u8 = 12;
    /// Enqueue refused because a capacity bound was reached.
    pub const FULL: u8 = 13;
}

/// Safe-to-process decisions.
pub mod safe {
    /// Event declared safe and selected.
    pub const SAFE: u8 = 20;
    /// Event not yet safe; payload carries the wake-up time.
    pub const BLOCKED: u8 = 21;
    /// Same-tag batch extracted for one firing.
    pub const BATCH: u8 = 22;
}

/// Causality analysis.
pub mod causality {
    /// Memo tables cleared.
    pub const INVALIDATE: u8 = 30;
}

/// Scheduler related record identifiers.
pub mod sched {
    /// A frame started executing (`[node, prev_node]`).
    pub const NEXT: u8 = 50;
    /// The execution stack drained.
    pub const IDLE: u8 = 51;
    /// A running frame was suspended in favour of a new one.
    pub const PREEMPT: u8 = 52;
    /// A suspended frame resumed.
    pub const RESUME: u8 = 53;
    /// A firing was committed.
    pub const COMMIT: u8 = 54;
}
