//! Migration error kinds and their propagation rules.

/// Fatal migration failures. Everything here aborts the run; recoverable
/// conditions (a missing source file, one untransformable record) are
/// handled locally as warnings or skip counts and never reach this enum.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("migrator {migrator} {phase} phase failed: {message}")]
    PhaseFailed {
        migrator: String,
        phase: &'static str,
        message: String,
    },

    #[error(
        "migrator {migrator} migrated too few records: expected at least {expected}, found {actual}"
    )]
    CountMismatch {
        migrator: String,
        expected: u64,
        actual: u64,
    },

    #[error("migrator {migrator} validation failed: {}", errors.join("; "))]
    Validation {
        migrator: String,
        errors: Vec<String>,
    },

    /// Batch transaction failures and other infrastructure errors.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
