//! The migrator contract: one record per domain, three phases.
//!
//! There is no inheritance chain here: a migrator is metadata plus the
//! three phase functions, and the engine only ever calls through the trait
//! object.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use hearth_store::{ConfigStore, ExportedTableReader, PersistedStateReader, TargetDb};

/// The legacy stores a migration run reads from.
pub struct MigrationSources {
    pub persisted_state: PersistedStateReader,
    pub tables: ExportedTableReader,
    /// The shell's key-value configuration store, when available.
    pub config: Option<Arc<dyn ConfigStore>>,
}

impl MigrationSources {
    #[must_use]
    pub fn new(persisted_state: PersistedStateReader, tables: ExportedTableReader) -> Self {
        Self {
            persisted_state,
            tables,
            config: None,
        }
    }
}

/// Progress callback: `(percent 0..=100, message, i18n key)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u8, &str, Option<&str>);

/// Shared context handed to every phase of every migrator.
pub struct MigrationContext<'a> {
    pub sources: &'a MigrationSources,
    pub db: &'a mut TargetDb,
    /// Cross-migrator scratch space (e.g. the assistants migrator publishes
    /// its topic→assistant map here for the chat migrator).
    pub shared_data: &'a mut HashMap<String, Value>,
    pub progress: ProgressFn<'a>,
    pub now_ms: i64,
}

impl MigrationContext<'_> {
    pub fn report(&mut self, percent: u8, message: &str) {
        (self.progress)(percent.min(100), message, None);
    }

    pub fn report_keyed(&mut self, percent: u8, message: &str, i18n_key: &str) {
        (self.progress)(percent.min(100), message, Some(i18n_key));
    }
}

/// Outcome of the `prepare` phase: source availability and counts.
#[derive(Debug, Clone, Default)]
pub struct PrepareResult {
    pub success: bool,
    pub item_count: u64,
    pub warnings: Vec<String>,
}

impl PrepareResult {
    #[must_use]
    pub fn ok(item_count: u64) -> Self {
        Self {
            success: true,
            item_count,
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Outcome of the `execute` phase.
#[derive(Debug, Clone, Default)]
pub struct ExecuteResult {
    pub success: bool,
    pub processed_count: u64,
    pub error: Option<String>,
}

impl ExecuteResult {
    #[must_use]
    pub fn ok(processed_count: u64) -> Self {
        Self {
            success: true,
            processed_count,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            processed_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Counts reported by the `validate` phase.
#[derive(Debug, Clone, Default)]
pub struct ValidateStats {
    pub source_count: u64,
    pub target_count: u64,
    pub skipped_count: u64,
    pub mismatch_reason: Option<String>,
}

impl ValidateStats {
    /// The count floor: anything below `source - skipped` lost data.
    #[must_use]
    pub fn expected(&self) -> u64 {
        self.source_count.saturating_sub(self.skipped_count)
    }
}

/// Outcome of the `validate` phase.
#[derive(Debug, Clone, Default)]
pub struct ValidateResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub stats: ValidateStats,
}

impl ValidateResult {
    #[must_use]
    pub fn ok(stats: ValidateStats) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            stats,
        }
    }
}

/// A domain migrator. Phases run in order on a single engine pass:
/// `prepare` validates sources and counts, `execute` moves the data inside
/// its own transactions, `validate` re-counts and cross-checks.
pub trait Migrator: Send {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Engine runs migrators in ascending order.
    fn order(&self) -> u32;

    fn prepare(&mut self, ctx: &mut MigrationContext<'_>) -> Result<PrepareResult>;
    fn execute(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ExecuteResult>;
    fn validate(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ValidateResult>;
}
