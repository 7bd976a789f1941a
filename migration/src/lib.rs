//! One-shot data migration engine.
//!
//! Moves user data from the legacy pair of stores (persisted key-value
//! state plus exported JSON tables) into the new relational schema:
//! pure mapping functions, a three-phase migrator contract, an ordered
//! fail-fast engine, and the UI-facing orchestration controller.

pub mod legacy;
pub mod mapping;

mod controller;
mod engine;
mod error;
mod migrator;
mod migrators;

pub use controller::{
    ControllerCommand, ControllerResponse, MigrationController, MigrationStage, MigratorProgress,
    MigratorRunStatus, ProgressSnapshot, ShellDelegate,
};
pub use engine::{EngineEvent, MigrationEngine, MigratorReport, RunReport};
pub use error::MigrationError;
pub use migrator::{
    ExecuteResult, MigrationContext, MigrationSources, Migrator, PrepareResult, ValidateResult,
    ValidateStats,
};
pub use migrators::{
    AssistantsMigrator, ChatMigrator, KnowledgeMigrator, PreferencesMigrator, default_migrators,
};
