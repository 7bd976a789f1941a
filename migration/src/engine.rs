//! The migration engine: ordered execution with fail-fast semantics.
//!
//! One run is all-or-nothing per migrator: any phase failure, count
//! shortfall, or validation error aborts the run and records a `failed`
//! status. The pre-run clear deletes new-architecture rows so the next
//! attempt starts clean.

use std::collections::HashMap;

use hearth_store::{MigrationStatus, MigrationStatusKind, TargetDb};

use crate::error::MigrationError;
use crate::mapping::now_ms;
use crate::migrator::{
    ExecuteResult, MigrationContext, MigrationSources, Migrator, PrepareResult, ValidateResult,
};

/// Progress events pushed to the caller while a run executes.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MigratorStarted {
        id: &'static str,
        name: &'static str,
        index: usize,
        total: usize,
    },
    Progress {
        id: &'static str,
        /// Within the current migrator.
        percent: u8,
        /// Across the whole run.
        overall: u8,
        message: String,
        i18n_key: Option<String>,
    },
    MigratorFinished {
        id: &'static str,
        success: bool,
    },
}

/// Per-migrator record of what a run did.
#[derive(Debug, Clone, Default)]
pub struct MigratorReport {
    pub id: &'static str,
    pub name: &'static str,
    pub prepare: Option<PrepareResult>,
    pub execute: Option<ExecuteResult>,
    pub validate: Option<ValidateResult>,
}

/// Summary of one engine run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub reports: Vec<MigratorReport>,
}

/// Ordered migrator pipeline.
#[derive(Default)]
pub struct MigrationEngine {
    migrators: Vec<Box<dyn Migrator>>,
}

impl MigrationEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register migrators; they are kept sorted ascending by `order`.
    pub fn register(&mut self, migrators: Vec<Box<dyn Migrator>>) {
        self.migrators.extend(migrators);
        self.migrators.sort_by_key(|m| m.order());
    }

    #[must_use]
    pub fn migrator_descriptors(&self) -> Vec<(&'static str, &'static str)> {
        self.migrators.iter().map(|m| (m.id(), m.name())).collect()
    }

    /// Whether a migration must run: true when the status record is missing
    /// or anything other than `completed`.
    pub fn needs_migration(db: &TargetDb) -> anyhow::Result<bool> {
        Ok(match db.migration_status()? {
            Some(status) => status.status != MigrationStatusKind::Completed,
            None => true,
        })
    }

    /// Run all registered migrators. On success the status record is set to
    /// `completed` and the export directory is removed; on failure the
    /// status records the error and the partially-written tables are left
    /// for the next run's pre-clear.
    pub fn run(
        &mut self,
        sources: &MigrationSources,
        db: &mut TargetDb,
        mut on_event: impl FnMut(EngineEvent),
    ) -> Result<RunReport, MigrationError> {
        let started = now_ms();
        db.set_migration_status(&MigrationStatus::in_progress(), started)
            .map_err(MigrationError::Internal)?;

        let result = self.run_inner(sources, db, &mut on_event);
        let finished = now_ms();

        match &result {
            Ok(_) => {
                db.set_migration_status(&MigrationStatus::completed(finished), finished)
                    .map_err(MigrationError::Internal)?;
                if let Err(e) = sources.tables.remove_dir() {
                    tracing::warn!("Failed to remove export directory: {e:#}");
                }
            }
            Err(error) => {
                db.set_migration_status(
                    &MigrationStatus::failed(finished, error.to_string()),
                    finished,
                )
                .map_err(MigrationError::Internal)?;
            }
        }

        result
    }

    fn run_inner(
        &mut self,
        sources: &MigrationSources,
        db: &mut TargetDb,
        on_event: &mut impl FnMut(EngineEvent),
    ) -> Result<RunReport, MigrationError> {
        db.clear_new_tables().map_err(MigrationError::Internal)?;

        let mut shared_data: HashMap<String, serde_json::Value> = HashMap::new();
        let mut report = RunReport::default();
        let total = self.migrators.len();
        let now = now_ms();

        for (index, migrator) in self.migrators.iter_mut().enumerate() {
            let id = migrator.id();
            let name = migrator.name();
            tracing::info!("Running migrator {id} ({}/{total})", index + 1);
            on_event(EngineEvent::MigratorStarted {
                id,
                name,
                index,
                total,
            });

            let mut entry = MigratorReport {
                id,
                name,
                ..MigratorReport::default()
            };

            let outcome = run_migrator(
                migrator.as_mut(),
                sources,
                db,
                &mut shared_data,
                now,
                &mut entry,
                &mut |percent, message, i18n_key| {
                    let overall = overall_percent(index, total, percent);
                    on_event(EngineEvent::Progress {
                        id,
                        percent,
                        overall,
                        message: message.to_string(),
                        i18n_key: i18n_key.map(ToString::to_string),
                    });
                },
            );

            let success = outcome.is_ok();
            report.reports.push(entry);
            on_event(EngineEvent::MigratorFinished { id, success });
            outcome?;
        }

        Ok(report)
    }
}

fn overall_percent(index: usize, total: usize, within: u8) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = index as f64 + f64::from(within.min(100)) / 100.0;
    ((done / total as f64) * 100.0).round().min(100.0) as u8
}

fn run_migrator(
    migrator: &mut dyn Migrator,
    sources: &MigrationSources,
    db: &mut TargetDb,
    shared_data: &mut HashMap<String, serde_json::Value>,
    now: i64,
    entry: &mut MigratorReport,
    progress: &mut dyn FnMut(u8, &str, Option<&str>),
) -> Result<(), MigrationError> {
    let id = migrator.id().to_string();

    let prepare = {
        let mut ctx = MigrationContext {
            sources,
            db: &mut *db,
            shared_data: &mut *shared_data,
            progress: &mut *progress,
            now_ms: now,
        };
        migrator.prepare(&mut ctx).map_err(MigrationError::Internal)?
    };
    for warning in &prepare.warnings {
        tracing::warn!("[{id}] prepare: {warning}");
    }
    let prepared_ok = prepare.success;
    entry.prepare = Some(prepare);
    if !prepared_ok {
        return Err(MigrationError::PhaseFailed {
            migrator: id,
            phase: "prepare",
            message: "source validation failed".to_string(),
        });
    }

    let execute = {
        let mut ctx = MigrationContext {
            sources,
            db: &mut *db,
            shared_data: &mut *shared_data,
            progress: &mut *progress,
            now_ms: now,
        };
        migrator.execute(&mut ctx).map_err(MigrationError::Internal)?
    };
    let execute_ok = execute.success;
    let execute_error = execute.error.clone();
    entry.execute = Some(execute);
    if !execute_ok {
        return Err(MigrationError::PhaseFailed {
            migrator: id,
            phase: "execute",
            message: execute_error.unwrap_or_else(|| "unspecified failure".to_string()),
        });
    }

    let validate = {
        let mut ctx = MigrationContext {
            sources,
            db: &mut *db,
            shared_data: &mut *shared_data,
            progress: &mut *progress,
            now_ms: now,
        };
        migrator.validate(&mut ctx).map_err(MigrationError::Internal)?
    };
    entry.validate = Some(validate.clone());

    if !validate.success || !validate.errors.is_empty() {
        return Err(MigrationError::Validation {
            migrator: id,
            errors: if validate.errors.is_empty() {
                vec!["validator reported failure".to_string()]
            } else {
                validate.errors
            },
        });
    }

    let expected = validate.stats.expected();
    if validate.stats.target_count < expected {
        return Err(MigrationError::CountMismatch {
            migrator: id,
            expected,
            actual: validate.stats.target_count,
        });
    }
    if validate.stats.target_count > expected {
        tracing::warn!(
            "[{id}] target count {} exceeds expected {expected} (source {}, skipped {})",
            validate.stats.target_count,
            validate.stats.source_count,
            validate.stats.skipped_count,
        );
    }

    Ok(())
}
