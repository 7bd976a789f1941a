//! Preferences migrator: flattens persisted settings into preference rows.

use anyhow::Result;
use hearth_store::upsert_preference;
use serde_json::Value;

use crate::migrator::{
    ExecuteResult, MigrationContext, Migrator, PrepareResult, ValidateResult, ValidateStats,
};

/// Persisted-state categories whose top-level keys become preference rows
/// (`<category>.<key>`).
const CATEGORIES: &[&str] = &["settings", "shortcuts"];

/// Shell-level keys read from the key-value configuration store and kept
/// under `config.<key>`.
const CONFIG_KEYS: &[&str] = &["language", "launchOnBoot", "launchToTray", "autoUpdate"];

#[derive(Debug, Default)]
pub struct PreferencesMigrator {
    source_count: u64,
    migrated: u64,
    skipped: u64,
}

impl PreferencesMigrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(ctx: &MigrationContext<'_>) -> Vec<(String, Value)> {
        let mut entries: Vec<(String, Value)> = CATEGORIES
            .iter()
            .flat_map(|category| {
                ctx.sources
                    .persisted_state
                    .category(category)
                    .and_then(Value::as_object)
                    .into_iter()
                    .flat_map(move |map| {
                        map.iter()
                            .map(move |(key, value)| (format!("{category}.{key}"), value.clone()))
                    })
            })
            .collect();
        if let Some(config) = &ctx.sources.config {
            for key in CONFIG_KEYS {
                if let Some(value) = config.get(key) {
                    entries.push((format!("config.{key}"), value));
                }
            }
        }
        entries
    }
}

impl Migrator for PreferencesMigrator {
    fn id(&self) -> &'static str {
        "preferences"
    }
    fn name(&self) -> &'static str {
        "Preferences"
    }
    fn description(&self) -> &'static str {
        "Settings, shortcuts, and shell configuration keys"
    }
    fn order(&self) -> u32 {
        10
    }

    fn prepare(&mut self, ctx: &mut MigrationContext<'_>) -> Result<PrepareResult> {
        let count = Self::entries(ctx).len() as u64;
        let mut result = PrepareResult::ok(count);
        for category in CATEGORIES {
            if !ctx.sources.persisted_state.has_category(category) {
                result = result.with_warning(format!("persisted category {category} missing"));
            }
        }
        self.source_count = count;
        Ok(result)
    }

    fn execute(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ExecuteResult> {
        let entries = Self::entries(ctx);
        let total = entries.len();
        let now = ctx.now_ms;

        ctx.db.with_transaction(|tx| {
            for (key, value) in &entries {
                upsert_preference(tx, key, value, now)?;
            }
            Ok(())
        })?;

        self.migrated = total as u64;
        ctx.report_keyed(100, "Preferences migrated", "migration.preferences.done");
        Ok(ExecuteResult::ok(self.migrated))
    }

    fn validate(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ValidateResult> {
        let target_count = ctx.db.count_rows("preferences")?;
        Ok(ValidateResult::ok(ValidateStats {
            source_count: self.source_count,
            target_count,
            skipped_count: self.skipped,
            mismatch_reason: None,
        }))
    }
}
