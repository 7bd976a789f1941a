//! Knowledge migrator: moves the exported `knowledge_notes` table.

use anyhow::Result;
use hearth_store::{insert_knowledge_note, tables};
use serde_json::Value;
use uuid::Uuid;

use crate::migrator::{
    ExecuteResult, MigrationContext, Migrator, PrepareResult, ValidateResult, ValidateStats,
};

const BATCH_SIZE: usize = 100;

#[derive(Debug, Default)]
pub struct KnowledgeMigrator {
    source_count: u64,
    skipped: u64,
}

impl KnowledgeMigrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Migrator for KnowledgeMigrator {
    fn id(&self) -> &'static str {
        "knowledge"
    }
    fn name(&self) -> &'static str {
        "Knowledge"
    }
    fn description(&self) -> &'static str {
        "Knowledge notes from the exported tables"
    }
    fn order(&self) -> u32 {
        30
    }

    fn prepare(&mut self, ctx: &mut MigrationContext<'_>) -> Result<PrepareResult> {
        if !ctx.sources.tables.table_exists(tables::KNOWLEDGE_NOTES) {
            // Nothing to do is a valid outcome, not a failure.
            return Ok(PrepareResult::ok(0)
                .with_warning("knowledge_notes table missing from export"));
        }
        let count = ctx
            .sources
            .tables
            .open_stream(tables::KNOWLEDGE_NOTES)
            .count()?;
        self.source_count = count;
        Ok(PrepareResult::ok(count))
    }

    fn execute(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ExecuteResult> {
        if !ctx.sources.tables.table_exists(tables::KNOWLEDGE_NOTES) {
            return Ok(ExecuteResult::ok(0));
        }

        let reader = ctx.sources.tables.open_stream(tables::KNOWLEDGE_NOTES);
        let now = ctx.now_ms;
        let total = self.source_count.max(1);
        let mut migrated = 0u64;

        reader.for_each_batch(BATCH_SIZE, |batch, _| {
            ctx.db.with_transaction(|tx| {
                for row in batch {
                    let id = row
                        .get("id")
                        .and_then(Value::as_str)
                        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
                    insert_knowledge_note(tx, &id, row, now)?;
                }
                Ok(())
            })?;
            migrated += batch.len() as u64;
            let percent = ((migrated * 100) / total.max(migrated)) as u8;
            ctx.report_keyed(percent, "Migrating knowledge notes", "migration.knowledge.progress");
            Ok(())
        })?;

        Ok(ExecuteResult::ok(migrated))
    }

    fn validate(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ValidateResult> {
        let target_count = ctx.db.count_rows("knowledge_notes")?;
        Ok(ValidateResult::ok(ValidateStats {
            source_count: self.source_count,
            target_count,
            skipped_count: self.skipped,
            mismatch_reason: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hearth_store::{ExportedTableReader, PersistedStateReader, TargetDb, tables};
    use serde_json::json;

    use super::KnowledgeMigrator;
    use crate::migrator::{MigrationContext, MigrationSources, Migrator};

    #[test]
    fn migrates_notes_and_counts_match() {
        let dir = tempfile::tempdir().unwrap();
        let export = ExportedTableReader::new(dir.path().join("export"));
        export
            .write_table(
                tables::KNOWLEDGE_NOTES,
                r#"[{"id":"k1","content":"a"},{"content":"no id"}]"#,
            )
            .unwrap();

        let sources =
            MigrationSources::new(PersistedStateReader::new(json!({})), export);
        let mut db = TargetDb::open_in_memory().unwrap();
        let mut shared = HashMap::new();
        let mut progress = |_: u8, _: &str, _: Option<&str>| {};
        let mut migrator = KnowledgeMigrator::new();

        let mut ctx = MigrationContext {
            sources: &sources,
            db: &mut db,
            shared_data: &mut shared,
            progress: &mut progress,
            now_ms: 1,
        };
        assert_eq!(migrator.prepare(&mut ctx).unwrap().item_count, 2);
        assert_eq!(migrator.execute(&mut ctx).unwrap().processed_count, 2);
        let validate = migrator.validate(&mut ctx).unwrap();
        assert_eq!(validate.stats.target_count, 2);
    }

    #[test]
    fn missing_table_is_a_warning_and_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let sources = MigrationSources::new(
            PersistedStateReader::new(json!({})),
            ExportedTableReader::new(dir.path().join("export")),
        );
        let mut db = TargetDb::open_in_memory().unwrap();
        let mut shared = HashMap::new();
        let mut progress = |_: u8, _: &str, _: Option<&str>| {};
        let mut migrator = KnowledgeMigrator::new();

        let mut ctx = MigrationContext {
            sources: &sources,
            db: &mut db,
            shared_data: &mut shared,
            progress: &mut progress,
            now_ms: 1,
        };
        let prepare = migrator.prepare(&mut ctx).unwrap();
        assert!(prepare.success);
        assert_eq!(prepare.item_count, 0);
        assert_eq!(prepare.warnings.len(), 1);
        assert_eq!(migrator.execute(&mut ctx).unwrap().processed_count, 0);
        assert!(migrator.validate(&mut ctx).unwrap().success);
    }
}
