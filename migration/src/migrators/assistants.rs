//! Assistants migrator.
//!
//! Moves assistant profiles out of persisted state and publishes the
//! topic→assistant and topic→metadata maps into shared data, where the chat
//! migrator picks them up (topic metadata under an assistant is the
//! authoritative copy).

use anyhow::Result;
use hearth_store::insert_assistant;
use serde_json::{Map, Value, json};

use crate::legacy::LegacyAssistant;
use crate::migrator::{
    ExecuteResult, MigrationContext, Migrator, PrepareResult, ValidateResult, ValidateStats,
};

/// Shared-data keys published by this migrator.
pub const TOPIC_ASSISTANT_MAP_KEY: &str = "topic_assistant_map";
pub const TOPIC_META_MAP_KEY: &str = "topic_meta_map";

#[derive(Debug, Default)]
pub struct AssistantsMigrator {
    source_count: u64,
    skipped: u64,
}

fn read_assistants(ctx: &MigrationContext<'_>) -> Vec<Value> {
    ctx.sources
        .persisted_state
        .get("assistants", "assistants")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

impl AssistantsMigrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Migrator for AssistantsMigrator {
    fn id(&self) -> &'static str {
        "assistants"
    }
    fn name(&self) -> &'static str {
        "Assistants"
    }
    fn description(&self) -> &'static str {
        "Assistant profiles and their topic metadata"
    }
    fn order(&self) -> u32 {
        20
    }

    fn prepare(&mut self, ctx: &mut MigrationContext<'_>) -> Result<PrepareResult> {
        let rows = read_assistants(ctx);
        self.source_count = rows.len() as u64;
        let mut result = PrepareResult::ok(self.source_count);
        if !ctx.sources.persisted_state.has_category("assistants") {
            result = result.with_warning("persisted category assistants missing");
        }
        Ok(result)
    }

    fn execute(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ExecuteResult> {
        let rows = read_assistants(ctx);
        let now = ctx.now_ms;

        let mut topic_assistant: Map<String, Value> = Map::new();
        let mut topic_meta: Map<String, Value> = Map::new();
        let mut parsed: Vec<(LegacyAssistant, Value)> = Vec::new();

        for row in rows {
            match serde_json::from_value::<LegacyAssistant>(row.clone()) {
                Ok(assistant) => parsed.push((assistant, row)),
                Err(e) => {
                    tracing::warn!("Skipping unparseable assistant: {e}");
                    self.skipped += 1;
                }
            }
        }

        for (assistant, _) in &parsed {
            for meta in &assistant.topics {
                topic_assistant.insert(meta.id.clone(), json!(assistant.id));
                topic_meta.insert(
                    meta.id.clone(),
                    serde_json::to_value(meta).unwrap_or(Value::Null),
                );
            }
        }

        let migrated = parsed.len() as u64;
        ctx.db.with_transaction(|tx| {
            for (assistant, raw) in &parsed {
                let name = assistant.name.as_deref().unwrap_or("Assistant");
                insert_assistant(tx, &assistant.id, name, raw, now)?;
            }
            Ok(())
        })?;

        ctx.shared_data
            .insert(TOPIC_ASSISTANT_MAP_KEY.to_string(), Value::Object(topic_assistant));
        ctx.shared_data
            .insert(TOPIC_META_MAP_KEY.to_string(), Value::Object(topic_meta));

        ctx.report_keyed(100, "Assistants migrated", "migration.assistants.done");
        Ok(ExecuteResult::ok(migrated))
    }

    fn validate(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ValidateResult> {
        let target_count = ctx.db.count_rows("assistants")?;
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

    use hearth_store::{ExportedTableReader, PersistedStateReader, TargetDb};
    use serde_json::json;

    use super::{AssistantsMigrator, TOPIC_ASSISTANT_MAP_KEY, TOPIC_META_MAP_KEY};
    use crate::migrator::{MigrationContext, MigrationSources, Migrator};

    #[test]
    fn migrates_assistants_and_publishes_topic_maps() {
        let dir = tempfile::tempdir().unwrap();
        let sources = MigrationSources::new(
            PersistedStateReader::new(json!({
                "assistants": {
                    "assistants": [
                        {
                            "id": "a1",
                            "name": "Helper",
                            "topics": [
                                {"id": "t1", "name": "Real Name", "pinned": true}
                            ]
                        },
                        {"id": "a2", "topics": []}
                    ]
                }
            })),
            ExportedTableReader::new(dir.path().join("export")),
        );
        let mut db = TargetDb::open_in_memory().unwrap();
        let mut shared = HashMap::new();
        let mut progress = |_: u8, _: &str, _: Option<&str>| {};
        let mut migrator = AssistantsMigrator::new();

        let mut ctx = MigrationContext {
            sources: &sources,
            db: &mut db,
            shared_data: &mut shared,
            progress: &mut progress,
            now_ms: 1,
        };
        assert_eq!(migrator.prepare(&mut ctx).unwrap().item_count, 2);
        let execute = migrator.execute(&mut ctx).unwrap();
        assert_eq!(execute.processed_count, 2);
        let validate = migrator.validate(&mut ctx).unwrap();
        assert_eq!(validate.stats.target_count, 2);
        drop(ctx);

        assert_eq!(
            shared[TOPIC_ASSISTANT_MAP_KEY]["t1"],
            json!("a1")
        );
        assert_eq!(shared[TOPIC_META_MAP_KEY]["t1"]["name"], json!("Real Name"));
    }
}
