//! Chat migrator: topics and messages.
//!
//! The hard domain. Topics stream through in batches of 50; each topic's
//! linear message log is rebuilt into a parent/sibling tree, messages with
//! no surviving blocks are skipped (with parents resolved through them),
//! duplicate message ids across topics are re-minted, and every batch
//! commits in a single transaction. Per-topic transform failures are
//! logged and skipped; a failed batch transaction aborts the run.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde_json::Value;
use uuid::Uuid;

use hearth_store::{insert_messages, insert_topic, tables};
use hearth_types::{Message, MessageData, Role, Topic, searchable_text};

use crate::legacy::{LegacyMessage, LegacyTopic, LegacyTopicMeta};
use crate::mapping::{
    assemble_blocks, build_message_tree, find_active_node_id, merge_stats, normalize_status,
    parse_timestamp_ms, resolve_parent_through_skipped,
};
use crate::migrator::{
    ExecuteResult, MigrationContext, Migrator, PrepareResult, ValidateResult, ValidateStats,
};
use crate::migrators::assistants::{TOPIC_ASSISTANT_MAP_KEY, TOPIC_META_MAP_KEY};

const TOPIC_BATCH_SIZE: usize = 50;
const BLOCK_PRELOAD_BATCH: usize = 500;
const PREPARE_SAMPLE_TOPICS: usize = 10;
const VALIDATE_SAMPLE_TOPICS: usize = 5;

const UNNAMED_TOPIC: &str = "Unnamed Topic";

#[derive(Debug, Default)]
pub struct ChatMigrator {
    block_map: HashMap<String, Value>,
    topic_meta: HashMap<String, LegacyTopicMeta>,
    topic_assistant: HashMap<String, String>,
    topic_count: u64,

    source_topics: u64,
    skipped_topics: u64,
    source_messages: u64,
    migrated_messages: u64,
    skipped_messages: u64,
}

/// One topic after transformation, before duplicate-id rewriting.
struct TransformedTopic {
    topic: Topic,
    messages: Vec<Message>,
    source_message_count: u64,
    skipped_message_count: u64,
}

impl ChatMigrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn load_topic_maps(&mut self, ctx: &MigrationContext<'_>) {
        // Prefer the maps the assistants migrator published; fall back to
        // reading persisted state directly (e.g. when run standalone).
        if let Some(Value::Object(map)) = ctx.shared_data.get(TOPIC_ASSISTANT_MAP_KEY) {
            for (topic_id, assistant_id) in map {
                if let Some(assistant_id) = assistant_id.as_str() {
                    self.topic_assistant
                        .insert(topic_id.clone(), assistant_id.to_string());
                }
            }
        }
        if let Some(Value::Object(map)) = ctx.shared_data.get(TOPIC_META_MAP_KEY) {
            for (topic_id, meta) in map {
                if let Ok(meta) = serde_json::from_value::<LegacyTopicMeta>(meta.clone()) {
                    self.topic_meta.insert(topic_id.clone(), meta);
                }
            }
        }
        if !self.topic_assistant.is_empty() || !self.topic_meta.is_empty() {
            return;
        }

        let assistants = ctx
            .sources
            .persisted_state
            .get("assistants", "assistants")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for assistant in assistants {
            let Some(assistant_id) = assistant.get("id").and_then(Value::as_str) else {
                continue;
            };
            let topics = assistant
                .get("topics")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for meta in topics {
                if let Ok(meta) = serde_json::from_value::<LegacyTopicMeta>(meta) {
                    self.topic_assistant
                        .insert(meta.id.clone(), assistant_id.to_string());
                    self.topic_meta.insert(meta.id.clone(), meta);
                }
            }
        }
    }

    /// Merge topic metadata and transform the message log of one topic.
    fn transform_topic(&self, legacy: &LegacyTopic, now_ms: i64) -> TransformedTopic {
        let meta = self.topic_meta.get(&legacy.id);

        // Persisted state is authoritative for display metadata; the
        // exported topic row is the fallback.
        let name = meta
            .and_then(|m| m.name.clone())
            .filter(|n| !n.trim().is_empty())
            .or_else(|| legacy.name.clone())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| UNNAMED_TOPIC.to_string());
        let is_pinned = meta
            .and_then(|m| m.pinned)
            .or(legacy.pinned)
            .unwrap_or(false);
        let prompt = meta.and_then(|m| m.prompt.clone()).or_else(|| legacy.prompt.clone());
        let is_name_manually_edited = meta
            .and_then(|m| m.is_name_manually_edited)
            .or(legacy.is_name_manually_edited)
            .unwrap_or(false);
        let assistant_id = self
            .topic_assistant
            .get(&legacy.id)
            .cloned()
            .or_else(|| legacy.assistant_id.clone());

        let created_at = parse_timestamp_ms(
            meta.and_then(|m| m.created_at.as_ref())
                .or(legacy.created_at.as_ref()),
            now_ms,
        );
        let updated_at = parse_timestamp_ms(
            meta.and_then(|m| m.updated_at.as_ref())
                .or(legacy.updated_at.as_ref()),
            now_ms,
        );

        // Rebuild the tree, then decide which messages survive.
        let tree = build_message_tree(&legacy.messages);
        let mut skipped: HashSet<String> = HashSet::new();
        let mut surviving: Vec<(&LegacyMessage, Vec<hearth_types::BlockPayload>)> = Vec::new();
        for message in &legacy.messages {
            let blocks = assemble_blocks(&message.blocks, &self.block_map);
            if blocks.is_empty() {
                skipped.insert(message.id.clone());
            } else {
                surviving.push((message, blocks));
            }
        }

        let migrated_ids: HashSet<String> =
            surviving.iter().map(|(m, _)| m.id.clone()).collect();

        let mut messages: Vec<Message> = Vec::with_capacity(surviving.len());
        for (legacy_message, blocks) in surviving {
            let node = tree.get(&legacy_message.id).cloned().unwrap_or_default();
            let parent_id = if node
                .parent_id
                .as_ref()
                .is_some_and(|p| skipped.contains(p))
            {
                resolve_parent_through_skipped(&legacy_message.id, &tree, &skipped)
            } else {
                node.parent_id
            }
            // A parent that was neither migrated nor skipped is a dangling
            // reference (malformed ask id); null it rather than orphan the row.
            .filter(|p| migrated_ids.contains(p));

            let created = parse_timestamp_ms(legacy_message.created_at.as_ref(), now_ms);
            let updated = parse_timestamp_ms(
                legacy_message.updated_at.as_ref(),
                created,
            );

            let role = match legacy_message.role.as_str() {
                "user" => Role::User,
                "system" => Role::System,
                _ => Role::Assistant,
            };

            let text = searchable_text(&blocks);
            messages.push(Message {
                id: legacy_message.id.clone().into(),
                parent_id: parent_id.map(Into::into),
                topic_id: legacy.id.clone().into(),
                role,
                data: MessageData { blocks },
                searchable_text: text,
                status: normalize_status(legacy_message.status.as_deref()),
                siblings_group_id: node.siblings_group_id,
                assistant_id: assistant_id.clone().map(Into::into),
                assistant_meta: None,
                model_id: legacy_message.model_id.clone(),
                model_meta: legacy_message.model.clone(),
                trace_id: legacy_message.trace_id.clone(),
                stats: merge_stats(
                    legacy_message.usage.as_ref(),
                    legacy_message.metrics.as_ref(),
                ),
                created_at: created,
                updated_at: updated,
            });
        }

        let active_node_id = find_active_node_id(&legacy.messages, &tree, &migrated_ids);

        let topic = Topic {
            id: legacy.id.clone().into(),
            name,
            is_name_manually_edited,
            assistant_id: assistant_id.map(Into::into),
            assistant_meta: None,
            prompt,
            active_node_id: active_node_id.map(Into::into),
            group_id: None,
            sort_order: 0,
            is_pinned,
            pinned_order: 0,
            created_at,
            updated_at,
        };

        TransformedTopic {
            topic,
            messages,
            source_message_count: legacy.messages.len() as u64,
            skipped_message_count: skipped.len() as u64,
        }
    }
}

/// Re-mint ids that were already used by an earlier topic or batch, and
/// rewrite the topic's internal references to them.
fn rewrite_duplicate_ids(
    transformed: &mut TransformedTopic,
    seen_ids: &HashSet<String>,
    batch_ids: &HashSet<String>,
) {
    let mut remap: HashMap<String, String> = HashMap::new();
    for message in &transformed.messages {
        let id = message.id.as_str();
        if seen_ids.contains(id) || batch_ids.contains(id) {
            let fresh = Uuid::new_v4().to_string();
            tracing::warn!(
                "Duplicate message id {id} in topic {}; re-minting as {fresh}",
                transformed.topic.id
            );
            remap.insert(id.to_string(), fresh);
        }
    }
    if remap.is_empty() {
        return;
    }

    for message in &mut transformed.messages {
        if let Some(fresh) = remap.get(message.id.as_str()) {
            message.id = fresh.clone().into();
        }
        if let Some(parent) = &message.parent_id
            && let Some(fresh) = remap.get(parent.as_str())
        {
            message.parent_id = Some(fresh.clone().into());
        }
    }
    if let Some(active) = &transformed.topic.active_node_id
        && let Some(fresh) = remap.get(active.as_str())
    {
        transformed.topic.active_node_id = Some(fresh.clone().into());
    }
}

impl Migrator for ChatMigrator {
    fn id(&self) -> &'static str {
        "chat"
    }
    fn name(&self) -> &'static str {
        "Chat History"
    }
    fn description(&self) -> &'static str {
        "Topics and messages, rebuilt as a conversation tree"
    }
    fn order(&self) -> u32 {
        40
    }

    fn prepare(&mut self, ctx: &mut MigrationContext<'_>) -> Result<PrepareResult> {
        let mut result = PrepareResult::ok(0);

        if !ctx.sources.tables.table_exists(tables::TOPICS) {
            self.topic_count = 0;
            return Ok(result.with_warning("topics table missing from export"));
        }

        // The whole block table is preloaded: block lookups happen per
        // message id and the table is the one source the transforms join
        // against constantly.
        if ctx.sources.tables.table_exists(tables::MESSAGE_BLOCKS) {
            let reader = ctx.sources.tables.open_stream(tables::MESSAGE_BLOCKS);
            let block_map = &mut self.block_map;
            reader.for_each_batch(BLOCK_PRELOAD_BATCH, |batch, _| {
                for row in batch {
                    if let Some(id) = row.get("id").and_then(Value::as_str) {
                        block_map.insert(id.to_string(), row.clone());
                    }
                }
                Ok(())
            })?;
        } else {
            result = result.with_warning("message_blocks table missing from export");
        }

        self.load_topic_maps(ctx);

        self.topic_count = ctx.sources.tables.open_stream(tables::TOPICS).count()?;
        result.item_count = self.topic_count;

        // Sample a handful of topics for a messages-per-topic estimate.
        let sampled = ctx
            .sources
            .tables
            .open_stream(tables::TOPICS)
            .sample(PREPARE_SAMPLE_TOPICS)?;
        if !sampled.is_empty() {
            let total_messages: usize = sampled
                .iter()
                .map(|t| t.get("messages").and_then(Value::as_array).map_or(0, Vec::len))
                .sum();
            tracing::info!(
                "Chat prepare: {} topics, ~{} messages/topic across {} sampled",
                self.topic_count,
                total_messages / sampled.len().max(1),
                sampled.len()
            );
        }

        if !ctx.sources.tables.table_exists(tables::FILES) {
            result = result.with_warning("files table missing from export");
        }

        Ok(result)
    }

    fn execute(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ExecuteResult> {
        if !ctx.sources.tables.table_exists(tables::TOPICS) {
            return Ok(ExecuteResult::ok(0));
        }

        let reader = ctx.sources.tables.open_stream(tables::TOPICS);
        let now = ctx.now_ms;
        let topic_total = self.topic_count.max(1);

        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut source_topics = 0u64;
        let mut skipped_topics = 0u64;
        let mut source_messages = 0u64;
        let mut migrated_messages = 0u64;
        let mut skipped_messages = 0u64;

        // The migrator itself can't be captured mutably alongside ctx, so
        // transform inputs are borrowed up front.
        let this: &ChatMigrator = self;
        let db = &mut *ctx.db;
        let progress = &mut *ctx.progress;

        reader.for_each_batch(TOPIC_BATCH_SIZE, |batch, batch_index| {
            let mut transformed: Vec<TransformedTopic> = Vec::with_capacity(batch.len());
            let mut batch_ids: HashSet<String> = HashSet::new();

            for row in batch {
                source_topics += 1;
                match serde_json::from_value::<LegacyTopic>(row.clone()) {
                    Ok(legacy) => {
                        let mut one = this.transform_topic(&legacy, now);
                        rewrite_duplicate_ids(&mut one, &seen_ids, &batch_ids);
                        for message in &one.messages {
                            batch_ids.insert(message.id.as_str().to_string());
                        }
                        transformed.push(one);
                    }
                    Err(e) => {
                        tracing::warn!("Skipping unparseable topic in batch {batch_index}: {e}");
                        skipped_topics += 1;
                    }
                }
            }

            // One transaction per batch; failure here is fatal to the run.
            db.with_transaction(|tx| {
                for one in &transformed {
                    insert_topic(tx, &one.topic)?;
                    insert_messages(tx, &one.messages)?;
                }
                Ok(())
            })?;

            // Only observe ids once the batch is durably committed.
            seen_ids.extend(batch_ids);
            for one in &transformed {
                source_messages += one.source_message_count;
                migrated_messages += one.messages.len() as u64;
                skipped_messages += one.skipped_message_count;
            }

            let done = source_topics.min(topic_total);
            let percent = ((done * 100) / topic_total) as u8;
            progress(
                percent,
                &format!("Migrated {done}/{topic_total} topics"),
                Some("migration.chat.progress"),
            );
            Ok(())
        })?;

        self.source_topics = source_topics;
        self.skipped_topics = skipped_topics;
        self.source_messages = source_messages;
        self.migrated_messages = migrated_messages;
        self.skipped_messages = skipped_messages;

        Ok(ExecuteResult::ok(migrated_messages))
    }

    fn validate(&mut self, ctx: &mut MigrationContext<'_>) -> Result<ValidateResult> {
        let target_topics = ctx.db.count_rows("topics")?;
        let target_messages = ctx.db.count_rows("messages")?;

        let mut errors = Vec::new();
        let expected_topics = self.source_topics.saturating_sub(self.skipped_topics);
        if target_topics < expected_topics {
            errors.push(format!(
                "topic count mismatch: expected {expected_topics}, found {target_topics}"
            ));
        }

        // Empty topics are unusual but legitimate (everything skipped);
        // sample a few and log rather than fail.
        for topic_id in ctx.db.sample_topic_ids(VALIDATE_SAMPLE_TOPICS)? {
            let count = ctx.db.count_messages_in_topic(&topic_id)?;
            if count == 0 {
                tracing::info!("Topic {topic_id} migrated with zero messages");
            }
        }

        let orphans = ctx.db.count_orphan_messages()?;
        if orphans > 0 {
            errors.push(format!("{orphans} orphan messages after migration"));
        }

        let success = errors.is_empty();
        Ok(ValidateResult {
            success,
            errors,
            stats: ValidateStats {
                source_count: self.source_messages,
                target_count: target_messages,
                skipped_count: self.skipped_messages,
                mismatch_reason: None,
            },
        })
    }
}
