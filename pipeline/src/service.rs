//! Live streaming-task state over the snapshot cache.
//!
//! A task exclusively owns its blocks until `finalize`, when ownership
//! transfers to persistent storage (one row per message, blocks inline)
//! and every cache key the task owned is deleted. Before that point the
//! cache is authoritative and the UI reads the per-message and per-block
//! snapshot keys.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use hearth_store::{TargetDb, insert_messages};
use hearth_types::{
    Block, BlockId, BlockPayload, BlockStatus, ChatMessage, CompletionsSummary, Message,
    MessageData, MessageId, MessageStats, MessageStatus, Role, TopicId,
};

use crate::cache::{CacheValue, MemoryCache, keys};

/// Crashed tasks fall out of the cache after this long.
pub const TASK_TTL: Duration = Duration::from_secs(5 * 60);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// The in-memory live representation of an assistant message being
/// generated.
#[derive(Debug, Clone)]
pub struct StreamingTask {
    pub topic_id: TopicId,
    pub message_id: MessageId,
    pub message: Message,
    pub blocks: HashMap<BlockId, Block>,
    /// Ordered weak index into `blocks`.
    pub block_order: Vec<BlockId>,
    pub parent_id: Option<MessageId>,
    pub siblings_group_id: u32,
    pub context_messages: Option<Vec<ChatMessage>>,
    pub started_at_ms: i64,
    pub is_agent_session: bool,
}

/// Options for [`StreamingService::start_task`].
#[derive(Debug, Clone, Default)]
pub struct StartTaskOptions {
    pub parent_id: Option<MessageId>,
    pub siblings_group_id: u32,
    pub context_messages: Option<Vec<ChatMessage>>,
    /// Agent-session messages persist through the direct DB driver
    /// instead of the data API.
    pub is_agent_session: bool,
    pub assistant_id: Option<hearth_types::AssistantId>,
    pub model_id: Option<String>,
}

/// The persistence boundary: issues message ids and stores consolidated
/// records.
pub trait MessagePersistence: Send + Sync {
    fn new_message_id(&self) -> MessageId;
    fn save_message(&self, message: &Message) -> Result<()>;
}

/// Direct-DB persistence used for agent sessions.
pub struct SqliteMessageSink {
    db: Arc<Mutex<TargetDb>>,
}

impl SqliteMessageSink {
    #[must_use]
    pub fn new(db: Arc<Mutex<TargetDb>>) -> Self {
        Self { db }
    }
}

impl MessagePersistence for SqliteMessageSink {
    fn new_message_id(&self) -> MessageId {
        MessageId::new(Uuid::new_v4().to_string())
    }

    fn save_message(&self, message: &Message) -> Result<()> {
        let db = self.db.lock().expect("db mutex poisoned");
        insert_messages(db.connection(), std::slice::from_ref(message))
            .context("Failed to persist streamed message")
    }
}

/// Process-wide streaming state manager.
pub struct StreamingService {
    cache: MemoryCache,
    block_index: Mutex<HashMap<BlockId, MessageId>>,
    /// Agent sessions: direct DB driver.
    db_sink: Arc<dyn MessagePersistence>,
    /// Ordinary topics: the data API.
    api_sink: Arc<dyn MessagePersistence>,
}

impl StreamingService {
    #[must_use]
    pub fn new(db_sink: Arc<dyn MessagePersistence>, api_sink: Arc<dyn MessagePersistence>) -> Self {
        Self {
            cache: MemoryCache::new(),
            block_index: Mutex::new(HashMap::new()),
            db_sink,
            api_sink,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    fn message_shell(
        topic_id: &TopicId,
        message_id: &MessageId,
        role: Role,
        options: &StartTaskOptions,
    ) -> Message {
        let now = now_ms();
        Message {
            id: message_id.clone(),
            parent_id: options.parent_id.clone(),
            topic_id: topic_id.clone(),
            role,
            data: MessageData::default(),
            searchable_text: None,
            status: MessageStatus::Success,
            siblings_group_id: options.siblings_group_id,
            assistant_id: options.assistant_id.clone(),
            assistant_meta: None,
            model_id: options.model_id.clone(),
            model_meta: None,
            trace_id: None,
            stats: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn publish_task(&self, task: StreamingTask) {
        let message = Arc::new(task.message.clone());
        let message_id = task.message_id.clone();
        self.cache.set(
            &keys::task(&message_id),
            CacheValue::Task(Arc::new(task)),
            Some(TASK_TTL),
        );
        self.cache
            .set(&keys::content(&message_id), CacheValue::Message(message), Some(TASK_TTL));
    }

    /// Initialise a task record, message snapshot, and topic index entry.
    pub fn start_task(
        &self,
        topic_id: &TopicId,
        message_id: &MessageId,
        options: StartTaskOptions,
    ) {
        let message = Self::message_shell(topic_id, message_id, Role::Assistant, &options);
        let task = StreamingTask {
            topic_id: topic_id.clone(),
            message_id: message_id.clone(),
            message,
            blocks: HashMap::new(),
            block_order: Vec::new(),
            parent_id: options.parent_id.clone(),
            siblings_group_id: options.siblings_group_id,
            context_messages: options.context_messages.clone(),
            started_at_ms: now_ms(),
            is_agent_session: options.is_agent_session,
        };

        let mut active = self.get_active_message_ids(topic_id);
        if !active.contains(message_id) {
            active.push(message_id.clone());
        }
        self.cache.set(
            &keys::topic_tasks(topic_id),
            CacheValue::MessageIds(Arc::new(active)),
            None,
        );
        self.publish_task(task);
    }

    #[must_use]
    pub fn get_task(&self, message_id: &MessageId) -> Option<Arc<StreamingTask>> {
        match self.cache.get(&keys::task(message_id)) {
            Some(CacheValue::Task(task)) => Some(task),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_message(&self, message_id: &MessageId) -> Option<Arc<Message>> {
        match self.cache.get(&keys::content(message_id)) {
            Some(CacheValue::Message(message)) => Some(message),
            _ => None,
        }
    }

    #[must_use]
    pub fn get_block(&self, block_id: &BlockId) -> Option<Arc<Block>> {
        match self.cache.get(&keys::block(block_id)) {
            Some(CacheValue::Block(block)) => Some(block),
            _ => None,
        }
    }

    /// Register a new block on a task and publish all affected snapshots.
    pub fn add_block(&self, message_id: &MessageId, block: Block) -> Result<()> {
        let Some(task) = self.get_task(message_id) else {
            bail!("no streaming task for message {message_id}");
        };
        self.block_index
            .lock()
            .expect("block index poisoned")
            .insert(block.id.clone(), message_id.clone());

        let mut task = (*task).clone();
        task.block_order.push(block.id.clone());
        self.cache.set(
            &keys::block(&block.id),
            CacheValue::Block(Arc::new(block.clone())),
            Some(TASK_TTL),
        );
        task.blocks.insert(block.id.clone(), block);
        self.publish_task(task);
        Ok(())
    }

    /// Merge changes into a block and re-publish the task and block
    /// snapshots. Throttling is the caller's business.
    pub fn update_block(
        &self,
        block_id: &BlockId,
        update: impl FnOnce(&mut Block),
    ) -> Result<()> {
        let message_id = self
            .block_index
            .lock()
            .expect("block index poisoned")
            .get(block_id)
            .cloned();
        let Some(message_id) = message_id else {
            bail!("unknown block {block_id}");
        };
        let Some(task) = self.get_task(&message_id) else {
            bail!("no streaming task for message {message_id}");
        };

        let mut task = (*task).clone();
        let Some(block) = task.blocks.get_mut(block_id) else {
            bail!("block {block_id} missing from its task");
        };
        update(block);
        self.cache.set(
            &keys::block(block_id),
            CacheValue::Block(Arc::new(block.clone())),
            Some(TASK_TTL),
        );
        self.publish_task(task);
        Ok(())
    }

    pub fn update_message(
        &self,
        message_id: &MessageId,
        update: impl FnOnce(&mut Message),
    ) -> Result<()> {
        let Some(task) = self.get_task(message_id) else {
            bail!("no streaming task for message {message_id}");
        };
        let mut task = (*task).clone();
        update(&mut task.message);
        self.publish_task(task);
        Ok(())
    }

    #[must_use]
    pub fn get_active_message_ids(&self, topic_id: &TopicId) -> Vec<MessageId> {
        match self.cache.get(&keys::topic_tasks(topic_id)) {
            Some(CacheValue::MessageIds(ids)) => (*ids).clone(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn is_streaming(&self, topic_id: &TopicId) -> bool {
        self.get_active_message_ids(topic_id)
            .iter()
            .any(|id| self.get_task(id).is_some())
    }

    #[must_use]
    pub fn is_message_streaming(&self, message_id: &MessageId) -> bool {
        self.get_task(message_id).is_some()
    }

    /// Per-topic sibling-group counter; no TTL, always ≥ 1.
    #[must_use]
    pub fn generate_next_group_id(&self, topic_id: &TopicId) -> u64 {
        self.cache.increment_counter(&keys::siblings_counter(topic_id))
    }

    /// Create and immediately persist a user message through the data API.
    pub fn create_user_message(
        &self,
        topic_id: &TopicId,
        blocks: Vec<BlockPayload>,
        options: &StartTaskOptions,
    ) -> Result<Message> {
        let sink = self.sink_for(options.is_agent_session);
        let message_id = sink.new_message_id();
        let mut message = Self::message_shell(topic_id, &message_id, Role::User, options);
        message.data = MessageData { blocks };
        message.refresh_searchable_text();
        sink.save_message(&message)?;
        Ok(message)
    }

    /// Obtain a persistence-issued id and set up the in-memory shell for a
    /// streaming assistant message.
    pub fn create_assistant_message(
        &self,
        topic_id: &TopicId,
        options: StartTaskOptions,
    ) -> MessageId {
        let message_id = self.sink_for(options.is_agent_session).new_message_id();
        self.start_task(topic_id, &message_id, options);
        message_id
    }

    fn sink_for(&self, is_agent_session: bool) -> &Arc<dyn MessagePersistence> {
        if is_agent_session {
            &self.db_sink
        } else {
            &self.api_sink
        }
    }

    /// Convert the task into a consolidated persistence payload, store it
    /// through the session-appropriate path, then drop every cache key the
    /// task owned.
    pub fn finalize(
        &self,
        message_id: &MessageId,
        status: MessageStatus,
        summary: Option<&CompletionsSummary>,
    ) -> Result<Message> {
        let Some(task) = self.get_task(message_id) else {
            bail!("no streaming task for message {message_id}");
        };
        let task = (*task).clone();

        // Any block still streaming/processing goes terminal with the
        // message; blocks then persist as bare payloads (id, message id,
        // and status are streaming-only bookkeeping).
        let forced = match status {
            MessageStatus::Paused => BlockStatus::Paused,
            MessageStatus::Error => BlockStatus::Error,
            MessageStatus::Success => BlockStatus::Success,
        };
        let blocks: Vec<BlockPayload> = task
            .block_order
            .iter()
            .filter_map(|block_id| task.blocks.get(block_id))
            .filter(|block| !matches!(block.payload, BlockPayload::Unknown))
            .map(|block| {
                if !block.status.is_terminal() {
                    let _ = self.update_block(&block.id, |b| b.status = forced);
                }
                block.payload.clone()
            })
            .collect();

        let mut message = task.message.clone();
        message.data = MessageData { blocks };
        message.refresh_searchable_text();
        message.status = status;
        message.stats = summary.and_then(|s| {
            MessageStats::merged(s.usage.as_ref(), s.metrics.as_ref())
        });
        message.updated_at = now_ms();

        self.sink_for(task.is_agent_session)
            .save_message(&message)?;
        self.end_task(message_id);
        Ok(message)
    }

    /// Delete every key owned by the task and drop it from the topic
    /// index.
    pub fn end_task(&self, message_id: &MessageId) {
        let task = self.get_task(message_id);
        if let Some(task) = &task {
            let mut index = self.block_index.lock().expect("block index poisoned");
            for block_id in &task.block_order {
                self.cache.delete(&keys::block(block_id));
                index.remove(block_id);
            }
            let remaining: Vec<MessageId> = self
                .get_active_message_ids(&task.topic_id)
                .into_iter()
                .filter(|id| id != message_id)
                .collect();
            self.cache.set(
                &keys::topic_tasks(&task.topic_id),
                CacheValue::MessageIds(Arc::new(remaining)),
                None,
            );
        }
        self.cache.delete(&keys::task(message_id));
        self.cache.delete(&keys::content(message_id));
    }
}
