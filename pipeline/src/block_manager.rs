//! Block lifecycle management between chunk events and the streaming
//! cache.
//!
//! `BlockManager` owns the per-message transition state (`active block`,
//! `last block type`) and the smart update rule: type transitions and
//! completions flush immediately, same-type streaming updates go through
//! the injected throttle. `ChunkDispatcher` is the callback layer the
//! final consumer drives: one generic chunk in, cache mutations out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use hearth_types::{
    Block, BlockId, BlockKind, BlockPayload, BlockStatus, ChunkError, CompletionsSummary,
    ContentReference, GenericChunk, McpToolResult, MessageId, MessageStatus, ReferenceKind,
    is_citation_producing_tool,
};

use crate::context::ChunkHandler;
use crate::service::StreamingService;

/// Throttle hook pair injected by the caller: `schedule` queues a flush
/// for a block, `cancel` drops any pending flush.
pub trait BlockUpdateThrottle: Send + Sync {
    fn schedule(&self, block_id: &BlockId, flush: Box<dyn FnOnce() + Send>);
    fn cancel(&self, block_id: &BlockId);
}

/// No throttling: every update flushes inline.
pub struct ImmediateThrottle;

impl BlockUpdateThrottle for ImmediateThrottle {
    fn schedule(&self, _block_id: &BlockId, flush: Box<dyn FnOnce() + Send>) {
        flush();
    }

    fn cancel(&self, _block_id: &BlockId) {}
}

struct ManagerState {
    active_block: Option<(BlockId, BlockKind)>,
    last_block_type: Option<BlockKind>,
}

/// Per-message block lifecycle manager.
pub struct BlockManager {
    service: Arc<StreamingService>,
    message_id: MessageId,
    throttle: Arc<dyn BlockUpdateThrottle>,
    state: Mutex<ManagerState>,
}

impl BlockManager {
    #[must_use]
    pub fn new(
        service: Arc<StreamingService>,
        message_id: MessageId,
        throttle: Arc<dyn BlockUpdateThrottle>,
    ) -> Self {
        Self {
            service,
            message_id,
            throttle,
            state: Mutex::new(ManagerState {
                active_block: None,
                last_block_type: None,
            }),
        }
    }

    /// Register a new block and make it the active one.
    pub fn handle_block_transition(&self, block: Block) {
        let kind = block.kind();
        {
            let mut state = self.state.lock().expect("manager state poisoned");
            if let Some((previous, _)) = &state.active_block
                && previous != &block.id
            {
                self.throttle.cancel(previous);
            }
            state.active_block = Some((block.id.clone(), kind));
            state.last_block_type = Some(kind);
        }
        if let Err(e) = self.service.add_block(&self.message_id, block) {
            tracing::warn!("Failed to add block: {e:#}");
        }
    }

    /// Throttled-or-immediate block update.
    ///
    /// A type transition or a completing update flushes immediately (after
    /// cancelling pending throttled flushes); a same-type streaming update
    /// goes through the throttle.
    pub fn smart_block_update(
        &self,
        block_id: &BlockId,
        kind: BlockKind,
        is_complete: bool,
        update: impl FnOnce(&mut Block) + Send + 'static,
    ) {
        let transition = {
            let state = self.state.lock().expect("manager state poisoned");
            state.last_block_type != Some(kind)
        };

        if transition || is_complete {
            {
                let mut state = self.state.lock().expect("manager state poisoned");
                if let Some((previous, _)) = &state.active_block
                    && previous != block_id
                {
                    self.throttle.cancel(previous);
                }
                if is_complete {
                    self.throttle.cancel(block_id);
                    state.active_block = None;
                } else {
                    state.active_block = Some((block_id.clone(), kind));
                }
                state.last_block_type = Some(kind);
            }
            if let Err(e) = self.service.update_block(block_id, update) {
                tracing::warn!("Failed to update block: {e:#}");
            }
        } else {
            {
                let mut state = self.state.lock().expect("manager state poisoned");
                state.active_block = Some((block_id.clone(), kind));
            }
            let service = Arc::clone(&self.service);
            let block_id_owned = block_id.clone();
            self.throttle.schedule(
                block_id,
                Box::new(move || {
                    if let Err(e) = service.update_block(&block_id_owned, update) {
                        tracing::warn!("Failed to flush throttled update: {e:#}");
                    }
                }),
            );
        }
    }

    /// Guard against duplicate block creation when the chunk stream
    /// over-fires (image generation is the usual offender).
    #[must_use]
    pub fn has_block_of_type(&self, kind: BlockKind) -> bool {
        self.service
            .get_task(&self.message_id)
            .is_some_and(|task| task.blocks.values().any(|block| block.kind() == kind))
    }

    fn fresh_block(&self, payload: BlockPayload, status: BlockStatus) -> Block {
        let mut block = Block::new(
            BlockId::new(Uuid::new_v4().to_string()),
            self.message_id.clone(),
            payload,
        );
        block.status = status;
        block
    }
}

#[derive(Default)]
struct DispatchState {
    placeholder: Option<BlockId>,
    text_block: Option<BlockId>,
    thinking_block: Option<BlockId>,
    tool_blocks: HashMap<String, BlockId>,
    finalized: bool,
}

/// Routes generic-chunk events to block mutations and, at the end of the
/// stream, to `finalize`.
pub struct ChunkDispatcher {
    manager: BlockManager,
    service: Arc<StreamingService>,
    message_id: MessageId,
    state: Mutex<DispatchState>,
}

impl ChunkDispatcher {
    #[must_use]
    pub fn new(
        service: Arc<StreamingService>,
        message_id: MessageId,
        throttle: Arc<dyn BlockUpdateThrottle>,
    ) -> Self {
        Self {
            manager: BlockManager::new(Arc::clone(&service), message_id.clone(), throttle),
            service,
            message_id,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Wrap the dispatcher as the `on_chunk` handler of a completion call.
    #[must_use]
    pub fn into_chunk_handler(self) -> ChunkHandler {
        let dispatcher = Arc::new(self);
        Arc::new(move |chunk| dispatcher.handle(chunk))
    }

    pub fn handle(&self, chunk: GenericChunk) {
        match chunk {
            GenericChunk::LlmResponseCreated { .. } => self.on_response_created(),
            GenericChunk::TextDelta { text } => self.on_text_delta(&text),
            GenericChunk::ThinkingDelta {
                text,
                thinking_millsec,
            } => self.on_thinking_delta(&text, thinking_millsec),
            GenericChunk::ThinkingComplete {
                text,
                thinking_millsec,
            } => self.on_thinking_complete(text, thinking_millsec),
            GenericChunk::McpToolCreated { .. } => {
                // Never reaches the consumer: the tool loop intercepts it.
            }
            GenericChunk::McpToolInProgress { responses } => self.on_tool_responses(&responses),
            GenericChunk::LlmWebSearchInProgress => {}
            GenericChunk::LlmWebSearchComplete { results } => {
                self.add_citation_block(ContentReference {
                    kind: ReferenceKind::Web,
                    payload: results.results,
                });
            }
            GenericChunk::ImageCreated => self.on_image_created(),
            GenericChunk::ImageComplete { image } => self.on_image_complete(image),
            GenericChunk::LlmResponseComplete { .. } => self.on_response_complete(),
            GenericChunk::BlockComplete { response } => self.on_block_complete(response),
            GenericChunk::Error { error } => self.on_error(&error),
        }
    }

    fn on_response_created(&self) {
        let block = self
            .manager
            .fresh_block(BlockPayload::Unknown, BlockStatus::Processing);
        self.state.lock().expect("dispatch state poisoned").placeholder = Some(block.id.clone());
        self.manager.handle_block_transition(block);
    }

    fn on_text_delta(&self, text: &str) {
        let (existing, placeholder) = {
            let state = self.state.lock().expect("dispatch state poisoned");
            (state.text_block.clone(), state.placeholder.clone())
        };

        match existing {
            Some(block_id) => {
                let delta = text.to_string();
                self.manager.smart_block_update(
                    &block_id,
                    BlockKind::MainText,
                    false,
                    move |block| {
                        if let BlockPayload::MainText { content, .. } = &mut block.payload {
                            content.push_str(&delta);
                        }
                    },
                );
            }
            None => {
                let block_id = if let Some(placeholder_id) = placeholder {
                    // Promote the placeholder opened at response creation.
                    let initial = text.to_string();
                    self.manager.smart_block_update(
                        &placeholder_id,
                        BlockKind::MainText,
                        false,
                        move |block| {
                            block.status = BlockStatus::Streaming;
                            block.payload = BlockPayload::MainText {
                                content: initial,
                                references: Vec::new(),
                            };
                        },
                    );
                    self.state.lock().expect("dispatch state poisoned").placeholder = None;
                    placeholder_id
                } else {
                    let block = self.manager.fresh_block(
                        BlockPayload::MainText {
                            content: text.to_string(),
                            references: Vec::new(),
                        },
                        BlockStatus::Streaming,
                    );
                    let id = block.id.clone();
                    self.manager.handle_block_transition(block);
                    id
                };
                self.state.lock().expect("dispatch state poisoned").text_block = Some(block_id);
            }
        }
    }

    fn on_thinking_delta(&self, text: &str, thinking_ms: u64) {
        let existing = self
            .state
            .lock()
            .expect("dispatch state poisoned")
            .thinking_block
            .clone();
        match existing {
            Some(block_id) => {
                let delta = text.to_string();
                self.manager.smart_block_update(
                    &block_id,
                    BlockKind::Thinking,
                    false,
                    move |block| {
                        if let BlockPayload::Thinking {
                            content,
                            thinking_ms: ms,
                        } = &mut block.payload
                        {
                            content.push_str(&delta);
                            *ms = thinking_ms;
                        }
                    },
                );
            }
            None => {
                let block = self.manager.fresh_block(
                    BlockPayload::Thinking {
                        content: text.to_string(),
                        thinking_ms,
                    },
                    BlockStatus::Streaming,
                );
                let id = block.id.clone();
                self.manager.handle_block_transition(block);
                self.state.lock().expect("dispatch state poisoned").thinking_block = Some(id);
            }
        }
    }

    fn on_thinking_complete(&self, text: String, thinking_ms: u64) {
        let block_id = self
            .state
            .lock()
            .expect("dispatch state poisoned")
            .thinking_block
            .take();
        if let Some(block_id) = block_id {
            self.manager.smart_block_update(
                &block_id,
                BlockKind::Thinking,
                true,
                move |block| {
                    block.status = BlockStatus::Success;
                    block.payload = BlockPayload::Thinking {
                        content: text,
                        thinking_ms,
                    };
                },
            );
        }
    }

    /// Tool responses: first sighting of a call id opens the block, the
    /// result closes it. Built-in search tools add a citation block
    /// alongside their result.
    pub fn on_tool_responses(&self, responses: &[McpToolResult]) {
        for response in responses {
            let existing = self
                .state
                .lock()
                .expect("dispatch state poisoned")
                .tool_blocks
                .get(&response.call_id)
                .cloned();
            match existing {
                Some(block_id) => {
                    let result = response.clone();
                    let completing = !result.content.is_null();
                    self.manager.smart_block_update(
                        &block_id,
                        BlockKind::Tool,
                        completing,
                        move |block| {
                            block.status = if result.is_error {
                                BlockStatus::Error
                            } else if completing {
                                BlockStatus::Success
                            } else {
                                BlockStatus::Streaming
                            };
                            if let BlockPayload::Tool { content, .. } = &mut block.payload {
                                *content = Some(result.content.clone());
                            }
                        },
                    );
                    if completing && is_citation_producing_tool(&response.tool_name) {
                        self.add_citation_block(ContentReference {
                            kind: if response.tool_name
                                == hearth_types::BUILTIN_KNOWLEDGE_SEARCH_TOOL
                            {
                                ReferenceKind::Knowledge
                            } else {
                                ReferenceKind::Web
                            },
                            payload: response.content.clone(),
                        });
                    }
                }
                None => {
                    let block = self.manager.fresh_block(
                        BlockPayload::Tool {
                            tool_id: response.call_id.clone(),
                            tool_name: response.tool_name.clone(),
                            arguments: None,
                            content: (!response.content.is_null())
                                .then(|| response.content.clone()),
                        },
                        if response.content.is_null() {
                            BlockStatus::Pending
                        } else if response.is_error {
                            BlockStatus::Error
                        } else {
                            BlockStatus::Success
                        },
                    );
                    self.state
                        .lock()
                        .expect("dispatch state poisoned")
                        .tool_blocks
                        .insert(response.call_id.clone(), block.id.clone());
                    self.manager.handle_block_transition(block);
                }
            }
        }
    }

    fn add_citation_block(&self, reference: ContentReference) {
        let block = self.manager.fresh_block(
            BlockPayload::Citation {
                references: vec![reference],
            },
            BlockStatus::Success,
        );
        self.manager.handle_block_transition(block);
    }

    fn on_image_created(&self) {
        // The image pipeline over-fires creation events; one image block
        // per message is enough.
        if self.manager.has_block_of_type(BlockKind::Image) {
            return;
        }
        let block = self
            .manager
            .fresh_block(BlockPayload::Image { file_id: None, url: None }, BlockStatus::Processing);
        self.manager.handle_block_transition(block);
    }

    fn on_image_complete(&self, image: serde_json::Value) {
        let task = self.service.get_task(&self.message_id);
        let Some(task) = task else { return };
        let Some(block_id) = task
            .block_order
            .iter()
            .find(|id| {
                task.blocks
                    .get(*id)
                    .is_some_and(|b| b.kind() == BlockKind::Image)
            })
            .cloned()
        else {
            return;
        };
        let url = image
            .get("url")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);
        self.manager
            .smart_block_update(&block_id, BlockKind::Image, true, move |block| {
                block.status = BlockStatus::Success;
                if let BlockPayload::Image { url: target, .. } = &mut block.payload {
                    *target = url;
                }
            });
    }

    fn on_response_complete(&self) {
        let block_id = self
            .state
            .lock()
            .expect("dispatch state poisoned")
            .text_block
            .take();
        if let Some(block_id) = block_id {
            self.manager
                .smart_block_update(&block_id, BlockKind::MainText, true, |block| {
                    block.status = BlockStatus::Success;
                });
        }
    }

    fn on_block_complete(&self, response: Option<CompletionsSummary>) {
        let mut state = self.state.lock().expect("dispatch state poisoned");
        if state.finalized {
            return;
        }
        state.finalized = true;
        drop(state);
        if let Err(e) =
            self.service
                .finalize(&self.message_id, MessageStatus::Success, response.as_ref())
        {
            tracing::warn!("Finalize failed: {e:#}");
        }
    }

    fn on_error(&self, error: &ChunkError) {
        let mut state = self.state.lock().expect("dispatch state poisoned");
        if state.finalized {
            return;
        }
        state.finalized = true;
        drop(state);

        // An abort is a pause, not a failure: keep whatever streamed.
        let status = if error.is_abort() {
            MessageStatus::Paused
        } else {
            let block = self.manager.fresh_block(
                BlockPayload::Error {
                    message: error.message.clone(),
                    details: error.details.clone(),
                },
                BlockStatus::Error,
            );
            self.manager.handle_block_transition(block);
            MessageStatus::Error
        };
        if let Err(e) = self.service.finalize(&self.message_id, status, None) {
            tracing::warn!("Finalize after error failed: {e:#}");
        }
    }
}
