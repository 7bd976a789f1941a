//! Legacy block transforms.
//!
//! Each legacy block either maps to one new-architecture block, contributes
//! citation references (merged into the message's first `main_text` block),
//! or is dropped. The legacy bookkeeping fields (`id`, `messageId`,
//! `status`, `model`) never survive.

use std::collections::HashMap;

use hearth_types::{BlockPayload, ContentReference, ReferenceKind};
use serde_json::Value;

/// What one legacy block becomes.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Block(BlockPayload),
    References(Vec<ContentReference>),
    Dropped,
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn content_field(raw: &Value) -> String {
    str_field(raw, "content").unwrap_or_default()
}

/// Transform one legacy block by its `type` tag.
#[must_use]
pub fn transform_block(raw: &Value) -> BlockOutcome {
    let Some(block_type) = raw.get("type").and_then(Value::as_str) else {
        return BlockOutcome::Dropped;
    };

    match block_type {
        "main_text" => BlockOutcome::Block(BlockPayload::MainText {
            content: content_field(raw),
            references: Vec::new(),
        }),
        "thinking" => BlockOutcome::Block(BlockPayload::Thinking {
            content: content_field(raw),
            thinking_ms: raw
                .get("thinking_millsec")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        }),
        "translation" => BlockOutcome::Block(BlockPayload::Translation {
            content: content_field(raw),
            source_language: str_field(raw, "sourceLanguage"),
            target_language: str_field(raw, "targetLanguage"),
        }),
        "code" => BlockOutcome::Block(BlockPayload::Code {
            content: content_field(raw),
            language: str_field(raw, "language"),
        }),
        "image" => {
            let file_id = raw
                .get("file")
                .and_then(|file| file.get("id"))
                .and_then(Value::as_str)
                .map(ToString::to_string);
            let url = str_field(raw, "url");
            if file_id.is_none() && url.is_none() {
                return BlockOutcome::Dropped;
            }
            BlockOutcome::Block(BlockPayload::Image {
                // The url only matters when no file was stored.
                url: if file_id.is_some() { None } else { url },
                file_id,
            })
        }
        "file" => {
            let Some(file_id) = raw
                .get("file")
                .and_then(|file| file.get("id"))
                .and_then(Value::as_str)
            else {
                return BlockOutcome::Dropped;
            };
            BlockOutcome::Block(BlockPayload::File {
                file_id: file_id.to_string(),
                name: raw
                    .get("file")
                    .and_then(|file| file.get("name"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
            })
        }
        "video" => BlockOutcome::Block(BlockPayload::Video {
            file_id: raw
                .get("file")
                .and_then(|file| file.get("id"))
                .and_then(Value::as_str)
                .map(ToString::to_string),
            url: str_field(raw, "url"),
        }),
        "tool" => BlockOutcome::Block(BlockPayload::Tool {
            tool_id: str_field(raw, "toolId").unwrap_or_default(),
            tool_name: str_field(raw, "toolName").unwrap_or_default(),
            arguments: raw.get("arguments").filter(|v| !v.is_null()).cloned(),
            content: raw.get("content").filter(|v| !v.is_null()).cloned(),
        }),
        "citation" => BlockOutcome::References(citation_references(raw)),
        "error" => {
            let error = raw.get("error");
            let message = error
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map_or_else(|| "Unknown error".to_string(), ToString::to_string);
            BlockOutcome::Block(BlockPayload::Error {
                message,
                details: error.filter(|v| !v.is_null()).cloned(),
            })
        }
        "compact" => BlockOutcome::Block(BlockPayload::Compact {
            content: content_field(raw),
            compacted_count: raw
                .get("compactedCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
        }),
        _ => BlockOutcome::Dropped,
    }
}

/// Zero-to-three references: one each for web, knowledge, and memory
/// material, whichever the citation block carries.
fn citation_references(raw: &Value) -> Vec<ContentReference> {
    let mut references = Vec::new();
    if let Some(response) = raw.get("response").filter(|v| !v.is_null()) {
        references.push(ContentReference {
            kind: ReferenceKind::Web,
            payload: response.clone(),
        });
    }
    if let Some(knowledge) = raw.get("knowledge").filter(|v| !v.is_null()) {
        references.push(ContentReference {
            kind: ReferenceKind::Knowledge,
            payload: knowledge.clone(),
        });
    }
    if let Some(memories) = raw.get("memories").filter(|v| !v.is_null()) {
        references.push(ContentReference {
            kind: ReferenceKind::Memory,
            payload: memories.clone(),
        });
    }
    references
}

/// Resolve a message's block-id list against the preloaded block table and
/// assemble its final block list, folding citation references into the
/// first `main_text` block.
///
/// Missing block ids and dropped blocks contribute nothing; a message whose
/// final list is empty is skipped by the caller.
#[must_use]
pub fn assemble_blocks(
    block_ids: &[String],
    block_map: &HashMap<String, Value>,
) -> Vec<BlockPayload> {
    let mut blocks: Vec<BlockPayload> = Vec::with_capacity(block_ids.len());
    let mut pending_references: Vec<ContentReference> = Vec::new();

    for block_id in block_ids {
        let Some(raw) = block_map.get(block_id) else {
            tracing::debug!("Block {block_id} missing from message_blocks table");
            continue;
        };
        match transform_block(raw) {
            BlockOutcome::Block(block) => blocks.push(block),
            BlockOutcome::References(mut refs) => pending_references.append(&mut refs),
            BlockOutcome::Dropped => {}
        }
    }

    if !pending_references.is_empty() {
        if let Some(BlockPayload::MainText { references, .. }) = blocks
            .iter_mut()
            .find(|b| matches!(b, BlockPayload::MainText { .. }))
        {
            references.append(&mut pending_references);
        }
        // No main_text block to attach to: the citation material is dropped
        // with the block that carried it.
    }

    blocks
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use hearth_types::{BlockPayload, ReferenceKind};
    use serde_json::{Value, json};

    use super::{BlockOutcome, assemble_blocks, transform_block};

    #[test]
    fn thinking_renames_millsec_field() {
        let raw = json!({
            "id": "b1", "messageId": "m1", "status": "success",
            "type": "thinking", "content": "hm", "thinking_millsec": 1200
        });
        let BlockOutcome::Block(BlockPayload::Thinking {
            content,
            thinking_ms,
        }) = transform_block(&raw)
        else {
            panic!("expected thinking block");
        };
        assert_eq!(content, "hm");
        assert_eq!(thinking_ms, 1200);
    }

    #[test]
    fn image_prefers_file_over_url() {
        let raw = json!({
            "type": "image", "file": {"id": "f9"}, "url": "https://example.test/i.png"
        });
        let BlockOutcome::Block(BlockPayload::Image { file_id, url }) = transform_block(&raw)
        else {
            panic!("expected image block");
        };
        assert_eq!(file_id.as_deref(), Some("f9"));
        assert!(url.is_none());
    }

    #[test]
    fn image_without_file_keeps_url() {
        let raw = json!({"type": "image", "url": "https://example.test/i.png"});
        let BlockOutcome::Block(BlockPayload::Image { file_id, url }) = transform_block(&raw)
        else {
            panic!("expected image block");
        };
        assert!(file_id.is_none());
        assert_eq!(url.as_deref(), Some("https://example.test/i.png"));
    }

    #[test]
    fn unknown_blocks_are_dropped() {
        assert_eq!(
            transform_block(&json!({"type": "unknown"})),
            BlockOutcome::Dropped
        );
        assert_eq!(
            transform_block(&json!({"content": "no type"})),
            BlockOutcome::Dropped
        );
    }

    #[test]
    fn citation_emits_references_not_a_block() {
        let raw = json!({
            "type": "citation",
            "response": {"results": [{"url": "https://example.test"}]},
            "knowledge": [{"id": "k1"}]
        });
        let BlockOutcome::References(refs) = transform_block(&raw) else {
            panic!("expected references");
        };
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].kind, ReferenceKind::Web);
        assert_eq!(refs[1].kind, ReferenceKind::Knowledge);
    }

    fn block_map(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries
            .iter()
            .map(|(id, v)| ((*id).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn assemble_merges_citations_into_first_main_text() {
        let map = block_map(&[
            ("c1", json!({"type": "citation", "response": {"r": 1}})),
            ("t1", json!({"type": "main_text", "content": "first"})),
            ("t2", json!({"type": "main_text", "content": "second"})),
        ]);
        let blocks = assemble_blocks(
            &["c1".into(), "t1".into(), "t2".into()],
            &map,
        );
        assert_eq!(blocks.len(), 2);
        let BlockPayload::MainText { references, .. } = &blocks[0] else {
            panic!("expected main_text first");
        };
        assert_eq!(references.len(), 1);
        let BlockPayload::MainText { references, .. } = &blocks[1] else {
            panic!("expected main_text second");
        };
        assert!(references.is_empty());
    }

    #[test]
    fn assemble_skips_missing_ids() {
        let map = block_map(&[("t1", json!({"type": "main_text", "content": "x"}))]);
        let blocks = assemble_blocks(&["gone".into(), "t1".into()], &map);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn assemble_of_only_dropped_blocks_is_empty() {
        let map = block_map(&[("u1", json!({"type": "unknown"}))]);
        assert!(assemble_blocks(&["u1".into()], &map).is_empty());
    }
}
