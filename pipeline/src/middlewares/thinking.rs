//! Thinking extraction: timing annotation and inline `<think>` tags.

use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;

use hearth_types::GenericChunk;

use crate::context::CompletionsFn;
use crate::middleware::{Middleware, StageOutput};
use crate::stream::{ChunkTransform, transform_stream};

/// Annotates thinking deltas with wall-clock timing and closes each
/// contiguous thinking segment with a single `thinking_complete` right
/// before the first subsequent text delta (or at stream end).
pub struct ThinkChunkMiddleware;

impl Middleware for ThinkChunkMiddleware {
    fn name(&self) -> &'static str {
        "ThinkChunkMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                match next(ctx, params).await? {
                    StageOutput::Chunks(stream) => Ok(StageOutput::Chunks(transform_stream(
                        stream,
                        ThinkState::default(),
                    ))),
                    other => Ok(other),
                }
            }
            .boxed()
        })
    }
}

#[derive(Default)]
struct ThinkState {
    accumulated: String,
    started_at: Option<Instant>,
}

impl ThinkState {
    fn elapsed_ms(&self) -> u64 {
        self.started_at
            .map_or(0, |at| at.elapsed().as_millis() as u64)
    }

    fn flush_complete(&mut self, out: &mut Vec<GenericChunk>) {
        if self.accumulated.is_empty() {
            return;
        }
        out.push(GenericChunk::ThinkingComplete {
            text: std::mem::take(&mut self.accumulated),
            thinking_millsec: self.elapsed_ms(),
        });
        self.started_at = None;
    }
}

impl ChunkTransform for ThinkState {
    fn on_chunk(&mut self, chunk: GenericChunk, out: &mut Vec<GenericChunk>) {
        match chunk {
            GenericChunk::ThinkingDelta { text, .. } => {
                if self.started_at.is_none() {
                    self.started_at = Some(Instant::now());
                }
                self.accumulated.push_str(&text);
                out.push(GenericChunk::ThinkingDelta {
                    text,
                    thinking_millsec: self.elapsed_ms(),
                });
            }
            GenericChunk::TextDelta { .. } => {
                self.flush_complete(out);
                out.push(chunk);
            }
            GenericChunk::LlmResponseComplete { .. } => {
                self.flush_complete(out);
                out.push(chunk);
            }
            other => out.push(other),
        }
    }

    fn on_flush(&mut self, out: &mut Vec<GenericChunk>) {
        self.flush_complete(out);
    }
}

/// Extracts `<think>…</think>` (and `<thinking>…</thinking>`) spans out of
/// text deltas into thinking deltas, buffering partial tags across chunk
/// boundaries.
pub struct ThinkingTagExtractionMiddleware;

impl Middleware for ThinkingTagExtractionMiddleware {
    fn name(&self) -> &'static str {
        "ThinkingTagExtractionMiddleware"
    }

    fn wrap(self: Arc<Self>, next: CompletionsFn) -> CompletionsFn {
        Arc::new(move |ctx, params| {
            let next = Arc::clone(&next);
            async move {
                match next(ctx, params).await? {
                    StageOutput::Chunks(stream) => Ok(StageOutput::Chunks(transform_stream(
                        stream,
                        TagState::default(),
                    ))),
                    other => Ok(other),
                }
            }
            .boxed()
        })
    }
}

const OPEN_TAGS: &[(&str, &str)] = &[("<think>", "</think>"), ("<thinking>", "</thinking>")];

#[derive(Default)]
struct TagState {
    close_tag: Option<&'static str>,
    carry: String,
}

/// Longest suffix of `s` that is a proper prefix of `tag` (tags are ASCII,
/// so byte slicing stays on char boundaries).
fn partial_tag_suffix(s: &str, tag: &str) -> usize {
    let max = tag.len().saturating_sub(1).min(s.len());
    for k in (1..=max).rev() {
        if s.ends_with(&tag[..k]) {
            return k;
        }
    }
    0
}

impl TagState {
    fn emit_text(out: &mut Vec<GenericChunk>, text: &str) {
        if !text.is_empty() {
            out.push(GenericChunk::text_delta(text));
        }
    }

    fn emit_thinking(out: &mut Vec<GenericChunk>, text: &str) {
        if !text.is_empty() {
            out.push(GenericChunk::ThinkingDelta {
                text: text.to_string(),
                thinking_millsec: 0,
            });
        }
    }

    fn process_text(&mut self, text: &str, out: &mut Vec<GenericChunk>) {
        let input = format!("{}{}", std::mem::take(&mut self.carry), text);
        let mut rest = input.as_str();

        loop {
            if let Some(close_tag) = self.close_tag {
                if let Some(pos) = rest.find(close_tag) {
                    Self::emit_thinking(out, &rest[..pos]);
                    self.close_tag = None;
                    rest = &rest[pos + close_tag.len()..];
                    continue;
                }
                let keep = partial_tag_suffix(rest, close_tag);
                Self::emit_thinking(out, &rest[..rest.len() - keep]);
                self.carry = rest[rest.len() - keep..].to_string();
                return;
            }

            let earliest = OPEN_TAGS
                .iter()
                .filter_map(|(open, close)| rest.find(open).map(|pos| (pos, *open, *close)))
                .min_by_key(|(pos, open, _)| (*pos, std::cmp::Reverse(open.len())));
            match earliest {
                Some((pos, open, close)) => {
                    Self::emit_text(out, &rest[..pos]);
                    self.close_tag = Some(close);
                    rest = &rest[pos + open.len()..];
                }
                None => {
                    let keep = OPEN_TAGS
                        .iter()
                        .map(|(open, _)| partial_tag_suffix(rest, open))
                        .max()
                        .unwrap_or(0);
                    Self::emit_text(out, &rest[..rest.len() - keep]);
                    self.carry = rest[rest.len() - keep..].to_string();
                    return;
                }
            }
        }
    }
}

impl ChunkTransform for TagState {
    fn on_chunk(&mut self, chunk: GenericChunk, out: &mut Vec<GenericChunk>) {
        match chunk {
            GenericChunk::TextDelta { text } => self.process_text(&text, out),
            other => out.push(other),
        }
    }

    fn on_flush(&mut self, out: &mut Vec<GenericChunk>) {
        let carry = std::mem::take(&mut self.carry);
        if carry.is_empty() {
            return;
        }
        if self.close_tag.is_some() {
            Self::emit_thinking(out, &carry);
        } else {
            Self::emit_text(out, &carry);
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use hearth_types::GenericChunk;

    use super::{TagState, ThinkState, partial_tag_suffix};
    use crate::stream::{iter_stream, transform_stream};

    async fn run_tags(texts: &[&str]) -> Vec<GenericChunk> {
        let chunks = texts
            .iter()
            .map(|t| GenericChunk::text_delta(*t))
            .collect();
        transform_stream(iter_stream(chunks), TagState::default())
            .collect()
            .await
    }

    #[tokio::test]
    async fn extracts_whole_tags_in_one_chunk() {
        let out = run_tags(&["<think>plan</think>answer"]).await;
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[0], GenericChunk::ThinkingDelta { text, .. } if text == "plan"));
        assert!(matches!(&out[1], GenericChunk::TextDelta { text } if text == "answer"));
    }

    #[tokio::test]
    async fn buffers_partial_tags_across_chunks() {
        let out = run_tags(&["before<thi", "nk>in", "side</th", "ink>after"]).await;
        let rendered: Vec<String> = out
            .iter()
            .map(|c| match c {
                GenericChunk::TextDelta { text } => format!("t:{text}"),
                GenericChunk::ThinkingDelta { text, .. } => format!("k:{text}"),
                other => format!("?{}", other.tag()),
            })
            .collect();
        assert_eq!(rendered.join("|"), "t:before|k:in|k:side|t:after");
    }

    #[tokio::test]
    async fn unterminated_tag_flushes_as_thinking() {
        let out = run_tags(&["<thinking>never closed"]).await;
        assert!(
            out.iter()
                .all(|c| matches!(c, GenericChunk::ThinkingDelta { .. }))
        );
    }

    #[tokio::test]
    async fn plain_text_passes_untouched() {
        let out = run_tags(&["a < b and > c"]).await;
        let text: String = out
            .iter()
            .map(|c| match c {
                GenericChunk::TextDelta { text } => text.clone(),
                _ => String::new(),
            })
            .collect();
        assert_eq!(text, "a < b and > c");
    }

    #[test]
    fn partial_suffix_detection() {
        assert_eq!(partial_tag_suffix("abc<th", "<think>"), 3);
        assert_eq!(partial_tag_suffix("abc", "<think>"), 0);
        assert_eq!(partial_tag_suffix("<think", "<think>"), 6);
    }

    #[tokio::test]
    async fn thinking_completes_before_first_text() {
        let chunks = vec![
            GenericChunk::ThinkingDelta {
                text: "step1".into(),
                thinking_millsec: 0,
            },
            GenericChunk::ThinkingDelta {
                text: "step2".into(),
                thinking_millsec: 0,
            },
            GenericChunk::text_delta("answer"),
            GenericChunk::LlmResponseComplete {
                usage: None,
                metrics: None,
            },
        ];
        let out: Vec<_> = transform_stream(iter_stream(chunks), ThinkState::default())
            .collect()
            .await;

        let tags: Vec<&str> = out.iter().map(GenericChunk::tag).collect();
        assert_eq!(
            tags,
            vec![
                "thinking_delta",
                "thinking_delta",
                "thinking_complete",
                "text_delta",
                "llm_response_complete"
            ]
        );
        let GenericChunk::ThinkingComplete { text, .. } = &out[2] else {
            panic!("expected thinking_complete");
        };
        assert_eq!(text, "step1step2");
    }

    #[tokio::test]
    async fn thinking_millsec_is_monotonic() {
        let chunks = vec![
            GenericChunk::ThinkingDelta {
                text: "a".into(),
                thinking_millsec: 0,
            },
            GenericChunk::ThinkingDelta {
                text: "b".into(),
                thinking_millsec: 0,
            },
            GenericChunk::ThinkingDelta {
                text: "c".into(),
                thinking_millsec: 0,
            },
        ];
        let out: Vec<_> = transform_stream(iter_stream(chunks), ThinkState::default())
            .collect()
            .await;
        let times: Vec<u64> = out
            .iter()
            .filter_map(|c| match c {
                GenericChunk::ThinkingDelta {
                    thinking_millsec, ..
                } => Some(*thinking_millsec),
                _ => None,
            })
            .collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn thinking_only_stream_flushes_complete_at_end() {
        let chunks = vec![GenericChunk::ThinkingDelta {
            text: "only".into(),
            thinking_millsec: 0,
        }];
        let out: Vec<_> = transform_stream(iter_stream(chunks), ThinkState::default())
            .collect()
            .await;
        assert_eq!(out.last().unwrap().tag(), "thinking_complete");
    }
}
