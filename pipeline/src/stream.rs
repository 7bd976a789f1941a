//! Generic-chunk pull-streams and the transform plumbing middlewares use.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;

use hearth_types::GenericChunk;

/// The uniform pull-stream of typed chunks flowing through the middleware
/// chain.
pub type ChunkStream = Pin<Box<dyn Stream<Item = GenericChunk> + Send>>;

const CHUNK_CHANNEL_CAPACITY: usize = 256;

/// A channel-backed chunk stream: the producer side pushes, the stream
/// side pulls. Dropping the sender ends the stream.
#[must_use]
pub fn channel_stream() -> (mpsc::Sender<GenericChunk>, ChunkStream) {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    (tx, Box::pin(stream))
}

/// Chunk stream over an already-materialised list.
#[must_use]
pub fn iter_stream(chunks: Vec<GenericChunk>) -> ChunkStream {
    Box::pin(futures_util::stream::iter(chunks))
}

/// A synchronous per-chunk transformer staged into a stream.
///
/// `on_chunk` may emit zero or more chunks per input; `on_flush` runs once
/// when the upstream ends.
pub trait ChunkTransform: Send + 'static {
    fn on_chunk(&mut self, chunk: GenericChunk, out: &mut Vec<GenericChunk>);
    fn on_flush(&mut self, _out: &mut Vec<GenericChunk>) {}
}

struct TransformState<T> {
    upstream: ChunkStream,
    transform: T,
    pending: VecDeque<GenericChunk>,
    flushed: bool,
}

/// Pipe a stream through a [`ChunkTransform`], preserving order and
/// backpressure (the upstream is only polled when the output is pulled and
/// no transformed chunks are pending).
#[must_use]
pub fn transform_stream<T: ChunkTransform>(upstream: ChunkStream, transform: T) -> ChunkStream {
    let state = TransformState {
        upstream,
        transform,
        pending: VecDeque::new(),
        flushed: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((chunk, state));
            }
            if state.flushed {
                return None;
            }
            match state.upstream.next().await {
                Some(chunk) => {
                    let mut out = Vec::new();
                    state.transform.on_chunk(chunk, &mut out);
                    state.pending.extend(out);
                }
                None => {
                    let mut out = Vec::new();
                    state.transform.on_flush(&mut out);
                    state.pending.extend(out);
                    state.flushed = true;
                }
            }
        }
    }))
}
