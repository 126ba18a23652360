//! Streaming adapter between the completion provider and the caller.
//!
//! The caller's sequence is one synthetic chunk carrying the retrieval
//! trace and an assistant role delta, followed by the upstream chunks with
//! empty-choice chunks removed. The synthetic chunk is produced without
//! polling upstream. Each later item is pulled from upstream only when the
//! caller asks for it; dropping the stream drops the upstream connection.
//!
//! An upstream error is yielded once and ends the stream. Since the first
//! chunk has already been delivered by then, the caller can only close the
//! response; no error document is written mid-stream.

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};

use crate::chat::{ChatCompletionChunk, ChunkChoice, Delta, CHUNK_OBJECT};
use crate::error::RagError;
use crate::models::Role;
use crate::provider::ChunkStream;

/// The caller-facing chunk sequence.
pub type ResponseStream = BoxStream<'static, Result<ChatCompletionChunk, RagError>>;

/// Leading chunk: role announcement, no content, trace in `context`.
pub fn first_chunk(context: Value) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: String::new(),
        object: CHUNK_OBJECT.to_string(),
        created: 0,
        model: String::new(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta {
                role: Some(Role::Assistant),
                ..Delta::default()
            },
            context: Some(context),
            finish_reason: None,
            extra: Map::new(),
        }],
        extra: Map::new(),
    }
}

pub fn adapt(context: Value, upstream: ChunkStream) -> ResponseStream {
    let head = stream::once(future::ready(Ok(first_chunk(context))));

    let body = upstream
        .filter(|item| {
            let keep = !matches!(item, Ok(chunk) if chunk.choices.is_empty());
            if !keep {
                tracing::trace!("dropping upstream chunk with no choices");
            }
            future::ready(keep)
        })
        .map(|item| item.map_err(|e| RagError::provider("generation", e)))
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            if let Err(e) = &item {
                tracing::error!("completion stream failed after first chunk: {}", e);
                *failed = true;
            }
            future::ready(Some(item))
        });

    head.chain(body).boxed()
}
