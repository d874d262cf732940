//! Synthetic streaming: one upstream single-shot response replayed as a
//! chunk sequence.

use agyproxy_protocol::gemini::GenerateContentResponse;
use agyproxy_protocol::openai::{
    ChatCompletionChunk, ChatCompletionChunkObject, ChatDelta, ChunkChoice, FinishReason,
};

use crate::response::candidate_text;
use crate::{completion_id, map_finish_reason, unix_now};

/// Upper bound on the payload of a synthetic content chunk, in bytes.
pub const DEFAULT_SEGMENT_BYTES: usize = 40;

/// Split `text` into segments of at most `max_bytes` whose concatenation is
/// byte-identical to the input. Breaks land after whitespace when any falls
/// inside the window, so words survive intact; a single oversized token is
/// split at a char boundary rather than held whole.
pub fn segment_text(text: &str, max_bytes: usize) -> Vec<String> {
    let max_bytes = max_bytes.max(1);
    let mut segments = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            segments.push(rest.to_string());
            break;
        }
        let mut window_end = floor_char_boundary(rest, max_bytes);
        if window_end == 0 {
            // First char is wider than the window; take it whole.
            window_end = rest
                .chars()
                .next()
                .map(|ch| ch.len_utf8())
                .unwrap_or(rest.len());
        }
        let cut = rest[..window_end]
            .char_indices()
            .filter(|(_, ch)| ch.is_whitespace())
            .map(|(i, ch)| i + ch.len_utf8())
            .next_back()
            .unwrap_or(window_end);
        let cut = if cut == 0 { window_end } else { cut };
        let (head, tail) = rest.split_at(cut);
        segments.push(head.to_string());
        rest = tail;
    }
    segments
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Replay a complete response as a chunk sequence. The first chunk carries
/// the assistant role, the last carries the finish reason, and the content
/// chunks in between concatenate back to the original text. An empty
/// response still yields the role and finish chunks.
pub fn to_chunks(model: &str, response: &GenerateContentResponse) -> Vec<ChatCompletionChunk> {
    let id = completion_id();
    let created = unix_now();
    let (text, finish) = match response.candidates.first() {
        Some(candidate) => (
            candidate_text(candidate),
            candidate
                .finish_reason
                .map(map_finish_reason)
                .unwrap_or(FinishReason::Stop),
        ),
        None => (String::new(), FinishReason::Stop),
    };

    let chunk = |delta: ChatDelta, finish_reason: Option<FinishReason>| ChatCompletionChunk {
        id: id.clone(),
        object: ChatCompletionChunkObject::ChatCompletionChunk,
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };

    let mut chunks = vec![chunk(
        ChatDelta {
            role: Some(agyproxy_protocol::openai::AssistantRole::Assistant),
            content: None,
        },
        None,
    )];
    for segment in segment_text(&text, DEFAULT_SEGMENT_BYTES) {
        chunks.push(chunk(
            ChatDelta {
                role: None,
                content: Some(segment),
            },
            None,
        ));
    }
    chunks.push(chunk(ChatDelta::default(), Some(finish)));
    chunks
}
