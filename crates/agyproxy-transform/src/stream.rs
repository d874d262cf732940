//! Stateful translation of upstream stream events into chat-completion
//! chunks.

use agyproxy_protocol::gemini::GenerateContentResponse;
use agyproxy_protocol::openai::{
    ChatCompletionChunk, ChatCompletionChunkObject, ChatDelta, ChunkChoice, FinishReason,
};

use crate::response::candidate_text;
use crate::{completion_id, map_finish_reason, unix_now};

/// Translates one upstream stream into chunks sharing a single completion
/// id. The first emitted chunk carries the assistant role; at most one
/// chunk comes out per upstream event.
#[derive(Debug)]
pub struct StreamTranslator {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    finished: bool,
}

impl StreamTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: completion_id(),
            model: model.into(),
            created: unix_now(),
            role_sent: false,
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Map one upstream event. Events with neither text nor a finish reason
    /// produce nothing.
    pub fn translate(&mut self, event: &GenerateContentResponse) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }
        let Some(candidate) = event.candidates.first() else {
            return None;
        };

        let text = candidate_text(candidate);
        let finish = candidate.finish_reason.map(map_finish_reason);
        if text.is_empty() && finish.is_none() {
            return None;
        }
        if finish.is_some() {
            self.finished = true;
        }

        Some(self.chunk(
            if text.is_empty() { None } else { Some(text) },
            finish,
        ))
    }

    /// Terminal chunk for a stream that ended without an explicit finish
    /// reason.
    pub fn close(&mut self) -> Option<ChatCompletionChunk> {
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(self.chunk(None, Some(FinishReason::Stop)))
    }

    fn chunk(
        &mut self,
        content: Option<String>,
        finish_reason: Option<FinishReason>,
    ) -> ChatCompletionChunk {
        let delta = ChatDelta {
            role: if self.role_sent {
                None
            } else {
                self.role_sent = true;
                Some(agyproxy_protocol::openai::AssistantRole::Assistant)
            },
            content,
        };
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChatCompletionChunkObject::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agyproxy_protocol::gemini::{
        Candidate, Content, ContentRole, FinishReason as GeminiFinishReason, Part,
    };

    fn event(text: Option<&str>, finish: Option<GeminiFinishReason>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: text.map(|t| Content {
                    role: Some(ContentRole::Model),
                    parts: vec![Part::text(t)],
                }),
                finish_reason: finish,
                index: Some(0),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn first_chunk_carries_role_later_ones_do_not() {
        let mut translator = StreamTranslator::new("m");
        let first = translator.translate(&event(Some("a"), None)).unwrap();
        assert!(first.choices[0].delta.role.is_some());
        let second = translator.translate(&event(Some("b"), None)).unwrap();
        assert!(second.choices[0].delta.role.is_none());
        assert_eq!(first.id, second.id);
        assert_eq!(first.created, second.created);
    }

    #[test]
    fn empty_event_produces_no_chunk() {
        let mut translator = StreamTranslator::new("m");
        assert!(translator.translate(&event(None, None)).is_none());
        assert!(
            translator
                .translate(&GenerateContentResponse::default())
                .is_none()
        );
    }

    #[test]
    fn finish_reason_terminates_the_stream() {
        let mut translator = StreamTranslator::new("m");
        let last = translator
            .translate(&event(Some("tail"), Some(GeminiFinishReason::Stop)))
            .unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(FinishReason::Stop));
        assert!(translator.translate(&event(Some("late"), None)).is_none());
        assert!(translator.close().is_none());
    }

    #[test]
    fn close_synthesizes_stop_when_upstream_never_finished() {
        let mut translator = StreamTranslator::new("m");
        translator.translate(&event(Some("a"), None)).unwrap();
        let last = translator.close().unwrap();
        assert_eq!(last.choices[0].finish_reason, Some(FinishReason::Stop));
        assert!(last.choices[0].delta.content.is_none());
    }
}
