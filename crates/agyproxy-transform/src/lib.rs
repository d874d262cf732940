//! Pure translation between the exposed chat-completions surface and the
//! upstream generate-content contract, plus synthetic-stream chunking.

pub mod fake;
pub mod request;
pub mod response;
pub mod stream;

use agyproxy_protocol::openai::FinishReason as OpenAiFinishReason;

use agyproxy_protocol::gemini::FinishReason as GeminiFinishReason;

/// Stream identifiers follow the OpenAI convention.
pub(crate) fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn map_finish_reason(reason: GeminiFinishReason) -> OpenAiFinishReason {
    match reason {
        GeminiFinishReason::Stop | GeminiFinishReason::Unspecified | GeminiFinishReason::Other => {
            OpenAiFinishReason::Stop
        }
        GeminiFinishReason::MaxTokens => OpenAiFinishReason::Length,
        GeminiFinishReason::Safety
        | GeminiFinishReason::Recitation
        | GeminiFinishReason::Blocklist
        | GeminiFinishReason::ProhibitedContent
        | GeminiFinishReason::Spii => OpenAiFinishReason::ContentFilter,
    }
}
