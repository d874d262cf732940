//! Generate-content response into a chat-completions response.

use agyproxy_protocol::gemini::{Candidate, GenerateContentResponse};
use agyproxy_protocol::openai::{
    AssistantMessage, AssistantRole, ChatChoice, ChatCompletionObject, ChatCompletionResponse,
    FinishReason, FunctionCallSpec, ToolCall, ToolCallKind, Usage,
};

use crate::{completion_id, map_finish_reason, unix_now};

/// Convert a non-stream upstream response. Thought parts are internal
/// reasoning and never surface to the client; `functionCall` parts come back
/// as `tool_calls`.
pub fn to_chat_completion(model: &str, response: &GenerateContentResponse) -> ChatCompletionResponse {
    let choices = response
        .candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            let text = candidate_text(candidate);
            let tool_calls = candidate_tool_calls(candidate);
            let finish_reason = if tool_calls.is_some() {
                FinishReason::ToolCalls
            } else {
                candidate
                    .finish_reason
                    .map(map_finish_reason)
                    .unwrap_or(FinishReason::Stop)
            };
            ChatChoice {
                index: index as i64,
                message: AssistantMessage {
                    role: AssistantRole::Assistant,
                    // A pure tool-call turn has no text; clients expect
                    // null content there, not an empty string.
                    content: if text.is_empty() && tool_calls.is_some() {
                        None
                    } else {
                        Some(text)
                    },
                    tool_calls,
                },
                finish_reason,
            }
        })
        .collect();

    ChatCompletionResponse {
        id: completion_id(),
        object: ChatCompletionObject::ChatCompletion,
        created: unix_now(),
        model: model.to_string(),
        choices,
        usage: response.usage_metadata.map(|usage| Usage {
            prompt_tokens: usage.prompt_token_count.unwrap_or(0) as i64,
            completion_tokens: usage.candidates_token_count.unwrap_or(0) as i64,
            total_tokens: usage.total_token_count.unwrap_or(0) as i64,
        }),
    }
}

pub fn candidate_text(candidate: &Candidate) -> String {
    let Some(content) = &candidate.content else {
        return String::new();
    };
    content
        .parts
        .iter()
        .filter(|part| !part.thought.unwrap_or(false))
        .filter_map(|part| part.text.as_deref())
        .collect()
}

fn candidate_tool_calls(candidate: &Candidate) -> Option<Vec<ToolCall>> {
    let content = candidate.content.as_ref()?;
    let calls: Vec<ToolCall> = content
        .parts
        .iter()
        .filter_map(|part| part.function_call.as_ref())
        .enumerate()
        .map(|(i, call)| ToolCall {
            id: call.id.clone().unwrap_or_else(|| format!("call_{i}")),
            kind: ToolCallKind::Function,
            function: FunctionCallSpec {
                name: call.name.clone(),
                arguments: call.args.to_string(),
            },
        })
        .collect();
    if calls.is_empty() { None } else { Some(calls) }
}
