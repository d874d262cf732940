//! Chat-completions request into the upstream generate-content body.

use agyproxy_protocol::gemini::{
    Blob, Content, ContentRole, FunctionCall, FunctionResponse, GenerateContentBody,
    GenerationConfig, InternalRequest, Part,
};
use agyproxy_protocol::openai::{
    ChatCompletionRequest, ChatMessage, ChatRole, ContentPart, MessageContent,
};
use serde_json::Value as JsonValue;

/// The upstream validates thought signatures on replayed function calls;
/// this sentinel tells it to skip that check for calls we reconstruct.
const SKIP_THOUGHT_SIGNATURE: &str = "skip_thought_signature_validator";

/// Convert a chat-completions request into a generate-content body.
///
/// System and developer messages are merged, in order, into a single
/// `systemInstruction`. Tool-result messages become user-role
/// `functionResponse` parts and assistant `tool_calls` become
/// `functionCall` parts, so multi-turn tool use round-trips. An empty
/// conversation still needs one user turn or the upstream rejects the call.
pub fn to_generate_content(request: &ChatCompletionRequest) -> GenerateContentBody {
    let mut system_texts = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                let text = flattened(message);
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            ChatRole::User => {
                let parts = content_parts(message);
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some(ContentRole::User),
                        parts,
                    });
                }
            }
            ChatRole::Assistant => {
                let mut parts = content_parts(message);
                for call in message.tool_calls.iter().flatten() {
                    // Arguments arrive JSON-encoded; a call whose arguments
                    // do not parse cannot be replayed and is skipped.
                    let Ok(args) = serde_json::from_str::<JsonValue>(&call.function.arguments)
                    else {
                        continue;
                    };
                    parts.push(Part {
                        function_call: Some(FunctionCall {
                            id: Some(call.id.clone()),
                            name: call.function.name.clone(),
                            args,
                        }),
                        thought_signature: Some(SKIP_THOUGHT_SIGNATURE.to_string()),
                        ..Part::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some(ContentRole::Model),
                        parts,
                    });
                }
            }
            ChatRole::Tool => contents.push(Content {
                role: Some(ContentRole::User),
                parts: vec![tool_result_part(message)],
            }),
        }
    }

    if contents.is_empty() {
        contents.push(Content {
            role: Some(ContentRole::User),
            parts: vec![Part::text(" ")],
        });
    }

    let system_instruction = if system_texts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: vec![Part::text(system_texts.join("\n"))],
        })
    };

    let generation_config = map_generation_config(request);

    GenerateContentBody {
        contents,
        system_instruction,
        generation_config,
    }
}

/// Wrap a generate-content body in the v1internal envelope.
pub fn to_internal_request(
    model: &str,
    project: &str,
    body: GenerateContentBody,
) -> InternalRequest {
    let model_id = model.strip_prefix("models/").unwrap_or(model);
    InternalRequest {
        model: model_id.to_string(),
        project: project.to_string(),
        request: body,
    }
}

fn flattened(message: &ChatMessage) -> String {
    message
        .content
        .as_ref()
        .map(|content| content.flatten())
        .unwrap_or_default()
}

/// Map message content to parts. Bare strings stay a single text part;
/// typed part lists keep text and base64 image data, and drop remote URLs
/// the upstream cannot fetch.
fn content_parts(message: &ChatMessage) -> Vec<Part> {
    match &message.content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![Part::text(text.clone())],
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(Part::text(text.clone())),
                ContentPart::ImageUrl { image_url } => inline_data_part(&image_url.url),
                ContentPart::Other => None,
            })
            .collect(),
    }
}

/// `data:<mime>;base64,<payload>` becomes inline data; anything else has no
/// upstream equivalent.
fn inline_data_part(url: &str) -> Option<Part> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    Some(Part {
        inline_data: Some(Blob {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        }),
        ..Part::default()
    })
}

/// A tool-result message carries the function output, JSON when it parses
/// and wrapped as `{"result": <raw>}` when it does not.
fn tool_result_part(message: &ChatMessage) -> Part {
    let raw = flattened(message);
    let response = serde_json::from_str::<JsonValue>(&raw)
        .ok()
        .filter(JsonValue::is_object)
        .unwrap_or_else(|| serde_json::json!({ "result": raw }));
    Part {
        function_response: Some(FunctionResponse {
            id: message.tool_call_id.clone(),
            name: message
                .name
                .clone()
                .unwrap_or_else(|| "unknown_function".to_string()),
            response,
        }),
        ..Part::default()
    }
}

fn map_generation_config(request: &ChatCompletionRequest) -> Option<GenerationConfig> {
    // max_completion_tokens supersedes the deprecated max_tokens.
    let max_output_tokens = request.max_completion_tokens.or(request.max_tokens);
    let config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens,
        stop_sequences: request.stop.clone().map(|stop| stop.into_vec()),
        candidate_count: request.n,
        seed: request.seed,
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        response_mime_type: request
            .response_format
            .as_ref()
            .and_then(|format| match format.kind.as_str() {
                "json_object" => Some("application/json".to_string()),
                "text" => Some("text/plain".to_string()),
                _ => None,
            }),
    };
    if config.is_empty() { None } else { Some(config) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agyproxy_protocol::openai::{
        FunctionCallSpec, ImageUrl, ResponseFormat, StopConfiguration, ToolCall, ToolCallKind,
    };

    fn request_with(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        serde_json::from_value(serde_json::json!({
            "model": "gemini-2.5-flash",
            "messages": serde_json::to_value(&messages).unwrap(),
        }))
        .unwrap()
    }

    fn msg(role: ChatRole, text: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: Some(MessageContent::Text(text.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            kind: ToolCallKind::Function,
            function: FunctionCallSpec {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[test]
    fn system_messages_merge_into_instruction() {
        let body = to_generate_content(&request_with(vec![
            msg(ChatRole::System, "be brief"),
            msg(ChatRole::Developer, "answer in french"),
            msg(ChatRole::User, "hello"),
        ]));
        let instruction = body.system_instruction.unwrap();
        assert_eq!(
            instruction.parts[0].text.as_deref(),
            Some("be brief\nanswer in french")
        );
        assert_eq!(body.contents.len(), 1);
        assert_eq!(body.contents[0].role, Some(ContentRole::User));
    }

    #[test]
    fn assistant_maps_to_model_role() {
        let body = to_generate_content(&request_with(vec![
            msg(ChatRole::User, "q"),
            msg(ChatRole::Assistant, "a"),
            msg(ChatRole::User, "q2"),
        ]));
        let roles: Vec<_> = body.contents.iter().map(|c| c.role).collect();
        assert_eq!(
            roles,
            vec![
                Some(ContentRole::User),
                Some(ContentRole::Model),
                Some(ContentRole::User)
            ]
        );
    }

    #[test]
    fn system_only_conversation_gets_placeholder_user_turn() {
        let body = to_generate_content(&request_with(vec![msg(ChatRole::System, "rules")]));
        assert_eq!(body.contents.len(), 1);
        assert_eq!(body.contents[0].role, Some(ContentRole::User));
    }

    #[test]
    fn assistant_tool_calls_become_function_call_parts() {
        let mut assistant = msg(ChatRole::Assistant, "");
        assistant.content = None;
        assistant.tool_calls = Some(vec![
            tool_call("call_1", "get_weather", r#"{"city":"Oslo"}"#),
            tool_call("call_2", "broken", "not json"),
        ]);
        let body = to_generate_content(&request_with(vec![msg(ChatRole::User, "q"), assistant]));
        assert_eq!(body.contents.len(), 2);
        let parts = &body.contents[1].parts;
        assert_eq!(parts.len(), 1);
        let call = parts[0].function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.args["city"], "Oslo");
        assert!(parts[0].thought_signature.is_some());
    }

    #[test]
    fn tool_result_becomes_user_function_response() {
        let mut result = msg(ChatRole::Tool, r#"{"temp": -3}"#);
        result.tool_call_id = Some("call_1".to_string());
        result.name = Some("get_weather".to_string());
        let body = to_generate_content(&request_with(vec![msg(ChatRole::User, "q"), result]));
        let content = &body.contents[1];
        assert_eq!(content.role, Some(ContentRole::User));
        let response = content.parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "get_weather");
        assert_eq!(response.id.as_deref(), Some("call_1"));
        assert_eq!(response.response["temp"], -3);
    }

    #[test]
    fn non_json_tool_output_wraps_in_result() {
        let result = msg(ChatRole::Tool, "plain text output");
        let body = to_generate_content(&request_with(vec![result]));
        let response = body.contents[0].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "unknown_function");
        assert_eq!(response.response["result"], "plain text output");
    }

    #[test]
    fn data_uri_images_become_inline_data() {
        let message = ChatMessage {
            role: ChatRole::User,
            content: Some(MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "what is this".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,aGVsbG8=".to_string(),
                    },
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "https://example.com/cat.png".to_string(),
                    },
                },
            ])),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let body = to_generate_content(&request_with(vec![message]));
        let parts = &body.contents[0].parts;
        assert_eq!(parts.len(), 2);
        let blob = parts[1].inline_data.as_ref().unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(blob.data, "aGVsbG8=");
    }

    #[test]
    fn response_format_maps_to_mime_type() {
        let mut request = request_with(vec![msg(ChatRole::User, "x")]);
        request.response_format = Some(ResponseFormat {
            kind: "json_object".to_string(),
        });
        let config = to_generate_content(&request).generation_config.unwrap();
        assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn generation_config_prefers_max_completion_tokens() {
        let mut request = request_with(vec![msg(ChatRole::User, "x")]);
        request.max_tokens = Some(10);
        request.max_completion_tokens = Some(20);
        request.stop = Some(StopConfiguration::Single("END".into()));
        let config = to_generate_content(&request).generation_config.unwrap();
        assert_eq!(config.max_output_tokens, Some(20));
        assert_eq!(config.stop_sequences, Some(vec!["END".to_string()]));
    }

    #[test]
    fn no_sampling_knobs_means_no_config() {
        let body = to_generate_content(&request_with(vec![msg(ChatRole::User, "x")]));
        assert!(body.generation_config.is_none());
    }

    #[test]
    fn envelope_strips_models_prefix() {
        let body = to_generate_content(&request_with(vec![msg(ChatRole::User, "x")]));
        let internal = to_internal_request("models/gemini-2.5-flash", "proj-1", body);
        assert_eq!(internal.model, "gemini-2.5-flash");
        assert_eq!(internal.project, "proj-1");
    }
}
