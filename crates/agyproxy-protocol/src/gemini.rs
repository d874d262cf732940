//! Upstream Cloud Code internal generate-content contract.
//!
//! The v1internal surface wraps the standard Gemini request in an envelope
//! carrying the model name and project id, and wraps responses (sometimes
//! twice) in a `response` field.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model")]
    Model,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub response: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ContentRole>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

impl GenerationConfig {
    pub fn is_empty(&self) -> bool {
        *self == GenerationConfig::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentBody {
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// v1internal request envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalRequest {
    pub model: String,
    pub project: String,
    pub request: GenerateContentBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishReason {
    #[serde(rename = "FINISH_REASON_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "MAX_TOKENS")]
    MaxTokens,
    #[serde(rename = "SAFETY")]
    Safety,
    #[serde(rename = "RECITATION")]
    Recitation,
    #[serde(rename = "BLOCKLIST")]
    Blocklist,
    #[serde(rename = "PROHIBITED_CONTENT")]
    ProhibitedContent,
    #[serde(rename = "SPII")]
    Spii,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates_token_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_token_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// Strip the v1internal `response` envelope. The sandbox endpoint is known
/// to double-wrap.
pub fn unwrap_internal(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut map) => match map.remove("response") {
            Some(JsonValue::Object(mut inner)) => match inner.remove("response") {
                Some(nested) => nested,
                None => JsonValue::Object(inner),
            },
            Some(inner) => inner,
            None => JsonValue::Object(map),
        },
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub models: Vec<ModelQuota>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelQuota {
    pub model: String,
    /// Remaining fraction of the rolling quota window, 0.0..=1.0.
    pub remaining: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

/// `fetchAvailableModels` replies either with a `models` object keyed by id
/// or a `models` array; both shapes occur in the wild.
pub fn parse_available_models(payload: &JsonValue) -> Vec<ModelDescriptor> {
    let mut out = Vec::new();
    if let Some(models) = payload.get("models").and_then(|v| v.as_object()) {
        for (id, meta) in models {
            out.push(ModelDescriptor {
                name: id.clone(),
                display_name: meta
                    .get("displayName")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string()),
            });
        }
    } else if let Some(models) = payload.get("models").and_then(|v| v.as_array()) {
        for item in models {
            let id = item
                .get("id")
                .and_then(|v| v.as_str())
                .or_else(|| item.get("name").and_then(|v| v.as_str()))
                .or_else(|| item.as_str());
            if let Some(id) = id {
                out.push(ModelDescriptor {
                    name: id.strip_prefix("models/").unwrap_or(id).to_string(),
                    display_name: item
                        .get("displayName")
                        .and_then(|v| v.as_str())
                        .map(|v| v.to_string()),
                });
            }
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out.dedup_by(|a, b| a.name == b.name);
    out
}

pub fn parse_quota(payload: &JsonValue) -> QuotaInfo {
    let mut models = Vec::new();
    if let Some(map) = payload.get("models").and_then(|v| v.as_object()) {
        for (id, meta) in map {
            let Some(quota) = meta.get("quotaInfo") else {
                continue;
            };
            models.push(ModelQuota {
                model: id.clone(),
                remaining: quota
                    .get("remainingFraction")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0),
                reset_time: quota
                    .get("resetTime")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string()),
            });
        }
    }
    models.sort_by(|a, b| a.model.cmp(&b.model));
    QuotaInfo { models }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrap_handles_plain_and_double_wrapped() {
        let plain = serde_json::json!({"candidates": []});
        assert_eq!(unwrap_internal(plain.clone()), plain);

        let wrapped = serde_json::json!({"response": {"candidates": []}});
        assert_eq!(unwrap_internal(wrapped), serde_json::json!({"candidates": []}));

        let double = serde_json::json!({"response": {"response": {"candidates": []}}});
        assert_eq!(unwrap_internal(double), serde_json::json!({"candidates": []}));
    }

    #[test]
    fn finish_reason_tolerates_unknown_values() {
        let reason: FinishReason = serde_json::from_str("\"MALFORMED_FUNCTION_CALL\"").unwrap();
        assert_eq!(reason, FinishReason::Other);
        let stop: FinishReason = serde_json::from_str("\"STOP\"").unwrap();
        assert_eq!(stop, FinishReason::Stop);
    }

    #[test]
    fn available_models_parses_both_shapes() {
        let object_shape = serde_json::json!({
            "models": {
                "gemini-2.5-flash": {"displayName": "Flash"},
                "gemini-3-pro-preview": {}
            }
        });
        let models = parse_available_models(&object_shape);
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "gemini-2.5-flash");

        let array_shape = serde_json::json!({
            "models": [
                {"name": "models/gemini-2.5-flash"},
                "gemini-2.5-flash"
            ]
        });
        let models = parse_available_models(&array_shape);
        assert_eq!(models.len(), 1);
    }

    #[test]
    fn quota_reads_remaining_fraction() {
        let payload = serde_json::json!({
            "models": {
                "gemini-2.5-flash": {
                    "quotaInfo": {"remainingFraction": 0.42, "resetTime": "2026-08-27T00:00:00Z"}
                },
                "no-quota-model": {}
            }
        });
        let quota = parse_quota(&payload);
        assert_eq!(quota.models.len(), 1);
        assert!((quota.models[0].remaining - 0.42).abs() < 1e-9);
    }
}
