//! generateContent 响应 -> OpenAI Chat Completions 响应

use poolcast_core::models::gemini::GenerateContentResponse;
use poolcast_core::models::openai::{
    ChatCompletionChunk, ChatCompletionResponse, Choice, ChunkChoice, Delta, ResponseMessage,
    Usage,
};

/// 映射结束原因
fn finish_reason(reason: Option<&str>) -> Option<String> {
    let reason = match reason? {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "content_filter",
        _ => "stop",
    };
    Some(reason.to_string())
}

fn parse_response(payload: &serde_json::Value) -> GenerateContentResponse {
    serde_json::from_value(payload.clone()).unwrap_or_default()
}

/// 构建非流式响应
pub fn to_openai_response(
    model: &str,
    payload: &serde_json::Value,
    request_id: &str,
) -> ChatCompletionResponse {
    let response = parse_response(payload);

    let choices = if response.candidates.is_empty() {
        vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: String::new(),
            },
            finish_reason: Some("stop".to_string()),
        }]
    } else {
        response
            .candidates
            .iter()
            .enumerate()
            .map(|(i, candidate)| Choice {
                index: candidate.index.unwrap_or(i as u32),
                message: ResponseMessage {
                    role: "assistant".to_string(),
                    content: candidate
                        .content
                        .parts
                        .iter()
                        .filter_map(|p| p.text.as_deref())
                        .collect(),
                },
                finish_reason: finish_reason(candidate.finish_reason.as_deref())
                    .or_else(|| Some("stop".to_string())),
            })
            .collect()
    };

    let usage = response
        .usage_metadata
        .map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        })
        .unwrap_or_default();

    ChatCompletionResponse {
        id: format!("chatcmpl-{request_id}"),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: model.to_string(),
        choices,
        usage,
    }
}

/// 构建流式 chunk：一个携带完整内容的 chunk 加一个结束 chunk
pub fn to_openai_chunks(
    model: &str,
    payload: &serde_json::Value,
    request_id: &str,
) -> Vec<ChatCompletionChunk> {
    let response = to_openai_response(model, payload, request_id);
    let (content, reason) = response
        .choices
        .into_iter()
        .next()
        .map(|c| (c.message.content, c.finish_reason))
        .unwrap_or_default();

    let chunk = |delta: Delta, finish_reason: Option<String>| ChatCompletionChunk {
        id: response.id.clone(),
        object: "chat.completion.chunk".to_string(),
        created: response.created,
        model: response.model.clone(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };

    vec![
        chunk(
            Delta {
                role: Some("assistant".to_string()),
                content: Some(content),
            },
            None,
        ),
        chunk(Delta::default(), reason.or_else(|| Some("stop".to_string()))),
    ]
}

#[cfg(test)]
mod gemini_to_openai_tests {
    use super::*;

    fn payload() -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo"}]},
                "finishReason": "MAX_TOKENS"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        })
    }

    #[test]
    fn test_response_conversion() {
        let response = to_openai_response("gemini-2.0-flash", &payload(), "abc");
        assert_eq!(response.id, "chatcmpl-abc");
        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.choices[0].message.content, "Hello");
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(response.usage.total_tokens, 5);
    }

    #[test]
    fn test_empty_candidates() {
        let response = to_openai_response("m", &serde_json::json!({}), "abc");
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.content, "");
    }

    #[test]
    fn test_chunks() {
        let chunks = to_openai_chunks("m", &payload(), "abc");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hello"));
        assert_eq!(chunks[0].choices[0].finish_reason, None);
        assert_eq!(chunks[1].choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(chunks[1].object, "chat.completion.chunk");
    }
}
