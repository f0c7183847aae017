//! OpenAI Chat Completions 请求 -> 归一化请求

use super::ConvertError;
use poolcast_core::models::openai::{ChatCompletionRequest, ContentPart, MessageContent};
use poolcast_core::models::{
    CacheMode, CallerIdentity, Dialect, Message, NormalizedRequest, Part, Role, SamplingParams,
};

/// 解析 `data:<mime>;base64,<data>` 形式的图片 URL
fn parse_data_url(url: &str) -> Option<Part> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    Some(Part::InlineData {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

fn convert_content(content: &MessageContent) -> Result<Vec<Part>, ConvertError> {
    match content {
        MessageContent::Text(text) => Ok(vec![Part::text(text.clone())]),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Ok(Part::text(text.clone())),
                ContentPart::ImageUrl { image_url } => parse_data_url(&image_url.url)
                    .ok_or_else(|| {
                        ConvertError::UnsupportedContent(
                            "只支持 base64 data URL 形式的图片".to_string(),
                        )
                    }),
            })
            .collect(),
    }
}

/// 转换 OpenAI 请求
///
/// system 消息合并为系统指令，assistant 映射为 model 角色。
pub fn convert_openai_request(
    request: &ChatCompletionRequest,
    caller: CallerIdentity,
    cache_mode: CacheMode,
) -> Result<NormalizedRequest, ConvertError> {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for msg in &request.messages {
        let Some(content) = &msg.content else {
            continue;
        };

        if msg.role.eq_ignore_ascii_case("system") || msg.role.eq_ignore_ascii_case("developer") {
            system_parts.push(content.text());
            continue;
        }

        let role =
            Role::parse(&msg.role).ok_or_else(|| ConvertError::InvalidRole(msg.role.clone()))?;
        let parts = convert_content(content)?;
        if parts.is_empty() {
            continue;
        }
        messages.push(Message::new(role, parts));
    }

    let sampling = SamplingParams {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
        stop_sequences: request
            .stop
            .clone()
            .map(|s| s.into_vec())
            .unwrap_or_default(),
        candidate_count: request.n,
        seed: request.seed,
        response_mime_type: None,
    };

    Ok(NormalizedRequest::new(
        request.model.clone(),
        messages,
        caller,
        Dialect::OpenAI,
    )
    .with_sampling(sampling)
    .with_stream(request.stream)
    .with_cache_mode(cache_mode)
    .with_system_parts(system_parts.iter().map(String::as_str)))
}
