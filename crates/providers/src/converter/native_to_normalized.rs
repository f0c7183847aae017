//! 原生 generateContent 请求 -> 归一化请求

use super::ConvertError;
use poolcast_core::models::gemini::{GeminiPart, GenerateContentRequest};
use poolcast_core::models::{
    CacheMode, CallerIdentity, Dialect, Message, NormalizedRequest, Part, Role, SamplingParams,
};

fn convert_part(part: &GeminiPart) -> Option<Part> {
    if let Some(blob) = &part.inline_data {
        return Some(Part::InlineData {
            mime_type: blob.mime_type.clone(),
            data: blob.data.clone(),
        });
    }
    part.text.as_ref().map(|text| Part::text(text.clone()))
}

/// 转换原生请求
///
/// 未指定角色的内容视为 user。
pub fn convert_native_request(
    model: &str,
    request: &GenerateContentRequest,
    caller: CallerIdentity,
    stream: bool,
    cache_mode: CacheMode,
) -> Result<NormalizedRequest, ConvertError> {
    let mut messages = Vec::with_capacity(request.contents.len());
    for content in &request.contents {
        let role = match content.role.as_deref() {
            None | Some("") => Role::User,
            Some(role) => {
                Role::parse(role).ok_or_else(|| ConvertError::InvalidRole(role.to_string()))?
            }
        };
        let parts: Vec<Part> = content.parts.iter().filter_map(convert_part).collect();
        if !parts.is_empty() {
            messages.push(Message::new(role, parts));
        }
    }

    let sampling = request
        .generation_config
        .as_ref()
        .map(|config| SamplingParams {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
            stop_sequences: config.stop_sequences.clone(),
            candidate_count: config.candidate_count,
            seed: config.seed,
            response_mime_type: config.response_mime_type.clone(),
        })
        .unwrap_or_default();

    let system_parts = request
        .system_instruction
        .iter()
        .flat_map(|system| system.parts.iter())
        .filter_map(|p| p.text.as_deref());

    Ok(
        NormalizedRequest::new(model, messages, caller, Dialect::Native)
            .with_sampling(sampling)
            .with_stream(stream)
            .with_cache_mode(cache_mode)
            .with_system_parts(system_parts),
    )
}
