//! 归一化请求 -> generateContent 请求体

use poolcast_core::models::gemini::{
    GeminiBlob, GeminiContent, GeminiPart, GenerateContentRequest, GenerationConfig,
};
use poolcast_core::models::{NormalizedRequest, Part, Role, SamplingParams};

fn convert_part(part: &Part) -> GeminiPart {
    match part {
        Part::Text { text } => GeminiPart::text(text.clone()),
        Part::InlineData { mime_type, data } => GeminiPart {
            text: None,
            inline_data: Some(GeminiBlob {
                mime_type: mime_type.clone(),
                data: data.clone(),
            }),
        },
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Model => "model",
    }
}

fn generation_config(sampling: &SamplingParams) -> Option<GenerationConfig> {
    if sampling == &SamplingParams::default() {
        return None;
    }
    Some(GenerationConfig {
        temperature: sampling.temperature,
        top_p: sampling.top_p,
        top_k: sampling.top_k,
        max_output_tokens: sampling.max_output_tokens,
        stop_sequences: sampling.stop_sequences.clone(),
        candidate_count: sampling.candidate_count,
        seed: sampling.seed,
        response_mime_type: sampling.response_mime_type.clone(),
    })
}

/// 构建上游请求体
pub fn build_generate_content_request(request: &NormalizedRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: request
            .messages
            .iter()
            .map(|msg| GeminiContent {
                role: Some(role_name(msg.role).to_string()),
                parts: msg.parts.iter().map(convert_part).collect(),
            })
            .collect(),
        system_instruction: request.system_instruction.as_ref().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(text.clone())],
        }),
        generation_config: generation_config(&request.sampling),
    }
}

#[cfg(test)]
mod build_tests {
    use super::*;
    use poolcast_core::models::{CallerIdentity, Dialect, Message};

    #[test]
    fn test_build_request() {
        let request = NormalizedRequest::new(
            "flash",
            vec![
                Message::text(Role::User, "hi"),
                Message::text(Role::Model, "hello"),
            ],
            CallerIdentity::ip("1"),
            Dialect::OpenAI,
        )
        .with_system_parts(["be brief"])
        .with_sampling(SamplingParams {
            max_output_tokens: Some(32),
            ..Default::default()
        });

        let body = build_generate_content_request(&request);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 32);
    }

    #[test]
    fn test_default_sampling_omits_config() {
        let request = NormalizedRequest::new(
            "flash",
            vec![Message::text(Role::User, "hi")],
            CallerIdentity::ip("1"),
            Dialect::Native,
        );
        let body = build_generate_content_request(&request);
        assert!(body.generation_config.is_none());
        assert!(body.system_instruction.is_none());
    }
}
