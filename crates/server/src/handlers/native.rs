//! 原生接口
//!
//! - `POST /v1beta/models/{model}:generateContent`
//! - `POST /v1beta/models/{model}:streamGenerateContent`
//! - `GET /v1beta/models`

use super::{cache_mode_from_headers, KeyQuery};
use crate::auth::authenticate;
use crate::response::{
    dispatch_error_response, gateway_error_response, invalid_request_response,
    not_found_response, sse_data, sse_response, with_dispatch_headers,
};
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use poolcast_core::models::gemini::GenerateContentRequest;
use poolcast_processor::RequestContext;
use poolcast_providers::converter::convert_native_request;
use std::net::SocketAddr;

/// 原生接口的方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeMethod {
    GenerateContent,
    StreamGenerateContent,
}

/// 解析 `{model}:{method}` 路径段
pub fn parse_model_action(action: &str) -> Option<(&str, NativeMethod)> {
    let (model, method) = action.rsplit_once(':')?;
    if model.is_empty() {
        return None;
    }
    let method = match method {
        "generateContent" => NativeMethod::GenerateContent,
        "streamGenerateContent" => NativeMethod::StreamGenerateContent,
        _ => return None,
    };
    Some((model, method))
}

/// generateContent / streamGenerateContent
pub async fn generate_content(
    State(state): State<AppState>,
    Path(action): Path<String>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<KeyQuery>,
    headers: HeaderMap,
    Json(request): Json<GenerateContentRequest>,
) -> Response {
    let Some((model, method)) = parse_model_action(&action) else {
        return not_found_response(format!("不支持的接口: {action}"));
    };

    let caller = match authenticate(
        &state,
        &headers,
        query.key.as_deref(),
        peer.map(|ConnectInfo(addr)| addr),
    ) {
        Ok(caller) => caller,
        Err(e) => return gateway_error_response(e),
    };

    let stream = method == NativeMethod::StreamGenerateContent;
    let normalized = match convert_native_request(
        model,
        &request,
        caller,
        stream,
        cache_mode_from_headers(&headers),
    ) {
        Ok(normalized) => normalized,
        Err(e) => return invalid_request_response(e.to_string()),
    };

    let mut ctx = RequestContext::new(&normalized);
    let result = state
        .dispatcher
        .dispatch(&mut ctx, normalized, state.shutdown.child_token())
        .await;

    let dispatched = match result {
        Ok(dispatched) => dispatched,
        Err(e) => return dispatch_error_response(&e, &ctx.request_id),
    };

    // 流式结果作为单个事件返回，流结束即表示完成
    let response = if stream {
        sse_response(vec![sse_data(dispatched.payload.as_ref())])
    } else {
        Json(dispatched.payload.as_ref().clone()).into_response()
    };
    with_dispatch_headers(response, &dispatched)
}

/// 原生格式的模型列表
pub async fn list_native_models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .dispatcher
        .resolver()
        .available_models()
        .into_iter()
        .map(|m| {
            let base = m.actual_model.unwrap_or_else(|| m.id.clone());
            serde_json::json!({
                "name": format!("models/{}", m.id),
                "displayName": m.id,
                "baseModelId": base,
                "outputTokenLimit": m.max_output_tokens,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            })
        })
        .collect();

    Json(serde_json::json!({ "models": models }))
}
