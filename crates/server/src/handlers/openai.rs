//! OpenAI 兼容接口
//!
//! - `POST /v1/chat/completions`
//! - `GET /v1/models`

use super::{cache_mode_from_headers, KeyQuery};
use crate::auth::authenticate;
use crate::response::{
    dispatch_error_response, gateway_error_response, invalid_request_response, sse_data,
    sse_response, with_dispatch_headers,
};
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use poolcast_core::models::openai::{ChatCompletionRequest, ModelList, ModelObject};
use poolcast_processor::RequestContext;
use poolcast_providers::converter::{convert_openai_request, to_openai_chunks, to_openai_response};
use std::net::SocketAddr;

/// Chat Completions
pub async fn chat_completions(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Query(query): Query<KeyQuery>,
    headers: HeaderMap,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let caller = match authenticate(
        &state,
        &headers,
        query.key.as_deref(),
        peer.map(|ConnectInfo(addr)| addr),
    ) {
        Ok(caller) => caller,
        Err(e) => return gateway_error_response(e),
    };

    let cache_mode = cache_mode_from_headers(&headers);
    let normalized = match convert_openai_request(&request, caller, cache_mode) {
        Ok(normalized) => normalized,
        Err(e) => return invalid_request_response(e.to_string()),
    };
    let stream = normalized.stream;

    let mut ctx = RequestContext::new(&normalized);
    let result = state
        .dispatcher
        .dispatch(&mut ctx, normalized, state.shutdown.child_token())
        .await;

    let dispatched = match result {
        Ok(dispatched) => dispatched,
        Err(e) => return dispatch_error_response(&e, &ctx.request_id),
    };

    let response = if stream {
        let mut events: Vec<String> =
            to_openai_chunks(&dispatched.model, &dispatched.payload, &dispatched.request_id)
                .iter()
                .map(sse_data)
                .collect();
        events.push("data: [DONE]\n\n".to_string());
        sse_response(events)
    } else {
        Json(to_openai_response(
            &dispatched.model,
            &dispatched.payload,
            &dispatched.request_id,
        ))
        .into_response()
    };
    with_dispatch_headers(response, &dispatched)
}

/// 模型列表（含别名）
pub async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let data = state
        .dispatcher
        .resolver()
        .available_models()
        .into_iter()
        .map(|m| ModelObject {
            id: m.id,
            object: "model".to_string(),
            owned_by: "google".to_string(),
        })
        .collect();

    Json(ModelList {
        object: "list".to_string(),
        data,
    })
}
