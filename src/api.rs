use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::error::{AgentError, AgentResult};
use crate::proto::{registry, MessageType};
use crate::roles;
use crate::state::AppContext;

/// Build the route table once, after role resolution. Message types the
/// role does not offer are simply absent from the surface; hitting them
/// gets the framework's plain unknown-route response.
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    let role = ctx.role;

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/api/v0/did", get(did))
        .route("/api/v0/txn/:seq_no", get(txn))
        .route("/api/v0/protocol", get(protocol_doc));

    for msg_type in MessageType::ALL {
        if roles::offers(role, msg_type) {
            router = router.route(
                &format!("/api/v0/{}", msg_type.slug()),
                post(move |state: State<Arc<AppContext>>, body: String| {
                    process_post(state, msg_type, body)
                }),
            );
        }
    }

    router.with_state(ctx)
}

// ============ Read Endpoints ============

async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let agent = ctx.agent.lock().await;
    Json(json!({
        "status": "healthy",
        "profile": ctx.config.profile,
        "role": ctx.role.as_str(),
        "did": agent.did(),
        "uptime_seconds": ctx.start_time.elapsed().as_secs(),
    }))
}

/// The agent's DID, as a JSON string.
async fn did(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let agent = ctx.agent.lock().await;
    Json(agent.process_get_did())
}

/// Ledger transaction by sequence number; an unknown number is a valid
/// empty result, not an error.
async fn txn(
    State(ctx): State<Arc<AppContext>>,
    Path(seq_no): Path<u64>,
) -> Result<Json<Value>, AgentError> {
    let agent = ctx.agent.lock().await;
    Ok(Json(agent.process_get_txn(seq_no).await?))
}

/// Expected message shapes for every type this role offers, with the
/// forwarding-DID requirement computed for this role.
async fn protocol_doc(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let reg = registry();
    let models: serde_json::Map<String, Value> = MessageType::ALL
        .into_iter()
        .filter(|mt| roles::offers(ctx.role, *mt))
        .map(|mt| (mt.slug().to_string(), reg.model(ctx.role, mt)))
        .collect();
    Json(Value::Object(models))
}

// ============ Message Processing ============

async fn process_post(
    State(ctx): State<Arc<AppContext>>,
    msg_type: MessageType,
    body: String,
) -> Response {
    match handle_post(&ctx, body).await {
        Ok(value) => Json(value).into_response(),
        Err(e) => {
            tracing::warn!(%msg_type, code = e.error_code(), error = %e, "request failed");
            e.into_response()
        }
    }
}

async fn handle_post(ctx: &AppContext, body: String) -> AgentResult<Value> {
    let msg: Value = serde_json::from_str(&body)
        .map_err(|e| AgentError::bad_request(format!("request body is not JSON: {e}")))?;

    // the message's own type field drives dispatch; the route slug only
    // decides whether the operation is reachable at all
    let mut agent = ctx.agent.lock().await;
    agent.process_post(&msg).await
}
