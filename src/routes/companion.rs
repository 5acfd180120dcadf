// ============================================================================
// Companion Routes
// ============================================================================
//
// Endpoints (mounted under /api/ai):
// - POST /message - Reply to a user message as the companion bot
// - GET  /bot     - Public projection of the companion account
// - GET  /test    - Produce a test reply and report its source
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::companion::{HistoryTurn, ReplySource};
use crate::context::AppContext;
use crate::db::Message;
use crate::error::AppError;
use crate::routes::extractors::AuthenticatedAccount;

const TEST_MESSAGE: &str = "Hello, this is a test message.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionMessageRequest {
    pub recipient_id: Uuid,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryTurn>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanionMessageResponse {
    #[serde(flatten)]
    pub message: Message,
    pub source: ReplySource,
}

/// POST /message
///
/// Only the recipient may ask the bot to answer on their behalf.
pub async fn send_message(
    State(ctx): State<Arc<AppContext>>,
    account: AuthenticatedAccount,
    Json(request): Json<CompanionMessageRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.recipient_id != account.0 {
        return Err(AppError::Unauthorized(
            "Cannot request replies for another account".to_string(),
        ));
    }
    if request.message.trim().is_empty() {
        return Err(AppError::validation("Message is required"));
    }

    let (message, source) = ctx
        .companion
        .respond_to(
            request.recipient_id,
            &request.message,
            &request.conversation_history,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CompanionMessageResponse { message, source }),
    ))
}

/// GET /bot
pub async fn bot(State(ctx): State<Arc<AppContext>>) -> Result<impl IntoResponse, AppError> {
    let bot = ctx.companion.ensure_bot().await?;
    Ok((StatusCode::OK, Json(bot.to_view())))
}

/// GET /test
pub async fn test_reply(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let reply = ctx.companion.reply(TEST_MESSAGE, &[]).await;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "testMessage": TEST_MESSAGE,
            "aiResponse": reply.text,
            "source": reply.source,
            "usingGemini": ctx.companion.has_generative_backend(),
        })),
    )
}
