// ============================================================================
// CAPTCHA Routes
// ============================================================================
//
// Endpoints (mounted under /api/auth):
// - GET  /captcha        - Issue a challenge image
// - POST /verify-captcha - Check an answer; consumes the challenge
//
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VerifyCaptchaRequest {
    pub session_id: String,
    pub answer: String,
}

/// GET /captcha
pub async fn issue(State(ctx): State<Arc<AppContext>>) -> Result<impl IntoResponse, AppError> {
    let challenge = ctx.captcha.issue().await?;
    Ok((StatusCode::OK, Json(challenge)))
}

/// POST /verify-captcha
pub async fn verify(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<VerifyCaptchaRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.session_id.is_empty() || request.answer.trim().is_empty() {
        return Err(AppError::validation("Session id and answer are required"));
    }

    if !ctx.captcha.verify(&request.session_id, &request.answer).await? {
        return Err(AppError::validation("Invalid or expired captcha"));
    }

    Ok((
        StatusCode::OK,
        Json(json!({ "success": true, "message": "Captcha verified" })),
    ))
}
