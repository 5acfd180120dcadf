// ============================================================================
// Authentication Routes
// ============================================================================
//
// Endpoints (mounted under /api/auth):
// - POST /signup              - Create an account, start a session
// - POST /login               - Authenticate by name and password
// - POST /logout              - Clear the session cookie
// - POST /guest-login         - Provision a guest account
// - PUT  /update-profile      - Replace the avatar
// - PUT  /update-info         - Update profile fields
// - POST /verify-email        - Consume an email verification token
// - POST /forgot-password     - Email a password reset link
// - POST /reset-password      - Consume a reset token, set a new password
// - POST /resend-verification - Re-send the verification email
// - POST /revoke-reset        - Revoke the caller's pending reset link
// - GET  /check               - Return the session holder's account
//
// Request bodies default missing fields so the account service reports
// them with its own validation messages.
// ============================================================================

use axum::{
    extract::State,
    http::{header::SET_COOKIE, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::accounts::{CaptchaAnswer, InfoInput, SignupInput};
use crate::auth::IssuedToken;
use crate::context::AppContext;
use crate::db::AccountView;
use crate::error::AppError;
use crate::routes::extractors::AuthenticatedAccount;
use crate::utils::{clear_session_cookie, session_cookie};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaBody {
    pub session_id: String,
    pub answer: String,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
    pub profile: Option<String>,
    pub captcha_completed: bool,
    pub captcha: Option<CaptchaBody>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    #[serde(alias = "profilePic")]
    pub profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpdateInfoRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub gender: Option<String>,
    pub date_of_birth: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(flatten)]
    pub user: AccountView,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_first_login: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}

fn session_header(ctx: &AppContext, session: &IssuedToken) -> [(axum::http::HeaderName, String); 1] {
    [(
        SET_COOKIE,
        session_cookie(
            &session.token,
            ctx.tokens.session_ttl().num_seconds(),
            ctx.secure_cookies(),
        ),
    )]
}

/// POST /signup
pub async fn signup(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = ctx
        .accounts
        .signup(SignupInput {
            name: request.name,
            password: request.password,
            full_name: request.full_name,
            email: request.email,
            gender: request.gender,
            date_of_birth: request.date_of_birth,
            profile: request.profile,
            captcha_completed: request.captcha_completed,
            captcha: request.captcha.map(|c| CaptchaAnswer {
                session_id: c.session_id,
                answer: c.answer,
            }),
        })
        .await?;

    let cookie = session_header(&ctx, &created.session);
    Ok((
        StatusCode::CREATED,
        cookie,
        Json(SessionResponse {
            user: created.account.to_view(),
            token: created.session.token,
            is_first_login: None,
            message: Some(
                "Registration successful. Please check your email to verify your account.",
            ),
        }),
    ))
}

/// POST /login
pub async fn login(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = ctx.accounts.login(&request.name, &request.password).await?;

    let cookie = session_header(&ctx, &outcome.session);
    Ok((
        StatusCode::OK,
        cookie,
        Json(SessionResponse {
            user: outcome.account.to_view(),
            token: outcome.session.token,
            is_first_login: Some(outcome.is_first_login),
            message: None,
        }),
    ))
}

/// POST /logout
pub async fn logout(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(SET_COOKIE, clear_session_cookie(ctx.secure_cookies()))],
        message("Logged out successfully"),
    )
}

/// POST /guest-login
pub async fn guest_login(
    State(ctx): State<Arc<AppContext>>,
) -> Result<impl IntoResponse, AppError> {
    let guest = ctx.accounts.guest_provision().await?;

    let cookie = session_header(&ctx, &guest.session);
    Ok((
        StatusCode::OK,
        cookie,
        Json(SessionResponse {
            user: guest.account.to_view(),
            token: guest.session.token,
            is_first_login: None,
            message: None,
        }),
    ))
}

/// PUT /update-profile
pub async fn update_profile(
    State(ctx): State<Arc<AppContext>>,
    account: AuthenticatedAccount,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated = ctx
        .accounts
        .update_avatar(account.0, request.profile.as_deref())
        .await?;
    Ok((StatusCode::OK, Json(updated.to_view())))
}

/// PUT /update-info
pub async fn update_info(
    State(ctx): State<Arc<AppContext>>,
    account: AuthenticatedAccount,
    Json(request): Json<UpdateInfoRequest>,
) -> Result<impl IntoResponse, AppError> {
    let updated = ctx
        .accounts
        .update_info(
            account.0,
            InfoInput {
                full_name: request.full_name,
                email: request.email,
                gender: request.gender,
                date_of_birth: request.date_of_birth,
            },
        )
        .await?;
    Ok((StatusCode::OK, Json(updated.to_view())))
}

/// POST /verify-email
pub async fn verify_email(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    ctx.accounts.verify_email(&request.token).await?;
    Ok((StatusCode::OK, message("Email verified successfully!")))
}

/// POST /forgot-password
pub async fn forgot_password(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    ctx.accounts.forgot_password(&request.email).await?;
    Ok((
        StatusCode::OK,
        message("Password reset link has been sent to your email address"),
    ))
}

/// POST /reset-password
pub async fn reset_password(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    ctx.accounts
        .reset_password(&request.token, &request.password)
        .await?;
    Ok((
        StatusCode::OK,
        message("Password has been reset successfully"),
    ))
}

/// POST /resend-verification
pub async fn resend_verification(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    ctx.accounts.resend_verification(&request.email).await?;
    Ok((
        StatusCode::OK,
        message("Verification email has been sent successfully"),
    ))
}

/// POST /revoke-reset
pub async fn revoke_reset(
    State(ctx): State<Arc<AppContext>>,
    account: AuthenticatedAccount,
) -> Result<impl IntoResponse, AppError> {
    ctx.accounts.revoke_password_reset(account.0).await?;
    Ok((StatusCode::OK, message("Pending password reset revoked")))
}

/// GET /check
pub async fn check(
    State(ctx): State<Arc<AppContext>>,
    account: AuthenticatedAccount,
) -> Result<impl IntoResponse, AppError> {
    let current = ctx.accounts.current(account.0).await?;
    Ok((StatusCode::OK, Json(current.to_view())))
}
