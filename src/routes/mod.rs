// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware
// - auth.rs: Account, session and recovery endpoints
// - captcha.rs: CAPTCHA challenge endpoints
// - companion.rs: Companion bot endpoints
// - health.rs: Health check and metrics endpoints
// - extractors.rs: Session extractor
// - middleware.rs: Request logging, security headers
//
// ============================================================================

mod auth;
mod captcha;
mod companion;
mod extractors;
mod health;
mod middleware;

pub use extractors::AuthenticatedAccount;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/guest-login", post(auth::guest_login))
        .route("/update-profile", put(auth::update_profile))
        .route("/update-info", put(auth::update_info))
        .route("/verify-email", post(auth::verify_email))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/revoke-reset", post(auth::revoke_reset))
        .route("/check", get(auth::check))
        .route("/captcha", get(captcha::issue))
        .route("/verify-captcha", post(captcha::verify));

    let companion_routes = Router::new()
        .route("/message", post(companion::send_message))
        .route("/bot", get(companion::bot))
        .route("/test", get(companion::test_reply));

    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .nest("/api/auth", auth_routes)
        .nest("/api/ai", companion_routes)
        // Apply middleware (order matters - last added runs first)
        .layer(
            ServiceBuilder::new()
                // Tracing layer (outermost - runs first)
                .layer(TraceLayer::new_for_http())
                // Request logging
                .layer(axum::middleware::from_fn(middleware::request_logging))
                // Security headers
                .layer(axum::middleware::from_fn(middleware::add_security_headers))
                .into_inner(),
        )
        .with_state(app_context)
}
