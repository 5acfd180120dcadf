use chrono::Utc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{AccountService, MIN_PASSWORD_LENGTH};
use crate::auth::TokenPurpose;
use crate::db::Account;
use crate::error::{AppError, AppResult};
use crate::mailer;

impl AccountService {
    fn link(&self, path: &str, token: &str) -> String {
        format!("{}/{}?token={}", self.client_url, path, token)
    }

    /// Issues a verification token and mails it. Fails if the mail could
    /// not be sent.
    pub(super) async fn dispatch_verification(&self, account: &Account) -> AppResult<()> {
        let issued = self
            .tokens
            .issue_verification(&account.id, &account.email)
            .map_err(AppError::Unknown)?;
        let email = mailer::verification_email(
            &account.email,
            account.display_name(),
            &self.link("verify-email", &issued.token),
        );
        if self.send_best_effort(email).await {
            Ok(())
        } else {
            Err(AppError::internal("verification email could not be sent"))
        }
    }

    /// Consumes a verification token. The flag only ever moves false -> true,
    /// so a replayed token fails like an invalid one.
    pub async fn verify_email(&self, token: &str) -> AppResult<()> {
        if token.trim().is_empty() {
            return Err(AppError::validation("Verification token is required"));
        }

        let account_id = self
            .tokens
            .verify(token.trim(), TokenPurpose::EmailVerification)?
            .account_id()?;

        if !self.store.mark_email_verified(account_id).await? {
            tracing::debug!(
                account = %self.log_id(&account_id),
                "Verification token for unknown or already verified account"
            );
            return Err(AppError::InvalidToken);
        }

        tracing::info!(account = %self.log_id(&account_id), "Email verified");
        Ok(())
    }

    /// Issues a reset token, mirrors it on the account and mails the link.
    /// Issuing a new token replaces the previous one.
    pub async fn forgot_password(&self, email: &str) -> AppResult<()> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::validation("Email is required"));
        }

        let account = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::not_found("No user found with this email address"))?;

        let issued = self
            .tokens
            .issue_reset(&account.id, &account.email)
            .map_err(AppError::Unknown)?;
        self.store
            .set_reset_mirror(account.id, &issued.token, issued.expires_at)
            .await?;

        self.send_best_effort(mailer::password_reset_email(
            &account.email,
            account.display_name(),
            &self.link("reset-password", &issued.token),
        ))
        .await;

        tracing::info!(account = %self.log_id(&account.id), "Password reset issued");
        Ok(())
    }

    /// Replaces the password. The token must verify cryptographically AND
    /// match the unexpired mirror on the account; success clears the mirror.
    pub async fn reset_password(&self, token: &str, password: &str) -> AppResult<()> {
        let token = token.trim();
        if token.is_empty() || password.is_empty() {
            return Err(AppError::validation("Token and password are required"));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::validation(format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LENGTH
            )));
        }

        // 1. Signature, expiry, purpose
        let account_id = self
            .tokens
            .verify(token, TokenPurpose::PasswordReset)?
            .account_id()?;

        // 2. Server-side mirror
        let account = self
            .store
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        let now = Utc::now();
        let mirror_matches = account
            .reset_password_token
            .as_deref()
            .is_some_and(|stored| bool::from(stored.as_bytes().ct_eq(token.as_bytes())));
        let mirror_live = account.reset_password_expires.is_some_and(|exp| exp > now);
        if !(mirror_matches && mirror_live) {
            tracing::warn!(
                account = %self.log_id(&account_id),
                "Reset token rejected by server-side mirror"
            );
            return Err(AppError::InvalidToken);
        }

        // 3. Swap the hash; the store re-checks the mirror so a concurrent
        //    reset with the same token cannot also succeed
        let password_hash = bcrypt::hash(password, self.bcrypt_cost)?;
        if !self
            .store
            .complete_password_reset(account_id, token, &password_hash, now)
            .await?
        {
            return Err(AppError::InvalidToken);
        }

        tracing::info!(account = %self.log_id(&account_id), "Password reset completed");
        Ok(())
    }

    /// Re-sends the verification email for an unverified account.
    pub async fn resend_verification(&self, email: &str) -> AppResult<()> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::validation("Email is required"));
        }

        let account = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))?;

        if account.is_email_verified {
            return Err(AppError::validation("Email is already verified"));
        }

        self.dispatch_verification(&account).await
    }

    /// Revokes any outstanding reset token before its signed expiry.
    pub async fn revoke_password_reset(&self, account_id: Uuid) -> AppResult<()> {
        self.store.clear_reset_mirror(account_id).await?;
        tracing::info!(account = %self.log_id(&account_id), "Password reset revoked");
        Ok(())
    }
}
