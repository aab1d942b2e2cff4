//! Account registration.

use tracing::{info, instrument};

use super::error::AuthError;
use super::state::AuthState;
use super::utils::{normalize_email, valid_email, validate_password, validate_username};
use crate::users::{NewUser, Role, User};

#[derive(Clone)]
pub struct SignupInput {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SignupInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignupInput")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Create an unverified account and mail its verification link.
///
/// The record exists before the email is dispatched, so a fast click on the
/// link always finds the account.
///
/// # Errors
/// - [`AuthError::Validation`] for a bad username, email or password.
/// - [`AuthError::Conflict`] if the email is already registered.
#[instrument(skip_all)]
pub async fn signup(state: &AuthState, input: SignupInput) -> Result<User, AuthError> {
    let username = input.username.trim().to_string();
    validate_username(&username).map_err(AuthError::Validation)?;
    let email = normalize_email(&input.email);
    if !valid_email(&email) {
        return Err(AuthError::Validation("invalid email address".to_string()));
    }
    validate_password(&input.password).map_err(AuthError::Validation)?;

    let password_hash = state.hasher().hash_blocking(input.password).await?;
    let user = state
        .users()
        .create_user(NewUser {
            username,
            email,
            password_hash,
            role: Role::User,
        })
        .await?;
    info!(user_id = %user.id, "account created");

    state.verification().issue_verification(&user.email)?;
    Ok(user)
}
