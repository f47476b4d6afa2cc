use tracing::{info, warn};

use super::domain::Session;
use super::repository::{AuthError, AuthService};
use super::validation::{require, require_email, require_matching_passwords, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl AccountError {
    pub fn user_message(&self) -> String {
        match self {
            AccountError::Validation(error) => error.to_string(),
            AccountError::Auth(error) => error.user_message(),
        }
    }
}

pub async fn sign_in<A>(auth: &A, email: &str, password: &str) -> Result<Session, AccountError>
where
    A: AuthService + ?Sized,
{
    require_email(email)?;
    require(password, "password")?;
    match auth.sign_in(email.trim(), password).await {
        Ok(session) => {
            info!(user_id = %session.user.id, "signed in");
            Ok(session)
        }
        Err(error) => {
            warn!(%error, "sign-in rejected");
            Err(error.into())
        }
    }
}

pub async fn sign_out<A>(auth: &A) -> Result<(), AccountError>
where
    A: AuthService + ?Sized,
{
    auth.sign_out().await?;
    info!("signed out");
    Ok(())
}

/// Sends a reset link; the address is checked locally first.
pub async fn request_password_reset<A>(auth: &A, email: &str) -> Result<(), AccountError>
where
    A: AuthService + ?Sized,
{
    require_email(email)?;
    auth.request_password_reset(email.trim()).await?;
    info!("password reset requested");
    Ok(())
}

/// Set a new password for the signed-in (or recovering) account.
pub async fn reset_password<A>(
    auth: &A,
    password: &str,
    confirmation: &str,
) -> Result<(), AccountError>
where
    A: AuthService + ?Sized,
{
    require_matching_passwords(password, confirmation)?;
    auth.update_password(password).await?;
    info!("password updated");
    Ok(())
}
