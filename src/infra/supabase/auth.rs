use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{failure_message, SupabaseClient};
use crate::workflows::roles::domain::{Session, User, UserId};
use crate::workflows::roles::repository::{
    AuthChange, AuthChangeKind, AuthError, AuthService, SignUpOutcome, UserMetadata,
};

#[derive(Debug, Deserialize)]
struct AccountRow {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: BTreeMap<String, Value>,
}

impl From<AccountRow> for User {
    fn from(row: AccountRow) -> Self {
        let display_name = row
            .user_metadata
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        User {
            id: UserId(row.id),
            email: row.email.unwrap_or_default(),
            display_name,
            metadata: row.user_metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AccountRow,
}

impl From<TokenGrant> for Session {
    fn from(grant: TokenGrant) -> Self {
        Session {
            user: grant.user.into(),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant
                .expires_at
                .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0)),
        }
    }
}

fn unavailable(error: reqwest::Error) -> AuthError {
    AuthError::Unavailable(error.to_string())
}

async fn auth_failure(response: Response) -> AuthError {
    let status = response.status();
    let message = failure_message(response).await;
    if status.is_server_error() {
        AuthError::Unavailable(format!("{status}: {message}"))
    } else if status == StatusCode::UNAUTHORIZED {
        AuthError::Unauthenticated
    } else {
        AuthError::Rejected { message }
    }
}

impl SupabaseClient {
    fn auth_url(&self, endpoint: &str) -> url::Url {
        self.endpoint(&["auth", "v1", endpoint])
    }

    fn announce(&self, kind: AuthChangeKind, session: Option<Session>) {
        let _ = self.events.send(AuthChange { kind, session });
    }
}

#[async_trait]
impl AuthService for SupabaseClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: UserMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        let response = self
            .request(Method::POST, self.auth_url("signup"))
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(auth_failure(response).await);
        }

        // Auto-confirming projects answer with a session, the others with the bare account.
        let body: Value = response.json().await.map_err(unavailable)?;
        if body.get("access_token").is_some() {
            let grant: TokenGrant = serde_json::from_value(body)
                .map_err(|error| AuthError::Unavailable(error.to_string()))?;
            let session = Session::from(grant);
            self.store_session(Some(session.clone()));
            self.announce(AuthChangeKind::SignedIn, Some(session.clone()));
            Ok(SignUpOutcome {
                user: session.user.clone(),
                session: Some(session),
            })
        } else {
            let account: AccountRow = serde_json::from_value(body)
                .map_err(|error| AuthError::Unavailable(error.to_string()))?;
            debug!(user_id = %account.id, "sign-up awaiting e-mail confirmation");
            Ok(SignUpOutcome {
                user: account.into(),
                session: None,
            })
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let response = self
            .request(Method::POST, self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(auth_failure(response).await);
        }

        let grant: TokenGrant = response.json().await.map_err(unavailable)?;
        let session = Session::from(grant);
        self.store_session(Some(session.clone()));
        self.announce(AuthChangeKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.stored_session())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if self.access_token().is_some() {
            let result = self
                .request(Method::POST, self.auth_url("logout"))
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "remote sign-out refused; clearing local session");
                }
                Err(error) => warn!(%error, "remote sign-out failed; clearing local session"),
                Ok(_) => {}
            }
        }
        self.store_session(None);
        self.announce(AuthChangeKind::SignedOut, None);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let session = self.stored_session().ok_or(AuthError::Unauthenticated)?;
        let response = self
            .request(Method::PUT, self.auth_url("user"))
            .json(&json!({ "password": new_password }))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(auth_failure(response).await);
        }

        let account: AccountRow = response.json().await.map_err(unavailable)?;
        let session = Session {
            user: account.into(),
            ..session
        };
        self.store_session(Some(session.clone()));
        self.announce(AuthChangeKind::UserUpdated, Some(session));
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let response = self
            .request(Method::POST, self.auth_url("recover"))
            .json(&json!({ "email": email }))
            .send()
            .await
            .map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(auth_failure(response).await);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}
