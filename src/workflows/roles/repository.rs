use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::domain::{
    Document, DocumentId, ModerationStatus, NewDocument, NewRoleProfile, NewRoleRequest,
    ProfileId, ProfileKey, ProfileRecord, Role, RoleProfile, RoleRequest, RoleRequestId, Session,
    User, UserId,
};

/// Extra attributes stored with a new account.
pub type UserMetadata = BTreeMap<String, serde_json::Value>;

/// Result of a sign-up: the account always, a session only when no e-mail confirmation is pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignUpOutcome {
    pub user: User,
    pub session: Option<Session>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
    PasswordRecovery,
    UserUpdated,
}

/// Notification pushed to subscribers whenever the session changes.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthChange {
    pub kind: AuthChangeKind,
    pub session: Option<Session>,
}

/// Hosted account service.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: UserMetadata,
    ) -> Result<SignUpOutcome, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;
    async fn sign_out(&self) -> Result<(), AuthError>;
    async fn update_password(&self, new_password: &str) -> Result<(), AuthError>;
    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError>;
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

/// Tabular storage for role requests, profiles, and moderator grants.
#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn insert_request(&self, request: NewRoleRequest) -> Result<RoleRequest, RepositoryError>;
    async fn insert_profile(&self, profile: NewRoleProfile) -> Result<RoleProfile, RepositoryError>;
    /// Rows of the combined profiles view for one role, newest first.
    async fn profiles_for_role(&self, role: Role) -> Result<Vec<ProfileRecord>, RepositoryError>;
    async fn requests_for_user(&self, user_id: &UserId) -> Result<Vec<RoleRequest>, RepositoryError>;
    async fn update_request_status(
        &self,
        id: &RoleRequestId,
        status: ModerationStatus,
    ) -> Result<(), RepositoryError>;
    async fn delete_profile(&self, id: &ProfileId) -> Result<(), RepositoryError>;
    async fn delete_request(&self, id: &RoleRequestId) -> Result<(), RepositoryError>;
    /// Server-side moderator capability for the account.
    async fn has_admin_grant(&self, user_id: &UserId) -> Result<bool, RepositoryError>;
}

/// Metadata rows describing uploaded evidence files.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Documents for one profile, newest first.
    async fn list(&self, owner: &ProfileKey) -> Result<Vec<Document>, RepositoryError>;
    async fn list_for_role(&self, role: Role) -> Result<Vec<Document>, RepositoryError>;
    async fn insert(&self, document: NewDocument) -> Result<Document, RepositoryError>;
    async fn delete(&self, id: &DocumentId) -> Result<(), RepositoryError>;
}

/// Binary object storage organised in buckets.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Error enumeration for table operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("access denied: {0}")]
    Denied(String),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage rejected the request: {0}")]
    Rejected(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("{message}")]
    Rejected { message: String },
    #[error("not signed in")]
    Unauthenticated,
    #[error("auth service unavailable: {0}")]
    Unavailable(String),
}

const KNOWN_AUTH_FAILURES: &[(&str, &str)] = &[
    ("Invalid login credentials", "Invalid e-mail or password"),
    ("Email not valid", "Invalid e-mail format"),
    ("User already registered", "An account with this e-mail already exists"),
    ("Email not confirmed", "Confirm your e-mail before signing in"),
    ("Password should be at least", "Password is too short"),
];

impl AuthError {
    /// Text shown to the user. Known backend messages map to fixed wording; anything else is
    /// echoed back untranslated.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Rejected { message } => translate_auth_message(message),
            AuthError::Unauthenticated => "You are not signed in".to_string(),
            AuthError::Unavailable(_) => "Sign-in service is unavailable, try again".to_string(),
        }
    }
}

pub fn translate_auth_message(message: &str) -> String {
    KNOWN_AUTH_FAILURES
        .iter()
        .find(|(pattern, _)| message.contains(pattern))
        .map(|(_, translated)| (*translated).to_string())
        .unwrap_or_else(|| format!("Unknown error: {message}"))
}
