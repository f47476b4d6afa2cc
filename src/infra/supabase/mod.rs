//! HTTP client for a hosted auth + PostgREST + object-storage backend.
//!
//! One [`SupabaseClient`] implements every backend trait. Requests carry the project's anon key
//! as `apikey` and the signed-in user's access token (or the anon key) as the bearer token.

mod auth;
mod rest;
mod storage;

use std::sync::RwLock;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use crate::config::BackendConfig;
use crate::workflows::roles::domain::Session;
use crate::workflows::roles::repository::{AuthChange, RepositoryError, StorageError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum SupabaseError {
    #[error("backend url '{0}' cannot carry a path")]
    InvalidBaseUrl(String),
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct SupabaseClient {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl SupabaseClient {
    pub fn new(config: &BackendConfig) -> Result<Self, SupabaseError> {
        if config.url.cannot_be_a_base() {
            return Err(SupabaseError::InvalidBaseUrl(config.url.to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            http,
            base: config.url.clone(),
            anon_key: config.anon_key.clone(),
            session: RwLock::new(None),
            events,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|session| session.access_token.clone())
    }

    fn store_session(&self, session: Option<Session>) {
        *self.session.write().expect("session lock poisoned") = session;
    }

    fn stored_session(&self) -> Option<Session> {
        self.session.read().expect("session lock poisoned").clone()
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    fn rest(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, self.endpoint(&["rest", "v1", table]))
    }
}

/// Pull the human-readable part out of an error body; the services disagree on the field name.
async fn failure_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(text) = fields.get(key).and_then(Value::as_str) {
                return text.to_string();
            }
        }
    }
    if body.trim().is_empty() {
        status.to_string()
    } else {
        body
    }
}

fn repository_error(status: StatusCode, message: String) -> RepositoryError {
    match status {
        StatusCode::NOT_FOUND => RepositoryError::NotFound,
        StatusCode::CONFLICT => RepositoryError::Conflict,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepositoryError::Denied(message),
        _ => RepositoryError::Unavailable(format!("{status}: {message}")),
    }
}

fn storage_error(status: StatusCode, message: String) -> StorageError {
    if status.is_client_error() {
        StorageError::Rejected(message)
    } else {
        StorageError::Unavailable(format!("{status}: {message}"))
    }
}
