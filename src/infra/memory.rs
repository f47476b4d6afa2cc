use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::workflows::roles::domain::{
    Document, DocumentId, ModerationStatus, NewDocument, NewRoleProfile, NewRoleRequest,
    ProfileId, ProfileKey, ProfileRecord, Role, RoleProfile, RoleRequest, RoleRequestId, Session,
    User, UserId,
};
use crate::workflows::roles::repository::{
    AuthChange, AuthChangeKind, AuthError, AuthService, BlobStorage, DocumentRepository,
    RepositoryError, RoleRepository, SignUpOutcome, StorageError, UserMetadata,
};

const MIN_PASSWORD_LEN: usize = 6;
const EVENT_CAPACITY: usize = 32;

/// Remote writes observed by the backend, for asserting that refused actions stay local.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub request_inserts: usize,
    pub profile_inserts: usize,
    pub status_updates: usize,
    pub profile_deletes: usize,
    pub request_deletes: usize,
    pub document_inserts: usize,
    pub document_deletes: usize,
    pub blob_uploads: usize,
    pub blob_removals: usize,
}

struct Account {
    user: User,
    password: String,
}

struct StoredProfile {
    profile: RoleProfile,
    documents_url: Option<Value>,
}

#[derive(Default)]
struct MemoryState {
    accounts: BTreeMap<String, Account>,
    session: Option<Session>,
    requests: Vec<RoleRequest>,
    profiles: Vec<StoredProfile>,
    documents: Vec<Document>,
    blobs: BTreeMap<(String, String), Vec<u8>>,
    admins: BTreeSet<UserId>,
    password_resets: Vec<String>,
    writes: WriteCounts,
    clock: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Wall time, or a fixed clock advancing one second per reading.
    fn now(&mut self) -> DateTime<Utc> {
        match self.clock.as_mut() {
            Some(clock) => {
                let now = *clock;
                *clock = now + Duration::seconds(1);
                now
            }
            None => Utc::now(),
        }
    }

    fn email_of(&self, user_id: &UserId) -> Option<String> {
        self.accounts
            .values()
            .find(|account| &account.user.id == user_id)
            .map(|account| account.user.email.clone())
    }

    fn request_status(&self, id: &RoleRequestId) -> Option<ModerationStatus> {
        self.requests
            .iter()
            .find(|request| &request.id == id)
            .map(|request| request.status)
    }
}

/// Process-local auth, tables, and blob storage behind the backend traits.
///
/// Sign-up confirms the account immediately and opens a session.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    events: broadcast::Sender<AuthChange>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    /// Timestamps start at `start` and advance one second per record.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        let backend = Self::new();
        backend.lock().clock = Some(start);
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory backend mutex poisoned")
    }

    fn notify(&self, kind: AuthChangeKind, session: Option<Session>) {
        // No subscribers is fine.
        let _ = self.events.send(AuthChange { kind, session });
    }

    /// Create a confirmed account without opening a session.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        metadata: UserMetadata,
    ) -> Result<User, AuthError> {
        let mut state = self.lock();
        create_account(&mut state, email, password, metadata)
    }

    pub fn grant_admin(&self, user_id: &UserId) {
        self.lock().admins.insert(user_id.clone());
    }

    /// Store links the way older clients did, directly on the profile row.
    pub fn set_legacy_document_urls(
        &self,
        profile_id: &ProfileId,
        value: Value,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let stored = state
            .profiles
            .iter_mut()
            .find(|stored| &stored.profile.id == profile_id)
            .ok_or(RepositoryError::NotFound)?;
        stored.documents_url = Some(value);
        Ok(())
    }

    pub fn write_counts(&self) -> WriteCounts {
        self.lock().writes
    }

    pub fn blob(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .blobs
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    pub fn password_reset_requests(&self) -> Vec<String> {
        self.lock().password_resets.clone()
    }
}

fn create_account(
    state: &mut MemoryState,
    email: &str,
    password: &str,
    metadata: UserMetadata,
) -> Result<User, AuthError> {
    let key = email.trim().to_lowercase();
    if state.accounts.contains_key(&key) {
        return Err(rejected("User already registered"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(rejected("Password should be at least 6 characters."));
    }

    let user = User {
        id: UserId(Uuid::new_v4().to_string()),
        email: key.clone(),
        display_name: None,
        metadata,
    };
    state.accounts.insert(
        key,
        Account {
            user: user.clone(),
            password: password.to_string(),
        },
    );
    Ok(user)
}

fn rejected(message: &str) -> AuthError {
    AuthError::Rejected {
        message: message.to_string(),
    }
}

fn open_session(user: User) -> Session {
    Session {
        user,
        access_token: Uuid::new_v4().to_string(),
        refresh_token: None,
        expires_at: None,
    }
}

#[async_trait]
impl AuthService for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: UserMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        let session = {
            let mut state = self.lock();
            let user = create_account(&mut state, email, password, metadata)?;
            let session = open_session(user);
            state.session = Some(session.clone());
            session
        };
        self.notify(AuthChangeKind::SignedIn, Some(session.clone()));
        Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = {
            let mut state = self.lock();
            let user = match state.accounts.get(&email.trim().to_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(rejected("Invalid login credentials")),
            };
            let session = open_session(user);
            state.session = Some(session.clone());
            session
        };
        self.notify(AuthChangeKind::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.lock().session.clone())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.lock().session = None;
        self.notify(AuthChangeKind::SignedOut, None);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let session = {
            let mut state = self.lock();
            let session = state.session.clone().ok_or(AuthError::Unauthenticated)?;
            if new_password.chars().count() < MIN_PASSWORD_LEN {
                return Err(rejected("Password should be at least 6 characters."));
            }
            let account = state
                .accounts
                .get_mut(&session.user.email)
                .ok_or(AuthError::Unauthenticated)?;
            account.password = new_password.to_string();
            session
        };
        self.notify(AuthChangeKind::UserUpdated, Some(session));
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.lock().password_resets.push(email.trim().to_lowercase());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RoleRepository for MemoryBackend {
    async fn insert_request(&self, request: NewRoleRequest) -> Result<RoleRequest, RepositoryError> {
        let mut state = self.lock();
        let created_at = state.now();
        let request = RoleRequest {
            id: RoleRequestId(Uuid::new_v4().to_string()),
            user_id: request.user_id,
            role: request.role,
            status: ModerationStatus::Pending,
            created_at,
        };
        state.requests.push(request.clone());
        state.writes.request_inserts += 1;
        Ok(request)
    }

    async fn insert_profile(&self, profile: NewRoleProfile) -> Result<RoleProfile, RepositoryError> {
        let mut state = self.lock();
        let request = state
            .requests
            .iter()
            .find(|request| request.id == profile.request_id)
            .ok_or(RepositoryError::NotFound)?;
        if request.role != profile.details.role() || request.user_id != profile.user_id {
            return Err(RepositoryError::Denied(
                "profile does not match its role request".to_string(),
            ));
        }
        if state
            .profiles
            .iter()
            .any(|stored| stored.profile.request_id == profile.request_id)
        {
            return Err(RepositoryError::Conflict);
        }

        let status = request.status;
        let created_at = state.now();
        let profile = RoleProfile {
            id: ProfileId(Uuid::new_v4().to_string()),
            request_id: profile.request_id,
            user_id: profile.user_id,
            contact: profile.contact,
            details: profile.details,
            status,
            created_at,
        };
        state.profiles.push(StoredProfile {
            profile: profile.clone(),
            documents_url: None,
        });
        state.writes.profile_inserts += 1;
        Ok(profile)
    }

    async fn profiles_for_role(&self, role: Role) -> Result<Vec<ProfileRecord>, RepositoryError> {
        let state = self.lock();
        let mut records: Vec<ProfileRecord> = state
            .profiles
            .iter()
            .filter(|stored| stored.profile.role() == role)
            .map(|stored| {
                let mut profile = stored.profile.clone();
                if let Some(status) = state.request_status(&profile.request_id) {
                    profile.status = status;
                }
                ProfileRecord {
                    email: state.email_of(&profile.user_id),
                    documents_url: stored.documents_url.clone(),
                    profile,
                }
            })
            .collect();
        records.sort_by(|a, b| b.profile.created_at.cmp(&a.profile.created_at));
        Ok(records)
    }

    async fn requests_for_user(&self, user_id: &UserId) -> Result<Vec<RoleRequest>, RepositoryError> {
        Ok(self
            .lock()
            .requests
            .iter()
            .filter(|request| &request.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_request_status(
        &self,
        id: &RoleRequestId,
        status: ModerationStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let request = state
            .requests
            .iter_mut()
            .find(|request| &request.id == id)
            .ok_or(RepositoryError::NotFound)?;
        request.status = status;
        state.writes.status_updates += 1;
        Ok(())
    }

    async fn delete_profile(&self, id: &ProfileId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let before = state.profiles.len();
        state.profiles.retain(|stored| &stored.profile.id != id);
        if state.profiles.len() == before {
            return Err(RepositoryError::NotFound);
        }
        state.writes.profile_deletes += 1;
        Ok(())
    }

    async fn delete_request(&self, id: &RoleRequestId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let before = state.requests.len();
        state.requests.retain(|request| &request.id != id);
        if state.requests.len() == before {
            return Err(RepositoryError::NotFound);
        }
        state.writes.request_deletes += 1;
        Ok(())
    }

    async fn has_admin_grant(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        Ok(self.lock().admins.contains(user_id))
    }
}

#[async_trait]
impl DocumentRepository for MemoryBackend {
    async fn list(&self, owner: &ProfileKey) -> Result<Vec<Document>, RepositoryError> {
        let mut documents: Vec<Document> = self
            .lock()
            .documents
            .iter()
            .filter(|doc| doc.user_id == owner.user_id && doc.role == owner.role)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    async fn list_for_role(&self, role: Role) -> Result<Vec<Document>, RepositoryError> {
        let mut documents: Vec<Document> = self
            .lock()
            .documents
            .iter()
            .filter(|doc| doc.role == role)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(documents)
    }

    async fn insert(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        let mut state = self.lock();
        let document = Document {
            id: DocumentId(Uuid::new_v4().to_string()),
            user_id: document.user_id,
            role: document.role,
            filename: document.filename,
            path: document.path,
            bucket: document.bucket,
            uploaded_at: document.uploaded_at,
        };
        state.documents.push(document.clone());
        state.writes.document_inserts += 1;
        Ok(document)
    }

    async fn delete(&self, id: &DocumentId) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        let before = state.documents.len();
        state.documents.retain(|doc| &doc.id != id);
        if state.documents.len() == before {
            return Err(RepositoryError::NotFound);
        }
        state.writes.document_deletes += 1;
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        let key = (bucket.to_string(), path.to_string());
        if state.blobs.contains_key(&key) {
            return Err(StorageError::Rejected(
                "The resource already exists".to_string(),
            ));
        }
        state.blobs.insert(key, bytes);
        state.writes.blob_uploads += 1;
        Ok(())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        let mut state = self.lock();
        for path in paths {
            state.blobs.remove(&(bucket.to_string(), path.clone()));
        }
        state.writes.blob_removals += 1;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}
