use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::broadcast;

use crate::infra::MemoryBackend;
use crate::workflows::roles::domain::{
    CarrierDetails, ContactDetails, Document, DocumentId, ModerationStatus, NewDocument,
    NewRoleProfile, NewRoleRequest, ProfileId, ProfileKey, ProfileRecord, Role, RoleDetails,
    RoleProfile, RoleRequest, RoleRequestId, Session, ShipperDetails, TruckType, User, UserId,
};
use crate::workflows::roles::onboarding::OnboardingFlow;
use crate::workflows::roles::repository::{
    AuthChange, AuthError, AuthService, BlobStorage, DocumentRepository, RepositoryError,
    RoleRepository, SignUpOutcome, StorageError, UserMetadata,
};
use crate::workflows::roles::session::SessionProvider;

pub const PASSWORD: &str = "road-ready-1";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::starting_at(start_time()))
}

/// Clock for upload paths that advances one millisecond per reading.
pub fn ticking_clock() -> impl Fn() -> DateTime<Utc> + Send + Sync + 'static {
    let millis = AtomicI64::new(start_time().timestamp_millis());
    move || {
        let now = millis.fetch_add(1, Ordering::SeqCst);
        Utc.timestamp_millis_opt(now).unwrap()
    }
}

pub fn metadata(full_name: &str) -> UserMetadata {
    let mut metadata = UserMetadata::new();
    metadata.insert("full_name".to_string(), json!(full_name));
    metadata
}

pub async fn wait_for(session: &SessionProvider, user: &User) {
    tokio::time::timeout(Duration::from_secs(2), session.wait_for_user(&user.id))
        .await
        .expect("session update in time")
        .expect("session provider running");
}

pub async fn wait_for_sign_out(session: &SessionProvider) {
    let mut receiver = session.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        receiver.wait_for(|state| state.session.is_none()),
    )
    .await
    .expect("sign-out in time")
    .expect("session provider running");
}

/// Register and sign in, returning the running session provider.
pub async fn signed_in(
    backend: &Arc<MemoryBackend>,
    email: &str,
    full_name: &str,
) -> (Arc<SessionProvider>, User) {
    let user = backend
        .register(email, PASSWORD, metadata(full_name))
        .expect("register");
    let session = SessionProvider::start(Arc::clone(backend)).await;
    backend.sign_in(email, PASSWORD).await.expect("sign in");
    wait_for(&session, &user).await;
    (session, user)
}

pub async fn signed_in_moderator(backend: &Arc<MemoryBackend>) -> (Arc<SessionProvider>, User) {
    let (session, user) = signed_in(backend, "moderator@freight.example", "Mo Derator").await;
    backend.grant_admin(&user.id);
    (session, user)
}

/// Registration wizard on its last step with every field valid.
pub fn ready_registration(email: &str, roles: &[Role]) -> OnboardingFlow {
    let mut flow = OnboardingFlow::registration();
    let form = flow.form_mut().expect("editable");
    form.contact.full_name = "Dana Hauler".to_string();
    form.contact.email = email.to_string();
    form.contact.phone = "+12025550100".to_string();
    form.contact.password = PASSWORD.to_string();
    form.contact.confirm_password = PASSWORD.to_string();
    assert!(flow.next_step(), "contact step: {:?}", flow.error());
    for role in roles {
        flow.toggle_role(*role);
    }
    assert!(flow.next_step(), "role step: {:?}", flow.error());

    let form = flow.form_mut().expect("editable");
    form.details.has_company = true;
    form.details.company_name = "Hauler Logistics LLC".to_string();
    form.details.carrier.truck_type = Some(TruckType::Reefer);
    form.details.carrier.mc_number = "MC-482910".to_string();
    form.details.carrier.usdot_number = "3120457".to_string();
    form.details.carrier.operating_states = "TX, OK".to_string();
    form.details.shipper.address = "12 Dock St".to_string();
    form.details.confirm_accuracy = true;
    flow
}

/// Insert a pending request and its profile for a fresh account.
pub async fn seed_profile(
    backend: &MemoryBackend,
    email: &str,
    full_name: &str,
    role: Role,
) -> RoleProfile {
    let user = backend
        .register(email, PASSWORD, metadata(full_name))
        .expect("register");
    let request = backend
        .insert_request(NewRoleRequest {
            user_id: user.id.clone(),
            role,
        })
        .await
        .expect("request");
    let details = match role {
        Role::Carrier => RoleDetails::Carrier(CarrierDetails {
            truck_type: Some(TruckType::Flatbed),
            mc_number: Some("MC-1".to_string()),
            ..CarrierDetails::default()
        }),
        Role::Shipper => RoleDetails::Shipper(ShipperDetails {
            address: Some("1 Main St".to_string()),
            is_individual: true,
            ..ShipperDetails::default()
        }),
        Role::Broker => RoleDetails::Broker,
    };
    backend
        .insert_profile(NewRoleProfile {
            request_id: request.id,
            user_id: user.id,
            contact: ContactDetails {
                full_name: full_name.to_string(),
                company_name: None,
                phone: "1234567890".to_string(),
            },
            details,
        })
        .await
        .expect("profile")
}

/// One-shot failures injected in front of a [`MemoryBackend`].
#[derive(Default)]
pub struct Faults {
    pub sign_up: Option<AuthError>,
    pub current_session: Option<AuthError>,
    pub insert_request: Option<RepositoryError>,
    pub insert_profile: Option<RepositoryError>,
    pub update_status: Option<RepositoryError>,
    pub delete_profile: Option<RepositoryError>,
    pub delete_request: Option<RepositoryError>,
    pub insert_document: Option<RepositoryError>,
    pub delete_document: Option<RepositoryError>,
    pub upload_blob: Option<StorageError>,
    pub remove_blob: Option<StorageError>,
    /// Persistent: every load for these roles fails.
    pub unavailable_roles: BTreeSet<Role>,
    pub documents_unavailable: bool,
}

pub struct FlakyBackend {
    pub inner: Arc<MemoryBackend>,
    pub faults: Mutex<Faults>,
}

impl FlakyBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            faults: Mutex::new(Faults::default()),
        })
    }

    pub fn inject(&self, configure: impl FnOnce(&mut Faults)) {
        configure(&mut self.faults.lock().unwrap());
    }

    fn take<T>(&self, pick: impl FnOnce(&mut Faults) -> Option<T>) -> Option<T> {
        pick(&mut self.faults.lock().unwrap())
    }
}

pub fn unavailable() -> RepositoryError {
    RepositoryError::Unavailable("connection reset".to_string())
}

#[async_trait]
impl AuthService for FlakyBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: UserMetadata,
    ) -> Result<SignUpOutcome, AuthError> {
        if let Some(error) = self.take(|faults| faults.sign_up.take()) {
            return Err(error);
        }
        self.inner.sign_up(email, password, metadata).await
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        self.inner.sign_in(email, password).await
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        if let Some(error) = self.take(|faults| faults.current_session.take()) {
            return Err(error);
        }
        self.inner.current_session().await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.sign_out().await
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        self.inner.update_password(new_password).await
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.inner.request_password_reset(email).await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.inner.subscribe()
    }
}

#[async_trait]
impl RoleRepository for FlakyBackend {
    async fn insert_request(&self, request: NewRoleRequest) -> Result<RoleRequest, RepositoryError> {
        if let Some(error) = self.take(|faults| faults.insert_request.take()) {
            return Err(error);
        }
        self.inner.insert_request(request).await
    }

    async fn insert_profile(&self, profile: NewRoleProfile) -> Result<RoleProfile, RepositoryError> {
        if let Some(error) = self.take(|faults| faults.insert_profile.take()) {
            return Err(error);
        }
        self.inner.insert_profile(profile).await
    }

    async fn profiles_for_role(&self, role: Role) -> Result<Vec<ProfileRecord>, RepositoryError> {
        if self.take(|faults| faults.unavailable_roles.contains(&role).then_some(())).is_some() {
            return Err(unavailable());
        }
        self.inner.profiles_for_role(role).await
    }

    async fn requests_for_user(&self, user_id: &UserId) -> Result<Vec<RoleRequest>, RepositoryError> {
        self.inner.requests_for_user(user_id).await
    }

    async fn update_request_status(
        &self,
        id: &RoleRequestId,
        status: ModerationStatus,
    ) -> Result<(), RepositoryError> {
        if let Some(error) = self.take(|faults| faults.update_status.take()) {
            return Err(error);
        }
        self.inner.update_request_status(id, status).await
    }

    async fn delete_profile(&self, id: &ProfileId) -> Result<(), RepositoryError> {
        if let Some(error) = self.take(|faults| faults.delete_profile.take()) {
            return Err(error);
        }
        self.inner.delete_profile(id).await
    }

    async fn delete_request(&self, id: &RoleRequestId) -> Result<(), RepositoryError> {
        if let Some(error) = self.take(|faults| faults.delete_request.take()) {
            return Err(error);
        }
        self.inner.delete_request(id).await
    }

    async fn has_admin_grant(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        self.inner.has_admin_grant(user_id).await
    }
}

#[async_trait]
impl DocumentRepository for FlakyBackend {
    async fn list(&self, owner: &ProfileKey) -> Result<Vec<Document>, RepositoryError> {
        DocumentRepository::list(self.inner.as_ref(), owner).await
    }

    async fn list_for_role(&self, role: Role) -> Result<Vec<Document>, RepositoryError> {
        if self.take(|faults| faults.documents_unavailable.then_some(())).is_some() {
            return Err(unavailable());
        }
        self.inner.list_for_role(role).await
    }

    async fn insert(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        if let Some(error) = self.take(|faults| faults.insert_document.take()) {
            return Err(error);
        }
        DocumentRepository::insert(self.inner.as_ref(), document).await
    }

    async fn delete(&self, id: &DocumentId) -> Result<(), RepositoryError> {
        if let Some(error) = self.take(|faults| faults.delete_document.take()) {
            return Err(error);
        }
        DocumentRepository::delete(self.inner.as_ref(), id).await
    }
}

#[async_trait]
impl BlobStorage for FlakyBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        if let Some(error) = self.take(|faults| faults.upload_blob.take()) {
            return Err(error);
        }
        self.inner.upload(bucket, path, bytes, content_type).await
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        if let Some(error) = self.take(|faults| faults.remove_blob.take()) {
            return Err(error);
        }
        self.inner.remove(bucket, paths).await
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.inner.public_url(bucket, path)
    }
}
