use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::domain::{
    Document, ModerationStatus, ProfileId, ProfileKey, ProfileRecord, Role, RoleDetails,
    RoleRequestId, User, UserId,
};
use super::notice::Notice;
use super::repository::{BlobStorage, DocumentRepository, RepositoryError, RoleRepository};
use super::session::SessionProvider;
use super::status::{ModerationAction, Transition, TransitionError};

const EMPTY_FIELD: &str = "—";

/// Placeholder for absent optional fields.
pub fn display_or_dash(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => EMPTY_FIELD.to_string(),
    }
}

/// Link to an evidence file as rendered in the expanded row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentLink {
    pub name: String,
    pub url: String,
    pub is_image: bool,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl DocumentLink {
    fn from_url(url: String) -> Self {
        let name = url
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .unwrap_or(url.as_str())
            .to_string();
        Self {
            is_image: looks_like_image(&name),
            name,
            url,
            uploaded_at: None,
        }
    }
}

fn looks_like_image(name: &str) -> bool {
    mime_guess::from_path(name)
        .first()
        .is_some_and(|mime| mime.type_() == mime_guess::mime::IMAGE)
}

/// Uniform row shape every loading strategy is normalized into.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    pub id: ProfileId,
    pub request_id: RoleRequestId,
    pub user_id: UserId,
    pub role: Role,
    pub full_name: String,
    pub company_name: Option<String>,
    pub email: Option<String>,
    pub phone: String,
    pub status: ModerationStatus,
    pub created_at: DateTime<Utc>,
    pub details: RoleDetails,
    pub documents: Vec<DocumentLink>,
}

impl ProfileView {
    pub fn available_actions(&self) -> &'static [ModerationAction] {
        self.status.available_actions()
    }

    /// Label/value pairs revealed when the row is expanded.
    pub fn detail_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("Company", display_or_dash(self.company_name.as_deref())),
            ("E-mail", display_or_dash(self.email.as_deref())),
            ("Phone", display_or_dash(Some(self.phone.as_str()))),
        ];
        match &self.details {
            RoleDetails::Carrier(carrier) => {
                fields.push((
                    "Truck type",
                    display_or_dash(carrier.truck_type.map(|kind| kind.label())),
                ));
                fields.push(("MC number", display_or_dash(carrier.mc_number.as_deref())));
                fields.push((
                    "USDOT number",
                    display_or_dash(carrier.usdot_number.as_deref()),
                ));
                fields.push((
                    "Operating states",
                    display_or_dash(carrier.operating_states.as_deref()),
                ));
            }
            RoleDetails::Shipper(shipper) => {
                let kind = if shipper.is_individual {
                    "Individual"
                } else {
                    "Company"
                };
                fields.push(("Address", display_or_dash(shipper.address.as_deref())));
                fields.push(("Shipper type", kind.to_string()));
                fields.push((
                    "Description",
                    display_or_dash(shipper.description.as_deref()),
                ));
                fields.push((
                    "Cargo types",
                    display_or_dash(shipper.cargo_types.as_deref()),
                ));
            }
            RoleDetails::Broker => {}
        }
        fields
    }
}

/// Older clients stored links directly on the profile as a JSON array, a JSON-encoded array
/// string, or one bare URL.
pub fn parse_legacy_document_urls(raw: Option<&Value>) -> Vec<String> {
    fn strings(items: &[Value]) -> Vec<String> {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }

    match raw {
        Some(Value::Array(items)) => strings(items),
        Some(Value::String(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Vec::new();
            }
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => strings(&items),
                Ok(_) => Vec::new(),
                Err(_) => vec![text.to_string()],
            }
        }
        _ => Vec::new(),
    }
}

/// Merge a combined-view row with the documents stored for its owner.
pub fn normalize_profile<B>(record: ProfileRecord, documents: &[Document], storage: &B) -> ProfileView
where
    B: BlobStorage + ?Sized,
{
    let ProfileRecord {
        profile,
        email,
        documents_url,
    } = record;
    let role = profile.role();

    let mut links: Vec<DocumentLink> = documents
        .iter()
        .filter(|document| document.user_id == profile.user_id && document.role == role)
        .map(|document| DocumentLink {
            name: document.filename.clone(),
            url: storage.public_url(&document.bucket, &document.path),
            is_image: looks_like_image(&document.path),
            uploaded_at: Some(document.uploaded_at),
        })
        .collect();
    for url in parse_legacy_document_urls(documents_url.as_ref()) {
        if !links.iter().any(|link| link.url == url) {
            links.push(DocumentLink::from_url(url));
        }
    }

    ProfileView {
        id: profile.id,
        request_id: profile.request_id,
        user_id: profile.user_id,
        role,
        full_name: profile.contact.full_name,
        company_name: profile.contact.company_name,
        email: email.filter(|email| !email.trim().is_empty()),
        phone: profile.contact.phone,
        status: profile.status,
        created_at: profile.created_at,
        details: profile.details,
        documents: links,
    }
}

/// Either every value or exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter<T> {
    All,
    Only(T),
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Filter::All
    }
}

impl<T: PartialEq> Filter<T> {
    pub fn matches(&self, value: &T) -> bool {
        match self {
            Filter::All => true,
            Filter::Only(wanted) => wanted == value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    FullName,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn toggled(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortOrder {
    fn default() -> Self {
        Self {
            key: SortKey::CreatedAt,
            direction: SortDirection::Descending,
        }
    }
}

impl SortOrder {
    fn compare(&self, left: &ProfileView, right: &ProfileView) -> Ordering {
        let ordering = match self.key {
            SortKey::FullName => compare_names(&left.full_name, &right.full_name),
            SortKey::CreatedAt => left.created_at.cmp(&right.created_at),
        };
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

/// Case-insensitive, with a raw tiebreak. Accents are not folded, so "Émile" sorts after "Zed".
fn compare_names(left: &str, right: &str) -> Ordering {
    let folded = |name: &str| name.trim().to_lowercase();
    folded(left)
        .cmp(&folded(right))
        .then_with(|| left.cmp(right))
}

/// Action awaiting the moderator's answer in the confirmation modal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub profile_id: ProfileId,
    pub action: ModerationAction,
}

impl PendingAction {
    pub fn prompt(&self) -> &'static str {
        self.action.confirmation_prompt()
    }
}

/// A role whose rows could not be loaded; the other roles are still shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub role: Role,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("sign in to moderate profiles")]
    Unauthenticated,
    #[error("this account is not allowed to moderate profiles")]
    Forbidden,
    #[error("profile {0} is not in the table")]
    UnknownProfile(ProfileId),
    #[error(transparent)]
    ActionUnavailable(#[from] TransitionError),
    #[error("no action is awaiting confirmation")]
    NothingToConfirm,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Tentative change to the loaded rows together with what undoes it.
enum RowPatch {
    Status {
        index: usize,
        previous: ModerationStatus,
    },
    Removal {
        index: usize,
        row: ProfileView,
    },
}

impl RowPatch {
    /// `index` must point at a loaded row.
    fn apply(rows: &mut Vec<ProfileView>, index: usize, transition: Transition) -> Self {
        match transition {
            Transition::Status(next) => {
                let previous = std::mem::replace(&mut rows[index].status, next);
                RowPatch::Status { index, previous }
            }
            Transition::Removed => RowPatch::Removal {
                index,
                row: rows.remove(index),
            },
        }
    }

    fn revert(self, rows: &mut Vec<ProfileView>) {
        match self {
            RowPatch::Status { index, previous } => {
                if let Some(row) = rows.get_mut(index) {
                    row.status = previous;
                }
            }
            RowPatch::Removal { index, row } => {
                let index = index.min(rows.len());
                rows.insert(index, row);
            }
        }
    }
}

struct RoleLoad {
    role: Role,
    profiles: Result<Vec<ProfileRecord>, RepositoryError>,
    documents: Result<Vec<Document>, RepositoryError>,
}

/// Moderator dashboard over every role profile.
///
/// Filtering and sorting are recomputed from the loaded rows and never refetch. Status changes
/// are applied to the rows before the remote call and reverted if it fails.
pub struct ModerationTable<R: ?Sized, D: ?Sized, B: ?Sized> {
    roles: Arc<R>,
    documents: Arc<D>,
    storage: Arc<B>,
    moderator: User,
    rows: Vec<ProfileView>,
    failures: Vec<LoadFailure>,
    role_filter: Filter<Role>,
    status_filter: Filter<ModerationStatus>,
    sort: SortOrder,
    expanded: Option<ProfileId>,
    preview: Option<String>,
    pending: Option<PendingAction>,
    notices: Vec<Notice>,
}

impl<R, D, B> ModerationTable<R, D, B>
where
    R: RoleRepository + ?Sized,
    D: DocumentRepository + ?Sized,
    B: BlobStorage + ?Sized,
{
    /// Only accounts holding an admin grant may open the table.
    pub async fn open(
        session: &SessionProvider,
        roles: Arc<R>,
        documents: Arc<D>,
        storage: Arc<B>,
    ) -> Result<Self, ModerationError> {
        let moderator = session
            .current_user()
            .ok_or(ModerationError::Unauthenticated)?;
        if !roles.has_admin_grant(&moderator.id).await? {
            warn!(user_id = %moderator.id, "moderation table refused: no admin grant");
            return Err(ModerationError::Forbidden);
        }

        Ok(Self {
            roles,
            documents,
            storage,
            moderator,
            rows: Vec::new(),
            failures: Vec::new(),
            role_filter: Filter::All,
            status_filter: Filter::All,
            sort: SortOrder::default(),
            expanded: None,
            preview: None,
            pending: None,
            notices: Vec::new(),
        })
    }

    pub fn moderator(&self) -> &User {
        &self.moderator
    }

    /// Fetch every role's profiles and documents concurrently. A failing role is reported and
    /// skipped; the rows of the others are kept.
    pub async fn load(&mut self) -> &[LoadFailure] {
        let (shippers, carriers, brokers) = tokio::join!(
            self.load_role(Role::Shipper),
            self.load_role(Role::Carrier),
            self.load_role(Role::Broker),
        );

        let mut rows = Vec::new();
        let mut failures = Vec::new();
        for outcome in [shippers, carriers, brokers] {
            let role = outcome.role;
            let records = match outcome.profiles {
                Ok(records) => records,
                Err(error) => {
                    error!(%role, %error, "failed to load role profiles");
                    self.notices
                        .push(Notice::error(format!("Could not load {role} profiles: {error}")));
                    failures.push(LoadFailure {
                        role,
                        message: error.to_string(),
                    });
                    continue;
                }
            };
            let documents = match outcome.documents {
                Ok(documents) => documents,
                Err(error) => {
                    warn!(%role, %error, "failed to load documents; showing profiles without them");
                    self.notices.push(Notice::error(format!(
                        "Could not load {role} documents: {error}"
                    )));
                    failures.push(LoadFailure {
                        role,
                        message: error.to_string(),
                    });
                    Vec::new()
                }
            };
            rows.extend(
                records
                    .into_iter()
                    .map(|record| normalize_profile(record, &documents, self.storage.as_ref())),
            );
        }

        info!(rows = rows.len(), failed = failures.len(), "moderation table loaded");
        self.rows = rows;
        self.failures = failures;
        if let Some(expanded) = &self.expanded {
            if !self.rows.iter().any(|row| &row.id == expanded) {
                self.expanded = None;
                self.preview = None;
            }
        }
        &self.failures
    }

    async fn load_role(&self, role: Role) -> RoleLoad {
        let (profiles, documents) = tokio::join!(
            self.roles.profiles_for_role(role),
            self.documents.list_for_role(role),
        );
        RoleLoad {
            role,
            profiles,
            documents,
        }
    }

    pub fn rows(&self) -> &[ProfileView] {
        &self.rows
    }

    pub fn row(&self, id: &ProfileId) -> Option<&ProfileView> {
        self.rows.iter().find(|row| &row.id == id)
    }

    pub fn load_failures(&self) -> &[LoadFailure] {
        &self.failures
    }

    /// Rows passing both filters, in the active sort order. Ties keep load order.
    pub fn visible_rows(&self) -> Vec<&ProfileView> {
        let mut visible: Vec<&ProfileView> = self
            .rows
            .iter()
            .filter(|row| self.role_filter.matches(&row.role))
            .filter(|row| self.status_filter.matches(&row.status))
            .collect();
        visible.sort_by(|left, right| self.sort.compare(left, right));
        visible
    }

    pub fn set_role_filter(&mut self, filter: Filter<Role>) {
        self.role_filter = filter;
    }

    pub fn set_status_filter(&mut self, filter: Filter<ModerationStatus>) {
        self.status_filter = filter;
    }

    pub fn role_filter(&self) -> Filter<Role> {
        self.role_filter
    }

    pub fn status_filter(&self) -> Filter<ModerationStatus> {
        self.status_filter
    }

    /// Same column flips the direction; a new column starts ascending.
    pub fn sort_by(&mut self, key: SortKey) {
        self.sort = if self.sort.key == key {
            SortOrder {
                key,
                direction: self.sort.direction.toggled(),
            }
        } else {
            SortOrder {
                key,
                direction: SortDirection::Ascending,
            }
        };
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort
    }

    /// Expand the row, collapsing any other; toggling the expanded row collapses it.
    pub fn toggle_row(&mut self, id: &ProfileId) {
        if self.expanded.as_ref() == Some(id) {
            self.expanded = None;
        } else if self.row(id).is_some() {
            self.expanded = Some(id.clone());
        }
        self.preview = None;
    }

    pub fn expanded_row(&self) -> Option<&ProfileView> {
        self.expanded.as_ref().and_then(|id| self.row(id))
    }

    /// Open the full-size overlay for an image shown in the expanded row.
    pub fn open_preview(&mut self, url: &str) -> bool {
        let shown = self
            .expanded_row()
            .is_some_and(|row| row.documents.iter().any(|doc| doc.is_image && doc.url == url));
        if shown {
            self.preview = Some(url.to_string());
        }
        shown
    }

    pub fn close_preview(&mut self) {
        self.preview = None;
    }

    pub fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    pub fn available_actions(&self, id: &ProfileId) -> &'static [ModerationAction] {
        self.row(id)
            .map(ProfileView::available_actions)
            .unwrap_or(&[])
    }

    /// Open the confirmation modal. Actions the row does not offer are refused without any
    /// remote call.
    pub fn request_action(
        &mut self,
        id: &ProfileId,
        action: ModerationAction,
    ) -> Result<&PendingAction, ModerationError> {
        let row = self
            .row(id)
            .ok_or_else(|| ModerationError::UnknownProfile(id.clone()))?;
        row.status.apply(action)?;

        Ok(self.pending.insert(PendingAction {
            profile_id: id.clone(),
            action,
        }))
    }

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    /// Close the modal; nothing is sent.
    pub fn cancel_confirmation(&mut self) -> Option<PendingAction> {
        let cancelled = self.pending.take();
        if let Some(pending) = &cancelled {
            debug!(profile_id = %pending.profile_id, action = pending.action.label(), "moderation cancelled");
        }
        cancelled
    }

    /// Apply the confirmed action locally, send it, and undo the local change if the backend
    /// refuses.
    pub async fn confirm(&mut self) -> Result<Transition, ModerationError> {
        let pending = self
            .pending
            .take()
            .ok_or(ModerationError::NothingToConfirm)?;
        let index = self
            .rows
            .iter()
            .position(|row| row.id == pending.profile_id)
            .ok_or_else(|| ModerationError::UnknownProfile(pending.profile_id.clone()))?;

        let row = &self.rows[index];
        let transition = row.status.apply(pending.action)?;
        let request_id = row.request_id.clone();
        let profile_id = row.id.clone();
        let owner = ProfileKey {
            user_id: row.user_id.clone(),
            role: row.role,
        };

        let patch = RowPatch::apply(&mut self.rows, index, transition);
        let result = match transition {
            Transition::Status(next) => self.roles.update_request_status(&request_id, next).await,
            Transition::Removed => self.roles.delete_profile(&profile_id).await,
        };

        match result {
            Ok(()) => {
                info!(
                    %profile_id,
                    action = pending.action.label(),
                    moderator = %self.moderator.id,
                    "moderation action applied"
                );
                if transition == Transition::Removed && self.expanded.as_ref() == Some(&profile_id)
                {
                    self.expanded = None;
                    self.preview = None;
                }
                self.notices
                    .push(Notice::success(pending.action.success_message()));
                if transition == Transition::Removed {
                    self.remove_leftovers(&owner, &request_id).await;
                }
                Ok(transition)
            }
            Err(error) => {
                patch.revert(&mut self.rows);
                error!(
                    %profile_id,
                    action = pending.action.label(),
                    %error,
                    "moderation action failed; row restored"
                );
                self.notices.push(Notice::error(format!(
                    "Could not {} profile: {error}",
                    pending.action.label()
                )));
                Err(error.into())
            }
        }
    }

    /// Once the profile row is gone, drop its documents (blob first, then row) and the owning
    /// request so the user may apply for the role again. Failures are logged and reported; the
    /// profile stays deleted.
    async fn remove_leftovers(&mut self, owner: &ProfileKey, request_id: &RoleRequestId) {
        let mut complete = true;
        match self.documents.list(owner).await {
            Ok(documents) => {
                for document in documents {
                    if let Err(error) = self
                        .storage
                        .remove(&document.bucket, &[document.path.clone()])
                        .await
                    {
                        warn!(document_id = %document.id, %error, "blob of deleted profile kept");
                        complete = false;
                        continue;
                    }
                    if let Err(error) = self.documents.delete(&document.id).await {
                        error!(
                            document_id = %document.id,
                            %error,
                            "blob removed but metadata row remains"
                        );
                        complete = false;
                    }
                }
            }
            Err(error) => {
                warn!(
                    user_id = %owner.user_id,
                    role = %owner.role,
                    %error,
                    "documents of deleted profile not listed"
                );
                complete = false;
            }
        }
        if let Err(error) = self.roles.delete_request(request_id).await {
            error!(%request_id, %error, "request of deleted profile remains");
            complete = false;
        }
        if !complete {
            self.notices.push(Notice::error(
                "Profile deleted, but some of its files or its request could not be removed",
            ));
        }
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}
