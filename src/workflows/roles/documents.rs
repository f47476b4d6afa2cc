use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::domain::{Document, DocumentId, NewDocument, ProfileKey, Role, User};
use super::notice::Notice;
use super::repository::{BlobStorage, DocumentRepository, RepositoryError, StorageError};

pub const DEFAULT_MAX_DOCUMENTS: usize = 5;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 15 * 1024 * 1024;
const DEFAULT_EXTENSIONS: [&str; 4] = ["pdf", "jpg", "jpeg", "png"];

/// Limits applied to evidence files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPolicy {
    pub max_documents: usize,
    pub max_file_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for DocumentPolicy {
    fn default() -> Self {
        Self {
            max_documents: DEFAULT_MAX_DOCUMENTS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

impl DocumentPolicy {
    /// Returns the lowercase extension of an acceptable file.
    pub fn check(&self, file: &UploadFile) -> Result<String, InvalidFile> {
        let extension = file.extension().ok_or(InvalidFile::MissingExtension)?;
        if !self
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(InvalidFile::UnsupportedType(extension));
        }
        if file.bytes.is_empty() {
            return Err(InvalidFile::Empty);
        }
        if file.size() > self.max_file_bytes {
            return Err(InvalidFile::TooLarge {
                size: file.size(),
                limit: self.max_file_bytes,
            });
        }
        Ok(extension)
    }
}

/// File picked by the user, held in memory until uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn extension(&self) -> Option<String> {
        let (stem, extension) = self.name.trim().rsplit_once('.')?;
        if stem.is_empty() || extension.is_empty() {
            return None;
        }
        Some(extension.to_ascii_lowercase())
    }

    pub fn content_type(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("size", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFile {
    #[error("file has no extension")]
    MissingExtension,
    #[error("'.{0}' files are not accepted; upload a PDF, JPG, or PNG")]
    UnsupportedType(String),
    #[error("file is empty")]
    Empty,
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("a profile can hold at most {limit} documents")]
    QuotaExceeded { limit: usize },
    #[error(transparent)]
    InvalidFile(#[from] InvalidFile),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("document is not attached to this profile")]
    UnknownDocument,
}

impl DocumentError {
    pub fn user_message(&self) -> String {
        match self {
            DocumentError::QuotaExceeded { limit } => {
                format!("Document limit reached ({limit} files)")
            }
            DocumentError::InvalidFile(reason) => format!("File rejected: {reason}"),
            DocumentError::Storage(_) | DocumentError::Repository(_) => {
                format!("Upload service error: {self}")
            }
            DocumentError::UnknownDocument => "Document not found".to_string(),
        }
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Uploads evidence files for a role profile and keeps blob storage and metadata in step.
///
/// An upload writes the blob first and the metadata row second. When the row cannot be written
/// the blob is removed again so no orphaned file is left behind.
pub struct DocumentUploadManager<D: ?Sized, B: ?Sized> {
    documents: Arc<D>,
    storage: Arc<B>,
    policy: DocumentPolicy,
    clock: Clock,
}

impl<D, B> DocumentUploadManager<D, B>
where
    D: DocumentRepository + ?Sized,
    B: BlobStorage + ?Sized,
{
    pub fn new(documents: Arc<D>, storage: Arc<B>, policy: DocumentPolicy) -> Self {
        Self {
            documents,
            storage,
            policy,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the timestamp source used for storage paths and upload times.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn policy(&self) -> &DocumentPolicy {
        &self.policy
    }

    pub async fn list_documents(&self, owner: &ProfileKey) -> Result<Vec<Document>, DocumentError> {
        Ok(self.documents.list(owner).await?)
    }

    pub async fn upload_document(
        &self,
        file: UploadFile,
        role: Role,
        user: &User,
    ) -> Result<Document, DocumentError> {
        let extension = self.policy.check(&file)?;

        let owner = ProfileKey {
            user_id: user.id.clone(),
            role,
        };
        let existing = self.documents.list(&owner).await?;
        if existing.len() >= self.policy.max_documents {
            debug!(user_id = %user.id, %role, count = existing.len(), "document quota reached");
            return Err(DocumentError::QuotaExceeded {
                limit: self.policy.max_documents,
            });
        }

        let uploaded_at = (self.clock)();
        let bucket = role.document_bucket();
        let path = storage_path(role, user, uploaded_at, &extension);
        let content_type = file.content_type();

        self.storage
            .upload(&bucket, &path, file.bytes, &content_type)
            .await?;

        let row = NewDocument {
            user_id: user.id.clone(),
            role,
            filename: file.name,
            path: path.clone(),
            bucket: bucket.clone(),
            uploaded_at,
        };
        match self.documents.insert(row).await {
            Ok(document) => {
                info!(document_id = %document.id, %bucket, %path, "document uploaded");
                Ok(document)
            }
            Err(insert_error) => {
                if let Err(cleanup_error) = self.storage.remove(&bucket, &[path.clone()]).await {
                    warn!(
                        %bucket,
                        %path,
                        error = %cleanup_error,
                        "failed to remove blob after metadata insert failed"
                    );
                }
                Err(insert_error.into())
            }
        }
    }

    /// Delete the blob, then its metadata row.
    pub async fn remove_document(&self, document: &Document) -> Result<(), DocumentError> {
        self.storage
            .remove(&document.bucket, &[document.path.clone()])
            .await?;
        if let Err(delete_error) = self.documents.delete(&document.id).await {
            error!(
                document_id = %document.id,
                error = %delete_error,
                "blob removed but metadata row remains"
            );
            return Err(delete_error.into());
        }
        info!(document_id = %document.id, "document removed");
        Ok(())
    }

    pub fn document_url(&self, document: &Document) -> String {
        self.storage.public_url(&document.bucket, &document.path)
    }
}

/// `{role}_{name}_{millis}.{ext}`, with the user's name lowercased, whitespace runs collapsed
/// to `_`, and anything outside `[a-z0-9_-]` dropped.
pub fn storage_path(role: Role, user: &User, at: DateTime<Utc>, extension: &str) -> String {
    let name = user
        .full_name()
        .map(sanitize_name)
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    format!("{role}_{name}_{}.{extension}", at.timestamp_millis())
}

fn sanitize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|part| {
            part.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Document list for one profile as shown on the account page, with its pending notices.
/// The list is refreshed from the repository only after a successful change.
pub struct DocumentPanel<D: ?Sized, B: ?Sized> {
    manager: DocumentUploadManager<D, B>,
    user: User,
    owner: ProfileKey,
    documents: Vec<Document>,
    notices: Vec<Notice>,
}

impl<D, B> DocumentPanel<D, B>
where
    D: DocumentRepository + ?Sized,
    B: BlobStorage + ?Sized,
{
    pub async fn open(
        manager: DocumentUploadManager<D, B>,
        user: User,
        role: Role,
    ) -> Result<Self, DocumentError> {
        let owner = ProfileKey {
            user_id: user.id.clone(),
            role,
        };
        let documents = manager.list_documents(&owner).await?;
        Ok(Self {
            manager,
            user,
            owner,
            documents,
            notices: Vec::new(),
        })
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn can_upload(&self) -> bool {
        self.documents.len() < self.manager.policy().max_documents
    }

    pub fn document_url(&self, document: &Document) -> String {
        self.manager.document_url(document)
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub async fn refresh(&mut self) -> Result<(), DocumentError> {
        self.documents = self.manager.list_documents(&self.owner).await?;
        Ok(())
    }

    pub async fn upload(&mut self, file: UploadFile) -> Result<Document, DocumentError> {
        match self
            .manager
            .upload_document(file, self.owner.role, &self.user)
            .await
        {
            Ok(document) => {
                self.notices.push(Notice::success("File uploaded"));
                self.refresh_after_change().await;
                Ok(document)
            }
            Err(error) => {
                self.notices.push(Notice::error(error.user_message()));
                Err(error)
            }
        }
    }

    pub async fn remove(&mut self, id: &DocumentId) -> Result<(), DocumentError> {
        let Some(document) = self.documents.iter().find(|doc| &doc.id == id).cloned() else {
            self.notices.push(Notice::error(DocumentError::UnknownDocument.user_message()));
            return Err(DocumentError::UnknownDocument);
        };
        match self.manager.remove_document(&document).await {
            Ok(()) => {
                self.notices.push(Notice::success("File removed"));
                self.refresh_after_change().await;
                Ok(())
            }
            Err(error) => {
                self.notices
                    .push(Notice::error(format!("Could not remove file: {error}")));
                Err(error)
            }
        }
    }

    async fn refresh_after_change(&mut self) {
        if let Err(error) = self.refresh().await {
            warn!(%error, "document list refresh failed");
            self.notices.push(Notice::error(error.user_message()));
        }
    }
}
