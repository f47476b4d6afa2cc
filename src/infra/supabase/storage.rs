use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::json;
use tracing::debug;

use super::{failure_message, storage_error, SupabaseClient};
use crate::workflows::roles::repository::{BlobStorage, StorageError};

fn unavailable(error: reqwest::Error) -> StorageError {
    StorageError::Unavailable(error.to_string())
}

#[async_trait]
impl BlobStorage for SupabaseClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let size = bytes.len();
        let response = self
            .request(
                Method::POST,
                self.endpoint(&["storage", "v1", "object", bucket, path]),
            )
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(unavailable)?;
        let status = response.status();
        if !status.is_success() {
            let message = failure_message(response).await;
            return Err(storage_error(status, message));
        }
        debug!(bucket, path, size, "object stored");
        Ok(())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        let response = self
            .request(
                Method::DELETE,
                self.endpoint(&["storage", "v1", "object", bucket]),
            )
            .json(&json!({ "prefixes": paths }))
            .send()
            .await
            .map_err(unavailable)?;
        let status = response.status();
        if !status.is_success() {
            let message = failure_message(response).await;
            return Err(storage_error(status, message));
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.endpoint(&["storage", "v1", "object", "public", bucket, path])
            .to_string()
    }
}
