use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{failure_message, repository_error, SupabaseClient};
use crate::workflows::roles::domain::{
    CarrierDetails, ContactDetails, Document, DocumentId, ModerationStatus, NewDocument,
    NewRoleProfile, NewRoleRequest, ProfileId, ProfileKey, ProfileRecord, Role, RoleDetails,
    RoleProfile, RoleRequest, RoleRequestId, ShipperDetails, TruckType, UserId,
};
use crate::workflows::roles::repository::{DocumentRepository, RepositoryError, RoleRepository};

const REQUESTS: &str = "role_requests";
const PROFILES: &str = "role_profiles";
const PROFILES_WITH_EMAIL: &str = "role_profiles_with_email";
const DOCUMENTS: &str = "role_documents";
const ADMIN_GRANTS: &str = "admin_grants";

/// Flat column layout shared by `role_profiles` and the combined view.
#[derive(Debug, Serialize, Deserialize)]
struct ProfileRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<ProfileId>,
    request_id: RoleRequestId,
    user_id: UserId,
    role: Role,
    full_name: Option<String>,
    company_name: Option<String>,
    phone: Option<String>,
    truck_type: Option<TruckType>,
    mc_number: Option<String>,
    usdot_number: Option<String>,
    operating_states: Option<String>,
    address: Option<String>,
    is_individual: Option<bool>,
    description: Option<String>,
    cargo_types: Option<String>,
    #[serde(skip_serializing)]
    status: Option<ModerationStatus>,
    #[serde(skip_serializing)]
    email: Option<String>,
    #[serde(skip_serializing)]
    documents_url: Option<Value>,
    #[serde(skip_serializing)]
    created_at: Option<DateTime<Utc>>,
}

impl From<NewRoleProfile> for ProfileRow {
    fn from(profile: NewRoleProfile) -> Self {
        let mut row = ProfileRow {
            id: None,
            request_id: profile.request_id,
            user_id: profile.user_id,
            role: profile.details.role(),
            full_name: Some(profile.contact.full_name),
            company_name: profile.contact.company_name,
            phone: Some(profile.contact.phone),
            truck_type: None,
            mc_number: None,
            usdot_number: None,
            operating_states: None,
            address: None,
            is_individual: None,
            description: None,
            cargo_types: None,
            status: None,
            email: None,
            documents_url: None,
            created_at: None,
        };
        match profile.details {
            RoleDetails::Carrier(carrier) => {
                row.truck_type = carrier.truck_type;
                row.mc_number = carrier.mc_number;
                row.usdot_number = carrier.usdot_number;
                row.operating_states = carrier.operating_states;
            }
            RoleDetails::Shipper(shipper) => {
                row.address = shipper.address;
                row.is_individual = Some(shipper.is_individual);
                row.description = shipper.description;
                row.cargo_types = shipper.cargo_types;
            }
            RoleDetails::Broker => {}
        }
        row
    }
}

impl ProfileRow {
    /// Columns belonging to another role are dropped here.
    fn into_record(self) -> Result<ProfileRecord, RepositoryError> {
        let (Some(id), Some(created_at)) = (self.id, self.created_at) else {
            return Err(RepositoryError::Unavailable(
                "profile row is missing id or created_at".to_string(),
            ));
        };
        let details = match self.role {
            Role::Carrier => RoleDetails::Carrier(CarrierDetails {
                truck_type: self.truck_type,
                mc_number: self.mc_number,
                usdot_number: self.usdot_number,
                operating_states: self.operating_states,
            }),
            Role::Shipper => RoleDetails::Shipper(ShipperDetails {
                address: self.address,
                is_individual: self.is_individual.unwrap_or(false),
                description: self.description,
                cargo_types: self.cargo_types,
            }),
            Role::Broker => RoleDetails::Broker,
        };
        Ok(ProfileRecord {
            profile: RoleProfile {
                id,
                request_id: self.request_id,
                user_id: self.user_id,
                contact: ContactDetails {
                    full_name: self.full_name.unwrap_or_default(),
                    company_name: self.company_name,
                    phone: self.phone.unwrap_or_default(),
                },
                details,
                status: self.status.unwrap_or_default(),
                created_at,
            },
            email: self.email,
            documents_url: self.documents_url,
        })
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

fn unavailable(error: reqwest::Error) -> RepositoryError {
    RepositoryError::Unavailable(error.to_string())
}

/// Send and decode the row array PostgREST answers with.
async fn rows<T: DeserializeOwned>(request: RequestBuilder) -> Result<Vec<T>, RepositoryError> {
    let response = request.send().await.map_err(unavailable)?;
    let status = response.status();
    if !status.is_success() {
        let message = failure_message(response).await;
        return Err(repository_error(status, message));
    }
    response.json().await.map_err(unavailable)
}

async fn single<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, RepositoryError> {
    rows(request)
        .await?
        .into_iter()
        .next()
        .ok_or(RepositoryError::NotFound)
}

impl SupabaseClient {
    fn returning(&self, method: Method, table: &str) -> RequestBuilder {
        self.rest(method, table)
            .header("Prefer", "return=representation")
    }
}

#[async_trait]
impl RoleRepository for SupabaseClient {
    async fn insert_request(&self, request: NewRoleRequest) -> Result<RoleRequest, RepositoryError> {
        let body = json!({
            "user_id": request.user_id,
            "role": request.role,
            "status": ModerationStatus::Pending,
        });
        single(self.returning(Method::POST, REQUESTS).json(&body)).await
    }

    async fn insert_profile(&self, profile: NewRoleProfile) -> Result<RoleProfile, RepositoryError> {
        let row: ProfileRow =
            single(self.returning(Method::POST, PROFILES).json(&ProfileRow::from(profile))).await?;
        Ok(row.into_record()?.profile)
    }

    async fn profiles_for_role(&self, role: Role) -> Result<Vec<ProfileRecord>, RepositoryError> {
        let request = self.rest(Method::GET, PROFILES_WITH_EMAIL).query(&[
            ("select", "*".to_string()),
            ("role", eq(role)),
            ("order", "created_at.desc".to_string()),
        ]);
        rows::<ProfileRow>(request)
            .await?
            .into_iter()
            .map(ProfileRow::into_record)
            .collect()
    }

    async fn requests_for_user(&self, user_id: &UserId) -> Result<Vec<RoleRequest>, RepositoryError> {
        let request = self.rest(Method::GET, REQUESTS).query(&[
            ("select", "*".to_string()),
            ("user_id", eq(user_id)),
        ]);
        rows(request).await
    }

    async fn update_request_status(
        &self,
        id: &RoleRequestId,
        status: ModerationStatus,
    ) -> Result<(), RepositoryError> {
        let request = self
            .returning(Method::PATCH, REQUESTS)
            .query(&[("id", eq(id))])
            .json(&json!({ "status": status }));
        single::<RoleRequest>(request).await.map(|_| ())
    }

    async fn delete_profile(&self, id: &ProfileId) -> Result<(), RepositoryError> {
        let request = self
            .returning(Method::DELETE, PROFILES)
            .query(&[("id", eq(id))]);
        single::<Value>(request).await.map(|_| ())
    }

    async fn delete_request(&self, id: &RoleRequestId) -> Result<(), RepositoryError> {
        let request = self
            .returning(Method::DELETE, REQUESTS)
            .query(&[("id", eq(id))]);
        single::<Value>(request).await.map(|_| ())
    }

    async fn has_admin_grant(&self, user_id: &UserId) -> Result<bool, RepositoryError> {
        let request = self.rest(Method::GET, ADMIN_GRANTS).query(&[
            ("select", "user_id".to_string()),
            ("user_id", eq(user_id)),
        ]);
        Ok(!rows::<Value>(request).await?.is_empty())
    }
}

#[async_trait]
impl DocumentRepository for SupabaseClient {
    async fn list(&self, owner: &ProfileKey) -> Result<Vec<Document>, RepositoryError> {
        let request = self.rest(Method::GET, DOCUMENTS).query(&[
            ("select", "*".to_string()),
            ("user_id", eq(&owner.user_id)),
            ("role", eq(owner.role)),
            ("order", "uploaded_at.desc".to_string()),
        ]);
        rows(request).await
    }

    async fn list_for_role(&self, role: Role) -> Result<Vec<Document>, RepositoryError> {
        let request = self.rest(Method::GET, DOCUMENTS).query(&[
            ("select", "*".to_string()),
            ("role", eq(role)),
            ("order", "uploaded_at.desc".to_string()),
        ]);
        rows(request).await
    }

    async fn insert(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        single(self.returning(Method::POST, DOCUMENTS).json(&document)).await
    }

    async fn delete(&self, id: &DocumentId) -> Result<(), RepositoryError> {
        let request = self
            .returning(Method::DELETE, DOCUMENTS)
            .query(&[("id", eq(id))]);
        single::<Value>(request).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn combined_view_row_becomes_carrier_record() {
        let row: ProfileRow = serde_json::from_value(json!({
            "id": "p-1",
            "request_id": "r-1",
            "user_id": "u-1",
            "role": "carrier",
            "full_name": "Dana Hauler",
            "company_name": null,
            "phone": "+12025550100",
            "truck_type": "Reefer",
            "mc_number": "MC-7",
            "usdot_number": null,
            "operating_states": "TX, OK",
            "address": "ignored for carriers",
            "is_individual": null,
            "status": "approved",
            "email": "dana@example.com",
            "documents_url": "[\"https://cdn.example.com/a.png\"]",
            "created_at": "2024-05-01T08:00:00Z"
        }))
        .expect("row");

        let record = row.into_record().expect("record");
        assert_eq!(record.profile.status, ModerationStatus::Approved);
        assert_eq!(record.email.as_deref(), Some("dana@example.com"));
        assert_eq!(
            record.profile.details,
            RoleDetails::Carrier(CarrierDetails {
                truck_type: Some(TruckType::Reefer),
                mc_number: Some("MC-7".to_string()),
                usdot_number: None,
                operating_states: Some("TX, OK".to_string()),
            })
        );
    }

    #[test]
    fn insert_payload_omits_server_columns() {
        let payload = serde_json::to_value(ProfileRow::from(NewRoleProfile {
            request_id: RoleRequestId("r-1".to_string()),
            user_id: UserId("u-1".to_string()),
            contact: ContactDetails {
                full_name: "Sam Shipper".to_string(),
                company_name: None,
                phone: "1234567890".to_string(),
            },
            details: RoleDetails::Shipper(ShipperDetails {
                is_individual: true,
                ..ShipperDetails::default()
            }),
        }))
        .expect("serialize");

        assert_eq!(payload["role"], json!("shipper"));
        assert_eq!(payload["is_individual"], json!(true));
        assert!(payload.get("id").is_none());
        assert!(payload.get("status").is_none());
        assert!(payload.get("created_at").is_none());
    }

    #[test]
    fn row_without_id_is_rejected() {
        let row: ProfileRow = serde_json::from_value(json!({
            "request_id": "r-1",
            "user_id": "u-1",
            "role": "broker"
        }))
        .expect("row");
        assert!(matches!(
            row.into_record(),
            Err(RepositoryError::Unavailable(_))
        ));
    }
}
