use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier issued by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleRequestId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

macro_rules! display_id {
    ($($ty:ty),+) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })+
    };
}

display_id!(UserId, RoleRequestId, ProfileId, DocumentId);

/// Opaque account owned by the auth service; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl User {
    /// Name recorded at sign-up, falling back to the provider display name.
    pub fn full_name(&self) -> Option<&str> {
        self.metadata
            .get("full_name")
            .and_then(serde_json::Value::as_str)
            .or(self.display_name.as_deref())
            .filter(|name| !name.trim().is_empty())
    }
}

/// Authenticated session as handed out by the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Marketplace roles a user can apply for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Shipper,
    Carrier,
    Broker,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Shipper, Role::Carrier, Role::Broker];

    pub const fn label(self) -> &'static str {
        match self {
            Role::Shipper => "shipper",
            Role::Carrier => "carrier",
            Role::Broker => "broker",
        }
    }

    /// Storage bucket holding evidence files for this role.
    pub fn document_bucket(self) -> String {
        format!("{}-documents", self.label())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shipper" => Ok(Role::Shipper),
            "carrier" => Ok(Role::Carrier),
            "broker" => Ok(Role::Broker),
            _ => Err(UnknownVariant(value.to_string())),
        }
    }
}

/// Moderation state shared by a role request and its profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ModerationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Approved => "approved",
            ModerationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModerationStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ModerationStatus::Pending),
            "approved" => Ok(ModerationStatus::Approved),
            "rejected" => Ok(ModerationStatus::Rejected),
            _ => Err(UnknownVariant(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized value '{0}'")]
pub struct UnknownVariant(pub String);

/// A user's claim to act in a role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRequest {
    pub id: RoleRequestId,
    pub user_id: UserId,
    pub role: Role,
    pub status: ModerationStatus,
    pub created_at: DateTime<Utc>,
}

/// Insert payload; new requests always start out pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoleRequest {
    pub user_id: UserId,
    pub role: Role,
}

/// Equipment classes offered to carriers during onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TruckType {
    Flatbed,
    #[serde(rename = "Dry Van")]
    DryVan,
    Reefer,
    #[serde(rename = "Step Deck")]
    StepDeck,
    #[serde(rename = "Box Truck")]
    BoxTruck,
    #[serde(rename = "Power Only")]
    PowerOnly,
    Hotshot,
    Tanker,
}

impl TruckType {
    pub const ALL: [TruckType; 8] = [
        TruckType::Flatbed,
        TruckType::DryVan,
        TruckType::Reefer,
        TruckType::StepDeck,
        TruckType::BoxTruck,
        TruckType::PowerOnly,
        TruckType::Hotshot,
        TruckType::Tanker,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            TruckType::Flatbed => "Flatbed",
            TruckType::DryVan => "Dry Van",
            TruckType::Reefer => "Reefer",
            TruckType::StepDeck => "Step Deck",
            TruckType::BoxTruck => "Box Truck",
            TruckType::PowerOnly => "Power Only",
            TruckType::Hotshot => "Hotshot",
            TruckType::Tanker => "Tanker",
        }
    }
}

impl FromStr for TruckType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        TruckType::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownVariant(value.to_string()))
    }
}

/// Contact block shared by every role profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactDetails {
    pub full_name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CarrierDetails {
    pub truck_type: Option<TruckType>,
    pub mc_number: Option<String>,
    pub usdot_number: Option<String>,
    pub operating_states: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperDetails {
    pub address: Option<String>,
    pub is_individual: bool,
    pub description: Option<String>,
    pub cargo_types: Option<String>,
}

/// Role-specific payload; the variant fixes which fields a profile may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RoleDetails {
    Shipper(ShipperDetails),
    Carrier(CarrierDetails),
    Broker,
}

impl RoleDetails {
    pub const fn role(&self) -> Role {
        match self {
            RoleDetails::Shipper(_) => Role::Shipper,
            RoleDetails::Carrier(_) => Role::Carrier,
            RoleDetails::Broker => Role::Broker,
        }
    }
}

/// Detailed application data attached to a role request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleProfile {
    pub id: ProfileId,
    pub request_id: RoleRequestId,
    pub user_id: UserId,
    pub contact: ContactDetails,
    pub details: RoleDetails,
    pub status: ModerationStatus,
    pub created_at: DateTime<Utc>,
}

impl RoleProfile {
    pub fn role(&self) -> Role {
        self.details.role()
    }

    pub fn owner(&self) -> ProfileKey {
        ProfileKey {
            user_id: self.user_id.clone(),
            role: self.role(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoleProfile {
    pub request_id: RoleRequestId,
    pub user_id: UserId,
    pub contact: ContactDetails,
    pub details: RoleDetails,
}

/// Documents hang off a profile through its owner and role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProfileKey {
    pub user_id: UserId,
    pub role: Role,
}

/// Evidence file attached to a role profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub user_id: UserId,
    pub role: Role,
    pub filename: String,
    pub path: String,
    pub bucket: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    pub user_id: UserId,
    pub role: Role,
    pub filename: String,
    pub path: String,
    pub bucket: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Row produced by the combined profiles view: a profile plus the owner's e-mail and any
/// links stored by older clients in the `documents_url` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub profile: RoleProfile,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub documents_url: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_details_serialize_with_role_tag() {
        let details = RoleDetails::Carrier(CarrierDetails {
            truck_type: Some(TruckType::DryVan),
            mc_number: Some("MC-1".to_string()),
            ..CarrierDetails::default()
        });
        let value = serde_json::to_value(&details).expect("serialize");
        assert_eq!(value["role"], json!("carrier"));
        assert_eq!(value["truck_type"], json!("Dry Van"));
        assert_eq!(details.role(), Role::Carrier);

        let broker: RoleDetails =
            serde_json::from_value(json!({ "role": "broker" })).expect("deserialize");
        assert_eq!(broker, RoleDetails::Broker);
    }

    #[test]
    fn full_name_prefers_metadata() {
        let mut user = User {
            id: UserId("u-1".to_string()),
            email: "a@b.co".to_string(),
            display_name: Some("Display".to_string()),
            metadata: BTreeMap::new(),
        };
        assert_eq!(user.full_name(), Some("Display"));
        user.metadata
            .insert("full_name".to_string(), json!("Sulton Boy"));
        assert_eq!(user.full_name(), Some("Sulton Boy"));
    }

    #[test]
    fn parses_labels_case_insensitively() {
        assert_eq!("Carrier".parse::<Role>(), Ok(Role::Carrier));
        assert_eq!("power only".parse::<TruckType>(), Ok(TruckType::PowerOnly));
        assert!("trucker".parse::<Role>().is_err());
        assert_eq!(Role::Shipper.document_bucket(), "shipper-documents");
    }
}
