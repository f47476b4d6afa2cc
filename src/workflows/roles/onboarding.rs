use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::domain::{
    CarrierDetails, ContactDetails, NewRoleProfile, NewRoleRequest, Role, RoleDetails,
    RoleProfile, RoleRequest, ShipperDetails, TruckType, User,
};
use super::repository::{AuthError, AuthService, RepositoryError, RoleRepository, UserMetadata};
use super::session::SessionProvider;
use super::validation::{
    require, require_email, require_matching_passwords, require_phone, ValidationError,
};

const REGISTRATION_RECEIVED: &str = "Application received. Check your e-mail to confirm your \
account; a moderator will review your profile shortly.";
const ROLE_RECEIVED: &str = "Application received. A moderator will review your profile shortly.";

/// Wizard position. Back-transitions are always allowed; forward ones are guarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStep {
    ContactInfo,
    RoleSelection,
    DetailsAndConfirmation,
    Submitted,
}

/// Full registration for visitors, or a single extra role for a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingVariant {
    Registration,
    AdditionalRole(Role),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactForm {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarrierForm {
    pub truck_type: Option<TruckType>,
    pub mc_number: String,
    pub usdot_number: String,
    pub operating_states: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipperForm {
    pub address: String,
    pub description: String,
    pub cargo_types: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailsForm {
    pub has_company: bool,
    pub company_name: String,
    pub carrier: CarrierForm,
    pub shipper: ShipperForm,
    pub confirm_accuracy: bool,
}

/// Everything the wizard collects across its steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnboardingForm {
    pub contact: ContactForm,
    pub roles: BTreeSet<Role>,
    pub details: DetailsForm,
}

impl OnboardingForm {
    pub fn toggle_role(&mut self, role: Role) {
        if !self.roles.remove(&role) {
            self.roles.insert(role);
        }
    }

    fn contact_details(&self) -> ContactDetails {
        let company_name = if self.details.has_company {
            optional(&self.details.company_name)
        } else {
            None
        };
        ContactDetails {
            full_name: self.contact.full_name.trim().to_string(),
            company_name,
            phone: self.contact.phone.trim().to_string(),
        }
    }

    fn role_details(&self, role: Role) -> RoleDetails {
        match role {
            Role::Carrier => {
                let carrier = &self.details.carrier;
                RoleDetails::Carrier(CarrierDetails {
                    truck_type: carrier.truck_type,
                    mc_number: optional(&carrier.mc_number),
                    usdot_number: optional(&carrier.usdot_number),
                    operating_states: optional(&carrier.operating_states),
                })
            }
            Role::Shipper => {
                let shipper = &self.details.shipper;
                RoleDetails::Shipper(ShipperDetails {
                    address: optional(&shipper.address),
                    is_individual: !self.details.has_company,
                    description: optional(&shipper.description),
                    cargo_types: optional(&shipper.cargo_types),
                })
            }
            Role::Broker => RoleDetails::Broker,
        }
    }
}

fn optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// What the confirmation overlay shows once the application is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReceipt {
    pub user: User,
    pub requests: Vec<RoleRequest>,
    pub profiles: Vec<RoleProfile>,
    pub message: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("sign in before applying for another role")]
    NotAuthenticated,
    #[error("finish the previous steps before submitting")]
    NotReady,
    #[error("this application was already submitted")]
    AlreadySubmitted,
}

impl OnboardingError {
    pub fn user_message(&self) -> String {
        match self {
            OnboardingError::Auth(error) => error.user_message(),
            OnboardingError::Repository(error) => {
                format!("Could not save your application: {error}")
            }
            other => other.to_string(),
        }
    }
}

/// Multi-step onboarding wizard ending in a pending role request plus its profile.
///
/// Records created by a failed submission attempt (the account, any request already inserted)
/// are remembered so a retry resumes instead of duplicating them. A created account is never
/// rolled back.
#[derive(Debug, Clone)]
pub struct OnboardingFlow {
    variant: OnboardingVariant,
    step: OnboardingStep,
    form: OnboardingForm,
    error: Option<String>,
    account: Option<User>,
    requests: BTreeMap<Role, RoleRequest>,
    profiles: BTreeMap<Role, RoleProfile>,
    receipt: Option<SubmissionReceipt>,
}

impl OnboardingFlow {
    pub fn registration() -> Self {
        Self::with_variant(OnboardingVariant::Registration, OnboardingStep::ContactInfo)
    }

    /// Starts at the details step with the role fixed; no account is created.
    pub fn additional_role(role: Role) -> Self {
        let mut flow = Self::with_variant(
            OnboardingVariant::AdditionalRole(role),
            OnboardingStep::DetailsAndConfirmation,
        );
        flow.form.roles.insert(role);
        flow
    }

    fn with_variant(variant: OnboardingVariant, step: OnboardingStep) -> Self {
        Self {
            variant,
            step,
            form: OnboardingForm::default(),
            error: None,
            account: None,
            requests: BTreeMap::new(),
            profiles: BTreeMap::new(),
            receipt: None,
        }
    }

    pub fn variant(&self) -> OnboardingVariant {
        self.variant
    }

    pub fn step(&self) -> OnboardingStep {
        self.step
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn form(&self) -> &OnboardingForm {
        &self.form
    }

    /// Editing is closed once the application is submitted. An additional-role flow submits
    /// only its fixed role, whatever the form's role set holds.
    pub fn form_mut(&mut self) -> Option<&mut OnboardingForm> {
        if self.step == OnboardingStep::Submitted {
            return None;
        }
        Some(&mut self.form)
    }

    pub fn toggle_role(&mut self, role: Role) {
        if self.step == OnboardingStep::Submitted {
            return;
        }
        if let OnboardingVariant::AdditionalRole(_) = self.variant {
            return;
        }
        self.form.toggle_role(role);
    }

    pub fn receipt(&self) -> Option<&SubmissionReceipt> {
        self.receipt.as_ref()
    }

    /// Advance when the current step validates; otherwise keep the step and record the error.
    pub fn next_step(&mut self) -> bool {
        let next = match self.step {
            OnboardingStep::ContactInfo => OnboardingStep::RoleSelection,
            OnboardingStep::RoleSelection => OnboardingStep::DetailsAndConfirmation,
            OnboardingStep::DetailsAndConfirmation | OnboardingStep::Submitted => return false,
        };

        match self.validate_current_step() {
            Ok(()) => {
                self.error = None;
                self.step = next;
                true
            }
            Err(error) => {
                self.error = Some(error.to_string());
                false
            }
        }
    }

    /// Step back without re-validating.
    pub fn previous_step(&mut self) {
        if self.variant != OnboardingVariant::Registration {
            return;
        }
        self.step = match self.step {
            OnboardingStep::RoleSelection => OnboardingStep::ContactInfo,
            OnboardingStep::DetailsAndConfirmation => OnboardingStep::RoleSelection,
            other => other,
        };
        self.error = None;
    }

    pub fn validate_current_step(&self) -> Result<(), ValidationError> {
        match self.step {
            OnboardingStep::ContactInfo => self.validate_contact(),
            OnboardingStep::RoleSelection => self.validate_roles(),
            OnboardingStep::DetailsAndConfirmation => self.validate_details(),
            OnboardingStep::Submitted => Ok(()),
        }
    }

    /// Whether the submit control is enabled.
    pub fn can_submit(&self) -> bool {
        self.step == OnboardingStep::DetailsAndConfirmation && self.validate_details().is_ok()
    }

    fn validate_contact(&self) -> Result<(), ValidationError> {
        let contact = &self.form.contact;
        require(&contact.full_name, "full name")?;
        require_email(&contact.email)?;
        require_phone(&contact.phone)?;
        require_matching_passwords(&contact.password, &contact.confirm_password)
    }

    /// Roles the submission covers.
    fn selected_roles(&self) -> Vec<Role> {
        match self.variant {
            OnboardingVariant::Registration => self.form.roles.iter().copied().collect(),
            OnboardingVariant::AdditionalRole(role) => vec![role],
        }
    }

    fn validate_roles(&self) -> Result<(), ValidationError> {
        if self.selected_roles().is_empty() {
            Err(ValidationError::NoRoleSelected)
        } else {
            Ok(())
        }
    }

    fn validate_details(&self) -> Result<(), ValidationError> {
        if let OnboardingVariant::AdditionalRole(_) = self.variant {
            require(&self.form.contact.full_name, "full name")?;
            require_phone(&self.form.contact.phone)?;
        }
        self.validate_roles()?;

        let details = &self.form.details;
        if details.has_company && details.company_name.trim().is_empty() {
            return Err(ValidationError::CompanyNameRequired);
        }
        if !details.confirm_accuracy {
            return Err(ValidationError::AccuracyNotConfirmed);
        }
        Ok(())
    }

    /// Create the account when needed, then one pending request and profile per selected role,
    /// request first. On failure the wizard stays on the confirmation step with the error set.
    pub async fn submit<A, R>(
        &mut self,
        session: &SessionProvider,
        auth: &A,
        roles: &R,
    ) -> Result<&SubmissionReceipt, OnboardingError>
    where
        A: AuthService + ?Sized,
        R: RoleRepository + ?Sized,
    {
        match self.step {
            OnboardingStep::DetailsAndConfirmation => {}
            OnboardingStep::Submitted => return Err(OnboardingError::AlreadySubmitted),
            OnboardingStep::ContactInfo | OnboardingStep::RoleSelection => {
                return Err(OnboardingError::NotReady)
            }
        }

        match self.persist(session, auth, roles).await {
            Ok(receipt) => {
                self.error = None;
                self.step = OnboardingStep::Submitted;
                Ok(self.receipt.insert(receipt))
            }
            Err(error) => {
                warn!(%error, "onboarding submission failed");
                self.error = Some(error.user_message());
                Err(error)
            }
        }
    }

    async fn persist<A, R>(
        &mut self,
        session: &SessionProvider,
        auth: &A,
        roles: &R,
    ) -> Result<SubmissionReceipt, OnboardingError>
    where
        A: AuthService + ?Sized,
        R: RoleRepository + ?Sized,
    {
        self.validate_details()?;
        let user = self.resolve_account(session, auth).await?;

        if let OnboardingVariant::AdditionalRole(role) = self.variant {
            if self.requests.is_empty() {
                let existing = roles.requests_for_user(&user.id).await?;
                if existing.iter().any(|request| request.role == role) {
                    return Err(ValidationError::RoleAlreadyRequested(role.label()).into());
                }
            }
        }

        let contact = self.form.contact_details();
        for role in self.selected_roles() {
            if self.profiles.contains_key(&role) {
                continue;
            }

            let request = match self.requests.get(&role) {
                Some(request) => request.clone(),
                None => {
                    let request = roles
                        .insert_request(NewRoleRequest {
                            user_id: user.id.clone(),
                            role,
                        })
                        .await?;
                    info!(request_id = %request.id, %role, "role request created");
                    self.requests.insert(role, request.clone());
                    request
                }
            };

            let profile = roles
                .insert_profile(NewRoleProfile {
                    request_id: request.id.clone(),
                    user_id: user.id.clone(),
                    contact: contact.clone(),
                    details: self.form.role_details(role),
                })
                .await?;
            info!(profile_id = %profile.id, %role, "role profile created");
            self.profiles.insert(role, profile);
        }

        let message = match self.variant {
            OnboardingVariant::Registration => REGISTRATION_RECEIVED,
            OnboardingVariant::AdditionalRole(_) => ROLE_RECEIVED,
        };

        Ok(SubmissionReceipt {
            user,
            requests: self.requests.values().cloned().collect(),
            profiles: self.profiles.values().cloned().collect(),
            message,
        })
    }

    async fn resolve_account<A>(
        &mut self,
        session: &SessionProvider,
        auth: &A,
    ) -> Result<User, OnboardingError>
    where
        A: AuthService + ?Sized,
    {
        if let Some(user) = &self.account {
            return Ok(user.clone());
        }
        if let Some(user) = session.current_user() {
            self.account = Some(user.clone());
            return Ok(user);
        }
        if let OnboardingVariant::AdditionalRole(_) = self.variant {
            return Err(OnboardingError::NotAuthenticated);
        }

        let contact = &self.form.contact;
        let mut metadata = UserMetadata::new();
        metadata.insert("full_name".to_string(), json!(contact.full_name.trim()));
        metadata.insert("phone".to_string(), json!(contact.phone.trim()));

        let outcome = auth
            .sign_up(contact.email.trim(), &contact.password, metadata)
            .await?;
        info!(
            user_id = %outcome.user.id,
            confirmed = outcome.session.is_some(),
            "account created during onboarding"
        );
        self.account = Some(outcome.user.clone());
        Ok(outcome.user)
    }
}
