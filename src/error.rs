use crate::config::ConfigError;
use crate::infra::supabase::SupabaseError;
use crate::telemetry::TelemetryError;
use crate::workflows::roles::account::AccountError;
use crate::workflows::roles::documents::DocumentError;
use crate::workflows::roles::moderation::ModerationError;
use crate::workflows::roles::onboarding::OnboardingError;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Backend(SupabaseError),
    Account(AccountError),
    Onboarding(OnboardingError),
    Documents(DocumentError),
    Moderation(ModerationError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Backend(err) => write!(f, "backend error: {}", err),
            AppError::Account(err) => write!(f, "account error: {}", err.user_message()),
            AppError::Onboarding(err) => write!(f, "onboarding error: {}", err.user_message()),
            AppError::Documents(err) => write!(f, "document error: {}", err.user_message()),
            AppError::Moderation(err) => write!(f, "moderation error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Backend(err) => Some(err),
            AppError::Account(err) => Some(err),
            AppError::Onboarding(err) => Some(err),
            AppError::Documents(err) => Some(err),
            AppError::Moderation(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<SupabaseError> for AppError {
    fn from(value: SupabaseError) -> Self {
        Self::Backend(value)
    }
}

impl From<AccountError> for AppError {
    fn from(value: AccountError) -> Self {
        Self::Account(value)
    }
}

impl From<OnboardingError> for AppError {
    fn from(value: OnboardingError) -> Self {
        Self::Onboarding(value)
    }
}

impl From<DocumentError> for AppError {
    fn from(value: DocumentError) -> Self {
        Self::Documents(value)
    }
}

impl From<ModerationError> for AppError {
    fn from(value: ModerationError) -> Self {
        Self::Moderation(value)
    }
}
