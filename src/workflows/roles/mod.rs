pub mod account;
pub mod documents;
pub mod domain;
pub mod moderation;
pub mod notice;
pub mod onboarding;
pub mod repository;
pub mod session;
pub mod status;
pub mod validation;

pub use documents::{DocumentPanel, DocumentPolicy, DocumentUploadManager, UploadFile};
pub use moderation::{Filter, ModerationTable, ProfileView, SortKey};
pub use notice::{Notice, NoticeLevel};
pub use onboarding::{OnboardingFlow, OnboardingStep, SubmissionReceipt};
pub use session::{SessionProvider, SessionState};
pub use status::{ModerationAction, Transition};

#[cfg(test)]
mod tests;
