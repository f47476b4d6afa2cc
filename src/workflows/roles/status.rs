//! Moderation transitions for role requests and their profiles.
//!
//! ```text
//! pending --approve--> approved   (terminal, deletable)
//! pending --reject-->  rejected   (terminal, deletable)
//! approved --delete--> removed
//! rejected --delete--> removed
//! ```
//!
//! Nothing leads back to `pending`. The table enforces these rules on the client; the backend
//! accepts any update keyed by id, so concurrent moderators resolve last-write-wins.

use serde::{Deserialize, Serialize};

use super::domain::ModerationStatus;

/// Moderator actions offered on a profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    Approve,
    Reject,
    Delete,
}

impl ModerationAction {
    pub const fn label(self) -> &'static str {
        match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Reject => "reject",
            ModerationAction::Delete => "delete",
        }
    }

    /// Question shown in the confirmation modal.
    pub const fn confirmation_prompt(self) -> &'static str {
        match self {
            ModerationAction::Approve => "Approve this profile?",
            ModerationAction::Reject => "Reject this profile?",
            ModerationAction::Delete => "Delete this profile permanently?",
        }
    }

    pub const fn success_message(self) -> &'static str {
        match self {
            ModerationAction::Approve => "Profile approved",
            ModerationAction::Reject => "Profile rejected",
            ModerationAction::Delete => "Profile deleted",
        }
    }
}

/// Result of applying an action to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Status(ModerationStatus),
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {} a profile that is {}", .action.label(), .status.label())]
pub struct TransitionError {
    pub action: ModerationAction,
    pub status: ModerationStatus,
}

const PENDING_ACTIONS: &[ModerationAction] = &[ModerationAction::Approve, ModerationAction::Reject];
const TERMINAL_ACTIONS: &[ModerationAction] = &[ModerationAction::Delete];

impl ModerationStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, ModerationStatus::Pending)
    }

    pub const fn available_actions(self) -> &'static [ModerationAction] {
        match self {
            ModerationStatus::Pending => PENDING_ACTIONS,
            ModerationStatus::Approved | ModerationStatus::Rejected => TERMINAL_ACTIONS,
        }
    }

    pub fn allows(self, action: ModerationAction) -> bool {
        self.available_actions().contains(&action)
    }

    pub fn apply(self, action: ModerationAction) -> Result<Transition, TransitionError> {
        match (self, action) {
            (ModerationStatus::Pending, ModerationAction::Approve) => {
                Ok(Transition::Status(ModerationStatus::Approved))
            }
            (ModerationStatus::Pending, ModerationAction::Reject) => {
                Ok(Transition::Status(ModerationStatus::Rejected))
            }
            (ModerationStatus::Approved | ModerationStatus::Rejected, ModerationAction::Delete) => {
                Ok(Transition::Removed)
            }
            (status, action) => Err(TransitionError { action, status }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_only_be_approved_or_rejected() {
        let pending = ModerationStatus::Pending;
        assert_eq!(
            pending.apply(ModerationAction::Approve),
            Ok(Transition::Status(ModerationStatus::Approved))
        );
        assert_eq!(
            pending.apply(ModerationAction::Reject),
            Ok(Transition::Status(ModerationStatus::Rejected))
        );
        assert!(pending.apply(ModerationAction::Delete).is_err());
        assert!(!pending.is_terminal());
    }

    #[test]
    fn terminal_states_only_offer_delete() {
        for status in [ModerationStatus::Approved, ModerationStatus::Rejected] {
            assert!(status.is_terminal());
            assert_eq!(status.available_actions(), &[ModerationAction::Delete]);
            assert_eq!(
                status.apply(ModerationAction::Approve),
                Err(TransitionError {
                    action: ModerationAction::Approve,
                    status
                })
            );
            assert_eq!(status.apply(ModerationAction::Delete), Ok(Transition::Removed));
        }
    }

    #[test]
    fn every_allowed_action_has_a_transition() {
        for status in [
            ModerationStatus::Pending,
            ModerationStatus::Approved,
            ModerationStatus::Rejected,
        ] {
            for action in [
                ModerationAction::Approve,
                ModerationAction::Reject,
                ModerationAction::Delete,
            ] {
                assert_eq!(status.allows(action), status.apply(action).is_ok());
                if let Ok(Transition::Status(next)) = status.apply(action) {
                    assert_ne!(next, ModerationStatus::Pending);
                }
            }
        }
    }

    #[test]
    fn transition_error_names_action_and_status() {
        let error = ModerationStatus::Approved
            .apply(ModerationAction::Reject)
            .expect_err("approved profiles cannot be rejected");
        assert_eq!(error.to_string(), "cannot reject a profile that is approved");
    }
}
