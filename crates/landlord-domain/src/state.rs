//! The tenant lifecycle state machine.
//!
//! A pure transition table consulted by both the reconciler and the HTTP
//! surface before any status change is persisted.

use crate::error::DomainError;
use crate::types::{TenantAction, TenantStatus};

/// Statuses a tenant may transition to from `from`.
///
/// `archived` and `deleting` admit nothing; from `archived` only a hard
/// delete is possible.
pub fn admissible_targets(from: TenantStatus) -> &'static [TenantStatus] {
    match from {
        TenantStatus::Requested => &[TenantStatus::Planning, TenantStatus::Failed],
        TenantStatus::Planning => &[TenantStatus::Provisioning, TenantStatus::Failed],
        TenantStatus::Provisioning => &[TenantStatus::Ready, TenantStatus::Failed],
        TenantStatus::Ready => &[TenantStatus::Updating, TenantStatus::Archiving],
        TenantStatus::Updating => &[TenantStatus::Ready, TenantStatus::Failed],
        TenantStatus::Archiving => &[TenantStatus::Archived, TenantStatus::Failed],
        TenantStatus::Failed => &[TenantStatus::Planning, TenantStatus::Archiving],
        TenantStatus::Deleting | TenantStatus::Archived => &[],
    }
}

pub fn can_transition(from: TenantStatus, to: TenantStatus) -> bool {
    admissible_targets(from).contains(&to)
}

pub fn ensure_transition(from: TenantStatus, to: TenantStatus) -> Result<(), DomainError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(DomainError::InvalidTransition { from, to })
    }
}

/// The compute action the reconciler invokes for a tenant sitting at `status`
/// with no active execution. None means the status needs no action.
pub fn reconcile_action(status: TenantStatus) -> Option<TenantAction> {
    match status {
        TenantStatus::Requested => Some(TenantAction::Plan),
        TenantStatus::Planning => Some(TenantAction::Provision),
        // A tenant parked at provisioning with no live execution is what
        // stop-and-restart leaves behind; the provision is resumed.
        TenantStatus::Provisioning => Some(TenantAction::Provision),
        TenantStatus::Updating => Some(TenantAction::Update),
        TenantStatus::Archiving => Some(TenantAction::Delete),
        _ => None,
    }
}

/// Status a tenant advances to once its action's execution has been started.
/// `updating` and `archiving` already name the in-flight phase and stay put.
pub fn invoke_target(status: TenantStatus) -> TenantStatus {
    match status {
        TenantStatus::Requested => TenantStatus::Planning,
        TenantStatus::Planning => TenantStatus::Provisioning,
        other => other,
    }
}

/// Status a tenant advances to when its execution reports terminal success.
/// None for `planning`: a finished plan retires the execution without a
/// status change and the next invoke pass starts the provision.
pub fn success_target(status: TenantStatus) -> Option<TenantStatus> {
    match status {
        TenantStatus::Provisioning => Some(TenantStatus::Ready),
        TenantStatus::Updating => Some(TenantStatus::Ready),
        TenantStatus::Archiving => Some(TenantStatus::Archived),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TenantStatus; 9] = [
        TenantStatus::Requested,
        TenantStatus::Planning,
        TenantStatus::Provisioning,
        TenantStatus::Ready,
        TenantStatus::Updating,
        TenantStatus::Deleting,
        TenantStatus::Archiving,
        TenantStatus::Archived,
        TenantStatus::Failed,
    ];

    #[test]
    fn happy_path_is_a_valid_walk() {
        let walk = [
            TenantStatus::Requested,
            TenantStatus::Planning,
            TenantStatus::Provisioning,
            TenantStatus::Ready,
            TenantStatus::Updating,
            TenantStatus::Ready,
            TenantStatus::Archiving,
            TenantStatus::Archived,
        ];
        for pair in walk.windows(2) {
            assert!(
                can_transition(pair[0], pair[1]),
                "{} -> {} should be admissible",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn archived_is_terminal() {
        for to in ALL {
            assert!(!can_transition(TenantStatus::Archived, to));
        }
    }

    #[test]
    fn failed_recovers_via_planning_or_archiving() {
        assert!(can_transition(TenantStatus::Failed, TenantStatus::Planning));
        assert!(can_transition(TenantStatus::Failed, TenantStatus::Archiving));
        assert!(!can_transition(TenantStatus::Failed, TenantStatus::Updating));
        assert!(!can_transition(TenantStatus::Failed, TenantStatus::Ready));
    }

    #[test]
    fn unlisted_transitions_are_rejected() {
        let err = ensure_transition(TenantStatus::Ready, TenantStatus::Planning).unwrap_err();
        assert!(matches!(
            err,
            crate::DomainError::InvalidTransition {
                from: TenantStatus::Ready,
                to: TenantStatus::Planning
            }
        ));
        assert!(ensure_transition(TenantStatus::Requested, TenantStatus::Ready).is_err());
        assert!(ensure_transition(TenantStatus::Provisioning, TenantStatus::Updating).is_err());
    }

    #[test]
    fn actions_follow_the_status() {
        assert_eq!(
            reconcile_action(TenantStatus::Requested),
            Some(TenantAction::Plan)
        );
        assert_eq!(
            reconcile_action(TenantStatus::Planning),
            Some(TenantAction::Provision)
        );
        assert_eq!(
            reconcile_action(TenantStatus::Provisioning),
            Some(TenantAction::Provision)
        );
        assert_eq!(
            reconcile_action(TenantStatus::Updating),
            Some(TenantAction::Update)
        );
        assert_eq!(
            reconcile_action(TenantStatus::Archiving),
            Some(TenantAction::Delete)
        );
        assert_eq!(reconcile_action(TenantStatus::Ready), None);
        assert_eq!(reconcile_action(TenantStatus::Failed), None);
        assert_eq!(reconcile_action(TenantStatus::Archived), None);
    }

    #[test]
    fn invoke_targets_are_admissible() {
        for status in ALL {
            if reconcile_action(status).is_some() {
                let next = invoke_target(status);
                if next != status {
                    assert!(can_transition(status, next));
                }
            }
        }
    }

    #[test]
    fn success_targets_are_admissible() {
        for status in ALL {
            if let Some(next) = success_target(status) {
                assert!(can_transition(status, next));
            }
        }
    }
}
