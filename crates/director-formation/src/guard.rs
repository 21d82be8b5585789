//! Deletion guard — decides whether a resource may be unregistered or unpaired.
//!
//! Each request walks `Requested -> Checking -> {Allowed, Blocked}` against a
//! [`MembershipSnapshot`] taken inside the deleting transaction. A blocked
//! request surfaces as `StateError::Conflict` carrying the user-facing message,
//! and the store aborts the transaction.

use director_core::ResourceType;
use director_state::{MembershipSnapshot, StateError, StateResult};
use tracing::{debug, warn};

/// Hard vs soft removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionKind {
    /// Delete the record.
    Unregister,
    /// Keep the record, mark it unpaired.
    Unpair,
}

/// Current phase of a deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardPhase {
    Requested,
    Checking,
    Allowed,
    Blocked { reason: String },
}

/// A single delete/unpair request moving through the guard.
#[derive(Debug, Clone)]
pub struct DeletionRequest {
    pub kind: DeletionKind,
    pub phase: GuardPhase,
}

impl DeletionRequest {
    pub fn new(kind: DeletionKind) -> Self {
        Self {
            kind,
            phase: GuardPhase::Requested,
        }
    }

    /// Evaluate the snapshot and settle in `Allowed` or `Blocked`.
    pub fn check(&mut self, snapshot: &MembershipSnapshot) -> &GuardPhase {
        self.phase = GuardPhase::Checking;
        debug!(
            resource = %snapshot.resource_type,
            id = %snapshot.resource_id,
            kind = ?self.kind,
            formations = snapshot.formations.len(),
            runtimes = snapshot.runtimes.len(),
            "checking deletion guard"
        );

        self.phase = if snapshot.formations.is_empty() {
            GuardPhase::Allowed
        } else {
            match self.kind {
                DeletionKind::Unregister => GuardPhase::Blocked {
                    reason: part_of_formations_message(snapshot),
                },
                DeletionKind::Unpair if snapshot.runtimes.is_empty() => GuardPhase::Allowed,
                DeletionKind::Unpair => GuardPhase::Blocked {
                    reason: still_used_message(snapshot),
                },
            }
        };

        if let GuardPhase::Blocked { reason } = &self.phase {
            warn!(id = %snapshot.resource_id, %reason, "deletion blocked");
        }
        &self.phase
    }

    pub fn into_result(self) -> StateResult<()> {
        match self.phase {
            GuardPhase::Allowed => Ok(()),
            GuardPhase::Blocked { reason } => Err(StateError::Conflict(reason)),
            phase => Err(StateError::Validation(format!(
                "deletion request was not checked (phase {phase:?})"
            ))),
        }
    }
}

/// Build the guard closure handed to the store's guarded removal methods.
pub fn deletion_guard(kind: DeletionKind) -> impl FnOnce(&MembershipSnapshot) -> StateResult<()> {
    move |snapshot| {
        let mut request = DeletionRequest::new(kind);
        request.check(snapshot);
        request.into_result()
    }
}

fn subject(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Application => "System",
        ResourceType::Runtime => "Runtime",
    }
}

fn part_of_formations_message(snapshot: &MembershipSnapshot) -> String {
    format!(
        "{} {} is part of the following formations : {}",
        subject(snapshot.resource_type),
        snapshot.resource_name,
        snapshot.formations.join(", ")
    )
}

fn still_used_message(snapshot: &MembershipSnapshot) -> String {
    format!(
        "{} {} is still used and cannot be deleted. Unassign the system from the following formations first: {}. Then, unassign the system from the following runtimes, too: {}",
        subject(snapshot.resource_type),
        snapshot.resource_name,
        snapshot.formations.join(", "),
        snapshot.runtimes.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(formations: &[&str], runtimes: &[&str]) -> MembershipSnapshot {
        MembershipSnapshot {
            resource_type: ResourceType::Application,
            resource_id: "app-1".to_string(),
            resource_name: "app-name".to_string(),
            formations: formations.iter().map(|s| s.to_string()).collect(),
            runtimes: runtimes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn no_formations_is_allowed() {
        for kind in [DeletionKind::Unregister, DeletionKind::Unpair] {
            let mut req = DeletionRequest::new(kind);
            assert_eq!(req.check(&snapshot(&[], &[])), &GuardPhase::Allowed);
            assert!(req.into_result().is_ok());
        }
    }

    #[test]
    fn unregister_blocked_lists_formations() {
        let err = deletion_guard(DeletionKind::Unregister)(&snapshot(&["test-scenario"], &[]))
            .unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert_eq!(
            err.to_string(),
            "System app-name is part of the following formations : test-scenario"
        );
    }

    #[test]
    fn unregister_lists_every_formation_in_order() {
        let err = deletion_guard(DeletionKind::Unregister)(&snapshot(&["a", "b", "c"], &[]))
            .unwrap_err();
        assert!(err.to_string().ends_with("formations : a, b, c"));
    }

    #[test]
    fn unpair_without_runtimes_is_allowed() {
        assert!(deletion_guard(DeletionKind::Unpair)(&snapshot(&["f1"], &[])).is_ok());
    }

    #[test]
    fn unpair_with_runtimes_blocked_with_extended_message() {
        let err = deletion_guard(DeletionKind::Unpair)(&snapshot(&["f1", "f2"], &["rt-1"]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "System app-name is still used and cannot be deleted. Unassign the system from the \
             following formations first: f1, f2. Then, unassign the system from the following \
             runtimes, too: rt-1"
        );
    }

    #[test]
    fn runtime_subject() {
        let mut snap = snapshot(&["f1"], &[]);
        snap.resource_type = ResourceType::Runtime;
        snap.resource_name = "rt".to_string();
        let err = deletion_guard(DeletionKind::Unregister)(&snap).unwrap_err();
        assert!(err.to_string().starts_with("Runtime rt is part of"));
    }

    #[test]
    fn unchecked_request_is_not_allowed() {
        let req = DeletionRequest::new(DeletionKind::Unregister);
        assert!(matches!(req.into_result(), Err(StateError::Validation(_))));
    }
}
