//! Principal roles and the role-gated operation table.

use crate::error::{AccessError, AccessResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    Doctor,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Admin => "admin",
        })
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn patient(id: impl Into<String>) -> Self {
        Self::new(id, Role::Patient)
    }

    pub fn doctor(id: impl Into<String>) -> Self {
        Self::new(id, Role::Doctor)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, Role::Admin)
    }
}

/// Every service operation subject to a role gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    UploadRecord,
    RequestAccess,
    CancelRequest,
    RespondToRequest,
    GrantRecordKey,
    RevokeAccess,
    CheckAccess,
    FetchRecordKey,
    RequestConnection,
    RespondConnection,
    ListPendingRequests,
    ListAuthorized,
    ViewAccessLog,
    VerifyLedger,
}

impl Operation {
    /// Roles allowed to invoke this operation.
    pub fn allowed_roles(self) -> &'static [Role] {
        use Role::*;
        match self {
            Operation::UploadRecord => &[Doctor],
            Operation::RequestAccess => &[Doctor],
            Operation::CancelRequest => &[Doctor],
            Operation::RespondToRequest => &[Patient],
            Operation::GrantRecordKey => &[Patient],
            Operation::RevokeAccess => &[Patient, Admin],
            Operation::CheckAccess => &[Doctor, Admin],
            Operation::FetchRecordKey => &[Doctor],
            Operation::RequestConnection => &[Patient],
            Operation::RespondConnection => &[Doctor],
            Operation::ListPendingRequests => &[Patient],
            Operation::ListAuthorized => &[Patient, Doctor],
            Operation::ViewAccessLog => &[Patient, Doctor, Admin],
            Operation::VerifyLedger => &[Admin],
        }
    }

    pub fn permits(self, role: Role) -> bool {
        self.allowed_roles().contains(&role)
    }
}

/// Checks the operation table for `actor`'s role.
pub fn authorize(actor: &Principal, op: Operation) -> AccessResult<()> {
    if op.permits(actor.role) {
        Ok(())
    } else {
        Err(AccessError::Forbidden(format!(
            "{} {} may not perform {op:?}",
            actor.role, actor.id
        )))
    }
}
