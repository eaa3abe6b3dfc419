//! Who may do what. Every department or ownership check in the handlers goes
//! through `authorize`, so the rules live here and nowhere else.

use uuid::Uuid;

use safecampus_types::models::{Alert, ChatSession, Department, Role, User};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read the resource
    View,
    /// Change it: alert status, chat messages and status
    Respond,
}

#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    /// All alerts or chats routed to one department
    DepartmentQueue(Department),
    Alert(&'a Alert),
    ChatSession(&'a ChatSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(&'static str),
}

impl Decision {
    pub fn ensure(self) -> Result<(), AppError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(AppError::Forbidden(reason)),
        }
    }
}

/// Staff see only their own department.
pub fn serves_department(actor: &User, department: Department) -> bool {
    actor.role == Role::Staff && actor.department == Some(department)
}

/// Whether `actor` may learn the real identity behind an anonymous chat.
pub fn may_see_identity(actor: &User, owner: Uuid) -> bool {
    actor.id == owner || actor.is_admin()
}

pub fn authorize(actor: &User, action: Action, resource: Resource<'_>) -> Decision {
    if actor.is_admin() {
        return Decision::Allow;
    }

    match resource {
        Resource::DepartmentQueue(department) => {
            if serves_department(actor, department) {
                Decision::Allow
            } else {
                Decision::Deny("department mismatch")
            }
        }

        Resource::Alert(alert) => {
            if serves_department(actor, alert.department) {
                Decision::Allow
            } else if action == Action::View && actor.id == alert.user_id {
                Decision::Allow
            } else if actor.role == Role::Staff {
                Decision::Deny("department mismatch")
            } else {
                Decision::Deny("not your alert")
            }
        }

        // Owner and department staff are the two sides of the conversation
        Resource::ChatSession(session) => {
            if actor.id == session.user_id || serves_department(actor, session.department) {
                Decision::Allow
            } else if actor.role == Role::Staff {
                Decision::Deny("department mismatch")
            } else {
                Decision::Deny("not your chat session")
            }
        }
    }
}
