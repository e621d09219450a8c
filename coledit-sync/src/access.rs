//! Ownership checks run before any membership or deletion request leaves
//! the client.

use thiserror::Error;

use crate::model::{Identity, Note};

/// A blocked action. The message is meant to be shown to the user as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("Only the owner of this note can {action}")]
    NotOwner { action: &'static str },
    #[error("Only the owner of this note can remove other collaborators")]
    NotOwnerOrSelf,
}

/// Adding a collaborator is reserved to the owner.
pub fn authorize_add_collaborator(identity: &Identity, note: &Note) -> Result<(), AccessDenied> {
    if note.is_owned_by(identity) {
        Ok(())
    } else {
        Err(AccessDenied::NotOwner {
            action: "add collaborators",
        })
    }
}

/// The owner may remove anyone; anyone may remove themselves.
pub fn authorize_remove_collaborator(
    identity: &Identity,
    note: &Note,
    email: &str,
) -> Result<(), AccessDenied> {
    if note.is_owned_by(identity) || identity.has_email(email) {
        Ok(())
    } else {
        Err(AccessDenied::NotOwnerOrSelf)
    }
}

pub fn authorize_delete_note(identity: &Identity, note: &Note) -> Result<(), AccessDenied> {
    if note.is_owned_by(identity) {
        Ok(())
    } else {
        Err(AccessDenied::NotOwner {
            action: "delete it",
        })
    }
}
