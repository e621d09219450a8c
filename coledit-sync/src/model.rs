//! Notes, identities and collaborators as the REST service describes them.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Server-assigned note identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub Uuid);

impl NoteId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable user identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The authenticated caller.
///
/// Handed to sessions, directories and the note library at construction;
/// nothing in this crate looks identity up on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub email: String,
}

impl Identity {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
        }
    }

    /// Whether `email` names this identity. Emails compare case-insensitively.
    pub fn has_email(&self, email: &str) -> bool {
        self.email.trim().eq_ignore_ascii_case(email.trim())
    }
}

/// Client-side cached copy of a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    #[serde(rename = "noteId")]
    pub id: NoteId,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    pub owner: UserId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub collaborators: Vec<UserId>,
}

impl Note {
    pub fn new(id: NoteId, title: impl Into<String>, owner: UserId) -> Self {
        Self {
            id,
            title: title.into(),
            content: String::new(),
            owner,
            collaborators: Vec::new(),
        }
    }

    pub fn is_owned_by(&self, identity: &Identity) -> bool {
        self.owner == identity.user_id
    }
}

/// One entry of a note's collaborator directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub email: String,
}

impl Collaborator {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            user_id: None,
            email: email.into(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
