//! The caller's notes: listing, creating, deleting, and opening one for
//! live editing.

use std::collections::HashSet;
use std::sync::Arc;

use crate::access;
use crate::config::SessionConfig;
use crate::directory::MembershipError;
use crate::model::{Identity, Note};
use crate::service::{NoteService, ServiceError};
use crate::session::NoteSession;

pub struct NoteLibrary {
    identity: Identity,
    service: Arc<dyn NoteService>,
}

impl NoteLibrary {
    pub fn new(identity: Identity, service: Arc<dyn NoteService>) -> Self {
        Self { identity, service }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Every note the caller owns or collaborates on, owned notes first.
    /// A note reported more than once is listed once.
    pub async fn list(&self) -> Result<Vec<Note>, ServiceError> {
        let notes = self.service.list_notes(&self.identity.email).await?;

        let mut seen = HashSet::new();
        let (owned, shared): (Vec<Note>, Vec<Note>) = notes
            .into_iter()
            .filter(|note| seen.insert(note.id))
            .partition(|note| note.is_owned_by(&self.identity));

        log::debug!(
            "{} has {} owned and {} shared notes",
            self.identity.email,
            owned.len(),
            shared.len()
        );
        Ok(owned.into_iter().chain(shared).collect())
    }

    /// Create an empty note owned by the caller.
    pub async fn create(&self, title: &str) -> Result<Note, ServiceError> {
        let note = self.service.create_note(&self.identity.email, title).await?;
        log::info!("Created note {} ({title})", note.id);
        Ok(note)
    }

    /// Delete `note`. Owner only; nothing is sent otherwise.
    pub async fn delete(&self, note: &Note) -> Result<(), MembershipError> {
        if let Err(denied) = access::authorize_delete_note(&self.identity, note) {
            log::warn!("{} blocked on note {}: {denied}", self.identity.email, note.id);
            return Err(denied.into());
        }
        self.service.delete_note(note.id).await?;
        log::info!("Deleted note {}", note.id);
        Ok(())
    }

    /// Start a live editing session on `note` as the caller.
    pub fn open(&self, note: Note, config: SessionConfig) -> NoteSession {
        NoteSession::open(note, self.identity.clone(), config)
    }
}
