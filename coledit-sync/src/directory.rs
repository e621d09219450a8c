//! Collaborator directory for one note.
//!
//! Membership changes are not pushed over the document channel, so the
//! directory polls the note service on its own schedule. Every successful
//! poll replaces the whole set; a failed poll keeps the previous set, which
//! then ages into [`DirectorySnapshot::is_stale`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::access::{self, AccessDenied};
use crate::config::DirectoryConfig;
use crate::model::{Collaborator, Identity, Note, NoteId};
use crate::service::{NoteService, ServiceError};

/// A membership change that did not happen.
#[derive(Debug, Error)]
pub enum MembershipError {
    /// Blocked locally; no request was sent
    #[error(transparent)]
    Denied(#[from] AccessDenied),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// The collaborator set as of the last successful poll.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    pub collaborators: Vec<Collaborator>,
    /// `None` until the first successful poll
    pub refreshed_at: Option<Instant>,
}

impl DirectorySnapshot {
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() > stale_after,
            None => true,
        }
    }

    pub fn contains(&self, email: &str) -> bool {
        self.collaborators
            .iter()
            .any(|c| c.email.trim().eq_ignore_ascii_case(email.trim()))
    }
}

pub struct CollaboratorDirectory {
    identity: Identity,
    note: Note,
    service: Arc<dyn NoteService>,
    config: DirectoryConfig,
    snapshot: Arc<watch::Sender<DirectorySnapshot>>,
    poller: Option<JoinHandle<()>>,
}

impl CollaboratorDirectory {
    pub fn new(
        identity: Identity,
        note: Note,
        service: Arc<dyn NoteService>,
        config: DirectoryConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(DirectorySnapshot::default());
        Self {
            identity,
            note,
            service,
            config,
            snapshot: Arc::new(snapshot),
            poller: None,
        }
    }

    /// Start polling. The first poll runs immediately.
    pub fn start(&mut self) {
        self.stop();
        let service = Arc::clone(&self.service);
        let snapshot = Arc::clone(&self.snapshot);
        let note = self.note.id;
        let period = self.config.poll_interval;

        log::debug!("Polling collaborators of note {note} every {period:?}");
        self.poller = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = refresh_into(service.as_ref(), note, &snapshot).await;
            }
        }));
    }

    /// Stop polling. Safe to call any number of times.
    pub fn stop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
            log::debug!("Stopped polling collaborators of note {}", self.note.id);
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    /// Poll once now. Returns the number of collaborators on success.
    pub async fn refresh(&self) -> Result<usize, ServiceError> {
        refresh_into(self.service.as_ref(), self.note.id, &self.snapshot).await
    }

    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.snapshot.borrow().collaborators.clone()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn is_stale(&self) -> bool {
        self.snapshot.borrow().is_stale(self.config.stale_after)
    }

    /// Observe every replacement of the collaborator set.
    pub fn subscribe(&self) -> watch::Receiver<DirectorySnapshot> {
        self.snapshot.subscribe()
    }

    /// Invite `email`. Owner only.
    pub async fn add_collaborator(&self, email: &str) -> Result<(), MembershipError> {
        self.guard(access::authorize_add_collaborator(&self.identity, &self.note))?;
        self.service.add_collaborator(self.note.id, email).await?;
        log::info!("Added {email} to note {}", self.note.id);
        let _ = self.refresh().await;
        Ok(())
    }

    /// Remove `email`. The owner may remove anyone, others only themselves.
    pub async fn remove_collaborator(&self, email: &str) -> Result<(), MembershipError> {
        self.guard(access::authorize_remove_collaborator(
            &self.identity,
            &self.note,
            email,
        ))?;
        self.service.remove_collaborator(self.note.id, email).await?;
        log::info!("Removed {email} from note {}", self.note.id);
        let _ = self.refresh().await;
        Ok(())
    }

    fn guard(&self, verdict: Result<(), AccessDenied>) -> Result<(), AccessDenied> {
        verdict.inspect_err(|denied| {
            log::warn!(
                "{} blocked on note {}: {denied}",
                self.identity.email,
                self.note.id
            );
        })
    }
}

impl Drop for CollaboratorDirectory {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_into(
    service: &dyn NoteService,
    note: NoteId,
    snapshot: &watch::Sender<DirectorySnapshot>,
) -> Result<usize, ServiceError> {
    match service.list_collaborators(note).await {
        Ok(collaborators) => {
            let count = collaborators.len();
            snapshot.send_replace(DirectorySnapshot {
                collaborators,
                refreshed_at: Some(Instant::now()),
            });
            log::debug!("Note {note} has {count} collaborators");
            Ok(count)
        }
        Err(e) => {
            log::warn!(
                "Collaborator refresh for note {note} failed, keeping {} cached: {e}",
                snapshot.borrow().collaborators.len()
            );
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UserId;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeService {
        collaborators: Mutex<Vec<Collaborator>>,
        failing: AtomicBool,
        list_calls: AtomicUsize,
        membership_calls: AtomicUsize,
    }

    impl FakeService {
        fn with(emails: &[&str]) -> Arc<Self> {
            let service = Self::default();
            *service.collaborators.lock().unwrap() =
                emails.iter().map(|e| Collaborator::new(*e)).collect();
            Arc::new(service)
        }

        fn check(&self) -> crate::service::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(ServiceError::Status {
                    status: 503,
                    url: "http://test/note".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl NoteService for FakeService {
        async fn list_notes(&self, _email: &str) -> crate::service::Result<Vec<Note>> {
            Ok(Vec::new())
        }

        async fn create_note(&self, _owner: &str, _title: &str) -> crate::service::Result<Note> {
            unimplemented!()
        }

        async fn delete_note(&self, _note: NoteId) -> crate::service::Result<()> {
            unimplemented!()
        }

        async fn list_collaborators(
            &self,
            _note: NoteId,
        ) -> crate::service::Result<Vec<Collaborator>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(self.collaborators.lock().unwrap().clone())
        }

        async fn add_collaborator(&self, _note: NoteId, email: &str) -> crate::service::Result<()> {
            self.membership_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.collaborators.lock().unwrap().push(Collaborator::new(email));
            Ok(())
        }

        async fn remove_collaborator(
            &self,
            _note: NoteId,
            email: &str,
        ) -> crate::service::Result<()> {
            self.membership_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.collaborators.lock().unwrap().retain(|c| c.email != email);
            Ok(())
        }
    }

    struct Fixture {
        owner: Identity,
        member: Identity,
        note: Note,
    }

    fn fixture() -> Fixture {
        let owner = Identity::new(UserId::new_v4(), "olive@example.com");
        let member = Identity::new(UserId::new_v4(), "mia@example.com");
        let note = Note::new(NoteId::new_v4(), "Trip", owner.user_id);
        Fixture {
            owner,
            member,
            note,
        }
    }

    fn directory(
        identity: &Identity,
        note: &Note,
        service: &Arc<FakeService>,
    ) -> CollaboratorDirectory {
        CollaboratorDirectory::new(
            identity.clone(),
            note.clone(),
            service.clone(),
            DirectoryConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_empty_and_stale() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com"]);
        let dir = directory(&f.owner, &f.note, &service);

        assert!(dir.collaborators().is_empty());
        assert!(dir.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_wholesale() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com", "noah@example.com"]);
        let dir = directory(&f.owner, &f.note, &service);

        assert_eq!(dir.refresh().await.unwrap(), 2);
        assert!(!dir.is_stale());

        *service.collaborators.lock().unwrap() = vec![Collaborator::new("zoe@example.com")];
        dir.refresh().await.unwrap();
        assert_eq!(dir.collaborators(), vec![Collaborator::new("zoe@example.com")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_set() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com"]);
        let dir = directory(&f.owner, &f.note, &service);
        dir.refresh().await.unwrap();

        service.failing.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(dir.refresh().await.is_err());
        assert_eq!(dir.collaborators().len(), 1);
        assert!(!dir.is_stale());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(dir.refresh().await.is_err());
        assert_eq!(dir.collaborators().len(), 1);
        assert!(dir.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_interval() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com"]);
        let mut dir = directory(&f.owner, &f.note, &service);

        dir.start();
        assert!(dir.is_polling());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(service.list_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dir.collaborators().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.list_calls.load(Ordering::SeqCst), 3);

        dir.stop();
        dir.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(service.list_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_keeps_set_while_service_fails() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com"]);
        let mut dir = directory(&f.owner, &f.note, &service);

        dir.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(dir.collaborators().len(), 1);

        service.failing.store(true, Ordering::SeqCst);
        service.collaborators.lock().unwrap().clear();

        // Polls at 5s and 10s fail.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(service.list_calls.load(Ordering::SeqCst), 3);
        assert_eq!(dir.collaborators().len(), 1);
        assert!(!dir.is_stale());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(dir.collaborators().len(), 1);
        assert!(dir.is_stale());

        service.failing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(dir.collaborators().is_empty());
        assert!(!dir.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_refreshes() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com"]);
        let dir = directory(&f.owner, &f.note, &service);
        let mut rx = dir.subscribe();

        dir.refresh().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().contains("MIA@example.com"));
    }

    #[tokio::test]
    async fn test_non_owner_cannot_add() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com"]);
        let dir = directory(&f.member, &f.note, &service);

        let err = dir.add_collaborator("noah@example.com").await.unwrap_err();
        assert!(matches!(err, MembershipError::Denied(AccessDenied::NotOwner { .. })));
        assert_eq!(service.membership_calls.load(Ordering::SeqCst), 0);
        assert_eq!(service.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_owner_add_refreshes() {
        let f = fixture();
        let service = FakeService::with(&[]);
        let dir = directory(&f.owner, &f.note, &service);

        dir.add_collaborator("noah@example.com").await.unwrap();
        assert_eq!(service.membership_calls.load(Ordering::SeqCst), 1);
        assert!(dir.snapshot().contains("noah@example.com"));
    }

    #[tokio::test]
    async fn test_self_removal() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com", "noah@example.com"]);
        let dir = directory(&f.member, &f.note, &service);

        dir.remove_collaborator("mia@example.com").await.unwrap();
        assert_eq!(dir.collaborators(), vec![Collaborator::new("noah@example.com")]);
    }

    #[tokio::test]
    async fn test_removing_another_requires_owner() {
        let f = fixture();
        let service = FakeService::with(&["mia@example.com", "noah@example.com"]);

        let dir = directory(&f.member, &f.note, &service);
        let err = dir.remove_collaborator("noah@example.com").await.unwrap_err();
        assert!(matches!(err, MembershipError::Denied(AccessDenied::NotOwnerOrSelf)));
        assert_eq!(service.membership_calls.load(Ordering::SeqCst), 0);

        let dir = directory(&f.owner, &f.note, &service);
        dir.remove_collaborator("noah@example.com").await.unwrap();
        assert_eq!(dir.collaborators(), vec![Collaborator::new("mia@example.com")]);
    }

    #[tokio::test]
    async fn test_service_failure_surfaces() {
        let f = fixture();
        let service = FakeService::with(&[]);
        service.failing.store(true, Ordering::SeqCst);
        let dir = directory(&f.owner, &f.note, &service);

        let err = dir.add_collaborator("noah@example.com").await.unwrap_err();
        assert!(matches!(err, MembershipError::Service(ServiceError::Status { status: 503, .. })));
    }
}
