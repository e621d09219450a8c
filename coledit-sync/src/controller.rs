//! Per-note synchronization state machine.
//!
//! ```text
//!   Closed ──begin_connect──► Connecting ──on_channel_open──► Open
//!                                  │                            │
//!                                  └──────────teardown──────────┴──► Terminated
//!
//!   orthogonal, while open:   Idle ◄──remote update── Dirty ◄──local edit── Idle
//! ```
//!
//! The controller does no I/O. It turns local edits into the message to send
//! (if any) and inbound frames into the content to display (if any); the
//! [`session`](crate::session) performs the actual sends. Remote content is
//! applied through the version tracker and never produces an outbound
//! message, which is what keeps remote updates from echoing.

use std::fmt;

use crate::model::{Identity, Note, NoteId};
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::version::{RemoteContent, VersionTracker};

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Connecting,
    Open,
    /// Torn down; the session will not reconnect
    Terminated,
}

/// Whether local content has diverged from the last remote content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Dirty,
}

/// Something the user should be told about right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditNotice {
    ContentTruncated { limit: usize, attempted: usize },
}

impl fmt::Display for EditNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentTruncated { limit, attempted } => write!(
                f,
                "Notes are limited to {limit} characters ({attempted} entered); the text was shortened"
            ),
        }
    }
}

/// Result of a local edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    /// Content now held locally (possibly truncated)
    pub content: String,
    pub notice: Option<EditNotice>,
    /// Message to put on the channel, if the edit needs broadcasting
    pub outbound: Option<ClientMessage>,
}

impl EditOutcome {
    /// Version attached to the outbound update, if one was produced.
    pub fn sent_version(&self) -> Option<u64> {
        match self.outbound {
            Some(ClientMessage::UpdateNote { version, .. }) => Some(version),
            _ => None,
        }
    }
}

/// Remote content that was just applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteApplied {
    pub content: String,
    pub version: u64,
}

/// Enforce the content bound.
///
/// Content over `limit` characters keeps its first `limit - 1` characters.
pub fn clamp_content(content: &str, limit: usize) -> (String, Option<EditNotice>) {
    let attempted = content.chars().count();
    if attempted <= limit {
        return (content.to_owned(), None);
    }
    let truncated = content.chars().take(limit.saturating_sub(1)).collect();
    (truncated, Some(EditNotice::ContentTruncated { limit, attempted }))
}

pub struct SyncController {
    note: Note,
    identity: Identity,
    state: SessionState,
    tracker: VersionTracker,
    max_content_chars: usize,
    edited: bool,
    /// A local change made before the channel opened, not yet sent
    pending: bool,
}

impl SyncController {
    pub fn new(note: Note, identity: Identity, max_content_chars: usize) -> Self {
        Self {
            note,
            identity,
            state: SessionState::Closed,
            tracker: VersionTracker::new(),
            max_content_chars,
            edited: false,
            pending: false,
        }
    }

    pub fn note(&self) -> &Note {
        &self.note
    }

    pub fn note_id(&self) -> NoteId {
        self.note.id
    }

    pub fn content(&self) -> &str {
        &self.note.content
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_version(&self) -> u64 {
        self.tracker.local_version()
    }

    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }

    pub fn edit_state(&self) -> EditState {
        let untouched = matches!(self.tracker.last_remote_content(), RemoteContent::Uninitialized)
            && !self.edited;
        if untouched || !self.tracker.is_dirty(&self.note.content) {
            EditState::Idle
        } else {
            EditState::Dirty
        }
    }

    /// `Closed → Connecting`.
    pub fn begin_connect(&mut self) -> bool {
        self.transition(SessionState::Closed, SessionState::Connecting)
    }

    /// `Connecting → Open`. Returns whether the heartbeat should be armed.
    pub fn on_channel_open(&mut self) -> bool {
        self.transition(SessionState::Connecting, SessionState::Open)
    }

    /// The update owed for edits made while connecting, at most once.
    ///
    /// Call right after [`on_channel_open`](Self::on_channel_open).
    pub fn take_pending_update(&mut self) -> Option<ClientMessage> {
        if self.state != SessionState::Open || !std::mem::take(&mut self.pending) {
            return None;
        }
        self.tracker
            .record_local_change(&self.note.content)
            .map(|version| ClientMessage::update(self.note.content.clone(), version))
    }

    /// Handle an inbound frame.
    ///
    /// Only an `updateNotification` received while open changes anything.
    /// Notifications are applied in arrival order whatever their version.
    pub fn on_frame(&mut self, text: &str) -> Option<RemoteApplied> {
        if self.state != SessionState::Open {
            log::debug!("Ignoring frame for note {} while {:?}", self.note.id, self.state);
            return None;
        }

        match ServerMessage::decode(text) {
            Ok(ServerMessage::UpdateNotification { payload, version }) => {
                log::debug!("Note {} updated remotely to version {version}", self.note.id);
                self.tracker.record_remote_update(payload.clone(), version);
                self.note.content = payload.clone();
                self.pending = false;
                Some(RemoteApplied {
                    content: payload,
                    version,
                })
            }
            Err(ProtocolError::UnknownType(msg_type)) => {
                log::debug!("Ignoring `{msg_type}` message for note {}", self.note.id);
                None
            }
            Err(e) => {
                log::warn!("Dropping frame for note {}: {e}", self.note.id);
                None
            }
        }
    }

    /// Handle a local edit.
    ///
    /// The content is bounded first; a value equal to the current content is
    /// not a change. While open, a change that differs from the last remote
    /// content yields exactly one `updateNote` with the next version.
    pub fn on_local_edit(&mut self, content: &str) -> EditOutcome {
        let (content, notice) = clamp_content(content, self.max_content_chars);
        if let Some(notice) = &notice {
            log::warn!("Note {}: {notice}", self.note.id);
        }

        if self.state == SessionState::Terminated {
            log::debug!("Ignoring edit to note {} after teardown", self.note.id);
            return EditOutcome {
                content,
                notice,
                outbound: None,
            };
        }

        if content == self.note.content {
            return EditOutcome {
                content,
                notice,
                outbound: None,
            };
        }

        self.note.content = content.clone();
        self.edited = true;

        let outbound = if self.state == SessionState::Open {
            self.tracker
                .record_local_change(&content)
                .map(|version| ClientMessage::update(content.clone(), version))
        } else {
            self.pending = true;
            None
        };

        EditOutcome {
            content,
            notice,
            outbound,
        }
    }

    /// Move to `Terminated` and forget version state. Returns `false` if the
    /// session was already torn down.
    pub fn teardown(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return false;
        }
        log::debug!("Tearing down session for note {}", self.note.id);
        self.state = SessionState::Terminated;
        self.tracker.reset();
        true
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> bool {
        if self.state != from {
            log::debug!(
                "Note {}: ignoring {from:?} → {to:?} while {:?}",
                self.note.id,
                self.state
            );
            return false;
        }
        self.state = to;
        true
    }
}
