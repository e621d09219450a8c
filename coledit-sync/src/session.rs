//! One open note: controller, channel and heartbeat under a single owner.
//!
//! The session is a cooperative actor. The embedding application pumps
//! [`NoteSession::next_event`] for inbound traffic and calls
//! [`NoteSession::edit`] for user input; both run on the caller's task, so
//! none of the session's state is shared. The heartbeat is the only work
//! that runs on its own, and it only ever holds a [`ChannelSender`].
//!
//! [`ChannelSender`]: crate::transport::ChannelSender

use crate::config::SessionConfig;
use crate::controller::{EditOutcome, EditState, SessionState, SyncController};
use crate::liveness::Heartbeat;
use crate::model::{Identity, Note};
use crate::transport::{Channel, ChannelEvent, ChannelState};

/// What the session has to report to the user interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The channel is open and edits are now broadcast
    Connected,
    /// Another participant changed the note; `content` is what to display
    RemoteUpdate { content: String, version: u64 },
    /// The transport reported an error; the session stays up
    TransportError(String),
    /// The channel is gone; reopen the note to reconnect
    Disconnected,
}

pub struct NoteSession {
    controller: SyncController,
    channel: Channel,
    heartbeat: Heartbeat,
    config: SessionConfig,
}

impl NoteSession {
    /// Open `note` for editing and start connecting to its channel.
    pub fn open(note: Note, identity: Identity, config: SessionConfig) -> Self {
        let channel = Channel::open(config.endpoint(note.id));
        Self::with_channel(note, identity, config, channel)
    }

    /// Run a session over an existing channel, e.g. [`Channel::in_memory`].
    pub fn with_channel(
        note: Note,
        identity: Identity,
        config: SessionConfig,
        channel: Channel,
    ) -> Self {
        log::info!("Opening note {} for {}", note.id, identity.email);
        let mut controller = SyncController::new(note, identity, config.max_content_chars);
        controller.begin_connect();
        Self {
            controller,
            channel,
            heartbeat: Heartbeat::idle(),
            config,
        }
    }

    /// Wait for the next thing worth reporting.
    ///
    /// Frames that change nothing (malformed, unknown, or arriving in the
    /// wrong state) are consumed silently. Returns `None` after
    /// [`close`](Self::close) or once the transport has nothing left to say.
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.controller.state() == SessionState::Terminated {
                return None;
            }

            match self.channel.next_event().await? {
                ChannelEvent::Opened => {
                    if self.controller.on_channel_open() {
                        log::info!("Note {} connected", self.controller.note_id());
                        self.heartbeat
                            .arm(self.channel.sender(), self.config.heartbeat_interval);
                        if let Some(msg) = self.controller.take_pending_update() {
                            log::debug!(
                                "Sending edits made while note {} was connecting",
                                self.controller.note_id()
                            );
                            self.channel.send(&msg);
                        }
                        return Some(SessionEvent::Connected);
                    }
                }
                ChannelEvent::Frame(text) => {
                    if let Some(applied) = self.controller.on_frame(&text) {
                        return Some(SessionEvent::RemoteUpdate {
                            content: applied.content,
                            version: applied.version,
                        });
                    }
                }
                ChannelEvent::Error(reason) => {
                    log::warn!(
                        "Transport error on note {}: {reason}",
                        self.controller.note_id()
                    );
                    return Some(SessionEvent::TransportError(reason));
                }
                ChannelEvent::Closed => {
                    log::info!("Note {} disconnected", self.controller.note_id());
                    return Some(SessionEvent::Disconnected);
                }
            }
        }
    }

    /// Apply a local edit and broadcast it if it is a change.
    pub fn edit(&mut self, content: &str) -> EditOutcome {
        let outcome = self.controller.on_local_edit(content);
        if let Some(msg) = &outcome.outbound {
            if !self.channel.send(msg) {
                log::debug!(
                    "Update for note {} dropped: channel is {:?}",
                    self.controller.note_id(),
                    self.channel.state()
                );
            }
        }
        outcome
    }

    /// Tear the session down. Safe to call any number of times.
    pub fn close(&mut self) {
        self.heartbeat.cancel();
        self.channel.close();
        if self.controller.teardown() {
            log::info!("Closed note {}", self.controller.note_id());
        }
    }

    pub fn note(&self) -> &Note {
        self.controller.note()
    }

    pub fn content(&self) -> &str {
        self.controller.content()
    }

    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    pub fn edit_state(&self) -> EditState {
        self.controller.edit_state()
    }

    pub fn local_version(&self) -> u64 {
        self.controller.local_version()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn is_heartbeat_armed(&self) -> bool {
        self.heartbeat.is_armed()
    }
}

impl Drop for NoteSession {
    fn drop(&mut self) {
        self.close();
    }
}
