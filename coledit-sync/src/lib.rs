//! # coledit-sync: Real-time note synchronization for ColEdit
//!
//! Keeps one open note in step with every other viewer of that note over a
//! per-note WebSocket channel, using whole-document replacement tagged with a
//! monotonically increasing version.
//!
//! ## Architecture
//!
//! ```text
//!   user input                    inbound frames
//!       │                               │
//!       ▼                               │
//! ┌──────────────┐   updateNote   ┌─────┴───────┐   WebSocket   ┌─────────────┐
//! │ NoteSession  │ ─────────────► │  Channel    │ ◄───────────► │ RelayServer │
//! │ (per note)   │ ◄───────────── │ (transport) │   JSON text   │ (per room)  │
//! └──────┬───────┘ updateNotif.   └─────▲───────┘               └─────────────┘
//!        │                              │
//!        ▼                              │ {"type":"heartbeat"}
//! ┌──────────────┐               ┌──────┴──────┐
//! │SyncController│               │  Heartbeat  │
//! │ + Version    │               │ (liveness)  │
//! │   Tracker    │               └─────────────┘
//! └──────────────┘
//!
//! ┌───────────────────────┐  REST (polled)  ┌─────────────┐
//! │ CollaboratorDirectory │ ──────────────► │ NoteService │
//! │ NoteLibrary           │ ──────────────► │  (HTTP)     │
//! └───────────────────────┘                 └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages for the document channel
//! - [`transport`]: one WebSocket channel per open note
//! - [`liveness`]: periodic heartbeat over an open channel
//! - [`version`]: local version counter and echo suppression
//! - [`controller`]: the per-note synchronization state machine
//! - [`session`]: the actor tying controller, channel and heartbeat together
//! - [`access`]: owner / self-removal authorization policy
//! - [`service`]: REST note and collaborator service client
//! - [`directory`]: polled collaborator directory
//! - [`library`]: notes visible to the signed-in identity
//! - [`relay`]: minimal reference relay for development and tests

pub mod access;
pub mod config;
pub mod controller;
pub mod directory;
pub mod library;
pub mod liveness;
pub mod model;
pub mod protocol;
pub mod relay;
pub mod service;
pub mod session;
pub mod transport;
pub mod version;

// Re-exports for convenience
pub use access::AccessDenied;
pub use config::{DirectoryConfig, RelayConfig, ServiceConfig, SessionConfig};
pub use controller::{
    EditNotice, EditOutcome, EditState, RemoteApplied, SessionState, SyncController,
};
pub use directory::{CollaboratorDirectory, DirectorySnapshot, MembershipError};
pub use library::NoteLibrary;
pub use liveness::Heartbeat;
pub use model::{Collaborator, Identity, Note, NoteId, UserId};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use relay::{RelayServer, RelayStats, RoomSnapshot};
pub use service::{HttpNoteService, NoteService, ServiceError};
pub use session::{NoteSession, SessionEvent};
pub use transport::{Channel, ChannelEvent, ChannelPeer, ChannelSender, ChannelState};
pub use version::VersionTracker;
