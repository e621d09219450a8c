//! Tunables for sessions, the collaborator directory, the REST client and the
//! reference relay.

use std::time::Duration;

use crate::model::NoteId;

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the document channel; notes live under `/document/{id}`
    pub server_url: String,
    /// Keepalive period once the channel is open
    pub heartbeat_interval: Duration,
    /// Upper bound on note content, in characters
    pub max_content_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:9090/wsapp".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            max_content_chars: 1000,
        }
    }
}

impl SessionConfig {
    /// Channel endpoint for one note.
    pub fn endpoint(&self, note_id: NoteId) -> String {
        format!("{}/document/{}", self.server_url.trim_end_matches('/'), note_id)
    }
}

/// Collaborator directory polling.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Time between two polls of the collaborator listing
    pub poll_interval: Duration,
    /// Age after which the last successful listing counts as stale
    pub stale_after: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// REST note service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// API root, e.g. `https://host/api`
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Reference relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// Path prefix under which notes are addressed
    pub document_path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            document_path: "/wsapp/document".to_string(),
        }
    }
}
