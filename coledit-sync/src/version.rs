//! Local version counter and echo suppression.
//!
//! The tracker remembers the version this client believes the note is at and
//! the content last received from the remote side. A local change only needs
//! to go out when it differs from that remote content; content that just
//! arrived from the remote side is therefore never echoed back.

/// Content last confirmed to have come from the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RemoteContent {
    /// No notification has arrived yet. Distinct from every real value,
    /// including the empty string.
    #[default]
    Uninitialized,
    Known(String),
}

impl RemoteContent {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Uninitialized => None,
            Self::Known(content) => Some(content),
        }
    }

    fn matches(&self, content: &str) -> bool {
        self.as_deref() == Some(content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VersionTracker {
    local_version: u64,
    last_remote: RemoteContent,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_version(&self) -> u64 {
        self.local_version
    }

    pub fn last_remote_content(&self) -> &RemoteContent {
        &self.last_remote
    }

    /// Adopt a remote notification. The remote version is taken verbatim.
    pub fn record_remote_update(&mut self, content: impl Into<String>, version: u64) {
        self.last_remote = RemoteContent::Known(content.into());
        self.local_version = version;
    }

    /// Tag a local change for sending.
    ///
    /// Returns the new version when `content` differs from the last remote
    /// content, `None` when nothing needs to be sent. A counter already at
    /// `u64::MAX` cannot advance, so nothing is sent either.
    pub fn record_local_change(&mut self, content: &str) -> Option<u64> {
        if !self.is_dirty(content) {
            return None;
        }
        let Some(next) = self.local_version.checked_add(1) else {
            log::warn!("Version counter exhausted at {}; change not sent", self.local_version);
            return None;
        };
        self.local_version = next;
        Some(next)
    }

    /// Whether `content` differs from what the remote side last sent.
    pub fn is_dirty(&self, content: &str) -> bool {
        !self.last_remote.matches(content)
    }

    /// Forget everything, as for a freshly opened note.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
