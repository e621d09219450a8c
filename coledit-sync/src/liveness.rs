//! Heartbeat over an open document channel.
//!
//! Once armed, a background task sends `{"type":"heartbeat"}` every period.
//! A tick that finds the channel not open is skipped, not treated as a
//! failure: silent disconnects surface through the channel itself.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::protocol::ClientMessage;
use crate::transport::ChannelSender;

/// Handle to a session's keepalive task.
#[derive(Debug, Default)]
pub struct Heartbeat {
    task: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// A heartbeat that has not been armed yet.
    pub fn idle() -> Self {
        Self { task: None }
    }

    /// Start ticking. The first heartbeat goes out one `period` from now.
    ///
    /// Re-arming replaces the previous task.
    pub fn arm(&mut self, sender: ChannelSender, period: Duration) {
        self.cancel();
        log::debug!("Heartbeat armed every {period:?}");
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if sender.is_open() {
                    sender.send(&ClientMessage::Heartbeat);
                } else {
                    log::trace!("Heartbeat skipped: channel is {:?}", sender.state());
                }
            }
        }));
    }

    pub fn is_armed(&self) -> bool {
        self.task.is_some()
    }

    /// Stop ticking. Safe to call any number of times.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Heartbeat cancelled");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel();
    }
}
