//! Per-note WebSocket channel.
//!
//! A [`Channel`] owns exactly one connection. A single I/O task performs the
//! handshake, then multiplexes outbound frames and inbound messages with
//! `tokio::select!`. The owner consumes [`ChannelEvent`]s from
//! [`Channel::next_event`]; anything that wants to write (the session, the
//! heartbeat) holds a cheap [`ChannelSender`] clone.
//!
//! Sends are fire-and-forget: a frame offered while the channel is not
//! [`ChannelState::Open`] is dropped without an error. The channel never
//! reconnects by itself; a dead channel stays closed until its session is
//! recreated.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::ClientMessage;

/// Channel readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Events surfaced to the channel owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake finished; sends are now delivered
    Opened,
    /// A text frame (binary frames are accepted if they are valid UTF-8)
    Frame(String),
    /// The underlying transport reported an error
    Error(String),
    /// The remote side went away
    Closed,
}

#[derive(Debug)]
enum Outbound {
    Frame(String),
    Close,
}

/// Write half of a channel, shared by everything that sends on it.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    outgoing: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<ChannelState>,
}

impl ChannelSender {
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Queue a message for delivery.
    ///
    /// Returns whether the frame was queued. A channel that is not open
    /// drops the frame silently.
    pub fn send(&self, msg: &ClientMessage) -> bool {
        if !self.is_open() {
            log::trace!("Dropping {msg:?}: channel is {:?}", self.state());
            return false;
        }
        match msg.encode() {
            Ok(text) => self.outgoing.send(Outbound::Frame(text)).is_ok(),
            Err(e) => {
                log::error!("{e}");
                false
            }
        }
    }
}

/// One bidirectional document channel.
pub struct Channel {
    sender: ChannelSender,
    state: Arc<watch::Sender<ChannelState>>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl Channel {
    /// Start connecting to `endpoint`.
    ///
    /// Returns immediately in [`ChannelState::Connecting`]; the outcome
    /// arrives as [`ChannelEvent::Opened`] or as an error followed by
    /// [`ChannelEvent::Closed`]. Must be called inside a tokio runtime.
    pub fn open(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let state_tx = Arc::new(state_tx);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        // The I/O task exits on its own after flushing a close frame, or when
        // every sender is gone.
        tokio::spawn(Self::run(endpoint, state_tx.clone(), out_rx, event_tx));

        Self {
            sender: ChannelSender {
                outgoing: out_tx,
                state: state_rx,
            },
            state: state_tx,
            events: event_rx,
        }
    }

    /// A channel with no socket behind it.
    ///
    /// The returned [`ChannelPeer`] plays the remote end: it opens and
    /// hangs up the channel, delivers frames, and reads what was sent.
    pub fn in_memory() -> (Self, ChannelPeer) {
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let state_tx = Arc::new(state_tx);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let channel = Self {
            sender: ChannelSender {
                outgoing: out_tx,
                state: state_rx,
            },
            state: state_tx.clone(),
            events: event_rx,
        };
        let peer = ChannelPeer {
            state: state_tx,
            events: event_tx,
            outgoing: out_rx,
            close_requested: false,
        };
        (channel, peer)
    }

    pub fn state(&self) -> ChannelState {
        self.sender.state()
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// See [`ChannelSender::send`].
    pub fn send(&self, msg: &ClientMessage) -> bool {
        self.sender.send(msg)
    }

    /// Wait for the next transport event.
    ///
    /// Returns `None` once the transport has shut down and every event has
    /// been consumed. Cancel-safe.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Close the channel. Safe to call any number of times.
    pub fn close(&mut self) {
        if mark_closed(&self.state) {
            log::debug!("Closing channel");
            let _ = self.sender.outgoing.send(Outbound::Close);
        }
    }

    async fn run(
        endpoint: String,
        state: Arc<watch::Sender<ChannelState>>,
        mut outgoing: mpsc::UnboundedReceiver<Outbound>,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) {
        let ws_stream = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::error!("Failed to connect to {endpoint}: {e}");
                if mark_closed(&state) {
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    let _ = events.send(ChannelEvent::Closed);
                }
                return;
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // A close issued while the handshake was in flight wins.
        let opened = state.send_if_modified(|s| {
            if *s == ChannelState::Connecting {
                *s = ChannelState::Open;
                true
            } else {
                false
            }
        });
        if !opened {
            log::debug!("Channel to {endpoint} closed during handshake");
            let _ = ws_writer.send(Message::Close(None)).await;
            return;
        }

        log::info!("Connected to {endpoint}");
        let _ = events.send(ChannelEvent::Opened);

        loop {
            tokio::select! {
                out = outgoing.recv() => match out {
                    Some(Outbound::Frame(text)) => {
                        if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                            log::error!("WebSocket error on {endpoint}: {e}");
                            let _ = events.send(ChannelEvent::Error(e.to_string()));
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws_writer.send(Message::Close(None)).await;
                        log::info!("Disconnected from {endpoint}");
                        break;
                    }
                },

                msg = ws_reader.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(ChannelEvent::Frame(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(ChannelEvent::Frame(text));
                        }
                        Err(_) => log::warn!("Dropping non-UTF-8 frame from {endpoint}"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Channel to {endpoint} closed by remote");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("WebSocket error on {endpoint}: {e}");
                        let _ = events.send(ChannelEvent::Error(e.to_string()));
                        break;
                    }
                },
            }
        }

        if mark_closed(&state) {
            let _ = events.send(ChannelEvent::Closed);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Remote end of an in-memory [`Channel`].
pub struct ChannelPeer {
    state: Arc<watch::Sender<ChannelState>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    outgoing: mpsc::UnboundedReceiver<Outbound>,
    close_requested: bool,
}

impl ChannelPeer {
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Complete the handshake.
    pub fn accept(&self) {
        let opened = self.state.send_if_modified(|s| {
            if *s == ChannelState::Connecting {
                *s = ChannelState::Open;
                true
            } else {
                false
            }
        });
        if opened {
            let _ = self.events.send(ChannelEvent::Opened);
        }
    }

    /// Deliver a raw text frame to the channel owner.
    pub fn deliver(&self, text: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Frame(text.into()));
    }

    /// Report a transport error without closing.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Error(reason.into()));
    }

    /// Drop the connection from the remote side.
    pub fn hang_up(&self) {
        if mark_closed(&self.state) {
            let _ = self.events.send(ChannelEvent::Closed);
        }
    }

    /// Next frame the owner sent, without waiting.
    pub fn try_recv_frame(&mut self) -> Option<String> {
        loop {
            match self.outgoing.try_recv() {
                Ok(Outbound::Frame(text)) => return Some(text),
                Ok(Outbound::Close) => self.close_requested = true,
                Err(_) => return None,
            }
        }
    }

    /// Wait for the next frame. Returns `None` once the owner closes.
    pub async fn recv_frame(&mut self) -> Option<String> {
        match self.outgoing.recv().await {
            Some(Outbound::Frame(text)) => Some(text),
            Some(Outbound::Close) => {
                self.close_requested = true;
                None
            }
            None => None,
        }
    }

    /// Every frame sent so far.
    pub fn drain_frames(&mut self) -> Vec<String> {
        std::iter::from_fn(|| self.try_recv_frame()).collect()
    }

    /// Whether the owner has asked to close (as observed by the receive calls).
    pub fn close_requested(&self) -> bool {
        self.close_requested
    }
}

fn mark_closed(state: &watch::Sender<ChannelState>) -> bool {
    state.send_if_modified(|s| {
        if *s == ChannelState::Closed {
            false
        } else {
            *s = ChannelState::Closed;
            true
        }
    })
}
