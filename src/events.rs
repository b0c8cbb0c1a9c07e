//! Events emitted by the connection manager.
//!
//! Every inbound server message produces exactly one event, and every
//! connection state transition produces a [`Event::StatusChanged`]. Events
//! are delivered to a single observer, which drives playback.
//!
//! # Example
//!
//! ```rust
//! use smartscreen::events::Event;
//!
//! fn handle_event(event: Event) {
//!     match event {
//!         Event::ContentReceived(data) => println!("{} items", data.playlist().len()),
//!         Event::Error(msg) => eprintln!("{msg}"),
//!         // ... handle other events ...
//!         _ => {}
//!     }
//! }
//! ```

use std::fmt;

use crate::protocol::content::{ContentData, ContentItem};

/// State of the connection to the content server.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Events emitted by the connection manager.
///
/// # Events
///
/// Connection Events:
/// * [`StatusChanged`](Self::StatusChanged) - Connection state changes
/// * [`Error`](Self::Error) - Transport or protocol fault
///
/// Server Messages:
/// * [`Registration`](Self::Registration) - Registration acknowledged
/// * [`ContentReceived`](Self::ContentReceived) - Playlist delivered
/// * [`PushContent`](Self::PushContent) and [`TempContent`](Self::TempContent) -
///   Single item to show now
/// * [`DisplayModeChanged`](Self::DisplayModeChanged) and
///   [`Refresh`](Self::Refresh) - Content should be requested again
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The connection moved to a new state.
    StatusChanged(ConnectionState),

    /// The server acknowledged registration.
    ///
    /// On success, content has already been requested.
    Registration { success: bool, message: String },

    /// The server delivered the playlist for this device.
    ContentReceived(ContentData),

    HeartbeatAck {
        success: bool,
        active: bool,
        message: String,
    },

    /// The device was enabled or disabled on the server.
    ActiveStatusChanged { active: bool, message: String },

    /// An item to play immediately.
    PushContent(ContentItem),

    /// The display mode changed; the playlist depends on it.
    DisplayModeChanged { mode: i64, name: String },

    /// An item to play temporarily.
    TempContent(ContentItem),

    /// A fleet-wide command such as `restart` or `shutdown`.
    BatchControl { action: String, message: String },

    /// The server asks the client to fetch content again.
    Refresh(String),

    /// A transport fault, a malformed frame, or an error reported by the
    /// server.
    Error(String),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StatusChanged(state) => write!(f, "status changed: {state}"),
            Self::Registration { success, .. } => write!(f, "registration (success: {success})"),
            Self::ContentReceived(data) => write!(
                f,
                "content received (display mode {})",
                data.display_mode
            ),
            Self::HeartbeatAck { success, active, .. } => {
                write!(f, "heartbeat ack (success: {success}, active: {active})")
            }
            Self::ActiveStatusChanged { active, .. } => write!(f, "active status: {active}"),
            Self::PushContent(item) => write!(f, "push content: {item}"),
            Self::DisplayModeChanged { mode, name } => {
                write!(f, "display mode changed: {mode} ({name})")
            }
            Self::TempContent(item) => write!(f, "temp content: {item}"),
            Self::BatchControl { action, .. } => write!(f, "batch control: {action}"),
            Self::Refresh(message) => write!(f, "refresh: {message}"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}
