// ── Domain events ──
//
// What the client reports asynchronously to whoever owns it. Events flow
// through an injected `EventSink`; the client keeps no history.

use std::sync::Arc;

use p4rt_api::Code;
use strum::Display;
use tokio::sync::broadcast;

use crate::model::{DeviceId, InboundPacket};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An event about one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum P4RuntimeEvent {
    /// The server rejected an operation because this client is not master.
    PermissionDenied { device_id: DeviceId },
    /// The channel reported itself unavailable; the session has been closed.
    ChannelError { device_id: DeviceId, reason: String },
    /// A stream session was opened.
    ChannelOpen { device_id: DeviceId },
    /// A stream session was opened after the previous one failed.
    ChannelReconnected { device_id: DeviceId },
    /// The stream session was closed locally.
    ChannelClosed { device_id: DeviceId },
    PacketIn {
        device_id: DeviceId,
        packet: InboundPacket,
    },
    /// The server reported an asynchronous stream error (e.g. a rejected
    /// packet-out).
    StreamError {
        device_id: DeviceId,
        code: Code,
        message: String,
    },
}

/// Discriminant of [`P4RuntimeEvent`], for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PermissionDenied,
    ChannelError,
    ChannelOpen,
    ChannelReconnected,
    ChannelClosed,
    PacketIn,
    StreamError,
}

impl P4RuntimeEvent {
    pub fn device_id(&self) -> &DeviceId {
        match self {
            Self::PermissionDenied { device_id }
            | Self::ChannelError { device_id, .. }
            | Self::ChannelOpen { device_id }
            | Self::ChannelReconnected { device_id }
            | Self::ChannelClosed { device_id }
            | Self::PacketIn { device_id, .. }
            | Self::StreamError { device_id, .. } => device_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::PermissionDenied { .. } => EventKind::PermissionDenied,
            Self::ChannelError { .. } => EventKind::ChannelError,
            Self::ChannelOpen { .. } => EventKind::ChannelOpen,
            Self::ChannelReconnected { .. } => EventKind::ChannelReconnected,
            Self::ChannelClosed { .. } => EventKind::ChannelClosed,
            Self::PacketIn { .. } => EventKind::PacketIn,
            Self::StreamError { .. } => EventKind::StreamError,
        }
    }
}

// ── EventSink ───────────────────────────────────────────────────────

/// Injected handle through which sessions publish events.
///
/// Cheaply cloneable; posting never blocks. Receivers that fall behind get
/// [`broadcast::error::RecvError::Lagged`].
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<Arc<P4RuntimeEvent>>,
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn post(&self, event: P4RuntimeEvent) {
        tracing::trace!(kind = %event.kind(), device_id = %event.device_id(), "posting event");
        // No subscribers is fine: nobody is listening right now.
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<P4RuntimeEvent>> {
        self.tx.subscribe()
    }
}
