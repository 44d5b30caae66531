// ── Core error types ──
//
// What callers of the client see. Transport statuses are classified before
// they get here: mastership loss and channel failures have their own
// variants, everything else the server rejects arrives as `Rpc`.

use std::time::Duration;

use p4rt_api::Code;
use thiserror::Error;

use crate::model::{ClientKey, DeviceId, PipeconfId};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport & session ──────────────────────────────────────────
    #[error("Channel to {device_id} unavailable: {message}")]
    TransportUnavailable { device_id: DeviceId, message: String },

    #[error("Permission denied on {device_id}: not master ({message})")]
    PermissionDenied { device_id: DeviceId, message: String },

    #[error("{operation} on {device_id} timed out after {timeout:?}")]
    Timeout {
        device_id: DeviceId,
        operation: &'static str,
        timeout: Duration,
    },

    #[error("No open stream session for {device_id}")]
    SessionNotOpen { device_id: DeviceId },

    #[error("{operation} on {device_id} cancelled by session close")]
    Cancelled {
        device_id: DeviceId,
        operation: &'static str,
    },

    #[error("Protocol violation from {device_id}: {message}")]
    ProtocolViolation { device_id: DeviceId, message: String },

    #[error("{operation} on {device_id} failed: {code:?}: {message}")]
    Rpc {
        device_id: DeviceId,
        operation: &'static str,
        code: Code,
        message: String,
    },

    #[error("Outbound stream queue for {device_id} is full")]
    OutboundQueueFull { device_id: DeviceId },

    // ── Pipeconf resolution ──────────────────────────────────────────
    #[error("Invalid pipeconf {pipeconf_id}: {reason}")]
    InvalidPipeconf {
        pipeconf_id: PipeconfId,
        reason: String,
    },

    #[error("Unknown table {table} in pipeconf {pipeconf_id}")]
    UnknownTable {
        pipeconf_id: PipeconfId,
        table: String,
    },

    #[error("Unknown packet metadata {metadata} in pipeconf {pipeconf_id}")]
    UnknownPacketMetadata {
        pipeconf_id: PipeconfId,
        metadata: String,
    },

    // ── Registry ─────────────────────────────────────────────────────
    #[error("No channel available for {device_id}")]
    ChannelNotFound { device_id: DeviceId },

    #[error("A client for {device_id} already exists with key {existing}")]
    ClientExists {
        device_id: DeviceId,
        existing: ClientKey,
    },
}

impl CoreError {
    pub fn is_session_not_open(&self) -> bool {
        matches!(self, Self::SessionNotOpen { .. })
    }

    /// Whether the failure means this client lost (or never had) mastership.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Whether the channel itself failed and the session should be reopened
    /// by the owner.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The transport status code behind this error, when there is one.
    pub fn code(&self) -> Option<Code> {
        match self {
            Self::TransportUnavailable { .. } => Some(Code::Unavailable),
            Self::PermissionDenied { .. } => Some(Code::PermissionDenied),
            Self::Timeout { .. } => Some(Code::DeadlineExceeded),
            Self::Cancelled { .. } => Some(Code::Cancelled),
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ── Per-update failures ──────────────────────────────────────────────

/// Server-side rejection of one update inside an otherwise successful write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct ApplicationError {
    pub code: Code,
    pub message: String,
}
