// ── Failure classification ──
//
// Turns call failures into caller-facing errors and, for the two statuses
// that mean something to the controller, into events: PERMISSION_DENIED is
// lost mastership, UNAVAILABLE is a dead channel and ends the session.

use std::sync::Arc;

use p4rt_api::{Code, Status};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arbiter::MastershipArbiter;
use crate::error::CoreError;
use crate::executor::{RpcFailure, SessionScope};
use crate::model::{DeviceId, EventSink, P4RuntimeEvent};
use crate::session::StreamSender;

/// What a transport status means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    MastershipLost,
    ChannelError,
    PlainFailure,
}

/// Status codes with a meaning beyond "the call failed". Anything not
/// listed is a plain failure.
const STATUS_OUTCOMES: &[(Code, Outcome)] = &[
    (Code::PermissionDenied, Outcome::MastershipLost),
    (Code::Unavailable, Outcome::ChannelError),
];

pub fn classify(code: Code) -> Outcome {
    STATUS_OUTCOMES
        .iter()
        .find(|(listed, _)| *listed == code)
        .map_or(Outcome::PlainFailure, |(_, outcome)| *outcome)
}

// ── ErrorClassifier ──────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct ErrorClassifier {
    device_id: DeviceId,
    events: EventSink,
    scope: Arc<SessionScope>,
    arbiter: Arc<MastershipArbiter>,
    outbound: Arc<StreamSender>,
}

impl ErrorClassifier {
    pub(crate) fn new(
        device_id: DeviceId,
        events: EventSink,
        scope: Arc<SessionScope>,
        arbiter: Arc<MastershipArbiter>,
        outbound: Arc<StreamSender>,
    ) -> Self {
        Self {
            device_id,
            events,
            scope,
            arbiter,
            outbound,
        }
    }

    /// Log `failure`, post the event it implies and convert it for the
    /// caller of `operation`.
    pub(crate) fn report(&self, failure: RpcFailure, operation: &'static str) -> CoreError {
        let device_id = self.device_id.clone();
        match failure {
            RpcFailure::SessionNotOpen => CoreError::SessionNotOpen { device_id },
            RpcFailure::Cancelled => {
                debug!(%device_id, operation, "rpc cancelled by session close");
                CoreError::Cancelled {
                    device_id,
                    operation,
                }
            }
            RpcFailure::Timeout(timeout) => {
                warn!(%device_id, operation, ?timeout, "rpc timed out");
                CoreError::Timeout {
                    device_id,
                    operation,
                    timeout,
                }
            }
            RpcFailure::Status { status, scope } => self.report_status(&status, &scope, operation),
        }
    }

    fn report_status(
        &self,
        status: &Status,
        scope: &Arc<CancellationToken>,
        operation: &'static str,
    ) -> CoreError {
        let device_id = self.device_id.clone();
        let message = status.message().to_owned();
        warn!(
            %device_id,
            operation,
            code = ?status.code(),
            "Error while performing {operation} on {device_id}: {message}"
        );
        debug!(%device_id, ?status, "full status");

        match classify(status.code()) {
            Outcome::MastershipLost => {
                self.events.post(P4RuntimeEvent::PermissionDenied {
                    device_id: device_id.clone(),
                });
                CoreError::PermissionDenied { device_id, message }
            }
            Outcome::ChannelError => {
                self.end_session(scope);
                self.events.post(P4RuntimeEvent::ChannelError {
                    device_id: device_id.clone(),
                    reason: message.clone(),
                });
                CoreError::TransportUnavailable { device_id, message }
            }
            Outcome::PlainFailure => CoreError::Rpc {
                device_id,
                operation,
                code: status.code(),
                message,
            },
        }
    }

    /// Tear down the session of `scope` after a transport failure.
    pub(crate) fn end_session(&self, scope: &Arc<CancellationToken>) {
        let torn_down = self.scope.fail_if_current(scope, || {
            self.outbound.clear();
            self.arbiter.reset();
        });
        if torn_down {
            info!(device_id = %self.device_id, "stream session closed after transport failure");
        }
    }

    pub(crate) fn protocol_violation(&self, message: String) -> CoreError {
        warn!(device_id = %self.device_id, %message, "protocol violation");
        CoreError::ProtocolViolation {
            device_id: self.device_id.clone(),
            message,
        }
    }
}
