// ── Mastership arbitration ──
//
// Tracks whether this client is the device's master. A claim is sent on
// the stream and the state stays `Pending` until the server's next
// arbitration update: the client is master iff the election id the server
// reports equals the one it last sent.

use std::sync::{Mutex, MutexGuard, PoisonError};

use p4rt_api::proto::{MasterArbitrationUpdate, StreamMessageRequest};
use strum::Display;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{DeviceId, ElectionId};
use crate::session::StreamSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MastershipState {
    NotMaster,
    /// A claim has been sent and not yet answered.
    Pending,
    Master,
}

pub(crate) struct MastershipArbiter {
    device_id: DeviceId,
    p4_device_id: u64,
    last_used: Mutex<Option<ElectionId>>,
    state: watch::Sender<MastershipState>,
}

impl MastershipArbiter {
    pub(crate) fn new(device_id: DeviceId, p4_device_id: u64) -> Self {
        let (state, _) = watch::channel(MastershipState::NotMaster);
        Self {
            device_id,
            p4_device_id,
            last_used: Mutex::new(None),
            state,
        }
    }

    // The lock also serializes state transitions.
    fn lock(&self) -> MutexGuard<'_, Option<ElectionId>> {
        self.last_used
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn run_for_mastership(
        &self,
        outbound: &StreamSender,
        election_id: ElectionId,
    ) -> Result<(), CoreError> {
        let mut last_used = self.lock();
        let previous = (*last_used, *self.state.borrow());

        *last_used = Some(election_id);
        self.state.send_replace(MastershipState::Pending);

        let claim = StreamMessageRequest::Arbitration(MasterArbitrationUpdate {
            device_id: self.p4_device_id,
            election_id: Some(election_id.into()),
            status: None,
        });
        if let Err(err) = outbound.send(claim) {
            *last_used = previous.0;
            self.state.send_replace(previous.1);
            return Err(err);
        }
        debug!(device_id = %self.device_id, %election_id, "sent mastership claim");
        Ok(())
    }

    pub(crate) fn handle_update(&self, update: &MasterArbitrationUpdate) {
        if update.device_id != self.p4_device_id {
            warn!(
                device_id = %self.device_id,
                expected = self.p4_device_id,
                received = update.device_id,
                "ignoring arbitration update for another device"
            );
            return;
        }

        let last_used = self.lock();
        let acked = update.election_id.map(ElectionId::from);
        let next = match (*last_used, acked) {
            (Some(sent), Some(acked)) if sent == acked => MastershipState::Master,
            _ => MastershipState::NotMaster,
        };
        debug!(
            device_id = %self.device_id,
            sent = ?last_used.as_ref(),
            acked = ?acked,
            code = ?update.status.as_ref().map(|s| s.code),
            state = %next,
            "mastership arbitration update"
        );
        self.state.send_replace(next);
    }

    /// Drop mastership without forgetting the last used election id.
    pub(crate) fn reset(&self) {
        let _guard = self.lock();
        self.state.send_replace(MastershipState::NotMaster);
    }

    /// Forget the last used election id. Done when a new session opens.
    pub(crate) fn clear_election_id(&self) {
        let mut last_used = self.lock();
        *last_used = None;
        self.state.send_replace(MastershipState::NotMaster);
    }

    pub(crate) fn state(&self) -> MastershipState {
        *self.state.borrow()
    }

    pub(crate) fn is_master(&self) -> bool {
        self.state() == MastershipState::Master
    }

    pub(crate) fn last_used_election_id(&self) -> Option<ElectionId> {
        *self.lock()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<MastershipState> {
        self.state.subscribe()
    }
}
