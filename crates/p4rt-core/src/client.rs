// ── P4Runtime client ──
//
// One client per device. Owns the stream session and issues every
// per-call RPC through the session's executor, so closing the session
// cancels everything in flight.

use std::sync::Arc;

use bytes::Bytes;
use p4rt_api::P4RuntimeStub;
use tokio::sync::watch;
use tracing::debug;

use crate::arbiter::MastershipState;
use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::executor::ConnectionState;
use crate::model::{
    ClientKey, DeviceId, ElectionId, EventSink, OutboundPacket, Pipeconf, PipeconfService,
};
use crate::pipeline::PipelineConfigClient;
use crate::session::StreamSession;
use crate::table::{ReadRequest, TableIoClient, WriteRequest};

/// P4Runtime control-plane client for one device.
///
/// Cheaply cloneable via `Arc<ClientInner>`. The session closes when the
/// last handle is dropped.
#[derive(Clone)]
pub struct P4RuntimeClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    key: ClientKey,
    session: StreamSession,
    pipeline: PipelineConfigClient,
    tables: TableIoClient,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.session.close();
    }
}

impl P4RuntimeClient {
    /// Create a client over an already connected channel. Does NOT open
    /// the stream; call [`open_session()`](Self::open_session).
    pub fn new(
        key: ClientKey,
        stub: Arc<dyn P4RuntimeStub>,
        events: EventSink,
        pipeconfs: Arc<dyn PipeconfService>,
        config: ClientConfig,
    ) -> Self {
        let device_id = key.device_id.clone();
        let p4_device_id = key.p4_device_id;
        let session = StreamSession::new(
            device_id.clone(),
            p4_device_id,
            stub,
            events,
            pipeconfs,
            config.clone(),
        );
        let pipeline = PipelineConfigClient::new(
            device_id.clone(),
            p4_device_id,
            config.clone(),
            session.executor().clone(),
            session.classifier().clone(),
            Arc::clone(session.arbiter()),
        );
        let tables = TableIoClient::new(
            device_id,
            p4_device_id,
            config,
            session.executor().clone(),
            session.classifier().clone(),
            Arc::clone(session.arbiter()),
        );
        debug!(key = %key, "created p4runtime client");

        Self {
            inner: Arc::new(ClientInner {
                key,
                session,
                pipeline,
                tables,
            }),
        }
    }

    pub fn key(&self) -> &ClientKey {
        &self.inner.key
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.inner.key.device_id
    }

    pub fn p4_device_id(&self) -> u64 {
        self.inner.key.p4_device_id
    }

    // ── Session ──────────────────────────────────────────────────────

    /// Open the stream session. No-op if already open.
    pub async fn open_session(&self) -> Result<(), CoreError> {
        self.inner.session.open().await
    }

    /// Close the stream session and cancel all in-flight calls.
    pub fn close_session(&self) {
        self.inner.session.close();
    }

    pub fn is_session_open(&self) -> bool {
        self.inner.session.is_open()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.session.scope().subscribe()
    }

    /// Same as [`close_session()`](Self::close_session); the client stays
    /// usable and may be reopened.
    pub fn shutdown(&self) {
        debug!(key = %self.inner.key, "shutting down p4runtime client");
        self.inner.session.close();
    }

    // ── Mastership ───────────────────────────────────────────────────

    /// Claim mastership with `election_id`. Returns once the claim is
    /// queued; watch [`mastership()`](Self::mastership) for the outcome.
    pub fn run_for_mastership(&self, election_id: ElectionId) -> Result<(), CoreError> {
        self.inner.session.run_for_mastership(election_id)
    }

    pub fn is_master(&self) -> bool {
        self.inner.session.arbiter().is_master()
    }

    pub fn mastership(&self) -> watch::Receiver<MastershipState> {
        self.inner.session.arbiter().subscribe()
    }

    /// Election id of the last claim made in the current session.
    pub fn last_used_election_id(&self) -> Option<ElectionId> {
        self.inner.session.arbiter().last_used_election_id()
    }

    // ── Packet I/O ───────────────────────────────────────────────────

    pub fn packet_out(&self, packet: &OutboundPacket, pipeconf: &Pipeconf) -> Result<(), CoreError> {
        self.inner.session.packet_out(packet, pipeconf)
    }

    // ── Forwarding state ─────────────────────────────────────────────

    pub fn read<'p>(&self, pipeconf: &'p Pipeconf) -> ReadRequest<'p> {
        self.inner.tables.read(pipeconf)
    }

    pub fn write<'p>(&self, pipeconf: &'p Pipeconf) -> WriteRequest<'p> {
        self.inner.tables.write(pipeconf)
    }

    // ── Pipeline config ──────────────────────────────────────────────

    pub async fn set_pipeline_config(
        &self,
        pipeconf: &Pipeconf,
        device_data: impl Into<Bytes>,
    ) -> Result<(), CoreError> {
        self.inner
            .pipeline
            .set_pipeline_config(pipeconf, device_data.into())
            .await
    }

    pub async fn is_pipeline_config_set(
        &self,
        pipeconf: &Pipeconf,
        device_data: &[u8],
    ) -> Result<bool, CoreError> {
        self.inner
            .pipeline
            .is_pipeline_config_set(pipeconf, device_data)
            .await
    }
}

impl std::fmt::Debug for P4RuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("P4RuntimeClient")
            .field("key", &self.inner.key)
            .field("session", &self.inner.session.scope().state())
            .finish_non_exhaustive()
    }
}
