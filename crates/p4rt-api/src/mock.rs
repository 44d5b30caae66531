//! In-memory P4Runtime device.
//!
//! [`MockDevice`] implements [`P4RuntimeStub`] against a small simulated
//! switch agent: it arbitrates mastership by highest election id, enforces
//! mastership on pipeline pushes and writes, stores a pipeline config and a
//! flat entity table, and records every packet-out. Tests steer it through
//! fault injection (`fail_next`, `stall_next`, `fail_update`,
//! `truncate_next_write_statuses`) and by pushing frames onto the open
//! stream.
//!
//! ```rust,ignore
//! let device = MockDevice::new();
//! let stub: Arc<dyn P4RuntimeStub> = Arc::new(device.clone());
//! device.fail_next(MockRpc::Write, Status::unavailable("link down"));
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{Code, Status};

use crate::proto::{
    Entity, ForwardingPipelineConfig, GetForwardingPipelineConfigRequest,
    GetForwardingPipelineConfigResponse, MasterArbitrationUpdate, PacketIn, PacketOut,
    PipelineResponseType, ReadRequest, ReadResponse, RpcStatus, SetForwardingPipelineConfigRequest,
    SetPipelineAction, StreamError, StreamMessageRequest, StreamMessageResponse, Uint128,
    UpdateType, WriteRequest, WriteResponse,
};
use crate::stub::{P4RuntimeStub, RequestStream, ResponseStream, RpcFuture};

type StreamSender = mpsc::UnboundedSender<Result<StreamMessageResponse, Status>>;

/// Service calls the mock can be steered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockRpc {
    StreamChannel,
    SetPipelineConfig,
    GetPipelineConfig,
    Read,
    Write,
}

enum Fault {
    Fail(Status),
    Stall,
}

struct State {
    master: Option<Uint128>,
    auto_ack: bool,
    supports_cookie: bool,
    pipeline: Option<ForwardingPipelineConfig>,
    entities: Vec<Entity>,
    read_chunk_size: usize,
    hold_read_open: bool,
    faults: HashMap<MockRpc, VecDeque<Fault>>,
    update_failures: HashMap<usize, RpcStatus>,
    write_status_limit: Option<usize>,
    calls: HashMap<MockRpc, usize>,
    arbitration_requests: Vec<MasterArbitrationUpdate>,
    packet_outs: Vec<PacketOut>,
    stream_tx: Option<StreamSender>,
}

/// Cheaply cloneable handle to one simulated device.
#[derive(Clone)]
pub struct MockDevice {
    state: Arc<Mutex<State>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                master: None,
                auto_ack: true,
                supports_cookie: true,
                pipeline: None,
                entities: Vec::new(),
                read_chunk_size: 2,
                hold_read_open: false,
                faults: HashMap::new(),
                update_failures: HashMap::new(),
                write_status_limit: None,
                calls: HashMap::new(),
                arbitration_requests: Vec::new(),
                packet_outs: Vec::new(),
                stream_tx: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Steering ─────────────────────────────────────────────────────

    /// Fail the next call of `rpc` with `status`. Faults queue up per RPC.
    pub fn fail_next(&self, rpc: MockRpc, status: Status) {
        self.state()
            .faults
            .entry(rpc)
            .or_default()
            .push_back(Fault::Fail(status));
    }

    /// Make the next call of `rpc` never complete.
    pub fn stall_next(&self, rpc: MockRpc) {
        self.state()
            .faults
            .entry(rpc)
            .or_default()
            .push_back(Fault::Stall);
    }

    /// Fail update `index` of the next write with `status`.
    pub fn fail_update(&self, index: usize, status: RpcStatus) {
        self.state().update_failures.insert(index, status);
    }

    /// Answer the next write with only the first `keep` statuses, as a
    /// misbehaving agent would. The updates are still applied.
    pub fn truncate_next_write_statuses(&self, keep: usize) {
        self.state().write_status_limit = Some(keep);
    }

    /// Answer arbitration updates automatically (default: on).
    pub fn set_auto_ack(&self, enabled: bool) {
        self.state().auto_ack = enabled;
    }

    /// Whether the device remembers pipeline cookies (default: on).
    pub fn set_supports_cookie(&self, enabled: bool) {
        self.state().supports_cookie = enabled;
    }

    /// Pretend another controller holds mastership with `election_id`.
    pub fn set_master(&self, election_id: Option<Uint128>) {
        self.state().master = election_id;
    }

    pub fn set_read_chunk_size(&self, size: usize) {
        self.state().read_chunk_size = size.max(1);
    }

    /// Keep read response streams open after the last chunk.
    pub fn hold_read_streams_open(&self, hold: bool) {
        self.state().hold_read_open = hold;
    }

    pub fn insert_entities(&self, entities: impl IntoIterator<Item = Entity>) {
        self.state().entities.extend(entities);
    }

    // ── Stream injection ─────────────────────────────────────────────

    /// Push an arbitration frame to the client. Returns `false` if no
    /// stream is open.
    pub fn send_arbitration(&self, update: MasterArbitrationUpdate) -> bool {
        self.push(Ok(StreamMessageResponse::Arbitration(update)))
    }

    pub fn inject_packet_in(&self, packet: PacketIn) -> bool {
        self.push(Ok(StreamMessageResponse::Packet(packet)))
    }

    pub fn inject_stream_error(&self, error: StreamError) -> bool {
        self.push(Ok(StreamMessageResponse::Error(error)))
    }

    /// Terminate the open stream with `status`.
    pub fn fail_stream(&self, status: Status) -> bool {
        let sent = self.push(Err(status));
        self.state().stream_tx = None;
        sent
    }

    /// End the open stream cleanly, as a server shutting down would.
    pub fn close_stream(&self) -> bool {
        self.state().stream_tx.take().is_some()
    }

    pub fn stream_open(&self) -> bool {
        self.state().stream_tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn calls(&self, rpc: MockRpc) -> usize {
        self.state().calls.get(&rpc).copied().unwrap_or(0)
    }

    pub fn master(&self) -> Option<Uint128> {
        self.state().master
    }

    pub fn arbitration_requests(&self) -> Vec<MasterArbitrationUpdate> {
        self.state().arbitration_requests.clone()
    }

    pub fn packet_outs(&self) -> Vec<PacketOut> {
        self.state().packet_outs.clone()
    }

    pub fn pipeline_config(&self) -> Option<ForwardingPipelineConfig> {
        self.state().pipeline.clone()
    }

    pub fn entities(&self) -> Vec<Entity> {
        self.state().entities.clone()
    }

    // ── Internals ────────────────────────────────────────────────────

    fn push(&self, frame: Result<StreamMessageResponse, Status>) -> bool {
        self.state()
            .stream_tx
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Count the call and apply any queued fault.
    async fn enter(&self, rpc: MockRpc) -> Result<(), Status> {
        let fault = {
            let mut state = self.state();
            *state.calls.entry(rpc).or_default() += 1;
            state.faults.get_mut(&rpc).and_then(VecDeque::pop_front)
        };
        match fault {
            None => Ok(()),
            Some(Fault::Fail(status)) => Err(status),
            Some(Fault::Stall) => std::future::pending().await,
        }
    }

    fn check_master(state: &State, election_id: Option<Uint128>) -> Result<(), Status> {
        match state.master {
            Some(master) if election_id == Some(master) => Ok(()),
            _ => Err(Status::permission_denied("client is not master")),
        }
    }

    fn handle_stream_request(&self, request: StreamMessageRequest) {
        let mut state = self.state();
        match request {
            StreamMessageRequest::Arbitration(update) => {
                state.arbitration_requests.push(update.clone());
                if let Some(id) = update.election_id {
                    if state.master.is_none_or(|master| id > master) {
                        state.master = Some(id);
                    }
                }
                if !state.auto_ack {
                    return;
                }
                let status = if state.master == update.election_id {
                    RpcStatus::ok()
                } else {
                    RpcStatus::new(Code::AlreadyExists, "a higher election id holds mastership")
                };
                let ack = MasterArbitrationUpdate {
                    device_id: update.device_id,
                    election_id: state.master,
                    status: Some(status),
                };
                if let Some(tx) = state.stream_tx.as_ref() {
                    let _ = tx.send(Ok(StreamMessageResponse::Arbitration(ack)));
                }
            }
            StreamMessageRequest::Packet(packet) => state.packet_outs.push(packet),
        }
    }

    fn apply_update(state: &mut State, update_type: UpdateType, entity: Entity) -> RpcStatus {
        let existing = state
            .entities
            .iter()
            .position(|e| e.kind == entity.kind && e.id == entity.id && e.key == entity.key);
        match (update_type, existing) {
            (UpdateType::Insert, None) => {
                state.entities.push(entity);
                RpcStatus::ok()
            }
            (UpdateType::Insert, Some(_)) => RpcStatus::new(Code::AlreadyExists, "entry exists"),
            (UpdateType::Modify, Some(idx)) => {
                state.entities[idx] = entity;
                RpcStatus::ok()
            }
            (UpdateType::Delete, Some(idx)) => {
                state.entities.remove(idx);
                RpcStatus::ok()
            }
            (UpdateType::Modify | UpdateType::Delete, None) => {
                RpcStatus::new(Code::NotFound, "entry not found")
            }
        }
    }
}

impl P4RuntimeStub for MockDevice {
    fn stream_channel(
        &self,
        mut outbound: RequestStream,
    ) -> RpcFuture<'_, ResponseStream<StreamMessageResponse>> {
        Box::pin(async move {
            self.enter(MockRpc::StreamChannel).await?;
            let (tx, rx) = mpsc::unbounded_channel();
            self.state().stream_tx = Some(tx);

            let device = self.clone();
            tokio::spawn(async move {
                while let Some(request) = outbound.next().await {
                    device.handle_stream_request(request);
                }
                tracing::trace!("mock stream: client half closed");
            });

            Ok(UnboundedReceiverStream::new(rx).boxed())
        })
    }

    fn set_forwarding_pipeline_config(
        &self,
        request: SetForwardingPipelineConfigRequest,
    ) -> RpcFuture<'_, ()> {
        Box::pin(async move {
            self.enter(MockRpc::SetPipelineConfig).await?;
            let mut state = self.state();
            Self::check_master(&state, request.election_id)?;
            match request.action {
                SetPipelineAction::Verify => {}
                _ => state.pipeline = Some(request.config),
            }
            Ok(())
        })
    }

    fn get_forwarding_pipeline_config(
        &self,
        request: GetForwardingPipelineConfigRequest,
    ) -> RpcFuture<'_, GetForwardingPipelineConfigResponse> {
        Box::pin(async move {
            self.enter(MockRpc::GetPipelineConfig).await?;
            let state = self.state();
            let Some(stored) = state.pipeline.as_ref() else {
                return Ok(GetForwardingPipelineConfigResponse { config: None });
            };
            let cookie = if state.supports_cookie { stored.cookie } else { None };
            let mut config = ForwardingPipelineConfig {
                cookie,
                ..ForwardingPipelineConfig::default()
            };
            match request.response_type {
                PipelineResponseType::All => {
                    config.p4info = stored.p4info.clone();
                    config.p4_device_config = stored.p4_device_config.clone();
                }
                PipelineResponseType::P4InfoAndCookie => config.p4info = stored.p4info.clone(),
                PipelineResponseType::DeviceConfigAndCookie => {
                    config.p4_device_config = stored.p4_device_config.clone();
                }
                PipelineResponseType::CookieOnly => {}
            }
            Ok(GetForwardingPipelineConfigResponse {
                config: Some(config),
            })
        })
    }

    fn read(&self, request: ReadRequest) -> RpcFuture<'_, ResponseStream<ReadResponse>> {
        Box::pin(async move {
            self.enter(MockRpc::Read).await?;
            let state = self.state();
            let matched: Vec<Entity> = state
                .entities
                .iter()
                .filter(|e| request.entities.iter().any(|q| q.selects(e)))
                .cloned()
                .collect();
            let chunks: Vec<Result<ReadResponse, Status>> = matched
                .chunks(state.read_chunk_size)
                .map(|chunk| {
                    Ok(ReadResponse {
                        entities: chunk.to_vec(),
                    })
                })
                .collect();

            let stream = futures_util::stream::iter(chunks);
            if state.hold_read_open {
                Ok(stream.chain(futures_util::stream::pending()).boxed())
            } else {
                Ok(stream.boxed())
            }
        })
    }

    fn write(&self, request: WriteRequest) -> RpcFuture<'_, WriteResponse> {
        Box::pin(async move {
            self.enter(MockRpc::Write).await?;
            let mut state = self.state();
            Self::check_master(&state, request.election_id)?;

            let mut statuses = Vec::with_capacity(request.updates.len());
            for (idx, update) in request.updates.into_iter().enumerate() {
                let status = match state.update_failures.remove(&idx) {
                    Some(injected) => injected,
                    None => Self::apply_update(&mut state, update.update_type, update.entity),
                };
                statuses.push(status);
            }
            state.update_failures.clear();

            match state.write_status_limit.take() {
                Some(keep) => statuses.truncate(keep),
                None if statuses.iter().all(RpcStatus::is_ok) => statuses.clear(),
                None => {}
            }
            Ok(WriteResponse { statuses })
        })
    }
}
