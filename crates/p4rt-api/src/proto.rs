//! P4Runtime message shapes.
//!
//! Plain Rust mirrors of the `p4.v1` service messages this client exchanges
//! with a device agent. Field names follow the protocol; encodings of the
//! forwarding entities themselves stay opaque (`key` / `data` bytes), the
//! client only routes them.

use bytes::Bytes;
use strum::{Display, EnumString};
use tonic::Code;

// ── Uint128 ──────────────────────────────────────────────────────────

/// 128-bit unsigned integer as carried on the wire (`p4.v1.Uint128`).
///
/// Ordering is numeric: `high` is compared first, then `low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uint128 {
    pub high: u64,
    pub low: u64,
}

impl Uint128 {
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }
}

// ── RpcStatus ────────────────────────────────────────────────────────

/// A `google.rpc.Status`-like pair embedded in stream frames and write results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: Code,
    pub message: String,
}

impl RpcStatus {
    pub fn ok() -> Self {
        Self {
            code: Code::Ok,
            message: String::new(),
        }
    }

    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }
}

// ── Stream channel ───────────────────────────────────────────────────

/// Mastership claim (client → server) or acknowledgement (server → client).
///
/// In an acknowledgement, `election_id` is the election id of the current
/// master as seen by the server and `status` is `OK` when the receiving
/// client is that master.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MasterArbitrationUpdate {
    pub device_id: u64,
    pub election_id: Option<Uint128>,
    pub status: Option<RpcStatus>,
}

/// A controller packet metadata field, addressed by its P4Info id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMetadata {
    pub metadata_id: u32,
    pub value: Bytes,
}

/// Packet sent from the controller to the device's CPU port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketOut {
    pub payload: Bytes,
    pub metadata: Vec<PacketMetadata>,
}

/// Packet punted by the device to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketIn {
    pub payload: Bytes,
    pub metadata: Vec<PacketMetadata>,
}

/// Asynchronous error reported by the server on the stream, usually for a
/// packet-out it could not process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub canonical_code: Code,
    pub message: String,
    pub packet_out: Option<PacketOut>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessageRequest {
    Arbitration(MasterArbitrationUpdate),
    Packet(PacketOut),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessageResponse {
    Arbitration(MasterArbitrationUpdate),
    Packet(PacketIn),
    Error(StreamError),
}

// ── Forwarding pipeline config ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardingPipelineConfig {
    /// Serialized P4Info.
    pub p4info: Bytes,
    /// Target-specific device configuration (opaque).
    pub p4_device_config: Bytes,
    /// Controller-chosen cookie identifying this config. `None` when the
    /// server does not track cookies.
    pub cookie: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SetPipelineAction {
    Verify,
    VerifyAndSave,
    VerifyAndCommit,
    Commit,
    ReconcileAndCommit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetForwardingPipelineConfigRequest {
    pub device_id: u64,
    pub election_id: Option<Uint128>,
    pub action: SetPipelineAction,
    pub config: ForwardingPipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineResponseType {
    All,
    CookieOnly,
    P4InfoAndCookie,
    DeviceConfigAndCookie,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetForwardingPipelineConfigRequest {
    pub device_id: u64,
    pub response_type: PipelineResponseType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetForwardingPipelineConfigResponse {
    /// `None` when no pipeline has been pushed to the device yet.
    pub config: Option<ForwardingPipelineConfig>,
}

// ── Entities ─────────────────────────────────────────────────────────

/// Kind of forwarding-state entity addressed by a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
    TableEntry,
    ActionProfileMember,
    ActionProfileGroup,
    CounterEntry,
    DirectCounterEntry,
    MeterEntry,
    DirectMeterEntry,
    PacketReplicationEngineEntry,
    RegisterEntry,
}

/// One forwarding-state entity.
///
/// `id` is the P4Info id of the owning object (table, counter, ...); `0`
/// in a read request means "every object of this kind". An empty `key` in a
/// read request is a wildcard over all entries of the object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: u32,
    pub key: Bytes,
    pub data: Bytes,
}

impl Entity {
    pub fn new(kind: EntityKind, id: u32, key: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            id,
            key: key.into(),
            data: data.into(),
        }
    }

    /// Wildcard read query for all entries of `kind` under object `id`.
    pub fn wildcard(kind: EntityKind, id: u32) -> Self {
        Self::new(kind, id, Bytes::new(), Bytes::new())
    }

    /// Whether `other` is selected by this entity used as a read query.
    pub fn selects(&self, other: &Entity) -> bool {
        self.kind == other.kind
            && (self.id == 0 || self.id == other.id)
            && (self.key.is_empty() || self.key == other.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub device_id: u64,
    pub entities: Vec<Entity>,
}

/// One chunk of a (possibly multi-message) read response stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadResponse {
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    Insert,
    Modify,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_type: UpdateType,
    pub entity: Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Atomicity {
    #[default]
    ContinueOnError,
    RollbackOnError,
    DataplaneAtomic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub device_id: u64,
    pub election_id: Option<Uint128>,
    pub updates: Vec<Update>,
    pub atomicity: Atomicity,
}

/// Outcome of a write.
///
/// An empty `statuses` list means every update succeeded. Otherwise the
/// server reports exactly one status per update, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteResponse {
    pub statuses: Vec<RpcStatus>,
}
