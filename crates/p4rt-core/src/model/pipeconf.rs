// ── Pipeline configurations ──
//
// A pipeconf bundles the P4Info blob of a forwarding program with the few
// names the client has to resolve on its own: table names for reads and
// writes, controller packet metadata for packet-in/out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use crate::model::DeviceId;

/// Identifier of a pipeline configuration (e.g. `org.example.fabric`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipeconfId(String);

impl PipeconfId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipeconfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PipeconfId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PipeconfId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A pipeline configuration as known to the controller.
#[derive(Debug, Clone)]
pub struct Pipeconf {
    id: PipeconfId,
    fingerprint: u64,
    p4info: Bytes,
    tables: HashMap<String, u32>,
    packet_metadata: HashMap<String, u32>,
}

impl Pipeconf {
    /// `fingerprint` must change whenever the program content changes; it
    /// seeds the cookie pushed to the device.
    pub fn new(id: impl Into<PipeconfId>, fingerprint: u64) -> Self {
        Self {
            id: id.into(),
            fingerprint,
            p4info: Bytes::new(),
            tables: HashMap::new(),
            packet_metadata: HashMap::new(),
        }
    }

    pub fn with_p4info(mut self, p4info: impl Into<Bytes>) -> Self {
        self.p4info = p4info.into();
        self
    }

    pub fn with_table(mut self, name: impl Into<String>, id: u32) -> Self {
        self.tables.insert(name.into(), id);
        self
    }

    pub fn with_packet_metadata(mut self, name: impl Into<String>, id: u32) -> Self {
        self.packet_metadata.insert(name.into(), id);
        self
    }

    pub fn id(&self) -> &PipeconfId {
        &self.id
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Serialized P4Info, `None` if the pipeconf does not carry one.
    pub fn p4info(&self) -> Option<&Bytes> {
        (!self.p4info.is_empty()).then_some(&self.p4info)
    }

    pub fn table_id(&self, name: &str) -> Option<u32> {
        self.tables.get(name).copied()
    }

    pub fn packet_metadata_id(&self, name: &str) -> Option<u32> {
        self.packet_metadata.get(name).copied()
    }

    pub fn packet_metadata_name(&self, id: u32) -> Option<&str> {
        self.packet_metadata
            .iter()
            .find(|(_, v)| **v == id)
            .map(|(k, _)| k.as_str())
    }
}

// ── Lookup service ──────────────────────────────────────────────────

/// Resolves pipeconfs by id and knows which pipeconf each device runs.
pub trait PipeconfService: Send + Sync {
    fn pipeconf(&self, id: &PipeconfId) -> Option<Arc<Pipeconf>>;

    fn pipeconf_for_device(&self, device_id: &DeviceId) -> Option<PipeconfId>;

    /// Convenience: the pipeconf bound to `device_id`, if both are known.
    fn device_pipeconf(&self, device_id: &DeviceId) -> Option<Arc<Pipeconf>> {
        self.pipeconf_for_device(device_id)
            .and_then(|id| self.pipeconf(&id))
    }
}

/// In-memory [`PipeconfService`] for embedders that manage pipeconfs
/// themselves.
#[derive(Default)]
pub struct StaticPipeconfs {
    pipeconfs: DashMap<PipeconfId, Arc<Pipeconf>>,
    bindings: DashMap<DeviceId, PipeconfId>,
}

impl StaticPipeconfs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pipeconf: Pipeconf) -> Arc<Pipeconf> {
        let pipeconf = Arc::new(pipeconf);
        self.pipeconfs
            .insert(pipeconf.id().clone(), Arc::clone(&pipeconf));
        pipeconf
    }

    pub fn bind(&self, device_id: DeviceId, pipeconf_id: PipeconfId) {
        self.bindings.insert(device_id, pipeconf_id);
    }

    pub fn unbind(&self, device_id: &DeviceId) -> Option<PipeconfId> {
        self.bindings.remove(device_id).map(|(_, id)| id)
    }
}

impl PipeconfService for StaticPipeconfs {
    fn pipeconf(&self, id: &PipeconfId) -> Option<Arc<Pipeconf>> {
        self.pipeconfs.get(id).map(|p| Arc::clone(p.value()))
    }

    fn pipeconf_for_device(&self, device_id: &DeviceId) -> Option<PipeconfId> {
        self.bindings.get(device_id).map(|id| id.value().clone())
    }
}
