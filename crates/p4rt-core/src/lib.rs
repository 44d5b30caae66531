// p4rt-core: P4Runtime session, mastership and RPC execution for one device.

pub mod config;
pub mod error;
pub mod model;
pub mod registry;

mod arbiter;
mod classify;
mod client;
mod executor;
mod pipeline;
mod session;
mod table;

// ── Primary re-exports ──────────────────────────────────────────────
pub use arbiter::MastershipState;
pub use classify::{Outcome, classify};
pub use client::P4RuntimeClient;
pub use config::ClientConfig;
pub use error::{ApplicationError, CoreError};
pub use executor::ConnectionState;
pub use pipeline::pipeline_cookie;
pub use registry::{ChannelProvider, ClientRegistry, StaticChannels};
pub use table::{ReadRequest, ReadResponse, UpdateResult, WriteRequest, WriteResponse};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ClientKey, DeviceId, ElectionId, EventKind, EventSink, InboundPacket, OutboundPacket,
    P4RuntimeEvent, Pipeconf, PipeconfId, PipeconfService, StaticPipeconfs,
};

// Wire types callers build reads and writes from.
pub use p4rt_api::proto::{Atomicity, Entity, EntityKind, UpdateType};
