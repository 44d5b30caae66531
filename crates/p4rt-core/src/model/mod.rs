// ── Domain model ──

mod event;
mod ids;
mod packet;
mod pipeconf;

pub use event::{EventKind, EventSink, P4RuntimeEvent};
pub use ids::{ClientKey, DeviceId, ElectionId};
pub use packet::{InboundPacket, OutboundPacket};
pub(crate) use packet::{decode_packet_in, encode_packet_out};
pub use pipeconf::{Pipeconf, PipeconfId, PipeconfService, StaticPipeconfs};
