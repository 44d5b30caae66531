// ── Packet I/O ──
//
// Packets cross the stream with metadata addressed by P4Info id. Callers
// and event consumers see metadata by name, resolved through the pipeconf.

use bytes::Bytes;
use p4rt_api::proto::{PacketIn, PacketMetadata, PacketOut};

use crate::error::CoreError;
use crate::model::{Pipeconf, PipeconfId};

/// A packet to inject through the device's CPU port.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundPacket {
    pub payload: Bytes,
    pub metadata: Vec<(String, Bytes)>,
}

impl OutboundPacket {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.metadata.push((name.into(), value.into()));
        self
    }
}

/// A packet punted by the device, decoded with the device's pipeconf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub pipeconf_id: PipeconfId,
    pub payload: Bytes,
    pub metadata: Vec<(String, Bytes)>,
}

impl InboundPacket {
    pub fn metadata(&self, name: &str) -> Option<&Bytes> {
        self.metadata
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

pub(crate) fn encode_packet_out(
    packet: &OutboundPacket,
    pipeconf: &Pipeconf,
) -> Result<PacketOut, CoreError> {
    let metadata = packet
        .metadata
        .iter()
        .map(|(name, value)| {
            let metadata_id =
                pipeconf
                    .packet_metadata_id(name)
                    .ok_or_else(|| CoreError::UnknownPacketMetadata {
                        pipeconf_id: pipeconf.id().clone(),
                        metadata: name.clone(),
                    })?;
            Ok(PacketMetadata {
                metadata_id,
                value: value.clone(),
            })
        })
        .collect::<Result<Vec<_>, CoreError>>()?;

    Ok(PacketOut {
        payload: packet.payload.clone(),
        metadata,
    })
}

pub(crate) fn decode_packet_in(
    packet: PacketIn,
    pipeconf: &Pipeconf,
) -> Result<InboundPacket, CoreError> {
    let metadata = packet
        .metadata
        .into_iter()
        .map(|m| {
            let name = pipeconf.packet_metadata_name(m.metadata_id).ok_or_else(|| {
                CoreError::UnknownPacketMetadata {
                    pipeconf_id: pipeconf.id().clone(),
                    metadata: format!("#{}", m.metadata_id),
                }
            })?;
            Ok((name.to_owned(), m.value))
        })
        .collect::<Result<Vec<_>, CoreError>>()?;

    Ok(InboundPacket {
        pipeconf_id: pipeconf.id().clone(),
        payload: packet.payload,
        metadata,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pipeconf() -> Pipeconf {
        Pipeconf::new("org.example.fabric", 1)
            .with_packet_metadata("egress_port", 1)
            .with_packet_metadata("ingress_port", 2)
    }

    #[test]
    fn packet_out_metadata_resolved_by_name() {
        let packet = OutboundPacket::new(&b"frame"[..]).with_metadata("egress_port", &b"\x00\x07"[..]);
        let encoded = encode_packet_out(&packet, &pipeconf()).unwrap();
        assert_eq!(encoded.payload, Bytes::from_static(b"frame"));
        assert_eq!(encoded.metadata.len(), 1);
        assert_eq!(encoded.metadata[0].metadata_id, 1);
    }

    #[test]
    fn packet_out_rejects_unknown_metadata() {
        let packet = OutboundPacket::new(&b"frame"[..]).with_metadata("vlan", &b"\x01"[..]);
        let err = encode_packet_out(&packet, &pipeconf()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownPacketMetadata { ref metadata, .. } if metadata == "vlan"));
    }

    #[test]
    fn packet_in_metadata_named() {
        let packet = PacketIn {
            payload: Bytes::from_static(b"frame"),
            metadata: vec![PacketMetadata {
                metadata_id: 2,
                value: Bytes::from_static(b"\x00\x03"),
            }],
        };
        let decoded = decode_packet_in(packet, &pipeconf()).unwrap();
        assert_eq!(decoded.pipeconf_id.as_str(), "org.example.fabric");
        assert_eq!(
            decoded.metadata("ingress_port"),
            Some(&Bytes::from_static(b"\x00\x03"))
        );
    }
}
