// Stream session, mastership and failure classification against the mock
// device.
#![allow(clippy::unwrap_used)]

mod common;

use std::time::Duration;

use bytes::Bytes;
use p4rt_api::mock::MockRpc;
use p4rt_api::proto::{
    MasterArbitrationUpdate, PacketIn, PacketMetadata, RpcStatus, StreamError, Uint128,
};
use p4rt_api::{Code, Status};
use p4rt_core::{
    ClientConfig, ConnectionState, ElectionId, Entity, EntityKind, MastershipState,
    OutboundPacket, P4RuntimeEvent,
};
use pretty_assertions::assert_eq;

use common::{
    ACL, P4_DEVICE_ID, become_master, harness, harness_with, master_harness, next_event,
    open_harness, wait_for_mastership,
};

fn acl_entry(key: &'static [u8]) -> Entity {
    Entity::new(EntityKind::TableEntry, ACL, key, &b"drop"[..])
}

// ── Session lifecycle ───────────────────────────────────────────────

#[tokio::test]
async fn test_open_and_close() {
    let mut h = harness();
    assert!(!h.client.is_session_open());

    h.client.open_session().await.unwrap();
    assert!(h.client.is_session_open());
    assert_eq!(*h.client.connection_state().borrow(), ConnectionState::Open);
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelOpen { .. }
    ));

    h.client.close_session();
    assert!(!h.client.is_session_open());
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelClosed { .. }
    ));

    // Closing again is a no-op and posts nothing.
    h.client.close_session();
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_open_is_idempotent() {
    let mut h = master_harness().await;

    h.client.open_session().await.unwrap();
    assert_eq!(h.device.calls(MockRpc::StreamChannel), 1);
    assert!(h.client.is_master());
    assert_eq!(
        h.client.last_used_election_id(),
        Some(ElectionId::new(0, 1))
    );
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn test_reopen_forgets_election_id() {
    let h = master_harness().await;

    h.client.close_session();
    assert!(!h.client.is_master());
    assert_eq!(
        h.client.last_used_election_id(),
        Some(ElectionId::new(0, 1))
    );

    h.client.open_session().await.unwrap();
    assert_eq!(h.client.last_used_election_id(), None);
    assert!(!h.client.is_master());
}

#[tokio::test]
async fn test_close_then_rpc_fails_fast() {
    let h = master_harness().await;
    h.client.close_session();

    let write = h
        .client
        .write(&h.pipeconf)
        .insert(acl_entry(b"k1"))
        .submit()
        .await
        .unwrap_err();
    assert!(write.is_session_not_open());

    let read = h
        .client
        .read(&h.pipeconf)
        .table_entries("ingress.acl")
        .submit()
        .await
        .err()
        .unwrap();
    assert!(read.is_session_not_open());

    let set = h
        .client
        .set_pipeline_config(&h.pipeconf, &b"bmv2"[..])
        .await
        .unwrap_err();
    assert!(set.is_session_not_open());

    let is_set = h
        .client
        .is_pipeline_config_set(&h.pipeconf, b"bmv2")
        .await
        .unwrap_err();
    assert!(is_set.is_session_not_open());

    let claim = h
        .client
        .run_for_mastership(ElectionId::new(0, 2))
        .unwrap_err();
    assert!(claim.is_session_not_open());

    let packet = h
        .client
        .packet_out(&OutboundPacket::new(&b"frame"[..]), &h.pipeconf)
        .unwrap_err();
    assert!(packet.is_session_not_open());

    // Nothing to send still needs a session.
    let empty_write = h.client.write(&h.pipeconf).submit().await.unwrap_err();
    assert!(empty_write.is_session_not_open());
    let empty_read = h.client.read(&h.pipeconf).submit().await.err().unwrap();
    assert!(empty_read.is_session_not_open());

    assert_eq!(h.device.calls(MockRpc::Write), 0);
    assert_eq!(h.device.calls(MockRpc::Read), 0);
    assert_eq!(h.device.calls(MockRpc::SetPipelineConfig), 0);
    assert_eq!(h.device.calls(MockRpc::GetPipelineConfig), 0);
}

#[tokio::test]
async fn test_rpcs_fail_fast_while_stream_is_opening() {
    let h = harness();
    h.device.stall_next(MockRpc::StreamChannel);

    let opening = tokio::spawn({
        let client = h.client.clone();
        async move { client.open_session().await }
    });
    while h.device.calls(MockRpc::StreamChannel) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(!h.client.is_session_open());
    assert_eq!(*h.client.connection_state().borrow(), ConnectionState::Closed);

    let is_set = h
        .client
        .is_pipeline_config_set(&h.pipeconf, b"bmv2")
        .await
        .unwrap_err();
    assert!(is_set.is_session_not_open());
    let write = h
        .client
        .write(&h.pipeconf)
        .insert(acl_entry(b"k1"))
        .submit()
        .await
        .unwrap_err();
    assert!(write.is_session_not_open());
    let read = h
        .client
        .read(&h.pipeconf)
        .table_entries("ingress.acl")
        .submit()
        .await
        .err()
        .unwrap();
    assert!(read.is_session_not_open());

    assert_eq!(h.device.calls(MockRpc::GetPipelineConfig), 0);
    assert_eq!(h.device.calls(MockRpc::Write), 0);
    assert_eq!(h.device.calls(MockRpc::Read), 0);

    // Closing abandons the pending open.
    h.client.close_session();
    let err = opening.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert!(!h.client.is_session_open());
}

#[tokio::test(start_paused = true)]
async fn test_open_times_out() {
    let mut h = harness();
    h.device.stall_next(MockRpc::StreamChannel);

    let err = h.client.open_session().await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!h.client.is_session_open());

    // The next successful open counts as a reconnection.
    h.client.open_session().await.unwrap();
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelReconnected { .. }
    ));
}

#[tokio::test]
async fn test_open_rejected_by_server() {
    let mut h = harness();
    h.device
        .fail_next(MockRpc::StreamChannel, Status::unavailable("agent down"));

    let err = h.client.open_session().await.unwrap_err();
    assert!(err.is_transport());
    assert!(!h.client.is_session_open());
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelError { .. }
    ));
}

// ── Mastership ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_for_mastership_scenario() {
    let h = open_harness().await;
    assert!(!h.client.is_master());

    h.client.run_for_mastership(ElectionId::new(0, 5)).unwrap();
    let state = wait_for_mastership(&h.client, |s| *s == MastershipState::Master).await;

    assert_eq!(state, MastershipState::Master);
    assert!(h.client.is_master());
    assert_eq!(h.device.master(), Some(Uint128::new(0, 5)));
    let claims = h.device.arbitration_requests();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].device_id, P4_DEVICE_ID);
    assert_eq!(claims[0].election_id, Some(Uint128::new(0, 5)));
}

#[tokio::test]
async fn test_lower_election_id_is_not_master() {
    let h = open_harness().await;
    h.device.set_master(Some(Uint128::new(0, 9)));

    h.client.run_for_mastership(ElectionId::new(0, 5)).unwrap();
    let state = wait_for_mastership(&h.client, |s| *s != MastershipState::Pending).await;

    assert_eq!(state, MastershipState::NotMaster);
    assert_eq!(
        h.client.last_used_election_id(),
        Some(ElectionId::new(0, 5))
    );
}

#[tokio::test]
async fn test_increasing_election_ids() {
    let h = open_harness().await;
    become_master(&h.client, 5).await;
    become_master(&h.client, 6).await;

    assert_eq!(
        h.client.last_used_election_id(),
        Some(ElectionId::new(0, 6))
    );
    assert_eq!(h.device.master(), Some(Uint128::new(0, 6)));
}

#[tokio::test]
async fn test_mastership_lost_to_other_controller() {
    let h = master_harness().await;

    // Another controller takes over; the device tells us about it.
    h.device.set_master(Some(Uint128::new(0, 42)));
    assert!(h.device.send_arbitration(MasterArbitrationUpdate {
        device_id: P4_DEVICE_ID,
        election_id: Some(Uint128::new(0, 42)),
        status: Some(RpcStatus::new(Code::AlreadyExists, "superseded")),
    }));

    let state = wait_for_mastership(&h.client, |s| *s == MastershipState::NotMaster).await;
    assert_eq!(state, MastershipState::NotMaster);
}

#[tokio::test]
async fn test_claim_left_pending_without_ack() {
    let h = open_harness().await;
    h.device.set_auto_ack(false);

    h.client.run_for_mastership(ElectionId::new(0, 5)).unwrap();
    assert_eq!(*h.client.mastership().borrow(), MastershipState::Pending);
    assert!(!h.client.is_master());
}

#[tokio::test]
async fn test_outbound_queue_full() {
    let mut h = harness_with(ClientConfig {
        outbound_queue_capacity: 1,
        ..ClientConfig::default()
    });
    h.client.open_session().await.unwrap();
    next_event(&mut h.events).await;

    // Nothing drains the queue until this task yields.
    let packet = OutboundPacket::new(&b"frame"[..]);
    h.client.packet_out(&packet, &h.pipeconf).unwrap();
    let err = h.client.packet_out(&packet, &h.pipeconf).unwrap_err();
    assert!(matches!(err, p4rt_core::CoreError::OutboundQueueFull { .. }));
}

// ── Failure classification ──────────────────────────────────────────

#[tokio::test]
async fn test_unavailable_mid_rpc_closes_session() {
    let mut h = master_harness().await;
    h.device
        .fail_next(MockRpc::Write, Status::unavailable("connection reset"));

    let err = h
        .client
        .write(&h.pipeconf)
        .insert(acl_entry(b"k1"))
        .submit()
        .await
        .unwrap_err();

    assert!(err.is_transport());
    match &*next_event(&mut h.events).await {
        P4RuntimeEvent::ChannelError { device_id, reason } => {
            assert_eq!(device_id.as_str(), common::DEVICE);
            assert_eq!(reason, "connection reset");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(!h.client.is_session_open());
    assert!(!h.client.is_master());
}

#[tokio::test]
async fn test_permission_denied_posts_event() {
    let mut h = open_harness().await;

    // Never claimed mastership: the device refuses the write.
    let err = h
        .client
        .write(&h.pipeconf)
        .insert(acl_entry(b"k1"))
        .submit()
        .await
        .unwrap_err();

    assert!(err.is_permission_denied());
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::PermissionDenied { .. }
    ));
    assert!(h.client.is_session_open());
}

#[tokio::test]
async fn test_other_status_is_plain_failure() {
    let mut h = master_harness().await;
    h.device
        .fail_next(MockRpc::Write, Status::invalid_argument("malformed entry"));

    let err = h
        .client
        .write(&h.pipeconf)
        .insert(acl_entry(b"k1"))
        .submit()
        .await
        .unwrap_err();

    assert_eq!(err.code(), Some(Code::InvalidArgument));
    assert!(h.events.try_recv().is_err());
    assert!(h.client.is_session_open());
}

#[tokio::test(start_paused = true)]
async fn test_write_times_out() {
    let h = master_harness().await;
    h.device.stall_next(MockRpc::Write);

    let err = h
        .client
        .write(&h.pipeconf)
        .insert(acl_entry(b"k1"))
        .submit()
        .await
        .unwrap_err();

    match err {
        p4rt_core::CoreError::Timeout { timeout, .. } => {
            assert_eq!(timeout, Duration::from_secs(10));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.client.is_session_open());
}

#[tokio::test]
async fn test_close_cancels_in_flight_write() {
    let h = master_harness().await;
    h.device.stall_next(MockRpc::Write);

    let pending = tokio::spawn({
        let client = h.client.clone();
        let pipeconf = h.pipeconf.clone();
        async move {
            client
                .write(&pipeconf)
                .insert(acl_entry(b"k1"))
                .submit()
                .await
        }
    });
    while h.device.calls(MockRpc::Write) == 0 {
        tokio::task::yield_now().await;
    }
    h.client.close_session();

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
}

// ── Stream termination ──────────────────────────────────────────────

#[tokio::test]
async fn test_stream_closed_by_server() {
    let mut h = master_harness().await;

    assert!(h.device.close_stream());
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelError { .. }
    ));
    assert!(!h.client.is_session_open());
    assert!(!h.client.is_master());

    h.client.open_session().await.unwrap();
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelReconnected { .. }
    ));
}

#[tokio::test]
async fn test_stream_failure_ends_session() {
    let mut h = open_harness().await;
    let mut state = h.client.connection_state();

    assert!(h.device.fail_stream(Status::internal("agent crashed")));
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Closed),
    )
    .await
    .unwrap()
    .unwrap();

    // Not a channel error: no event, but the session is gone.
    assert!(h.events.try_recv().is_err());
    h.client.open_session().await.unwrap();
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelReconnected { .. }
    ));
}

// ── Packet I/O ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_packet_out_resolves_metadata() {
    let h = open_harness().await;
    let packet = OutboundPacket::new(&b"frame"[..]).with_metadata("egress_port", &b"\x00\x05"[..]);
    h.client.packet_out(&packet, &h.pipeconf).unwrap();

    let mut sent = h.device.packet_outs();
    while sent.is_empty() {
        tokio::task::yield_now().await;
        sent = h.device.packet_outs();
    }
    assert_eq!(sent[0].payload, Bytes::from_static(b"frame"));
    assert_eq!(
        sent[0].metadata,
        vec![PacketMetadata {
            metadata_id: 2,
            value: Bytes::from_static(b"\x00\x05"),
        }]
    );
}

#[tokio::test]
async fn test_packet_out_unknown_metadata() {
    let h = open_harness().await;
    let packet = OutboundPacket::new(&b"frame"[..]).with_metadata("vlan_id", &b"\x01"[..]);
    let err = h.client.packet_out(&packet, &h.pipeconf).unwrap_err();
    assert!(matches!(
        err,
        p4rt_core::CoreError::UnknownPacketMetadata { .. }
    ));
}

#[tokio::test]
async fn test_packet_in_event() {
    let mut h = open_harness().await;
    assert!(h.device.inject_packet_in(PacketIn {
        payload: Bytes::from_static(b"lldp"),
        metadata: vec![PacketMetadata {
            metadata_id: 1,
            value: Bytes::from_static(b"\x00\x03"),
        }],
    }));

    match &*next_event(&mut h.events).await {
        P4RuntimeEvent::PacketIn { packet, .. } => {
            assert_eq!(packet.payload, Bytes::from_static(b"lldp"));
            assert_eq!(packet.pipeconf_id, *h.pipeconf.id());
            assert_eq!(
                packet.metadata("ingress_port"),
                Some(&Bytes::from_static(b"\x00\x03"))
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_packet_in_without_pipeconf_dropped() {
    let mut h = open_harness().await;
    h.pipeconfs.unbind(&p4rt_core::DeviceId::new(common::DEVICE));

    assert!(h.device.inject_packet_in(PacketIn {
        payload: Bytes::from_static(b"lldp"),
        metadata: Vec::new(),
    }));
    assert!(h.device.inject_stream_error(StreamError {
        canonical_code: Code::InvalidArgument,
        message: "bad packet-out".into(),
        packet_out: None,
    }));

    // Frames are handled in order: the dropped packet posts nothing.
    match &*next_event(&mut h.events).await {
        P4RuntimeEvent::StreamError { code, message, .. } => {
            assert_eq!(*code, Code::InvalidArgument);
            assert_eq!(message, "bad packet-out");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(h.client.is_session_open());
}
