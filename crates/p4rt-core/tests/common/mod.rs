// Shared fixtures for the p4rt-core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use p4rt_api::mock::MockDevice;
use p4rt_core::{
    ClientConfig, ClientKey, DeviceId, ElectionId, EventSink, MastershipState, P4RuntimeClient,
    P4RuntimeEvent, Pipeconf, StaticPipeconfs,
};
use tokio::sync::broadcast;

pub const DEVICE: &str = "device:leaf1";
pub const P4_DEVICE_ID: u64 = 1;
pub const ACL: u32 = 100;
pub const ROUTING: u32 = 200;

const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub device: MockDevice,
    pub client: P4RuntimeClient,
    pub events: broadcast::Receiver<Arc<P4RuntimeEvent>>,
    pub pipeconfs: Arc<StaticPipeconfs>,
    pub pipeconf: Arc<Pipeconf>,
}

pub fn fabric() -> Pipeconf {
    Pipeconf::new("org.example.fabric", 0xfab)
        .with_p4info(&b"fabric-p4info"[..])
        .with_table("ingress.acl", ACL)
        .with_table("ingress.routing", ROUTING)
        .with_packet_metadata("ingress_port", 1)
        .with_packet_metadata("egress_port", 2)
}

pub fn harness() -> Harness {
    harness_with(ClientConfig::default())
}

pub fn harness_with(config: ClientConfig) -> Harness {
    let device = MockDevice::new();
    let pipeconfs = Arc::new(StaticPipeconfs::new());
    let pipeconf = pipeconfs.register(fabric());
    pipeconfs.bind(DeviceId::new(DEVICE), pipeconf.id().clone());

    let sink = EventSink::new(64);
    let events = sink.subscribe();
    let client = P4RuntimeClient::new(
        ClientKey::new(DEVICE, P4_DEVICE_ID),
        Arc::new(device.clone()),
        sink,
        pipeconfs.clone(),
        config,
    );
    Harness {
        device,
        client,
        events,
        pipeconfs,
        pipeconf,
    }
}

/// Harness with an open session.
pub async fn open_harness() -> Harness {
    let mut h = harness();
    h.client.open_session().await.unwrap();
    assert!(matches!(
        *next_event(&mut h.events).await,
        P4RuntimeEvent::ChannelOpen { .. }
    ));
    h
}

/// Harness with an open session where the client is master with `(0, 1)`.
pub async fn master_harness() -> Harness {
    let h = open_harness().await;
    become_master(&h.client, 1).await;
    h
}

pub async fn next_event(
    events: &mut broadcast::Receiver<Arc<P4RuntimeEvent>>,
) -> Arc<P4RuntimeEvent> {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .unwrap()
}

pub async fn wait_for_mastership(
    client: &P4RuntimeClient,
    done: impl FnMut(&MastershipState) -> bool,
) -> MastershipState {
    let mut mastership = client.mastership();
    let state = *tokio::time::timeout(WAIT, mastership.wait_for(done))
        .await
        .expect("timed out waiting for mastership")
        .unwrap();
    state
}

pub async fn become_master(client: &P4RuntimeClient, low: u64) {
    client.run_for_mastership(ElectionId::new(0, low)).unwrap();
    let state = wait_for_mastership(client, |s| *s == MastershipState::Master).await;
    assert_eq!(state, MastershipState::Master);
}
