// Client registry: one client per device, channels from a provider.
#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use p4rt_api::mock::MockDevice;
use p4rt_core::{
    ClientConfig, ClientKey, ClientRegistry, CoreError, DeviceId, EventSink, P4RuntimeClient,
    P4RuntimeEvent, StaticChannels, StaticPipeconfs,
};
use pretty_assertions::assert_eq;

// ── Helpers ─────────────────────────────────────────────────────────

fn registry() -> (ClientRegistry, Arc<StaticChannels>, MockDevice) {
    let device = MockDevice::new();
    let channels = Arc::new(StaticChannels::new());
    channels.insert(DeviceId::new("device:leaf1"), Arc::new(device.clone()));
    let registry = ClientRegistry::new(
        channels.clone(),
        Arc::new(StaticPipeconfs::new()),
        EventSink::new(16),
    );
    (registry, channels, device)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_and_get_client() {
    let (registry, _, _) = registry();
    let key = ClientKey::new("device:leaf1", 1);

    let client = registry.create_client(key.clone()).unwrap();
    assert_eq!(client.key(), &key);
    assert_eq!(client.p4_device_id(), 1);

    let found = registry.get_client(&DeviceId::new("device:leaf1")).unwrap();
    assert_eq!(found.key(), &key);
    assert!(registry.get_client(&DeviceId::new("device:spine1")).is_none());
    assert_eq!(registry.device_ids(), vec![DeviceId::new("device:leaf1")]);
}

#[tokio::test]
async fn test_same_key_returns_existing_client() {
    let (registry, _, _) = registry();
    let key = ClientKey::new("device:leaf1", 1);

    let first = registry.create_client(key.clone()).unwrap();
    first.open_session().await.unwrap();
    let second = registry.create_client(key).unwrap();

    // Same underlying client: the session is shared.
    assert!(second.is_session_open());
}

#[tokio::test]
async fn test_conflicting_key_rejected() {
    let (registry, _, _) = registry();
    registry
        .create_client(ClientKey::new("device:leaf1", 1))
        .unwrap();

    let err = registry
        .create_client(ClientKey::new("device:leaf1", 2))
        .unwrap_err();
    match err {
        CoreError::ClientExists { existing, .. } => assert_eq!(existing.p4_device_id, 1),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_channel() {
    let (registry, channels, _) = registry();
    assert!(channels.remove(&DeviceId::new("device:leaf1")));

    let err = registry
        .create_client(ClientKey::new("device:leaf1", 1))
        .unwrap_err();
    assert!(matches!(err, CoreError::ChannelNotFound { .. }));
    assert!(registry.device_ids().is_empty());
}

#[tokio::test]
async fn test_remove_client_shuts_down_session() {
    let (registry, _, device) = registry();
    let mut events = registry.subscribe();
    let client = registry
        .create_client_with(ClientKey::new("device:leaf1", 1), ClientConfig::default())
        .unwrap();
    client.open_session().await.unwrap();
    assert!(device.stream_open());

    assert!(registry.remove_client(client.device_id()));
    assert!(!client.is_session_open());
    assert!(registry.get_client(client.device_id()).is_none());
    assert!(!registry.remove_client(client.device_id()));

    assert!(matches!(
        *events.recv().await.unwrap(),
        P4RuntimeEvent::ChannelOpen { .. }
    ));
    assert!(matches!(
        *events.recv().await.unwrap(),
        P4RuntimeEvent::ChannelClosed { .. }
    ));
}

#[tokio::test]
async fn test_dropping_last_handle_closes_session() {
    let device = MockDevice::new();
    let client = P4RuntimeClient::new(
        ClientKey::new("device:leaf1", 1),
        Arc::new(device.clone()),
        EventSink::default(),
        Arc::new(StaticPipeconfs::new()),
        ClientConfig::default(),
    );
    client.open_session().await.unwrap();
    let other = client.clone();
    drop(client);
    assert!(other.is_session_open());

    drop(other);
    // The inbound loop exits and releases the device's stream.
    while device.stream_open() {
        tokio::task::yield_now().await;
    }
}
