// ── Client registry ──
//
// At most one client per device. Channels come from a `ChannelProvider`;
// all clients publish through the registry's shared event sink.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use p4rt_api::P4RuntimeStub;
use tokio::sync::broadcast;
use tracing::info;

use crate::client::P4RuntimeClient;
use crate::config::ClientConfig;
use crate::error::CoreError;
use crate::model::{ClientKey, DeviceId, EventSink, P4RuntimeEvent, PipeconfService};

/// Hands out connected channels to devices.
pub trait ChannelProvider: Send + Sync {
    fn channel(&self, device_id: &DeviceId) -> Option<Arc<dyn P4RuntimeStub>>;
}

/// In-memory [`ChannelProvider`] for embedders that connect channels
/// themselves.
#[derive(Default)]
pub struct StaticChannels {
    channels: DashMap<DeviceId, Arc<dyn P4RuntimeStub>>,
}

impl StaticChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device_id: DeviceId, stub: Arc<dyn P4RuntimeStub>) {
        self.channels.insert(device_id, stub);
    }

    pub fn remove(&self, device_id: &DeviceId) -> bool {
        self.channels.remove(device_id).is_some()
    }
}

impl ChannelProvider for StaticChannels {
    fn channel(&self, device_id: &DeviceId) -> Option<Arc<dyn P4RuntimeStub>> {
        self.channels.get(device_id).map(|c| Arc::clone(c.value()))
    }
}

// ── ClientRegistry ───────────────────────────────────────────────────

pub struct ClientRegistry {
    clients: DashMap<DeviceId, P4RuntimeClient>,
    channels: Arc<dyn ChannelProvider>,
    pipeconfs: Arc<dyn PipeconfService>,
    events: EventSink,
    config: ClientConfig,
}

impl ClientRegistry {
    pub fn new(
        channels: Arc<dyn ChannelProvider>,
        pipeconfs: Arc<dyn PipeconfService>,
        events: EventSink,
    ) -> Self {
        Self {
            clients: DashMap::new(),
            channels,
            pipeconfs,
            events,
            config: ClientConfig::default(),
        }
    }

    /// Config used by [`create_client()`](Self::create_client).
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn create_client(&self, key: ClientKey) -> Result<P4RuntimeClient, CoreError> {
        self.create_client_with(key, self.config.clone())
    }

    /// Create the client for `key.device_id`, or return the existing one if
    /// it was created with the same key.
    pub fn create_client_with(
        &self,
        key: ClientKey,
        config: ClientConfig,
    ) -> Result<P4RuntimeClient, CoreError> {
        match self.clients.entry(key.device_id.clone()) {
            Entry::Occupied(entry) => {
                let existing = entry.get();
                if *existing.key() == key {
                    Ok(existing.clone())
                } else {
                    Err(CoreError::ClientExists {
                        device_id: key.device_id,
                        existing: existing.key().clone(),
                    })
                }
            }
            Entry::Vacant(entry) => {
                let stub = self.channels.channel(&key.device_id).ok_or_else(|| {
                    CoreError::ChannelNotFound {
                        device_id: key.device_id.clone(),
                    }
                })?;
                info!(key = %key, "creating p4runtime client");
                let client = P4RuntimeClient::new(
                    key,
                    stub,
                    self.events.clone(),
                    Arc::clone(&self.pipeconfs),
                    config,
                );
                entry.insert(client.clone());
                Ok(client)
            }
        }
    }

    pub fn get_client(&self, device_id: &DeviceId) -> Option<P4RuntimeClient> {
        self.clients.get(device_id).map(|c| c.value().clone())
    }

    /// Shut down and forget the client of `device_id`.
    pub fn remove_client(&self, device_id: &DeviceId) -> bool {
        let Some((_, client)) = self.clients.remove(device_id) else {
            return false;
        };
        client.shutdown();
        info!(key = %client.key(), "removed p4runtime client");
        true
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<P4RuntimeEvent>> {
        self.events.subscribe()
    }
}
