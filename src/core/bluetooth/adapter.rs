//! Radio adapter abstraction.
//! The link state machine talks to the host radio stack exclusively through
//! the [`RadioAdapter`] trait, injected at construction, so it can be driven
//! by a scripted adapter in tests. [`BluestRadio`] is the production
//! implementation over the platform BLE stack.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device, Service};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::types::PeerIdentity;

/// A peer seen during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub identity: PeerIdentity,
    pub name: String,
}

/// Capabilities reported for one characteristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacteristicCaps {
    pub write: bool,
    pub notify: bool,
}

/// One characteristic as enumerated on a service.
pub struct CharacteristicInfo<C> {
    pub uuid: Uuid,
    pub handle: C,
    pub caps: CharacteristicCaps,
}

/// Asynchronous connection-level events the radio reports for an active
/// device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// The link dropped without a local disconnect request.
    ConnectionLost,
    /// The link was closed deliberately.
    Disconnected,
}

/// Host radio collaborator contract.
///
/// Handle types are opaque to the link layer; implementations return
/// whatever their stack uses. All methods report failures as `anyhow`
/// errors, which the link manager folds into its own taxonomy.
#[async_trait]
pub trait RadioAdapter: Send + Sync + 'static {
    type Device: Clone + Send + Sync + 'static;
    type Service: Clone + Send + Sync + 'static;
    type Characteristic: Clone + Send + Sync + 'static;

    /// Streams peers whose advertised name matches `name_filter`. Scanning
    /// stops when the returned stream is dropped.
    async fn scan(&self, name_filter: &str) -> Result<BoxStream<'static, DiscoveredPeer>>;

    /// Connects to a previously discovered peer by its identity.
    async fn connect(&self, identity: &PeerIdentity) -> Result<Self::Device>;

    async fn disconnect(&self, device: &Self::Device) -> Result<()>;

    /// Enumerates the services the connected device exposes.
    async fn services(&self, device: &Self::Device) -> Result<Vec<(Uuid, Self::Service)>>;

    /// Enumerates the characteristics of one service with their
    /// capabilities.
    async fn characteristics(
        &self,
        service: &Self::Service,
    ) -> Result<Vec<CharacteristicInfo<Self::Characteristic>>>;

    /// Writes one frame, completing when the platform write has finished.
    async fn write(&self, characteristic: &Self::Characteristic, data: &[u8]) -> Result<()>;

    /// Subscribes to notifications; the stream ends when the link drops or
    /// the returned stream is dropped.
    async fn subscribe(
        &self,
        characteristic: &Self::Characteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>>;

    /// Streams loss/disconnect events for an active device.
    async fn connection_events(
        &self,
        device: &Self::Device,
    ) -> Result<BoxStream<'static, PeerEvent>>;
}

/// Bridges a bounded channel into an owned stream.
fn channel_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

/// Production adapter over the platform BLE stack.
///
/// Discovered devices are retained in a map keyed by identity so a later
/// [`RadioAdapter::connect`] can reconnect by identity without rescanning.
pub struct BluestRadio {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestRadio {
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl RadioAdapter for BluestRadio {
    type Device = Device;
    type Service = Service;
    type Characteristic = Characteristic;

    async fn scan(&self, name_filter: &str) -> Result<BoxStream<'static, DiscoveredPeer>> {
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let filter = name_filter.to_string();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let scan_stream = match adapter.scan(&[]).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to start scan: {}", e);
                    return;
                }
            };
            futures_util::pin_mut!(scan_stream);

            loop {
                tokio::select! {
                    discovered = scan_stream.next() => {
                        let Some(discovered) = discovered else { break };
                        let device = discovered.device;
                        let name = device.name().unwrap_or_default();
                        if name != filter {
                            continue;
                        }

                        let identity = PeerIdentity::new(device.id().to_string());
                        devices
                            .lock()
                            .unwrap()
                            .insert(identity.as_str().to_owned(), device.clone());

                        if tx.send(DiscoveredPeer { identity, name }).await.is_err() {
                            break;
                        }
                    }
                    // Receiver gone, stop the platform scan right away.
                    _ = tx.closed() => break,
                }
            }
        });

        Ok(channel_stream(rx))
    }

    async fn connect(&self, identity: &PeerIdentity) -> Result<Device> {
        let device = {
            let devices = self.devices.lock().unwrap();
            devices
                .get(identity.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("Peer {} has not been discovered this session", identity))?
        };

        if !device.is_connected().await {
            self.adapter.connect_device(&device).await?;
        }
        Ok(device)
    }

    async fn disconnect(&self, device: &Device) -> Result<()> {
        if device.is_connected().await {
            self.adapter.disconnect_device(device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", device.id());
        }
        Ok(())
    }

    async fn services(&self, device: &Device) -> Result<Vec<(Uuid, Service)>> {
        let services = device.services().await?;
        Ok(services
            .into_iter()
            .map(|service| (service.uuid(), service))
            .collect())
    }

    async fn characteristics(
        &self,
        service: &Service,
    ) -> Result<Vec<CharacteristicInfo<Characteristic>>> {
        let mut infos = Vec::new();
        for characteristic in service.characteristics().await? {
            let props = characteristic.properties().await?;
            infos.push(CharacteristicInfo {
                uuid: characteristic.uuid(),
                caps: CharacteristicCaps {
                    write: props.write || props.write_without_response,
                    notify: props.notify || props.indicate,
                },
                handle: characteristic,
            });
        }
        Ok(infos)
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<()> {
        characteristic.write(data).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
    ) -> Result<BoxStream<'static, Vec<u8>>> {
        let characteristic = characteristic.clone();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let notifications = match characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to subscribe to notifications: {}", e);
                    return;
                }
            };
            futures_util::pin_mut!(notifications);

            while let Some(result) = notifications.next().await {
                match result {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error in notification stream: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(channel_stream(rx))
    }

    async fn connection_events(&self, device: &Device) -> Result<BoxStream<'static, PeerEvent>> {
        let adapter = self.adapter.clone();
        let device = device.clone();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            let events = match adapter.device_connection_events(&device).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Connection events unavailable: {}", e);
                    return;
                }
            };
            futures_util::pin_mut!(events);

            while let Some(event) = events.next().await {
                if let ConnectionEvent::Disconnected = event {
                    // The platform cannot tell a dropped link from a remote
                    // close; deliberate local disconnects stop this watch
                    // before they reach the adapter, so report loss.
                    if tx.send(PeerEvent::ConnectionLost).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(channel_stream(rx))
    }
}
