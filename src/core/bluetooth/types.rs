//! Defines shared data structures for the Bluetooth link.

use std::fmt;

use serde::Serialize;

use crate::core::bluetooth::adapter::RadioAdapter;

/// Opaque identifier the radio stack assigns to the peer once it has been
/// discovered by name. Valid for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The resolved endpoints of one connected session.
///
/// All handles are present together or the whole value is absent; the link
/// manager stores a single `Option<LinkHandle>` and destroys it wholesale
/// on any disconnect.
pub struct LinkHandle<R: RadioAdapter> {
    /// The device handle, used for disconnecting and loss watching.
    pub device: R::Device,
    /// The robot's control service.
    pub service: R::Service,
    /// Status characteristic (notify).
    pub status: R::Characteristic,
    /// Manual-control characteristic (write).
    pub manual: R::Characteristic,
    /// Draw-control characteristic (write, chunked).
    pub draw: R::Characteristic,
}

impl<R: RadioAdapter> Clone for LinkHandle<R> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            service: self.service.clone(),
            status: self.status.clone(),
            manual: self.manual.clone(),
            draw: self.draw.clone(),
        }
    }
}

/// Where the link currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    ResolvingService,
    ResolvingCharacteristics,
    Subscribing,
    Connected,
}

/// Events published to external listeners on the link's broadcast topic.
///
/// Handlers run on their own tasks; anything UI-visible must be dispatched
/// onto the consumer's own execution context.
#[derive(Debug, Clone, Serialize)]
pub enum LinkEvent {
    ScanStarted,
    PeerDiscovered { identity: PeerIdentity, name: String },
    ScanStopped,
    Connected,
    Disconnected,
    ConnectFailed { reason: String },
}
