//! Session establishment for the robot link.
//! Stepwise connect and GATT resolution; each step either produces its
//! handles or fails the whole connection attempt.

use std::sync::Arc;

use log::{info, warn};

use crate::core::bluetooth::adapter::{CharacteristicInfo, RadioAdapter};
use crate::core::bluetooth::constants::{
    UUID_DOMINO_SERVICE, UUID_DRAW_CHAR, UUID_MANUAL_CHAR, UUID_STATUS_CHAR,
};
use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::types::PeerIdentity;

/// The three characteristics a session binds, all present or none.
pub struct ResolvedCharacteristics<R: RadioAdapter> {
    pub status: CharacteristicInfo<R::Characteristic>,
    pub manual: CharacteristicInfo<R::Characteristic>,
    pub draw: CharacteristicInfo<R::Characteristic>,
}

pub struct ConnectionManager<R: RadioAdapter> {
    radio: Arc<R>,
}

impl<R: RadioAdapter> ConnectionManager<R> {
    pub fn new(radio: Arc<R>) -> Self {
        Self { radio }
    }

    /// Requests a connection by retained identity.
    pub async fn connect_device(&self, identity: &PeerIdentity) -> Result<R::Device, LinkError> {
        info!("Initiating connection to {}...", identity);
        self.radio
            .connect(identity)
            .await
            .map_err(|source| LinkError::ConnectFailed {
                identity: identity.clone(),
                source,
            })
    }

    /// Finds the robot control service on the connected device.
    pub async fn resolve_service(&self, device: &R::Device) -> Result<R::Service, LinkError> {
        info!("Connection successful, discovering services...");
        let services = self.radio.services(device).await?;

        let service = services
            .iter()
            .find(|(uuid, _)| *uuid == UUID_DOMINO_SERVICE)
            .map(|(_, service)| service.clone())
            .ok_or_else(|| {
                for (uuid, _) in &services {
                    info!("Available service: {}", uuid);
                }
                LinkError::ServiceNotFound {
                    uuid: UUID_DOMINO_SERVICE,
                }
            })?;

        info!("Found robot service: {}", UUID_DOMINO_SERVICE);
        Ok(service)
    }

    /// Binds the status, manual and draw characteristics. Absence of any
    /// one of the three fails the connection.
    pub async fn resolve_characteristics(
        &self,
        service: &R::Service,
    ) -> Result<ResolvedCharacteristics<R>, LinkError> {
        let mut status = None;
        let mut manual = None;
        let mut draw = None;

        for info in self.radio.characteristics(service).await? {
            if info.uuid == UUID_STATUS_CHAR {
                info!("Found status characteristic: {}", info.uuid);
                status = Some(info);
            } else if info.uuid == UUID_MANUAL_CHAR {
                info!("Found manual control characteristic: {}", info.uuid);
                manual = Some(info);
            } else if info.uuid == UUID_DRAW_CHAR {
                info!("Found draw control characteristic: {}", info.uuid);
                draw = Some(info);
            }
        }

        let status = status.ok_or(LinkError::CharacteristicMissing {
            role: "status",
            uuid: UUID_STATUS_CHAR,
        })?;
        let manual = manual.ok_or(LinkError::CharacteristicMissing {
            role: "manual control",
            uuid: UUID_MANUAL_CHAR,
        })?;
        let draw = draw.ok_or(LinkError::CharacteristicMissing {
            role: "draw control",
            uuid: UUID_DRAW_CHAR,
        })?;

        Ok(ResolvedCharacteristics {
            status,
            manual,
            draw,
        })
    }

    /// Best-effort disconnect used when a half-established session is
    /// rolled back.
    pub async fn teardown(&self, device: &R::Device) {
        if let Err(e) = self.radio.disconnect(device).await {
            warn!("Disconnect after failed setup also failed: {}", e);
        }
    }
}
