//! Failure taxonomy for the robot link.
//! Every failure is recovered at the link-manager boundary and surfaced as
//! one of these variants; none of them abort the process.

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::types::{LinkState, PeerIdentity};

#[derive(Debug, Error)]
pub enum LinkError {
    /// A scan or connect request arrived while another sequence was
    /// already in flight.
    #[error("link is busy ({0:?})")]
    Busy(LinkState),

    /// The peer did not accept the connection. The retained identity is
    /// preserved so the next attempt can reconnect without rescanning.
    #[error("connecting to {identity} failed")]
    ConnectFailed {
        identity: PeerIdentity,
        #[source]
        source: anyhow::Error,
    },

    /// The connected device does not expose the robot control service.
    #[error("service {uuid} not found on peer")]
    ServiceNotFound { uuid: Uuid },

    /// One of the three required characteristics is missing; partial
    /// binding is rejected wholesale.
    #[error("{role} characteristic {uuid} missing on peer")]
    CharacteristicMissing { role: &'static str, uuid: Uuid },

    /// Subscribing to status notifications failed and the configuration
    /// requires telemetry.
    #[error("status subscription failed")]
    SubscribeFailed(#[source] anyhow::Error),

    /// Any other radio-stack failure.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}
