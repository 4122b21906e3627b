//! domino-link library
//! Link layer and wire protocol for the HackPackDomino drawing robot:
//! discovery by advertised name, session establishment over three GATT
//! characteristics, loss detection with reconnect-by-identity, and the
//! fixed little-endian codec for the status, manual and draw frames.

// Module declarations
pub mod config;
pub mod core;

pub use config::LinkConfig;
pub use core::bluetooth::{
    BluestRadio, DiscoveredPeer, LinkError, LinkEvent, LinkManager, LinkState, PeerEvent,
    PeerIdentity, RadioAdapter,
};
pub use core::command::{DrawCommand, DriveStep, ManualCommand};
pub use core::status::{StatusModel, StatusSnapshot};
