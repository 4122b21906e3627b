//! Fixed identifiers for the robot link.
//! These must match the peer firmware exactly; frame layouts for the
//! characteristics live in [`crate::core::wire`].

use uuid::Uuid;

/// The name the robot advertises during discovery.
pub const PEER_NAME: &str = "HackPackDomino";

/// The robot's control service.
pub const UUID_DOMINO_SERVICE: Uuid = Uuid::from_u128(0xfaa94de0_cd7c_43fa_b71d_40324ff9ab2b);

/// Status characteristic (notify, 10-byte frames).
pub const UUID_STATUS_CHAR: Uuid = Uuid::from_u128(0xb43a1a69_5dc4_4573_b47c_53e31ca661f2);

/// Manual-control characteristic (write without response, 5-byte frames).
pub const UUID_MANUAL_CHAR: Uuid = Uuid::from_u128(0x874b19c2_4bfa_4453_83b4_e0d3a28317fd);

/// Draw-control characteristic (write without response, chunked).
pub const UUID_DRAW_CHAR: Uuid = Uuid::from_u128(0x56d0d406_5ae9_4e66_8ff7_bd43c12e6263);
