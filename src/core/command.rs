//! Outgoing command models for the robot link.
//! Thin encode-on-demand wrappers over the wire codec: the manual model
//! carries the desired drive state, the draw model carries the path to
//! transmit in chunks.

use serde::Serialize;

use crate::core::status::StatusSnapshot;
use crate::core::wire::{self, MAX_POINTS_PER_CHUNK};

/// One step of a drive path: distance to cover, then heading to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DriveStep {
    pub distance_mm: u16,
    /// Heading in degrees, 0-359.
    pub angle: u16,
}

impl DriveStep {
    pub fn new(distance_mm: u16, angle: u16) -> Self {
        Self { distance_mm, angle }
    }
}

/// Desired manual-drive state, mutated one field at a time by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualCommand {
    pub moving: bool,
    pub dispensing: bool,
    pub stop_on_empty: bool,
    /// Steering offset in degrees, -90 to 90.
    pub direction: i8,
}

impl Default for ManualCommand {
    /// Matches the robot firmware's power-on state.
    fn default() -> Self {
        Self {
            moving: false,
            dispensing: true,
            stop_on_empty: true,
            direction: 0,
        }
    }
}

impl ManualCommand {
    /// Encodes the 5-byte manual-control frame.
    pub fn encode(&self, manual_mode: bool) -> Vec<u8> {
        wire::encode_manual(
            self.moving,
            self.dispensing,
            self.stop_on_empty,
            manual_mode,
            self.direction,
        )
    }

    /// Copies the mirrorable fields from a status report so a single-field
    /// edit does not clobber the others.
    pub fn update_from_status(&mut self, status: &StatusSnapshot) {
        self.moving = status.moving;
        self.dispensing = status.dispensing;
        self.stop_on_empty = status.stop_on_empty;
        self.direction = status.direction as i8;
    }
}

/// The drive path to transmit, replaced wholesale before each send.
#[derive(Debug, Clone, Default)]
pub struct DrawCommand {
    path: Vec<DriveStep>,
}

impl DrawCommand {
    pub fn set_path(&mut self, path: Vec<DriveStep>) {
        self.path = path;
    }

    pub fn path(&self) -> &[DriveStep] {
        &self.path
    }

    /// Start indices of the chunks a full transmission consists of, in send
    /// order. An empty path still produces one header-only chunk so the
    /// robot learns the new (zero) step count.
    pub fn chunk_starts(&self) -> Vec<usize> {
        if self.path.is_empty() {
            vec![0]
        } else {
            (0..self.path.len()).step_by(MAX_POINTS_PER_CHUNK).collect()
        }
    }

    /// Encodes the chunk beginning at `start_index`.
    pub fn encode_chunk(&self, start_index: usize) -> Vec<u8> {
        wire::encode_draw_chunk(&self.path, start_index)
    }
}
