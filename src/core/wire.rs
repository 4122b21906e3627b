//! Wire format for the robot link.
//! All frames use a fixed little-endian layout; booleans occupy one full
//! byte (0x00/0x01 outgoing, any nonzero reads as true).

use thiserror::Error;

use crate::core::command::DriveStep;
use crate::core::status::StatusSnapshot;

/// Manual-control frame size in bytes.
pub const MANUAL_FRAME_LEN: usize = 5;

/// Status frame size in bytes.
pub const STATUS_FRAME_LEN: usize = 10;

/// Draw-chunk header size in bytes (start index + total count).
pub const DRAW_HEADER_LEN: usize = 4;

/// Maximum number of drive steps carried by one draw chunk.
pub const MAX_POINTS_PER_CHUNK: usize = 4;

/// Decoding failure for an incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame is not exactly [`STATUS_FRAME_LEN`] bytes.
    #[error("status frame is {actual} bytes, expected {STATUS_FRAME_LEN}")]
    WrongLength { actual: usize },
}

/// Fixed-size byte buffer with a little-endian read/write cursor.
///
/// Callers size the buffer exactly for the frame being built; a write that
/// would overrun the buffer is a programming error and panics.
pub struct MessageBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl MessageBuffer {
    /// Creates a zeroed buffer of exactly `len` bytes for writing.
    pub fn new(len: usize) -> Self {
        Self {
            data: vec![0; len],
            cursor: 0,
        }
    }

    /// Wraps received bytes for cursor-based reading.
    pub fn for_reading(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            cursor: 0,
        }
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.put(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take::<2>())
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take::<4>())
    }

    /// Consumes the buffer, yielding the encoded frame.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.cursor + bytes.len();
        self.data[self.cursor..end].copy_from_slice(bytes);
        self.cursor = end;
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let end = self.cursor + N;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.cursor..end]);
        self.cursor = end;
        out
    }
}

/// Encodes a 5-byte manual-control frame.
///
/// Layout: moving, dispensing, stop_on_empty, manual_mode (one byte each),
/// then the direction as the raw byte value of the signed degree offset.
pub fn encode_manual(
    moving: bool,
    dispensing: bool,
    stop_on_empty: bool,
    manual_mode: bool,
    direction: i8,
) -> Vec<u8> {
    let mut buffer = MessageBuffer::new(MANUAL_FRAME_LEN);
    buffer.write_bool(moving);
    buffer.write_bool(dispensing);
    buffer.write_bool(stop_on_empty);
    buffer.write_bool(manual_mode);
    buffer.write_u8(direction as u8);
    buffer.into_bytes()
}

/// Encodes one chunk of a draw-path transmission.
///
/// Header: `start_index` then the total step count, both little-endian u16.
/// Body: up to [`MAX_POINTS_PER_CHUNK`] steps from `start_index`, each as
/// (distance, angle) little-endian u16 pairs in path order. The sender steps
/// `start_index` by [`MAX_POINTS_PER_CHUNK`] from zero, in ascending order,
/// awaiting each write before encoding the next chunk.
pub fn encode_draw_chunk(path: &[DriveStep], start_index: usize) -> Vec<u8> {
    let count = path.len().saturating_sub(start_index).min(MAX_POINTS_PER_CHUNK);
    let mut buffer = MessageBuffer::new(DRAW_HEADER_LEN + count * 4);

    buffer.write_u16(start_index as u16);
    buffer.write_u16(path.len() as u16);
    for step in &path[start_index..start_index + count] {
        buffer.write_u16(step.distance_mm);
        buffer.write_u16(step.angle);
    }
    buffer.into_bytes()
}

/// Decodes a 10-byte status frame.
///
/// Layout: moving, dispensing, stop_on_empty, is_empty, manual_mode (one
/// byte each, nonzero = true), unsigned direction byte, then the distance
/// traveled as a little-endian u32.
pub fn decode_status(data: &[u8]) -> Result<StatusSnapshot, DecodeError> {
    if data.len() != STATUS_FRAME_LEN {
        return Err(DecodeError::WrongLength { actual: data.len() });
    }

    let mut buffer = MessageBuffer::for_reading(data);
    let moving = buffer.read_bool();
    let dispensing = buffer.read_bool();
    let stop_on_empty = buffer.read_bool();
    let is_empty = buffer.read_bool();
    let manual_mode = buffer.read_bool();
    let direction = buffer.read_u8();
    let distance_traveled_mm = buffer.read_u32();

    Ok(StatusSnapshot {
        moving,
        dispensing,
        stop_on_empty,
        is_empty,
        manual_mode,
        direction,
        distance_traveled_mm,
    })
}
