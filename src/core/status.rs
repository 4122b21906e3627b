//! Last-known robot status and change notification.
//! This module holds the status snapshot reported by the robot and raises
//! one coalesced notification whenever an incoming frame changes any field.

use std::sync::Mutex;

use log::debug;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::wire;

/// One complete status report from the robot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub moving: bool,
    pub dispensing: bool,
    pub stop_on_empty: bool,
    pub is_empty: bool,
    pub manual_mode: bool,
    /// Current steering offset as reported by the robot, raw byte value.
    pub direction: u8,
    pub distance_traveled_mm: u32,
}

struct StatusInner {
    snapshot: StatusSnapshot,
    just_connected: bool,
}

/// Holds the current [`StatusSnapshot`] and publishes coalesced changes.
///
/// Incoming frames of the wrong length are dropped without touching the
/// stored snapshot; the transport redelivers a valid frame soon enough.
pub struct StatusModel {
    inner: Mutex<StatusInner>,
    changed: broadcast::Sender<StatusSnapshot>,
}

impl StatusModel {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(16);
        Self {
            inner: Mutex::new(StatusInner {
                snapshot: StatusSnapshot::default(),
                just_connected: false,
            }),
            changed,
        }
    }

    /// Applies one incoming status frame.
    ///
    /// On a valid frame the stored snapshot is replaced atomically and, if
    /// any field differs from the previous snapshot or the session was just
    /// established, exactly one notification covering all fields is
    /// published. The just-connected flag is cleared either way.
    pub fn apply(&self, frame: &[u8]) {
        let snapshot = match wire::decode_status(frame) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("Dropping status frame: {}", e);
                return;
            }
        };

        let notify = {
            let mut inner = self.inner.lock().unwrap();
            let changed = inner.just_connected || inner.snapshot != snapshot;
            inner.snapshot = snapshot;
            inner.just_connected = false;
            changed
        };

        if notify {
            // No receivers is fine, the send result only reports that.
            let _ = self.changed.send(snapshot);
        }
    }

    /// Forces the next valid frame to notify even if its values match the
    /// stale cached ones. Called right after a session is established.
    pub fn mark_just_connected(&self) {
        self.inner.lock().unwrap().just_connected = true;
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().unwrap().snapshot
    }

    /// Subscribes to coalesced change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.changed.subscribe()
    }
}

impl Default for StatusModel {
    fn default() -> Self {
        Self::new()
    }
}
