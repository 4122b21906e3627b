//! Status notification handling for the robot link.
//! Forwards notification payloads verbatim into the status model; the model
//! decides what is a valid frame.

use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::core::status::StatusModel;

#[derive(Clone)]
pub struct NotificationHandler {
    status: Arc<StatusModel>,
}

impl NotificationHandler {
    pub fn new(status: Arc<StatusModel>) -> Self {
        Self { status }
    }

    /// Spawns the task that feeds status frames into the model until the
    /// stream ends or the session token fires.
    pub fn spawn_listener(
        &self,
        mut notifications: BoxStream<'static, Vec<u8>>,
        cancel: CancellationToken,
    ) {
        let status = self.status.clone();

        tokio::spawn(async move {
            info!("Listening for status notifications...");
            loop {
                tokio::select! {
                    frame = notifications.next() => {
                        match frame {
                            Some(value) => {
                                debug!("Received status frame: {:02X?}", value);
                                status.apply(&value);
                            }
                            None => break,
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            info!("Status notification stream ended");
        });
    }
}
