//! Peer discovery for the robot link.
//! The scan is a discovery-only step: it stops the moment the named peer is
//! seen or the caller cancels, never on a timeout.

use std::sync::Arc;

use futures_util::StreamExt;
use log::info;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::adapter::{DiscoveredPeer, RadioAdapter};
use crate::core::bluetooth::error::LinkError;

pub struct PeerScanner<R: RadioAdapter> {
    radio: Arc<R>,
}

impl<R: RadioAdapter> PeerScanner<R> {
    pub fn new(radio: Arc<R>) -> Self {
        Self { radio }
    }

    /// Runs discovery until a peer advertising `name` appears or `cancel`
    /// fires, returning `None` on cancellation or if the adapter's scan
    /// stream ends first.
    ///
    /// Cancellation races discovery; a peer already yielded by the stream
    /// wins the race. The adapter scan stops on return (stream dropped).
    pub async fn discover(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DiscoveredPeer>, LinkError> {
        info!("Starting bluetooth scan for '{}'", name);
        let mut peers = self.radio.scan(name).await?;

        tokio::select! {
            // Discovery wins when both are ready.
            biased;

            found = peers.next() => {
                match found {
                    Some(peer) => {
                        info!("Found robot '{}' ({})", peer.name, peer.identity);
                        Ok(Some(peer))
                    }
                    None => {
                        info!("Scan stream ended without a match.");
                        Ok(None)
                    }
                }
            }
            _ = cancel.cancelled() => {
                info!("Scan cancelled.");
                Ok(None)
            }
        }
    }
}
