//! Link state machine for the robot connection.
//! Owns discovery, session establishment, disconnect detection and
//! reconnection-by-identity, and the serialized send paths for the manual
//! and draw channels.

use std::sync::{Arc, Mutex as StdMutex};

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::LinkConfig;
use crate::core::bluetooth::adapter::{PeerEvent, RadioAdapter};
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::error::LinkError;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::scanner::PeerScanner;
use crate::core::bluetooth::types::{LinkEvent, LinkHandle, LinkState, PeerIdentity};
use crate::core::command::{DrawCommand, ManualCommand};
use crate::core::status::StatusModel;

/// Manages the session with the robot peer.
///
/// At most one session and one in-flight scan/connect sequence exist at a
/// time; requests that arrive while a sequence is running are rejected, and
/// requests while connected are ignored.
pub struct LinkManager<R: RadioAdapter> {
    radio: Arc<R>,
    config: LinkConfig,
    scanner: PeerScanner<R>,
    connection: ConnectionManager<R>,
    notifications: NotificationHandler,

    state: StdMutex<LinkState>,
    peer: StdMutex<Option<PeerIdentity>>,
    link: Mutex<Option<LinkHandle<R>>>,

    /// Last-known robot status, fed by the notification task.
    pub status: Arc<StatusModel>,
    /// Desired manual-drive state, mutated by the caller one field at a
    /// time and encoded on each send.
    pub manual: Arc<Mutex<ManualCommand>>,
    /// The drive path for the next draw send, replaced wholesale.
    pub draw: Arc<Mutex<DrawCommand>>,

    events: broadcast::Sender<LinkEvent>,
    scan_cancel: StdMutex<Option<CancellationToken>>,
    session_cancel: StdMutex<Option<CancellationToken>>,
    manual_send_lock: Mutex<()>,
    draw_send_lock: Mutex<()>,
}

impl<R: RadioAdapter> LinkManager<R> {
    pub fn new(radio: Arc<R>, config: LinkConfig) -> Arc<Self> {
        let status = Arc::new(StatusModel::new());
        let (events, _) = broadcast::channel(32);

        Arc::new(Self {
            scanner: PeerScanner::new(radio.clone()),
            connection: ConnectionManager::new(radio.clone()),
            notifications: NotificationHandler::new(status.clone()),
            radio,
            config,
            state: StdMutex::new(LinkState::Idle),
            peer: StdMutex::new(None),
            link: Mutex::new(None),
            status,
            manual: Arc::new(Mutex::new(ManualCommand::default())),
            draw: Arc::new(Mutex::new(DrawCommand::default())),
            events,
            scan_cancel: StdMutex::new(None),
            session_cancel: StdMutex::new(None),
            manual_send_lock: Mutex::new(()),
            draw_send_lock: Mutex::new(()),
        })
    }

    /// Discovers the peer (unless its identity is already known) and runs
    /// the full connect sequence.
    ///
    /// Ignored while connected; rejected while another sequence is in
    /// flight. Returns after the session is established, the scan was
    /// cancelled, or the attempt failed.
    pub async fn start_scan(self: &Arc<Self>) -> Result<(), LinkError> {
        let known = {
            let mut state = self.state.lock().unwrap();
            match *state {
                LinkState::Connected => {
                    info!("Already connected, scan request ignored.");
                    return Ok(());
                }
                LinkState::Idle => {}
                busy => return Err(LinkError::Busy(busy)),
            }

            let known = self.peer.lock().unwrap().clone();
            *state = if known.is_some() {
                LinkState::Connecting
            } else {
                LinkState::Scanning
            };
            known
        };

        if let Some(identity) = known {
            info!("Peer identity already known, skipping scan.");
            return self.connect_sequence(&identity).await;
        }

        self.emit(LinkEvent::ScanStarted);
        let cancel = CancellationToken::new();
        *self.scan_cancel.lock().unwrap() = Some(cancel.clone());

        let discovered = self.scanner.discover(&self.config.peer_name, &cancel).await;
        *self.scan_cancel.lock().unwrap() = None;

        let peer = match discovered {
            Ok(Some(peer)) => peer,
            Ok(None) => {
                self.set_state(LinkState::Idle);
                self.emit(LinkEvent::ScanStopped);
                return Ok(());
            }
            Err(e) => {
                self.set_state(LinkState::Idle);
                self.emit(LinkEvent::ScanStopped);
                return Err(e);
            }
        };

        *self.peer.lock().unwrap() = Some(peer.identity.clone());
        self.emit(LinkEvent::PeerDiscovered {
            identity: peer.identity.clone(),
            name: peer.name,
        });
        self.emit(LinkEvent::ScanStopped);

        self.connect_sequence(&peer.identity).await
    }

    /// Aborts a scan in progress. If discovery has already recorded the
    /// peer identity, discovery wins and the connect sequence proceeds.
    pub fn cancel_scan(&self) {
        if let Some(token) = self.scan_cancel.lock().unwrap().take() {
            info!("Cancelling scan.");
            token.cancel();
        }
    }

    /// Explicit, caller-initiated disconnect. Clears the retained peer
    /// identity and all session handles; never triggers a reconnect.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let handle = self.link.lock().await.take();
        let Some(handle) = handle else {
            info!("No active session to disconnect.");
            return Ok(());
        };

        // Stop the watcher first so the adapter's disconnect event cannot
        // be mistaken for connection loss.
        if let Some(token) = self.session_cancel.lock().unwrap().take() {
            token.cancel();
        }
        self.set_state(LinkState::Idle);
        *self.peer.lock().unwrap() = None;

        if let Err(e) = self.radio.disconnect(&handle.device).await {
            warn!("Disconnect request failed: {}", e);
        }

        self.emit(LinkEvent::Disconnected);
        info!("Disconnected from robot.");
        Ok(())
    }

    /// Encodes the current manual-drive state and writes it to the manual
    /// characteristic. Dropped silently while not connected. Concurrent
    /// calls are serialized so frame construction and dispatch never
    /// interleave.
    pub async fn send_manual(&self, manual_mode: bool) -> Result<(), LinkError> {
        let _guard = self.manual_send_lock.lock().await;

        let Some(characteristic) = self.send_target(|handle| handle.manual.clone()).await else {
            debug!("Manual command dropped, not connected.");
            return Ok(());
        };

        let frame = self.manual.lock().await.encode(manual_mode);
        debug!("Sending manual frame: {:02X?}", frame);
        self.radio.write(&characteristic, &frame).await?;
        Ok(())
    }

    /// Transmits the current drive path as a strictly sequential chain of
    /// chunks; each chunk's write completes before the next is encoded,
    /// because the robot's receive buffer holds a single frame. Dropped
    /// silently while not connected. A second path send waits for the
    /// first to finish.
    pub async fn send_draw(&self) -> Result<(), LinkError> {
        let _guard = self.draw_send_lock.lock().await;

        let Some(characteristic) = self.send_target(|handle| handle.draw.clone()).await else {
            debug!("Draw command dropped, not connected.");
            return Ok(());
        };

        let path = self.draw.lock().await.clone();
        for start in path.chunk_starts() {
            let chunk = path.encode_chunk(start);
            debug!("Sending draw chunk at {}: {:02X?}", start, chunk);
            self.radio.write(&characteristic, &chunk).await?;
        }
        Ok(())
    }

    pub fn state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// The retained peer identity, if the peer has been discovered.
    pub fn peer_identity(&self) -> Option<PeerIdentity> {
        self.peer.lock().unwrap().clone()
    }

    /// Subscribes to link lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Subscribes to coalesced status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<crate::core::status::StatusSnapshot> {
        self.status.subscribe()
    }

    /// Runs connect, service and characteristic resolution, and status
    /// subscription against the retained identity. Any shape failure rolls
    /// the session back to idle with all handles cleared; the identity is
    /// kept so a later attempt can reconnect without rescanning.
    async fn connect_sequence(self: &Arc<Self>, identity: &PeerIdentity) -> Result<(), LinkError> {
        self.set_state(LinkState::Connecting);
        let device = match self.connection.connect_device(identity).await {
            Ok(device) => device,
            Err(e) => {
                self.set_state(LinkState::Idle);
                return Err(e);
            }
        };

        self.set_state(LinkState::ResolvingService);
        let service = match self.connection.resolve_service(&device).await {
            Ok(service) => service,
            Err(e) => {
                self.connection.teardown(&device).await;
                self.set_state(LinkState::Idle);
                return Err(e);
            }
        };

        self.set_state(LinkState::ResolvingCharacteristics);
        let resolved = match self.connection.resolve_characteristics(&service).await {
            Ok(resolved) => resolved,
            Err(e) => {
                self.connection.teardown(&device).await;
                self.set_state(LinkState::Idle);
                return Err(e);
            }
        };

        self.set_state(LinkState::Subscribing);
        let session = CancellationToken::new();
        if resolved.status.caps.notify {
            match self.radio.subscribe(&resolved.status.handle).await {
                Ok(stream) => self.notifications.spawn_listener(stream, session.clone()),
                Err(e) => {
                    if self.config.require_telemetry {
                        self.connection.teardown(&device).await;
                        self.set_state(LinkState::Idle);
                        return Err(LinkError::SubscribeFailed(e));
                    }
                    warn!("Status subscription failed, continuing without telemetry: {}", e);
                }
            }
        } else if self.config.require_telemetry {
            self.connection.teardown(&device).await;
            self.set_state(LinkState::Idle);
            return Err(LinkError::SubscribeFailed(anyhow::anyhow!(
                "status characteristic does not support notifications"
            )));
        } else {
            warn!("Status characteristic does not notify, continuing without telemetry.");
        }

        *self.link.lock().await = Some(LinkHandle {
            device: device.clone(),
            service,
            status: resolved.status.handle,
            manual: resolved.manual.handle,
            draw: resolved.draw.handle,
        });
        *self.session_cancel.lock().unwrap() = Some(session.clone());
        self.set_state(LinkState::Connected);
        self.status.mark_just_connected();
        self.emit(LinkEvent::Connected);
        info!("Session established with {}", identity);

        self.spawn_watcher(device, session);
        Ok(())
    }

    /// Watches the adapter's connection events for the active device and
    /// funnels the first loss into [`Self::handle_loss`].
    fn spawn_watcher(self: &Arc<Self>, device: R::Device, cancel: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut events = match manager.radio.connection_events(&device).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("Connection watch unavailable: {}", e);
                    return;
                }
            };

            tokio::select! {
                event = events.next() => {
                    if let Some(event) = event {
                        manager.handle_loss(event).await;
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// Reacts to an asynchronous loss signal: tears the session down and
    /// notifies listeners once. Genuine connection loss with a retained
    /// identity gets exactly one reconnect attempt; repeated loss produces
    /// repeated single attempts, one per event.
    async fn handle_loss(self: &Arc<Self>, event: PeerEvent) {
        let reconnect = {
            let mut state = self.state.lock().unwrap();
            if *state != LinkState::Connected {
                // Stale signal from a session already torn down.
                return;
            }

            let identity = if event == PeerEvent::ConnectionLost && self.config.auto_reconnect {
                self.peer.lock().unwrap().clone()
            } else {
                None
            };
            // Claim the transition before releasing the lock so no other
            // sequence can start in between.
            *state = if identity.is_some() {
                LinkState::Connecting
            } else {
                LinkState::Idle
            };
            identity
        };

        if let Some(token) = self.session_cancel.lock().unwrap().take() {
            token.cancel();
        }
        *self.link.lock().await = None;
        warn!("Connection to robot lost.");
        self.emit(LinkEvent::Disconnected);

        if let Some(identity) = reconnect {
            info!("Attempting to reconnect to {}", identity);
            if let Err(e) = self.connect_sequence(&identity).await {
                warn!("Reconnect attempt failed: {}", e);
                self.emit(LinkEvent::ConnectFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// The characteristic to write to, or `None` unless the link is
    /// connected with its handles present.
    async fn send_target<F>(&self, pick: F) -> Option<R::Characteristic>
    where
        F: FnOnce(&LinkHandle<R>) -> R::Characteristic,
    {
        if self.state() != LinkState::Connected {
            return None;
        }
        self.link.lock().await.as_ref().map(pick)
    }

    fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
    }

    fn emit(&self, event: LinkEvent) {
        // No subscribers is fine, the send result only reports that.
        let _ = self.events.send(event);
    }
}
