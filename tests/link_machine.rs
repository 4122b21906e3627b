//! Integration tests for the link state machine over a scripted radio.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use domino_link::core::bluetooth::{
    CharacteristicCaps, CharacteristicInfo, DiscoveredPeer, PeerEvent, RadioAdapter,
    UUID_DOMINO_SERVICE, UUID_DRAW_CHAR, UUID_MANUAL_CHAR, UUID_STATUS_CHAR,
};
use domino_link::{DriveStep, LinkConfig, LinkError, LinkEvent, LinkManager, LinkState, PeerIdentity};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

const PEER_ID: &str = "mock-robot";

/// Scripted adapter: yields a fixed discovery result, binds whatever
/// characteristics the test configures, and records every write.
struct MockRadio {
    /// Peers the scan stream yields before going quiet.
    discoverable: Vec<DiscoveredPeer>,
    /// Characteristic UUIDs the robot service exposes.
    characteristics: Vec<Uuid>,
    fail_connect: AtomicBool,
    scan_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    notify_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    event_tx: Mutex<Option<mpsc::Sender<PeerEvent>>>,
}

impl MockRadio {
    fn build(discoverable: Vec<DiscoveredPeer>, characteristics: Vec<Uuid>) -> Arc<Self> {
        Arc::new(Self {
            discoverable,
            characteristics,
            fail_connect: AtomicBool::new(false),
            scan_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
            notify_tx: Mutex::new(None),
            event_tx: Mutex::new(None),
        })
    }

    fn with_peer() -> Arc<Self> {
        Self::build(
            vec![DiscoveredPeer {
                identity: PeerIdentity::new(PEER_ID),
                name: "HackPackDomino".into(),
            }],
            vec![UUID_STATUS_CHAR, UUID_MANUAL_CHAR, UUID_DRAW_CHAR],
        )
    }

    fn without_peer() -> Arc<Self> {
        Self::build(
            Vec::new(),
            vec![UUID_STATUS_CHAR, UUID_MANUAL_CHAR, UUID_DRAW_CHAR],
        )
    }

    fn missing_characteristic(missing: Uuid) -> Arc<Self> {
        Self::build(
            vec![DiscoveredPeer {
                identity: PeerIdentity::new(PEER_ID),
                name: "HackPackDomino".into(),
            }],
            [UUID_STATUS_CHAR, UUID_MANUAL_CHAR, UUID_DRAW_CHAR]
                .into_iter()
                .filter(|uuid| *uuid != missing)
                .collect(),
        )
    }

    fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(uuid, _)| *uuid == characteristic)
            .map(|(_, data)| data.clone())
            .collect()
    }

    async fn push_status(&self, frame: &[u8]) {
        let tx = self.notify_tx.lock().unwrap().clone().expect("no subscription");
        tx.send(frame.to_vec()).await.unwrap();
    }

    async fn push_event(&self, event: PeerEvent) {
        let tx = self.event_tx.lock().unwrap().clone().expect("no watcher");
        tx.send(event).await.unwrap();
    }
}

fn channel_stream<T: Send + 'static>(rx: mpsc::Receiver<T>) -> BoxStream<'static, T> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

#[async_trait]
impl RadioAdapter for MockRadio {
    type Device = String;
    type Service = Uuid;
    type Characteristic = Uuid;

    async fn scan(&self, _name_filter: &str) -> Result<BoxStream<'static, DiscoveredPeer>> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        let found = futures_util::stream::iter(self.discoverable.clone());
        Ok(found.chain(futures_util::stream::pending()).boxed())
    }

    async fn connect(&self, identity: &PeerIdentity) -> Result<String> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("peer unreachable");
        }
        Ok(identity.as_str().to_owned())
    }

    async fn disconnect(&self, _device: &String) -> Result<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn services(&self, _device: &String) -> Result<Vec<(Uuid, Uuid)>> {
        Ok(vec![(UUID_DOMINO_SERVICE, UUID_DOMINO_SERVICE)])
    }

    async fn characteristics(&self, _service: &Uuid) -> Result<Vec<CharacteristicInfo<Uuid>>> {
        Ok(self
            .characteristics
            .iter()
            .map(|&uuid| CharacteristicInfo {
                uuid,
                handle: uuid,
                caps: CharacteristicCaps {
                    write: uuid != UUID_STATUS_CHAR,
                    notify: uuid == UUID_STATUS_CHAR,
                },
            })
            .collect())
    }

    async fn write(&self, characteristic: &Uuid, data: &[u8]) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push((*characteristic, data.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, _characteristic: &Uuid) -> Result<BoxStream<'static, Vec<u8>>> {
        let (tx, rx) = mpsc::channel(16);
        *self.notify_tx.lock().unwrap() = Some(tx);
        Ok(channel_stream(rx))
    }

    async fn connection_events(&self, _device: &String) -> Result<BoxStream<'static, PeerEvent>> {
        let (tx, rx) = mpsc::channel(4);
        *self.event_tx.lock().unwrap() = Some(tx);
        Ok(channel_stream(rx))
    }
}

async fn wait_for(what: &str, check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<LinkEvent>) -> Vec<LinkEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn discovery_to_connected_happy_path() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    let mut events = link.subscribe_events();

    link.start_scan().await.unwrap();

    assert_eq!(link.state(), LinkState::Connected);
    assert_eq!(link.peer_identity(), Some(PeerIdentity::new(PEER_ID)));
    assert_eq!(radio.scan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(radio.connect_calls.load(Ordering::SeqCst), 1);

    let events = drain(&mut events);
    assert!(matches!(events[0], LinkEvent::ScanStarted));
    assert!(
        matches!(&events[1], LinkEvent::PeerDiscovered { name, .. } if name == "HackPackDomino")
    );
    let connected = events
        .iter()
        .filter(|event| matches!(event, LinkEvent::Connected))
        .count();
    assert_eq!(connected, 1);
}

#[tokio::test]
async fn just_connected_forces_first_status_notification() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    link.start_scan().await.unwrap();

    let mut status = link.subscribe_status();

    // Identical to the default snapshot; only the just-connected flag makes
    // it notify.
    radio.push_status(&[0u8; 10]).await;
    tokio::time::timeout(Duration::from_secs(1), status.recv())
        .await
        .expect("no notification after connect")
        .unwrap();

    // Same frame again: no change, flag cleared, no notification.
    radio.push_status(&[0u8; 10]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(status.try_recv().is_err());

    // A changed frame notifies again.
    radio
        .push_status(&[1, 0, 0, 0, 0, 0, 0, 0, 0, 0])
        .await;
    let snapshot = tokio::time::timeout(Duration::from_secs(1), status.recv())
        .await
        .expect("no notification for changed frame")
        .unwrap();
    assert!(snapshot.moving);
}

#[tokio::test]
async fn manual_send_writes_expected_frame() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    link.start_scan().await.unwrap();

    {
        let mut manual = link.manual.lock().await;
        manual.moving = true;
        manual.dispensing = false;
        manual.stop_on_empty = true;
        manual.direction = -10;
    }
    link.send_manual(true).await.unwrap();

    let frames = radio.writes_to(UUID_MANUAL_CHAR);
    assert_eq!(frames, [vec![0x01, 0x00, 0x01, 0x01, 0xF6]]);
}

#[tokio::test]
async fn draw_send_is_sequential_chunks() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    link.start_scan().await.unwrap();

    let path: Vec<DriveStep> = (0..9).map(|i| DriveStep::new(i as u16 + 1, 40 * i as u16)).collect();
    link.draw.lock().await.set_path(path.clone());
    link.send_draw().await.unwrap();

    let chunks = radio.writes_to(UUID_DRAW_CHAR);
    assert_eq!(chunks.len(), 3);

    let mut decoded = Vec::new();
    for (index, chunk) in chunks.iter().enumerate() {
        let start = u16::from_le_bytes([chunk[0], chunk[1]]) as usize;
        let total = u16::from_le_bytes([chunk[2], chunk[3]]) as usize;
        assert_eq!(start, index * 4);
        assert_eq!(total, path.len());
        for pair in chunk[4..].chunks(4) {
            decoded.push(DriveStep::new(
                u16::from_le_bytes([pair[0], pair[1]]),
                u16::from_le_bytes([pair[2], pair[3]]),
            ));
        }
    }
    assert_eq!(decoded, path);
}

#[tokio::test]
async fn send_before_connect_never_reaches_the_radio() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());

    link.send_manual(true).await.unwrap();
    link.draw
        .lock()
        .await
        .set_path(vec![DriveStep::new(10, 0)]);
    link.send_draw().await.unwrap();

    assert!(radio.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn connection_lost_triggers_exactly_one_reconnect() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    link.start_scan().await.unwrap();

    wait_for("watcher", || radio.event_tx.lock().unwrap().is_some()).await;
    radio.push_event(PeerEvent::ConnectionLost).await;

    wait_for("reconnect", || {
        radio.connect_calls.load(Ordering::SeqCst) == 2
    })
    .await;
    wait_for("connected again", || link.is_connected()).await;

    // Reconnect went by identity, without a second scan.
    assert_eq!(radio.scan_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(radio.connect_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn explicit_disconnect_never_reconnects() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    link.start_scan().await.unwrap();

    link.disconnect().await.unwrap();

    assert_eq!(link.state(), LinkState::Idle);
    assert_eq!(link.peer_identity(), None);
    assert_eq!(radio.disconnect_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(radio.connect_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_reconnect_keeps_identity_for_manual_retry() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    link.start_scan().await.unwrap();

    wait_for("watcher", || radio.event_tx.lock().unwrap().is_some()).await;
    radio.fail_connect.store(true, Ordering::SeqCst);
    radio.push_event(PeerEvent::ConnectionLost).await;

    wait_for("failed reconnect", || {
        radio.connect_calls.load(Ordering::SeqCst) == 2
    })
    .await;
    wait_for("back to idle", || link.state() == LinkState::Idle).await;
    assert_eq!(link.peer_identity(), Some(PeerIdentity::new(PEER_ID)));

    // Manual retry skips the scan and goes straight to connect.
    radio.fail_connect.store(false, Ordering::SeqCst);
    link.start_scan().await.unwrap();
    assert!(link.is_connected());
    assert_eq!(radio.scan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(radio.connect_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn missing_characteristic_rolls_back_to_idle() {
    let radio = MockRadio::missing_characteristic(UUID_DRAW_CHAR);
    let link = LinkManager::new(radio.clone(), LinkConfig::default());

    let result = link.start_scan().await;
    assert!(matches!(
        result,
        Err(LinkError::CharacteristicMissing { role: "draw control", .. })
    ));
    assert_eq!(link.state(), LinkState::Idle);
    assert!(!link.is_connected());
    // The half-established connection was torn down.
    assert_eq!(radio.disconnect_calls.load(Ordering::SeqCst), 1);

    link.send_manual(true).await.unwrap();
    assert!(radio.writes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancel_scan_returns_to_idle_with_no_identity() {
    let radio = MockRadio::without_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());

    let scanning = {
        let link = link.clone();
        tokio::spawn(async move { link.start_scan().await })
    };
    wait_for("scanning", || link.state() == LinkState::Scanning).await;

    link.cancel_scan();
    scanning.await.unwrap().unwrap();

    assert_eq!(link.state(), LinkState::Idle);
    assert_eq!(link.peer_identity(), None);
}

#[tokio::test]
async fn scan_while_connected_is_a_no_op() {
    let radio = MockRadio::with_peer();
    let link = LinkManager::new(radio.clone(), LinkConfig::default());
    link.start_scan().await.unwrap();

    link.start_scan().await.unwrap();
    assert_eq!(radio.scan_calls.load(Ordering::SeqCst), 1);
    assert_eq!(radio.connect_calls.load(Ordering::SeqCst), 1);
}
