//! Capture pipeline orchestration.
//!
//! A run waits for the trigger, starts capture, and drives three workers
//! until a stop reason is set:
//!
//! - the frame source reads the dump stream, parses and filters packets,
//!   and queues those from the target device;
//! - the processor owns the [`Session`] and runs statistics, reassembly,
//!   verification and decoding for each queued packet, in arrival order;
//! - the watchdog stops the run once more packets than the budget were
//!   processed. The processor stops taking packets at that point, so no
//!   packet past the budget reaches the store.
//!
//! Results leave the pipeline through the attribute store and three
//! broadcast channels: human-readable notifications, digital-signature
//! records and attribute snapshots.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::acquirer::{Acquisition, DeviceAcquirer};
use crate::ble::advertising::AdvertisingPacket;
use crate::ble::frame_reader::FrameReader;
use crate::capture::{CaptureControl, CaptureStream};
use crate::config::{DeviceIdentity, PipelineConfig, MIN_WATCHDOG_INTERVAL};
use crate::data::attributes::{
    Attribute, AttributeStore, InMemoryAttributeStore, SessionAttributes, TIME_FORMAT,
};
use crate::data::session::Session;
use crate::error::{Error, Result};
use crate::protocol::reassembly::{Fragment, Verification};
use crate::protocol::telemetry::DecodedTelemetry;
use crate::trigger::{TriggerEvent, TriggerSource};

/// Separator line between notification blocks.
pub const SEPARATOR: &str = "----------------------------------------";

const CHANNEL_CAPACITY: usize = 256;

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StopReason {
    /// More packets than the budget were processed.
    PacketBudget,
    /// [`Pipeline::stop`] was called.
    External,
    /// The dump stream ended.
    StreamEnded,
    /// Reading the dump stream failed.
    StreamError(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketBudget => f.write_str("packet budget reached"),
            Self::External => f.write_str("stopped"),
            Self::StreamEnded => f.write_str("capture stream ended"),
            Self::StreamError(e) => write!(f, "capture stream failed: {}", e),
        }
    }
}

/// Cloneable stop flag. The first reason set wins.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl StopSignal {
    /// Create an unset signal.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Set the stop reason. Returns `false` if a reason was already set.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            debug!("Stop requested: {}", reason);
            *current = Some(reason);
            true
        })
    }

    /// The reason, if set.
    pub fn reason(&self) -> Option<StopReason> {
        self.tx.borrow().clone()
    }

    /// Check if a reason is set.
    pub fn is_stopped(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until a reason is set.
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = rx.borrow_and_update().clone() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return StopReason::External;
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A human-readable notification line.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// When it was published.
    pub timestamp: DateTime<Utc>,
    /// The text.
    pub text: String,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Outcome of one digital-signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignatureRecord {
    /// Digest carried by the beacon.
    pub expected: String,
    /// Digest computed locally.
    pub computed: String,
    /// Whether they match.
    pub matched: bool,
}

impl From<&Verification> for SignatureRecord {
    fn from(v: &Verification) -> Self {
        Self {
            expected: v.expected_digest.clone(),
            computed: v.computed_digest.clone(),
            matched: v.verified,
        }
    }
}

impl fmt::Display for SignatureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", SEPARATOR)?;
        writeln!(f, "Digital Signature: {}", self.expected)?;
        writeln!(f, "HMAC: {}", self.computed)?;
        write!(f, "{}", SEPARATOR)
    }
}

/// Attributes of the target after a packet was processed.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSnapshot {
    /// Device the attributes belong to.
    pub identity: DeviceIdentity,
    /// The attributes.
    pub attributes: SessionAttributes,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Session id.
    pub session_id: Uuid,
    /// Why the run ended.
    pub reason: StopReason,
    /// Packets processed.
    pub packet_count: u64,
    /// Verifications that passed.
    pub verified_count: u32,
}

#[derive(Clone)]
struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    fn send(&self, text: impl Into<String>) {
        let text = text.into();
        trace!("Notification: {}", text);
        // No subscriber is fine.
        let _ = self.tx.send(Notification {
            timestamp: Utc::now(),
            text,
        });
    }
}

/// Clears the running state when a run ends, however it ends.
struct RunGuard<'a> {
    pipeline: &'a Pipeline,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.pipeline.stop.write() = None;
        self.pipeline.is_running.store(false, Ordering::SeqCst);
    }
}

/// The capture-to-telemetry pipeline.
pub struct Pipeline {
    config: RwLock<PipelineConfig>,
    store: Arc<dyn AttributeStore>,
    notification_tx: broadcast::Sender<Notification>,
    signature_tx: broadcast::Sender<SignatureRecord>,
    snapshot_tx: broadcast::Sender<AttributeSnapshot>,
    stop: RwLock<Option<StopSignal>>,
    is_running: AtomicBool,
}

impl Pipeline {
    /// Create a pipeline publishing into `store`.
    pub fn new(config: PipelineConfig, store: Arc<dyn AttributeStore>) -> Self {
        let (notification_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (signature_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (snapshot_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        store.register(&config.target_identity);

        Self {
            config: RwLock::new(config),
            store,
            notification_tx,
            signature_tx,
            snapshot_tx,
            stop: RwLock::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    /// Create a pipeline with an in-memory attribute store.
    pub fn with_in_memory_store(config: PipelineConfig) -> Self {
        Self::new(config, Arc::new(InMemoryAttributeStore::new()))
    }

    /// Current configuration.
    pub fn config(&self) -> PipelineConfig {
        self.config.read().clone()
    }

    /// The attribute store.
    pub fn store(&self) -> Arc<dyn AttributeStore> {
        self.store.clone()
    }

    /// Identity the next run locks onto.
    pub fn target_identity(&self) -> DeviceIdentity {
        self.config.read().target_identity.clone()
    }

    /// Attributes of the current target.
    pub fn attributes(&self) -> Option<SessionAttributes> {
        self.store.get_all(&self.target_identity())
    }

    /// Check if a run is in progress.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Subscribe to notifications.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notification_tx.subscribe()
    }

    /// Subscribe to digital-signature records.
    pub fn subscribe_signatures(&self) -> broadcast::Receiver<SignatureRecord> {
        self.signature_tx.subscribe()
    }

    /// Subscribe to attribute snapshots.
    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<AttributeSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Stop the current run. Returns `false` if nothing was running or a
    /// stop was already requested.
    pub fn stop(&self) -> bool {
        match self.stop.read().as_ref() {
            Some(signal) => signal.stop(StopReason::External),
            None => false,
        }
    }

    /// Track a different device from the next run on.
    pub fn set_target_identity(&self, identity: DeviceIdentity) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        info!("Target identity set to {}", identity);
        self.store.register(&identity);
        self.config.write().target_identity = identity;
        Ok(())
    }

    /// Clear the attribute record of the current target.
    pub fn reset(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        let identity = self.target_identity();
        info!("Resetting attributes of {}", identity);
        self.store.clear(&identity);
        self.store.register(&identity);
        Ok(())
    }

    /// Run one session: wait for the trigger, capture until a stop reason
    /// is set, then stop capture and wind the workers down.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyRunning`] if a run is in progress; trigger and
    /// capture start failures are returned as is. Stream failures end the
    /// run with [`StopReason::StreamError`] instead.
    pub async fn run<T, C>(&self, trigger: &mut T, capture: &mut C) -> Result<SessionSummary>
    where
        T: TriggerSource + ?Sized,
        C: CaptureControl + ?Sized,
    {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        let stop = StopSignal::new();
        *self.stop.write() = Some(stop.clone());
        let _guard = RunGuard { pipeline: self };

        let config = self.config();
        let identity = config.target_identity.clone();
        let notifier = Notifier {
            tx: self.notification_tx.clone(),
        };
        let session = Session::new(identity.clone(), config.secret_key.clone());
        let session_id = session.id();
        self.store.register(&identity);

        info!("Session {} waiting for trigger", session_id);
        let trigger_event = tokio::select! {
            reason = stop.stopped() => {
                info!("Session {} stopped before trigger", session_id);
                return Ok(SessionSummary {
                    session_id,
                    reason,
                    packet_count: 0,
                    verified_count: 0,
                });
            }
            event = trigger.wait_for_release() => event?,
        };
        self.store
            .set_attribute(&identity, Attribute::ButtonReleaseTime(trigger_event.wall_clock));
        notifier.send("Scan started");

        let stream = capture.start().await?;
        info!("Session {} capturing for {}", session_id, identity);

        let (packet_tx, packet_rx) = mpsc::channel(config.queue_capacity.max(1));
        let packet_count = Arc::new(AtomicU64::new(0));

        let source = tokio::spawn(frame_source(
            stream,
            DeviceAcquirer::new(identity.clone()),
            packet_tx,
            notifier.clone(),
            stop.clone(),
        ));

        let processor = Processor {
            session,
            trigger: trigger_event,
            store: self.store.clone(),
            notifier: notifier.clone(),
            signature_tx: self.signature_tx.clone(),
            snapshot_tx: self.snapshot_tx.clone(),
            packet_count: packet_count.clone(),
            budget: config.packet_budget,
        };
        let processing = tokio::spawn(processor.run(packet_rx, stop.clone()));

        let watchdog = tokio::spawn(watchdog(
            packet_count,
            config.packet_budget,
            config.watchdog_interval,
            stop.clone(),
        ));

        let reason = stop.stopped().await;
        info!("Session {} stopping: {}", session_id, reason);

        if let Err(e) = capture.stop().await {
            warn!("Error stopping capture: {}", e);
            notifier.send(format!("Error stopping capture: {}", e));
        }

        let joined = tokio::join!(source, processing, watchdog);
        let session = joined
            .1
            .map_err(|e| Error::Internal(format!("processing worker failed: {}", e)))?;
        if let Err(e) = joined.0 {
            warn!("Frame source worker failed: {}", e);
        }
        if let Err(e) = joined.2 {
            warn!("Watchdog failed: {}", e);
        }

        let summary = SessionSummary {
            session_id,
            reason,
            packet_count: session.stats.packet_count(),
            verified_count: session.reassembler.success_count(),
        };
        notifier.send(format!(
            "Scan stopped: {} ({} packets, {} verified)",
            summary.reason, summary.packet_count, summary.verified_count
        ));
        Ok(summary)
    }
}

/// Read frames, keep the target's packets and queue them.
async fn frame_source(
    stream: CaptureStream,
    mut acquirer: DeviceAcquirer,
    tx: mpsc::Sender<AdvertisingPacket>,
    notifier: Notifier,
    stop: StopSignal,
) {
    let frames = FrameReader::new(stream).into_stream();
    futures::pin_mut!(frames);

    loop {
        let next = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            next = frames.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                error!("Capture stream failed: {}", e);
                notifier.send(format!("Capture stream failed: {}", e));
                stop.stop(StopReason::StreamError(e.to_string()));
                break;
            }
            None => {
                info!("Capture stream ended");
                break;
            }
        };

        let packet = match AdvertisingPacket::parse(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                trace!("Dropped frame: {}", frame.joined());
                notifier.send(format!("Dropped malformed frame: {}", e));
                continue;
            }
        };

        if let Acquisition::Rejected = acquirer.offer(&packet) {
            continue;
        }

        notifier.send(format!("Target device found {}", packet.source_address));
        notifier.send(format!("Event type: {}", packet.event_kind));
        notifier.send(format!("RSSI: {}", packet.rssi));
        notifier.send(format!(
            "Timestamp: {}",
            packet.received_at.with_timezone(&Local).format(TIME_FORMAT)
        ));
        notifier.send(format!("Advertising data: {}", packet.payload_hex));
        notifier.send(SEPARATOR);

        let sent = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            sent = tx.send(packet) => sent,
        };
        if sent.is_err() {
            debug!("Processor gone, frame source exiting");
            break;
        }
    }

    debug!("Frame source worker ended");
}

/// Stop with [`StopReason::PacketBudget`] once the count exceeds `budget`.
async fn watchdog(count: Arc<AtomicU64>, budget: u64, interval: Duration, stop: StopSignal) {
    let mut ticker = tokio::time::interval(interval.max(MIN_WATCHDOG_INTERVAL));
    loop {
        tokio::select! {
            biased;
            _ = stop.stopped() => break,
            _ = ticker.tick() => {}
        }

        let packets = count.load(Ordering::SeqCst);
        if packets > budget {
            info!("Packet budget of {} exceeded ({} packets)", budget, packets);
            stop.stop(StopReason::PacketBudget);
            break;
        }
    }
    debug!("Watchdog ended");
}

/// Sole owner of the session state.
struct Processor {
    session: Session,
    trigger: TriggerEvent,
    store: Arc<dyn AttributeStore>,
    notifier: Notifier,
    signature_tx: broadcast::Sender<SignatureRecord>,
    snapshot_tx: broadcast::Sender<AttributeSnapshot>,
    packet_count: Arc<AtomicU64>,
    budget: u64,
}

impl Processor {
    async fn run(mut self, mut rx: mpsc::Receiver<AdvertisingPacket>, stop: StopSignal) -> Session {
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                packet = rx.recv() => match packet {
                    Some(packet) => {
                        self.process(packet);
                        if self.session.stats.packet_count() > self.budget {
                            debug!("Packet budget reached, waiting for stop");
                            stop.stopped().await;
                            break;
                        }
                    }
                    None => {
                        stop.stop(StopReason::StreamEnded);
                        break;
                    }
                },
            }
        }
        debug!("Processing worker ended");
        self.session
    }

    fn set(&self, attribute: Attribute) {
        self.store
            .set_attribute(self.session.target_identity(), attribute);
    }

    fn process(&mut self, packet: AdvertisingPacket) {
        if self.session.lock_address(packet.source_address) {
            debug!("Session locked to {}", packet.source_address);
        }

        self.update_statistics(&packet);

        match Fragment::extract(&packet) {
            Ok(Some(fragment)) => {
                self.session.reassembler.accept(fragment);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Fragment rejected: {}", e);
                self.notifier.send(format!("Fragment rejected: {}", e));
            }
        }

        match self.session.reassembler.verify() {
            Ok(Some(verification)) => self.publish_verification(&verification),
            Ok(None) => {}
            Err(e) => {
                warn!("Verification failed: {}", e);
                self.notifier.send(format!("Verification failed: {}", e));
            }
        }

        if let Some(attributes) = self.store.get_all(self.session.target_identity()) {
            let _ = self.snapshot_tx.send(AttributeSnapshot {
                identity: self.session.target_identity().clone(),
                attributes,
            });
        }
    }

    fn update_statistics(&mut self, packet: &AdvertisingPacket) {
        let stats = &mut self.session.stats;
        stats.record(packet.rssi, packet.captured_at, self.trigger.at);
        self.packet_count
            .store(stats.packet_count(), Ordering::SeqCst);

        let stats = &self.session.stats;
        let mut updates = vec![
            Attribute::PacketCount(stats.packet_count()),
            Attribute::CompanyName(packet.company_name().to_string()),
        ];
        if stats.is_first_packet() {
            updates.push(Attribute::FirstPacketTime(packet.received_at));
            if let Some(gap) = stats.trigger_gap_secs() {
                updates.push(Attribute::TimeGap(gap));
            }
        }
        if let Some(rssi) = stats.average_rssi() {
            updates.push(Attribute::AverageRssi(rssi));
        }
        if let Some(frequency) = stats.average_frequency_hz() {
            updates.push(Attribute::AverageFrequency(frequency));
        }

        for update in updates {
            self.set(update);
        }
    }

    fn publish_verification(&mut self, verification: &Verification) {
        let record = SignatureRecord::from(verification);
        if !record.matched {
            self.notifier.send("Digital signature mismatch");
        }
        let _ = self.signature_tx.send(record);

        self.set(Attribute::SignatureMatched(verification.verified));
        self.set(Attribute::IntegritySuccessCount(
            self.session.reassembler.success_count(),
        ));

        let telemetry = match DecodedTelemetry::decode(&verification.message_hex) {
            Ok(telemetry) => telemetry,
            Err(e) => {
                warn!("Telemetry decode failed: {}", e);
                self.notifier.send(format!("Telemetry decode failed: {}", e));
                return;
            }
        };

        let errors = self.session.add_errors(telemetry.errors.failure_count());
        self.set(Attribute::PayloadVersion(telemetry.payload_version));
        if let Some(device_type) = telemetry.device_type {
            self.set(Attribute::DeviceType(device_type));
        }
        self.set(Attribute::FwVersion(telemetry.firmware_version));
        self.set(Attribute::DeviceId(telemetry.device_id));
        self.set(Attribute::TimeReference(telemetry.time_reference));
        self.set(Attribute::Temperature(telemetry.temperature));
        self.set(Attribute::EventOrdinal(telemetry.event_ordinal));
        self.set(Attribute::ErrorCount(errors));
        self.set(Attribute::ErrorMessage(telemetry.errors.describe()));
    }
}
