//! # Radio Driver State Machine
//!
//! `RadioDriver` is the radio HAL seen by the protocol stack. It tracks the
//! IDLE / RX / TX mode of a [`Transceiver`], arbitrates between reception and
//! transmission, and moves packet buffers between itself and its owner through
//! the callbacks registered at [`init`](RadioDriver::init).
//!
//! ## Modes
//!
//! ```text
//!            set_rx                     send_packet
//!   Idle ──────────────▶ Rx(cfg) ─────────────────────▶ Tx(resume = Rx(cfg))
//!    │ ▲                  │  ▲                              │
//!    │ └──── set_idle ────┘  └──── TransmissionDone ────────┘
//!    │
//!    └──── send_packet ───▶ Tx(resume = Idle) ── TransmissionDone ──▶ Idle
//! ```
//!
//! - TX preempts RX: `send_packet` aborts a reception in progress.
//! - RX never preempts TX: `set_rx` during TX only changes where the radio
//!   goes once the transmission is done, and so does `set_idle`.
//! - `is_idle` / `is_rx` report the commanded mode, `tx_busy` / `rx_busy` the
//!   hardware activity.
//!
//! ## Execution model
//!
//! Owner operations lock the driver state, arm the hardware and return. All
//! callbacks run on the event consumer ([`process_events`](RadioDriver::process_events)
//! or [`run_event_loop`](crate::radio::irq::run_event_loop)), never inside an
//! owner operation, and never while the state lock is held.
//!
//! ## Usage
//!
//! ```rust
//! use d7phy::radio::{event_channel, BufferPool, RadioCallbacks, RadioDriver, RxConfig};
//! use d7phy::radio::hal::{SimConfig, SimTransceiver};
//!
//! let (irq, queue) = event_channel(64);
//! let (sim, _air) = SimTransceiver::new(SimConfig::default(), irq.clone());
//! let radio = RadioDriver::new(sim, irq, queue);
//!
//! let pool = BufferPool::new(4, 255);
//! let (alloc_pool, release_pool) = (pool.clone(), pool.clone());
//! radio.init(
//!     RadioCallbacks::new()
//!         .on_alloc(move |len| alloc_pool.allocate(len))
//!         .on_release(move |buf| release_pool.recycle(buf))
//!         .on_rx(|buf| println!("received {} bytes", buf.len()))
//!         .on_tx(|_buf| println!("sent"))
//!         .on_rssi_valid(|rssi| println!("rssi {:?}", rssi.dbm())),
//! )?;
//!
//! radio.set_rx(RxConfig::default())?;
//! radio.process_events();
//! assert!(radio.rssi_valid());
//! # Ok::<(), d7phy::RadioError>(())
//! ```

use crate::error::{RadioError, SendError};
use crate::radio::channel::{RxConfig, TxConfig};
use crate::radio::config::DriverConfig;
use crate::radio::hal::Transceiver;
use crate::radio::irq::{EventQueue, IrqLine, RadioEvent, RxEpoch};
use crate::radio::lifecycle::{
    AttachOutcome, Handlers, Handoff, HandoffLedger, InboundLedger, RadioCallbacks,
};
use crate::radio::packet::{CrcStatus, PacketBuffer, RxMetadata};
use crate::radio::rssi::{RssiReading, RssiSampler};
use crate::util::logging::{log_packet_hex, LogThrottle};
use log::{debug, error, info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// Instantaneous radio mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Idle,
    Rx,
    Tx,
}

/// Mode to enter once the transmission in flight completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    Idle,
    Rx(RxConfig),
}

#[derive(Debug)]
enum RadioState {
    Idle,
    Rx(RxConfig),
    Tx {
        /// Settings actually applied by the transceiver
        applied: TxConfig,
        packet: PacketBuffer,
        resume: Resume,
    },
}

/// Driver counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadioStats {
    /// Packets handed to the receive callback
    pub packets_received: u64,
    /// Received packets whose CRC check failed
    pub packets_crc_error: u64,
    /// Receptions dropped (no buffer, undersized buffer, lost in hardware or in the event queue)
    pub rx_dropped: u64,
    /// Receptions abandoned by `set_idle`, `set_rx` or `send_packet`
    pub rx_aborted: u64,
    /// Transmissions completed
    pub packets_sent: u64,
    /// Hardware events lost to a full event queue
    pub events_dropped: u64,
}

/// Driver state guarded by the state lock
struct Core<T> {
    transceiver: T,
    initialized: bool,
    state: RadioState,
    epoch: RxEpoch,
    inbound: InboundLedger,
    rssi: RssiSampler,
    stats: RadioStats,
    max_packet_len: usize,
    drop_log: LogThrottle,
}

impl<T: Transceiver> Core<T> {
    fn ensure_initialized(&self) -> Result<(), RadioError> {
        if self.initialized {
            Ok(())
        } else {
            Err(RadioError::NotInitialized)
        }
    }

    /// Tune the receiver with a fresh epoch
    fn arm_rx(&mut self, cfg: RxConfig) -> Result<(), RadioError> {
        let epoch = self.epoch.next();
        self.transceiver.start_rx(&cfg, epoch)?;
        self.epoch = epoch;
        self.rssi.arm(epoch);
        debug!("RX armed on {:?} (epoch {})", cfg.channel_id, epoch.value());
        Ok(())
    }

    /// Abandon the reception in flight. True if a buffer now awaits release.
    fn abort_reception(&mut self) -> bool {
        let in_flight = self.inbound.in_flight();
        let pending_release = self.inbound.abort();
        if in_flight {
            self.stats.rx_aborted += 1;
            debug!("Reception aborted");
        }
        pending_release
    }

    fn listening_on(&self, epoch: RxEpoch) -> Option<RxConfig> {
        match self.state {
            RadioState::Rx(cfg) if epoch == self.epoch => Some(cfg),
            _ => None,
        }
    }

    fn note_drop(&mut self, reason: &str) {
        self.stats.rx_dropped += 1;
        if self.drop_log.allow() {
            match self.drop_log.take_suppressed() {
                0 => warn!("Dropping reception: {reason}"),
                n => warn!("Dropping reception: {reason} ({n} similar suppressed)"),
            }
        }
    }

    fn handle(&mut self, event: RadioEvent) -> Vec<Handoff> {
        if !self.initialized {
            debug!("Ignoring {} before init", event.name());
            return Vec::new();
        }

        match event {
            RadioEvent::PacketDetected {
                epoch,
                length,
                timestamp,
            } => {
                if self.listening_on(epoch).is_none() {
                    debug!("Ignoring stale PacketDetected (epoch {})", epoch.value());
                    return Vec::new();
                }
                if length == 0 || length > self.max_packet_len {
                    self.note_drop("length out of range");
                    return Vec::new();
                }
                let mut work = Vec::new();
                // the previous packet's completion never arrived
                if let Some(lost) = self.inbound.begin(epoch, length, timestamp) {
                    if let Some(buffer) = lost.buffer {
                        self.note_drop("completion lost");
                        work.push(Handoff::Release(buffer));
                    }
                }
                work.push(Handoff::Allocate { epoch, length });
                work
            }

            RadioEvent::PacketReceived {
                epoch,
                length,
                crc_status,
                lqi,
                rssi,
            } => {
                let Some(rx_cfg) = self.listening_on(epoch) else {
                    return Vec::new();
                };
                let Some(reception) = self.inbound.finish(epoch) else {
                    return Vec::new();
                };
                // no buffer: the drop was recorded at allocation time
                let Some(mut buffer) = reception.buffer else {
                    return Vec::new();
                };
                // a different packet than the one detected; its detection was lost
                if reception.length != length {
                    self.note_drop("completion does not match the detected packet");
                    return vec![Handoff::Release(buffer)];
                }

                if let Err(e) = self.transceiver.read_payload(buffer.rx_storage(length)) {
                    self.note_drop(&format!("payload read failed: {e}"));
                    return vec![Handoff::Release(buffer)];
                }
                buffer.complete_rx(
                    length,
                    RxMetadata {
                        timestamp: Some(reception.timestamp),
                        rx_cfg,
                        lqi,
                        rssi,
                        crc_status,
                    },
                );

                self.stats.packets_received += 1;
                if crc_status == CrcStatus::Invalid {
                    self.stats.packets_crc_error += 1;
                }
                log_packet_hex("RX", buffer.payload());
                vec![Handoff::Deliver(buffer)]
            }

            RadioEvent::ReceptionFailed { epoch } => match self.inbound.finish(epoch) {
                Some(reception) => {
                    self.note_drop("lost in hardware");
                    reception.buffer.map(Handoff::Release).into_iter().collect()
                }
                None => Vec::new(),
            },

            RadioEvent::TransmissionDone { timestamp } => {
                let (applied, mut packet, resume) =
                    match std::mem::replace(&mut self.state, RadioState::Idle) {
                        RadioState::Tx {
                            applied,
                            packet,
                            resume,
                        } => (applied, packet, resume),
                        other => {
                            self.state = other;
                            debug!("Ignoring TransmissionDone without a transmission");
                            return Vec::new();
                        }
                    };

                packet.complete_tx(applied, timestamp);
                self.stats.packets_sent += 1;

                match resume {
                    Resume::Rx(cfg) => match self.arm_rx(cfg) {
                        Ok(()) => self.state = RadioState::Rx(cfg),
                        Err(e) => {
                            error!("Failed to resume RX after TX: {e}");
                            if let Err(e) = self.transceiver.go_idle() {
                                error!("Failed to idle the radio: {e}");
                            }
                        }
                    },
                    Resume::Idle => {
                        if let Err(e) = self.transceiver.go_idle() {
                            error!("Failed to idle the radio after TX: {e}");
                        }
                    }
                }
                debug!("TX done, now {:?}", self.mode());
                vec![Handoff::Transmitted(packet)]
            }

            RadioEvent::RssiSettled { epoch } => {
                if self.listening_on(epoch).is_none() || !self.rssi.settle(epoch) {
                    return Vec::new();
                }
                vec![Handoff::RssiValid {
                    epoch,
                    reading: self.read_rssi(),
                }]
            }

            RadioEvent::ReceptionAborted => Vec::new(),
        }
    }

    fn read_rssi(&mut self) -> RssiReading {
        match self.transceiver.read_rssi() {
            Ok(dbm) => RssiReading::from_dbm(dbm),
            Err(e) => {
                warn!("RSSI read failed: {e}");
                RssiReading::INVALID
            }
        }
    }

    fn mode(&self) -> RadioMode {
        match self.state {
            RadioState::Idle => RadioMode::Idle,
            RadioState::Rx(_) => RadioMode::Rx,
            RadioState::Tx { .. } => RadioMode::Tx,
        }
    }
}

/// The state lock as seen by the handoff worklist
struct Bookkeeper<'a, T>(&'a Mutex<Core<T>>);

impl<T: Transceiver> HandoffLedger for Bookkeeper<'_, T> {
    fn attach(&mut self, epoch: RxEpoch, buffer: Option<PacketBuffer>) -> Option<Handoff> {
        let mut core = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let (outcome, handoff) = core.inbound.attach(epoch, buffer);
        match outcome {
            AttachOutcome::Attached | AttachOutcome::Stale => {}
            AttachOutcome::Dropped => core.note_drop("no buffer available"),
            AttachOutcome::Undersized => core.note_drop("allocated buffer too small"),
        }
        handoff
    }

    fn confirm_rssi(&mut self, epoch: RxEpoch) -> bool {
        let mut core = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        core.listening_on(epoch).is_some() && core.rssi.confirm(epoch)
    }
}

/// Radio HAL driver over a [`Transceiver`]
pub struct RadioDriver<T: Transceiver> {
    core: Mutex<Core<T>>,
    handlers: Mutex<Option<Handlers>>,
    queue: EventQueue,
    irq: IrqLine,
}

impl<T: Transceiver> RadioDriver<T> {
    /// Create a driver with the default configuration
    ///
    /// # Arguments
    /// * `transceiver` - silicon driver, raising its events on a clone of `irq`
    /// * `irq` / `queue` - the pair returned by [`event_channel`](crate::radio::irq::event_channel)
    pub fn new(transceiver: T, irq: IrqLine, queue: EventQueue) -> Self {
        Self::with_config(transceiver, irq, queue, &DriverConfig::default())
    }

    pub fn with_config(
        transceiver: T,
        irq: IrqLine,
        queue: EventQueue,
        config: &DriverConfig,
    ) -> Self {
        let max_packet_len = config.max_packet_len.min(transceiver.max_packet_len());
        Self {
            core: Mutex::new(Core {
                transceiver,
                initialized: false,
                state: RadioState::Idle,
                epoch: RxEpoch::default(),
                inbound: InboundLedger::default(),
                rssi: RssiSampler::default(),
                stats: RadioStats::default(),
                max_packet_len,
                drop_log: LogThrottle::new(config.drop_log_window_ms, config.drop_log_cap),
            }),
            handlers: Mutex::new(None),
            queue,
            irq,
        }
    }

    fn core(&self) -> MutexGuard<'_, Core<T>> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post a wake-up so buffers of an aborted reception are released promptly.
    /// A full queue is harmless: the consumer releases them before its next event.
    fn wake_consumer(&self) {
        if !self.irq.wake() {
            debug!("Event queue full, release deferred to the next event");
        }
    }

    /// Register the callbacks and bring the radio to IDLE
    ///
    /// # Returns
    /// * `Ok(())` - driver initialised, radio idle
    /// * `Err(RadioError::InvalidArgument)` - a callback is missing
    /// * `Err(RadioError::AlreadyInitialized)` - `init` already succeeded
    /// * `Err(RadioError::Failure)` - the transceiver could not be initialised
    pub fn init(&self, callbacks: RadioCallbacks) -> Result<(), RadioError> {
        let handlers = callbacks.into_handlers()?;
        // callbacks only run once initialised; bail out before touching their lock
        if self.core().initialized {
            return Err(RadioError::AlreadyInitialized);
        }

        // same lock order as the event consumer: handlers, then state
        let mut slot = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut core = self.core();
        if core.initialized {
            return Err(RadioError::AlreadyInitialized);
        }
        core.transceiver.init()?;
        *slot = Some(handlers);
        core.state = RadioState::Idle;
        core.initialized = true;
        info!("Radio driver initialised");
        Ok(())
    }

    /// Put the radio in IDLE mode
    ///
    /// A reception in progress is abandoned immediately. A transmission in
    /// progress completes first; the radio then goes idle instead of resuming RX.
    ///
    /// # Returns
    /// * `Ok(())` - the radio is (or will be after the current TX) idle
    /// * `Err(RadioError::AlreadyIdle)` - already commanded idle
    /// * `Err(RadioError::NotInitialized)`
    /// * `Err(RadioError::Failure)` - the transceiver refused
    pub fn set_idle(&self) -> Result<(), RadioError> {
        let mut core = self.core();
        core.ensure_initialized()?;

        match &mut core.state {
            RadioState::Idle | RadioState::Tx { resume: Resume::Idle, .. } => {
                return Err(RadioError::AlreadyIdle)
            }
            RadioState::Tx { resume, .. } => {
                *resume = Resume::Idle;
                debug!("IDLE requested during TX, applied after completion");
                return Ok(());
            }
            RadioState::Rx(_) => {}
        }

        core.transceiver.go_idle()?;
        let pending_release = core.abort_reception();
        core.rssi.invalidate();
        core.state = RadioState::Idle;
        drop(core);

        debug!("Radio idle");
        if pending_release {
            self.wake_consumer();
        }
        Ok(())
    }

    /// Commanded mode is IDLE (true right after `set_idle` even while a
    /// transmission is still completing)
    pub fn is_idle(&self) -> bool {
        matches!(
            self.core().state,
            RadioState::Idle | RadioState::Tx { resume: Resume::Idle, .. }
        )
    }

    /// Put the radio in RX mode with `cfg`
    ///
    /// Switching to a different configuration abandons a reception in progress.
    /// During a transmission the configuration is recorded and applied when it
    /// completes. Every RX entry invalidates the RSSI until the rssi-valid
    /// callback fires.
    ///
    /// # Returns
    /// * `Ok(())` - RX active (or will be after the current TX)
    /// * `Err(RadioError::AlreadyInThisMode)` - already in RX with `cfg`
    /// * `Err(RadioError::InvalidConfig)` - unsupported channel or syncword class
    /// * `Err(RadioError::NotInitialized)`
    /// * `Err(RadioError::Failure)` - the transceiver refused
    pub fn set_rx(&self, cfg: RxConfig) -> Result<(), RadioError> {
        let mut core = self.core();
        core.ensure_initialized()?;
        if !cfg.is_valid() {
            return Err(RadioError::InvalidConfig(format!(
                "unsupported RX config {cfg:?}"
            )));
        }

        match &mut core.state {
            RadioState::Rx(current) if *current == cfg => return Err(RadioError::AlreadyInThisMode),
            RadioState::Tx { resume, .. } => {
                if *resume == Resume::Rx(cfg) {
                    return Err(RadioError::AlreadyInThisMode);
                }
                *resume = Resume::Rx(cfg);
                debug!("RX requested during TX, applied after completion");
                return Ok(());
            }
            RadioState::Rx(_) | RadioState::Idle => {}
        }

        core.arm_rx(cfg)?;
        let pending_release = core.abort_reception();
        core.state = RadioState::Rx(cfg);
        drop(core);

        if pending_release {
            self.wake_consumer();
        }
        Ok(())
    }

    /// Commanded mode is RX
    pub fn is_rx(&self) -> bool {
        matches!(
            self.core().state,
            RadioState::Rx(_) | RadioState::Tx { resume: Resume::Rx(_), .. }
        )
    }

    /// The RX configuration the radio is (or will be, after TX) listening with
    pub fn rx_config(&self) -> Option<RxConfig> {
        match self.core().state {
            RadioState::Rx(cfg) | RadioState::Tx { resume: Resume::Rx(cfg), .. } => Some(cfg),
            _ => None,
        }
    }

    /// Start transmitting `packet` with the TX settings in its metadata
    ///
    /// On success the driver owns `packet` until the transmit-complete callback
    /// hands it back; that callback never fires inside this call. A reception
    /// in progress is aborted. On error nothing changed and the packet is
    /// returned inside the [`SendError`].
    ///
    /// # Returns
    /// * `Ok(())` - transmission started
    /// * `Err` with `InvalidConfig` - no TX metadata, or unsupported channel /
    ///   syncword class / EIRP outside [-39, +10] dBm
    /// * `Err` with `SizeError` - empty or longer than the maximum packet length
    /// * `Err` with `Busy` - a transmission is already in flight
    /// * `Err` with `NotInitialized` / `Failure`
    pub fn send_packet(&self, packet: PacketBuffer) -> Result<(), SendError> {
        let mut core = self.core();
        if let Err(e) = core.ensure_initialized() {
            return Err(SendError::new(e, packet));
        }

        let Some(cfg) = packet.tx_meta().map(|meta| meta.tx_cfg) else {
            return Err(SendError::new(
                RadioError::InvalidConfig("packet carries no TX settings".to_string()),
                packet,
            ));
        };
        if let Some(reason) = cfg.rejection() {
            return Err(SendError::new(RadioError::InvalidConfig(reason), packet));
        }
        let max = core.max_packet_len;
        if packet.is_empty() || packet.len() > max {
            let length = packet.len();
            return Err(SendError::new(RadioError::SizeError { length, max }, packet));
        }

        let resume = match core.state {
            RadioState::Tx { .. } => return Err(SendError::new(RadioError::Busy, packet)),
            RadioState::Rx(rx_cfg) => Resume::Rx(rx_cfg),
            RadioState::Idle => Resume::Idle,
        };

        let applied = TxConfig {
            eirp: core.transceiver.nearest_eirp(cfg.eirp),
            ..cfg
        };
        if let Err(e) = core.transceiver.start_tx(packet.payload(), &applied) {
            return Err(SendError::new(e.into(), packet));
        }

        let pending_release = core.abort_reception();
        core.rssi.invalidate();
        debug!(
            "TX started: {} bytes at {} dBm, resume {:?}",
            packet.len(),
            applied.eirp,
            resume
        );
        log_packet_hex("TX", packet.payload());
        core.state = RadioState::Tx {
            applied,
            packet,
            resume,
        };
        drop(core);

        if pending_release {
            self.wake_consumer();
        }
        Ok(())
    }

    /// A transmission is in flight
    pub fn tx_busy(&self) -> bool {
        matches!(self.core().state, RadioState::Tx { .. })
    }

    /// A reception is in flight
    pub fn rx_busy(&self) -> bool {
        self.core().inbound.in_flight()
    }

    /// Instantaneous mode of the radio
    pub fn mode(&self) -> RadioMode {
        self.core().mode()
    }

    /// The RSSI reading is valid for the current RX configuration
    pub fn rssi_valid(&self) -> bool {
        self.core().rssi.is_valid()
    }

    /// Current channel RSSI, or `RssiReading::INVALID` until the rssi-valid
    /// callback is dispatched for the current RX configuration.
    ///
    /// The reading turns valid on the event consumer immediately before that
    /// callback runs, never earlier.
    ///
    /// Does not interrupt a reception in progress.
    pub fn measure_rssi(&self) -> RssiReading {
        let mut core = self.core();
        if !core.rssi.is_valid() {
            return RssiReading::INVALID;
        }
        core.read_rssi()
    }

    pub fn stats(&self) -> RadioStats {
        let mut stats = self.core().stats;
        stats.events_dropped = self.irq.stats().events_dropped;
        stats
    }

    pub(crate) fn event_queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Drain every pending hardware event, invoking callbacks as they fall due
    ///
    /// Returns the number of events handled. Returns 0 without doing anything
    /// if another consumer is active (the event loop task, or a drain further up
    /// the stack when called from inside a callback).
    pub fn process_events(&self) -> usize {
        let Some(mut rx) = self.queue.try_consumer() else {
            debug!("Event queue already being consumed");
            return 0;
        };
        let mut handlers = match self.handlers.try_lock() {
            Ok(handlers) => handlers,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return 0,
        };

        self.dispatch(&mut handlers, None);
        let mut processed = 0;
        while let Ok(event) = rx.try_recv() {
            self.dispatch(&mut handlers, Some(event));
            processed += 1;
        }
        processed
    }

    /// Handle one event taken off the queue by the event loop
    pub(crate) fn handle_event(&self, event: RadioEvent) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        self.dispatch(&mut handlers, Some(event));
    }

    /// Apply an event to the state machine, then run the resulting callbacks
    /// without holding the state lock. Aborted receptions are released first.
    fn dispatch(&self, handlers: &mut Option<Handlers>, event: Option<RadioEvent>) {
        let work = {
            let mut core = self.core();
            let mut work = core.inbound.drain_aborted();
            if let Some(event) = event {
                work.extend(core.handle(event));
            }
            work
        };
        if work.is_empty() {
            return;
        }

        match handlers.as_mut() {
            Some(handlers) => handlers.run(work, &mut Bookkeeper(&self.core)),
            None => warn!("Dropping {} callbacks: driver not initialised", work.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::channel::{ChannelBand, ChannelClass, ChannelCoding, ChannelId};
    use crate::radio::hal::{SimConfig, SimController, SimTransceiver};
    use crate::radio::irq::event_channel;
    use crate::radio::pool::BufferPool;
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<PacketBuffer>>>;

    fn rx_cfg(index: u8) -> RxConfig {
        RxConfig::new(
            ChannelId::new(ChannelCoding::Pn9, ChannelClass::NormalRate, ChannelBand::Band868, index),
            0,
        )
    }

    fn setup() -> (RadioDriver<SimTransceiver>, SimController, BufferPool, Received) {
        let (irq, queue) = event_channel(32);
        let (sim, air) = SimTransceiver::new(SimConfig::default(), irq.clone());
        let radio = RadioDriver::new(sim, irq, queue);
        let pool = BufferPool::new(2, 64);
        let received: Received = Arc::default();

        let (p1, p2, p3) = (pool.clone(), pool.clone(), pool.clone());
        let rx = received.clone();
        radio
            .init(
                RadioCallbacks::new()
                    .on_alloc(move |len| p1.allocate(len))
                    .on_release(move |buf| p2.recycle(buf))
                    .on_rx(move |buf| rx.lock().unwrap().push(buf))
                    .on_tx(move |buf| p3.recycle(buf))
                    .on_rssi_valid(|_| {}),
            )
            .unwrap();
        (radio, air, pool, received)
    }

    #[test]
    fn test_operations_before_init() {
        let (irq, queue) = event_channel(4);
        let (sim, _air) = SimTransceiver::new(SimConfig::default(), irq.clone());
        let radio = RadioDriver::new(sim, irq, queue);

        assert_eq!(radio.set_idle(), Err(RadioError::NotInitialized));
        assert_eq!(radio.set_rx(rx_cfg(0)), Err(RadioError::NotInitialized));
        let err = radio
            .send_packet(PacketBuffer::outbound(TxConfig::default(), &[1]))
            .unwrap_err();
        assert_eq!(err.kind, RadioError::NotInitialized);
        assert_eq!(err.into_packet().payload(), &[1]);
    }

    #[test]
    fn test_set_rx_then_same_config() {
        let (radio, _air, _pool, _rx) = setup();
        radio.set_rx(rx_cfg(0)).unwrap();
        assert!(radio.is_rx());
        assert!(!radio.is_idle());
        assert_eq!(radio.set_rx(rx_cfg(0)), Err(RadioError::AlreadyInThisMode));
        assert_eq!(radio.mode(), RadioMode::Rx);
    }

    #[test]
    fn test_set_idle_is_idempotent() {
        let (radio, _air, _pool, _rx) = setup();
        assert_eq!(radio.set_idle(), Err(RadioError::AlreadyIdle));
        radio.set_rx(rx_cfg(0)).unwrap();
        assert_eq!(radio.set_idle(), Ok(()));
        assert_eq!(radio.set_idle(), Err(RadioError::AlreadyIdle));
    }

    #[test]
    fn test_reception_delivered_with_metadata() {
        let (radio, air, pool, received) = setup();
        radio.set_rx(rx_cfg(3)).unwrap();
        radio.process_events();

        assert!(air.inject(&[1, 2, 3, 4], -72.0));
        radio.process_events();

        let packets = received.lock().unwrap();
        assert_eq!(packets.len(), 1);
        let meta = packets[0].rx_meta().unwrap();
        assert_eq!(packets[0].payload(), &[1, 2, 3, 4]);
        assert_eq!(meta.rx_cfg, rx_cfg(3));
        assert_eq!(meta.rssi, -72);
        assert_eq!(meta.crc_status, CrcStatus::Valid);
        assert!(meta.timestamp.is_some());
        assert_eq!(pool.outstanding(), 1);
        assert!(!radio.rx_busy());
    }

    #[test]
    fn test_idle_aborts_reception_and_releases() {
        let (radio, air, pool, received) = setup();
        radio.set_rx(rx_cfg(0)).unwrap();
        air.begin_reception(&[9; 10], -80.0);
        radio.process_events();
        assert!(radio.rx_busy());
        assert_eq!(pool.outstanding(), 1);

        radio.set_idle().unwrap();
        assert!(!radio.rx_busy());
        radio.process_events();
        assert_eq!(pool.outstanding(), 0);
        assert!(received.lock().unwrap().is_empty());
        assert_eq!(radio.stats().rx_aborted, 1);
    }

    #[test]
    fn test_tx_priority_and_restore() {
        let (radio, air, pool, _received) = setup();
        radio.set_rx(rx_cfg(1)).unwrap();
        air.begin_reception(&[7; 5], -80.0);
        radio.process_events();

        let packet = PacketBuffer::outbound(TxConfig::new(rx_cfg(1).channel_id, 0, 0), &[0xAA; 8]);
        radio.send_packet(packet).unwrap();
        assert!(radio.tx_busy());
        assert!(radio.is_rx());
        assert_eq!(radio.mode(), RadioMode::Tx);

        radio.process_events();
        assert!(!radio.tx_busy());
        assert_eq!(radio.mode(), RadioMode::Rx);
        assert_eq!(radio.rx_config(), Some(rx_cfg(1)));
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(radio.stats().packets_sent, 1);
    }

    #[test]
    fn test_send_while_busy_is_rejected() {
        let (irq, queue) = event_channel(8);
        let config = SimConfig {
            auto_complete_tx: false,
            ..SimConfig::default()
        };
        let (sim, _air) = SimTransceiver::new(config, irq.clone());
        let radio = RadioDriver::new(sim, irq, queue);
        radio
            .init(
                RadioCallbacks::new()
                    .on_alloc(|_| None)
                    .on_release(|_| {})
                    .on_rx(|_| {})
                    .on_tx(|_| {})
                    .on_rssi_valid(|_| {}),
            )
            .unwrap();

        radio
            .send_packet(PacketBuffer::outbound(TxConfig::default(), &[1]))
            .unwrap();
        let err = radio
            .send_packet(PacketBuffer::outbound(TxConfig::default(), &[2]))
            .unwrap_err();
        assert_eq!(err.kind, RadioError::Busy);
    }
}
