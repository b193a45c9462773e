//! # Simulated Transceiver
//!
//! A host-side stand-in for the radio silicon. `SimTransceiver` implements
//! [`Transceiver`] and is moved into the driver; the paired `SimController`
//! plays the air and the interrupt line: it puts packets on the channel,
//! completes transmissions and settles the RSSI, raising the same events a
//! silicon driver would.
//!
//! Received frames carry a CRC-16 (CCITT-FALSE) computed when the packet is put
//! on the air and checked when it completes, so corrupted packets surface as
//! `CrcStatus::Invalid`. With `hardware_crc` disabled every packet is reported
//! as `CrcStatus::Unavailable`.
//!
//! ```rust
//! use d7phy::radio::event_channel;
//! use d7phy::radio::hal::{SimConfig, SimTransceiver, Transceiver};
//! use d7phy::radio::RxConfig;
//! use d7phy::radio::irq::RxEpoch;
//!
//! let (irq, _queue) = event_channel(8);
//! let (mut sim, air) = SimTransceiver::new(SimConfig::default(), irq);
//! sim.init().unwrap();
//! sim.start_rx(&RxConfig::default(), RxEpoch::default().next()).unwrap();
//! assert!(air.is_listening());
//! assert!(air.inject(&[0xD7, 0x01], -70.0));
//! ```

use super::{Transceiver, TransceiverError};
use crate::radio::channel::{RxConfig, TxConfig, EIRP_MAX_DBM, EIRP_MIN_DBM};
use crate::radio::irq::{IrqLine, RadioEvent, RxEpoch};
use crate::radio::packet::CrcStatus;
use bitflags::bitflags;
use crc::{Crc, CRC_16_IBM_3740};
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

const FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

bitflags! {
    /// Operations the simulated silicon fails on purpose
    ///
    /// ```rust
    /// use d7phy::radio::hal::SimFaults;
    ///
    /// let faults = SimFaults::START_TX | SimFaults::READ_RSSI;
    /// assert!(faults.contains(SimFaults::START_TX));
    /// ```
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct SimFaults: u8 {
        const INIT         = 0b0000_0001;
        const START_RX     = 0b0000_0010;
        const START_TX     = 0b0000_0100;
        const GO_IDLE      = 0b0000_1000;
        const READ_PAYLOAD = 0b0001_0000;
        const READ_RSSI    = 0b0010_0000;
    }
}

/// Behaviour of the simulated channel and silicon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Channel level reported while nothing is being received
    pub noise_floor_dbm: f32,
    /// Uniform jitter applied around the noise floor
    pub noise_jitter_db: f32,
    /// Raise `RssiSettled` as soon as RX is armed
    pub auto_settle: bool,
    /// Raise `TransmissionDone` as soon as a transmission starts
    pub auto_complete_tx: bool,
    /// Check frame CRCs; otherwise report `CrcStatus::Unavailable`
    pub hardware_crc: bool,
    /// PA step size in dB, counted from the lowest supported EIRP
    pub eirp_step_db: u8,
    /// Seed of the noise generator
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            noise_floor_dbm: -110.0,
            noise_jitter_db: 2.0,
            auto_settle: true,
            auto_complete_tx: true,
            hardware_crc: true,
            eirp_step_db: 1,
            seed: 0xD7,
        }
    }
}

/// A packet the simulated silicon put on the air
#[derive(Debug, Clone, PartialEq)]
pub struct SimTransmission {
    pub payload: Vec<u8>,
    /// Settings the driver applied
    pub cfg: TxConfig,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SimMode {
    Off,
    Idle,
    Listening { cfg: RxConfig, epoch: RxEpoch },
    Transmitting,
}

#[derive(Debug)]
struct PendingFrame {
    epoch: RxEpoch,
    /// Payload followed by its CRC, as seen on the air
    frame: Vec<u8>,
    rssi_dbm: f32,
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    mode: SimMode,
    pending: Option<PendingFrame>,
    fifo: Option<Vec<u8>>,
    transmitted: Vec<SimTransmission>,
    faults: SimFaults,
    rng: StdRng,
}

impl SimState {
    fn check(&self, fault: SimFaults, op: &'static str) -> Result<(), TransceiverError> {
        if self.faults.contains(fault) {
            debug!("Simulated fault in {op}");
            Err(TransceiverError::Failed(op))
        } else {
            Ok(())
        }
    }

    fn ready(&self, op: &'static str) -> Result<(), TransceiverError> {
        if self.mode == SimMode::Off {
            Err(TransceiverError::Failed(op))
        } else {
            Ok(())
        }
    }

    fn noise(&mut self) -> f32 {
        let jitter = self.config.noise_jitter_db.abs();
        if jitter == 0.0 {
            self.config.noise_floor_dbm
        } else {
            self.config.noise_floor_dbm + self.rng.gen_range(-jitter..=jitter)
        }
    }

    /// Anything the receiver held is lost when the mode changes
    fn flush_receiver(&mut self) {
        self.pending = None;
        self.fifo = None;
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// LQI derived from the signal margin over the noise floor
fn link_quality(rssi_dbm: f32, noise_floor_dbm: f32) -> u8 {
    ((rssi_dbm - noise_floor_dbm) * 4.0).clamp(0.0, 255.0) as u8
}

/// Simulated radio silicon
#[derive(Debug)]
pub struct SimTransceiver {
    state: Arc<Mutex<SimState>>,
    irq: IrqLine,
}

/// Test-side handle driving the simulated channel
#[derive(Debug, Clone)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
    irq: IrqLine,
}

impl SimTransceiver {
    /// Create the transceiver and its controller, both raising events on `irq`
    pub fn new(config: SimConfig, irq: IrqLine) -> (SimTransceiver, SimController) {
        let rng = StdRng::seed_from_u64(config.seed);
        let state = Arc::new(Mutex::new(SimState {
            config,
            mode: SimMode::Off,
            pending: None,
            fifo: None,
            transmitted: Vec::new(),
            faults: SimFaults::empty(),
            rng,
        }));
        (
            SimTransceiver {
                state: Arc::clone(&state),
                irq: irq.clone(),
            },
            SimController { state, irq },
        )
    }
}

impl Transceiver for SimTransceiver {
    fn init(&mut self) -> Result<(), TransceiverError> {
        let mut state = lock(&self.state);
        state.check(SimFaults::INIT, "init")?;
        state.mode = SimMode::Idle;
        state.flush_receiver();
        debug!("Simulated transceiver initialised");
        Ok(())
    }

    fn start_rx(&mut self, cfg: &RxConfig, epoch: RxEpoch) -> Result<(), TransceiverError> {
        let mut state = lock(&self.state);
        state.ready("start_rx")?;
        state.check(SimFaults::START_RX, "start_rx")?;
        state.flush_receiver();
        state.mode = SimMode::Listening { cfg: *cfg, epoch };
        trace!("Simulated RX on header 0x{:02X}", cfg.channel_id.header());

        if state.config.auto_settle {
            drop(state);
            let _ = self.irq.raise(RadioEvent::RssiSettled { epoch });
        }
        Ok(())
    }

    fn go_idle(&mut self) -> Result<(), TransceiverError> {
        let mut state = lock(&self.state);
        state.ready("go_idle")?;
        state.check(SimFaults::GO_IDLE, "go_idle")?;
        state.flush_receiver();
        state.mode = SimMode::Idle;
        Ok(())
    }

    fn start_tx(&mut self, payload: &[u8], cfg: &TxConfig) -> Result<(), TransceiverError> {
        let mut state = lock(&self.state);
        state.ready("start_tx")?;
        state.check(SimFaults::START_TX, "start_tx")?;
        if state.mode == SimMode::Transmitting {
            return Err(TransceiverError::Failed("start_tx"));
        }
        state.flush_receiver();
        state.transmitted.push(SimTransmission {
            payload: payload.to_vec(),
            cfg: *cfg,
        });

        if state.config.auto_complete_tx {
            state.mode = SimMode::Idle;
            drop(state);
            let _ = self.irq.raise(RadioEvent::TransmissionDone {
                timestamp: Instant::now(),
            });
        } else {
            state.mode = SimMode::Transmitting;
        }
        Ok(())
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), TransceiverError> {
        let mut state = lock(&self.state);
        state.check(SimFaults::READ_PAYLOAD, "read_payload")?;
        let fifo = state.fifo.take().ok_or(TransceiverError::NoPacket)?;
        if buf.len() > fifo.len() {
            return Err(TransceiverError::NoPacket);
        }
        buf.copy_from_slice(&fifo[..buf.len()]);
        Ok(())
    }

    fn read_rssi(&mut self) -> Result<f32, TransceiverError> {
        let mut state = lock(&self.state);
        state.check(SimFaults::READ_RSSI, "read_rssi")?;
        if !matches!(state.mode, SimMode::Listening { .. }) {
            return Err(TransceiverError::Failed("read_rssi"));
        }
        let on_air = state.pending.as_ref().map(|frame| frame.rssi_dbm);
        Ok(on_air.unwrap_or_else(|| state.noise()))
    }

    fn nearest_eirp(&self, requested: i8) -> i8 {
        let step = i16::from(lock(&self.state).config.eirp_step_db.max(1));
        let offset = i16::from(requested) - i16::from(EIRP_MIN_DBM);
        let snapped = i16::from(EIRP_MIN_DBM) + (offset + step / 2) / step * step;
        snapped.clamp(i16::from(EIRP_MIN_DBM), i16::from(EIRP_MAX_DBM)) as i8
    }
}

impl SimController {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock(&self.state)
    }

    /// A packet starts on the air. Raises `PacketDetected` if the receiver is
    /// listening and idle; false otherwise.
    pub fn begin_reception(&self, payload: &[u8], rssi_dbm: f32) -> bool {
        self.begin(payload, rssi_dbm, false)
    }

    fn begin(&self, payload: &[u8], rssi_dbm: f32, corrupt: bool) -> bool {
        let mut state = self.lock();
        let SimMode::Listening { epoch, .. } = state.mode else {
            return false;
        };
        if state.pending.is_some() {
            return false;
        }

        let mut frame = payload.to_vec();
        frame.extend_from_slice(&FRAME_CRC.checksum(payload).to_be_bytes());
        if corrupt {
            if let Some(byte) = frame.first_mut() {
                *byte ^= 0x01;
            }
        }
        state.pending = Some(PendingFrame {
            epoch,
            frame,
            rssi_dbm,
        });
        drop(state);

        self.irq
            .raise(RadioEvent::PacketDetected {
                epoch,
                length: payload.len(),
                timestamp: Instant::now(),
            })
            .is_ok()
    }

    /// The packet on the air ends. The payload moves to the FIFO and
    /// `PacketReceived` is raised; false if no reception is in progress.
    pub fn complete_reception(&self) -> bool {
        let mut state = self.lock();
        let Some(pending) = state.pending.take() else {
            return false;
        };

        let mut frame = pending.frame;
        let crc_offset = frame.len().saturating_sub(2);
        let received_crc = u16::from_be_bytes([frame[crc_offset], frame[crc_offset + 1]]);
        frame.truncate(crc_offset);

        let crc_status = if !state.config.hardware_crc {
            CrcStatus::Unavailable
        } else if FRAME_CRC.checksum(&frame) == received_crc {
            CrcStatus::Valid
        } else {
            CrcStatus::Invalid
        };
        let lqi = link_quality(pending.rssi_dbm, state.config.noise_floor_dbm);
        let rssi = pending.rssi_dbm.round() as i16;
        let length = frame.len();
        state.fifo = Some(frame);
        drop(state);

        self.irq
            .raise(RadioEvent::PacketReceived {
                epoch: pending.epoch,
                length,
                crc_status,
                lqi,
                rssi,
            })
            .is_ok()
    }

    /// Receive a whole packet
    pub fn inject(&self, payload: &[u8], rssi_dbm: f32) -> bool {
        self.begin(payload, rssi_dbm, false) && self.complete_reception()
    }

    /// Receive a whole packet damaged on the air
    pub fn inject_corrupted(&self, payload: &[u8], rssi_dbm: f32) -> bool {
        self.begin(payload, rssi_dbm, true) && self.complete_reception()
    }

    /// The packet on the air is lost (sync lost, header error)
    pub fn fail_reception(&self) -> bool {
        let Some(pending) = self.lock().pending.take() else {
            return false;
        };
        self.irq
            .raise(RadioEvent::ReceptionFailed {
                epoch: pending.epoch,
            })
            .is_ok()
    }

    /// Raise `RssiSettled` for the current RX arm
    pub fn settle_rssi(&self) -> bool {
        let SimMode::Listening { epoch, .. } = self.lock().mode else {
            return false;
        };
        self.irq.raise(RadioEvent::RssiSettled { epoch }).is_ok()
    }

    /// Finish the transmission in flight (with `auto_complete_tx` disabled)
    pub fn complete_transmission(&self) -> bool {
        let mut state = self.lock();
        if state.mode != SimMode::Transmitting {
            return false;
        }
        state.mode = SimMode::Idle;
        drop(state);
        self.irq
            .raise(RadioEvent::TransmissionDone {
                timestamp: Instant::now(),
            })
            .is_ok()
    }

    /// Everything transmitted so far
    pub fn transmitted(&self) -> Vec<SimTransmission> {
        self.lock().transmitted.clone()
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.lock().mode, SimMode::Listening { .. })
    }

    pub fn is_transmitting(&self) -> bool {
        self.lock().mode == SimMode::Transmitting
    }

    pub fn listening_config(&self) -> Option<RxConfig> {
        match self.lock().mode {
            SimMode::Listening { cfg, .. } => Some(cfg),
            _ => None,
        }
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.lock().faults = faults;
    }

    pub fn set_noise_floor(&self, dbm: f32) {
        self.lock().config.noise_floor_dbm = dbm;
    }
}
