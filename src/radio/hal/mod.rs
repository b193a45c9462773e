//! # Hardware Abstraction Layer for Radio Silicon
//!
//! This module defines the `Transceiver` trait a silicon driver implements so
//! the radio state machine can run on top of it, and provides a simulated
//! implementation for hosts without a radio.
//!
//! Every `Transceiver` method arms hardware and returns. Completion is reported
//! by raising a [`RadioEvent`](crate::radio::irq::RadioEvent) on the
//! [`IrqLine`](crate::radio::irq::IrqLine) handed to the implementation.

use crate::radio::channel::{RxConfig, TxConfig};
use crate::radio::irq::RxEpoch;
use crate::radio::packet::MAX_PACKET_LEN;
use thiserror::Error;

/// Errors that can occur during transceiver operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransceiverError {
    /// The named operation could not be carried out
    #[error("{0} failed")]
    Failed(&'static str),

    #[error("No packet available in the RX FIFO")]
    NoPacket,
}

/// Operations the radio state machine needs from the silicon
pub trait Transceiver: Send {
    /// Reset the silicon to a known idle state
    fn init(&mut self) -> Result<(), TransceiverError>;

    /// Tune to `cfg` and start scanning the channel.
    ///
    /// Reception and RSSI events for this arm must carry `epoch` so events from
    /// an earlier arm can be told apart.
    fn start_rx(&mut self, cfg: &RxConfig, epoch: RxEpoch) -> Result<(), TransceiverError>;

    /// Disable the receiver, dropping any reception in progress
    fn go_idle(&mut self) -> Result<(), TransceiverError>;

    /// Start transmitting `payload`. Must not wait for the transmission to end.
    fn start_tx(&mut self, payload: &[u8], cfg: &TxConfig) -> Result<(), TransceiverError>;

    /// Copy the packet announced by the last reception event into `buf`
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), TransceiverError>;

    /// Current channel RSSI in dBm
    fn read_rssi(&mut self) -> Result<f32, TransceiverError>;

    /// Nearest transmit power the PA can produce for `requested` dBm
    fn nearest_eirp(&self, requested: i8) -> i8 {
        requested
    }

    fn max_packet_len(&self) -> usize {
        MAX_PACKET_LEN
    }
}

impl<T: Transceiver + ?Sized> Transceiver for Box<T> {
    fn init(&mut self) -> Result<(), TransceiverError> {
        (**self).init()
    }

    fn start_rx(&mut self, cfg: &RxConfig, epoch: RxEpoch) -> Result<(), TransceiverError> {
        (**self).start_rx(cfg, epoch)
    }

    fn go_idle(&mut self) -> Result<(), TransceiverError> {
        (**self).go_idle()
    }

    fn start_tx(&mut self, payload: &[u8], cfg: &TxConfig) -> Result<(), TransceiverError> {
        (**self).start_tx(payload, cfg)
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), TransceiverError> {
        (**self).read_payload(buf)
    }

    fn read_rssi(&mut self) -> Result<f32, TransceiverError> {
        (**self).read_rssi()
    }

    fn nearest_eirp(&self, requested: i8) -> i8 {
        (**self).nearest_eirp(requested)
    }

    fn max_packet_len(&self) -> usize {
        (**self).max_packet_len()
    }
}

// Simulated transceiver
pub mod sim;

pub use sim::{SimConfig, SimController, SimFaults, SimTransceiver, SimTransmission};
