//! # PHY Packet Buffer
//!
//! A `PacketBuffer` is a length-prefixed byte buffer that carries either the
//! metadata collected on reception or the settings used for transmission. The
//! role is a tagged variant: a buffer is inbound or outbound, never both.
//!
//! Buffers move by value. Whoever holds the `PacketBuffer` owns it; the driver
//! takes ownership on allocation and on `send_packet`, and gives it back through
//! the release, receive-complete and transmit-complete callbacks.

use crate::radio::channel::{RxConfig, TxConfig};
use std::time::Instant;

/// Largest packet the length field can describe
pub const MAX_PACKET_LEN: usize = u8::MAX as usize;

/// Result of the hardware CRC check on a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrcStatus {
    Valid,
    Invalid,
    /// The transceiver does not check CRCs in hardware
    #[default]
    Unavailable,
}

/// Metadata attached to a received packet
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RxMetadata {
    /// Time at which the packet was detected
    pub timestamp: Option<Instant>,
    /// RX configuration the packet was received with
    pub rx_cfg: RxConfig,
    /// Link quality indicator reported by the radio
    pub lqi: u8,
    /// Received signal strength of the packet in dBm
    pub rssi: i16,
    pub crc_status: CrcStatus,
}

/// Settings and metadata of a packet to transmit / that has been transmitted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxMetadata {
    /// Time at which the transmission completed
    pub timestamp: Option<Instant>,
    /// TX configuration; after transmission it holds the settings actually applied
    pub tx_cfg: TxConfig,
}

impl TxMetadata {
    pub fn new(tx_cfg: TxConfig) -> Self {
        Self {
            timestamp: None,
            tx_cfg,
        }
    }
}

/// Role-specific metadata of a packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketMeta {
    Inbound(RxMetadata),
    Outbound(TxMetadata),
}

/// A PHY packet buffer
#[derive(Debug, PartialEq)]
pub struct PacketBuffer {
    meta: PacketMeta,
    length: usize,
    data: Box<[u8]>,
}

impl PacketBuffer {
    /// Empty inbound buffer able to hold `capacity` payload bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            meta: PacketMeta::Inbound(RxMetadata::default()),
            length: 0,
            data: vec![0u8; capacity].into_boxed_slice(),
        }
    }

    /// Outbound buffer holding `payload`, ready for `send_packet`
    pub fn outbound(tx_cfg: TxConfig, payload: &[u8]) -> Self {
        let mut packet = Self::with_capacity(payload.len());
        packet.data.copy_from_slice(payload);
        packet.length = payload.len();
        packet.meta = PacketMeta::Outbound(TxMetadata::new(tx_cfg));
        packet
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Payload bytes (the first `len()` bytes of the buffer)
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Replace the payload. Fails if `payload` exceeds the capacity.
    pub fn set_payload(&mut self, payload: &[u8]) -> Result<(), usize> {
        if payload.len() > self.capacity() {
            return Err(self.capacity());
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.length = payload.len();
        Ok(())
    }

    pub fn meta(&self) -> &PacketMeta {
        &self.meta
    }

    pub fn rx_meta(&self) -> Option<&RxMetadata> {
        match &self.meta {
            PacketMeta::Inbound(meta) => Some(meta),
            PacketMeta::Outbound(_) => None,
        }
    }

    pub fn tx_meta(&self) -> Option<&TxMetadata> {
        match &self.meta {
            PacketMeta::Outbound(meta) => Some(meta),
            PacketMeta::Inbound(_) => None,
        }
    }

    /// Switch the buffer to the outbound role with the given settings
    pub fn prepare_tx(&mut self, tx_cfg: TxConfig) {
        self.meta = PacketMeta::Outbound(TxMetadata::new(tx_cfg));
    }

    /// Reset to an empty inbound buffer, keeping the storage
    pub fn clear(&mut self) {
        self.meta = PacketMeta::Inbound(RxMetadata::default());
        self.length = 0;
    }

    /// Storage for `length` received bytes; the length is set when the driver
    /// fills the buffer.
    pub(crate) fn rx_storage(&mut self, length: usize) -> &mut [u8] {
        &mut self.data[..length]
    }

    pub(crate) fn complete_rx(&mut self, length: usize, meta: RxMetadata) {
        self.length = length;
        self.meta = PacketMeta::Inbound(meta);
    }

    pub(crate) fn complete_tx(&mut self, applied: TxConfig, timestamp: Instant) {
        self.meta = PacketMeta::Outbound(TxMetadata {
            timestamp: Some(timestamp),
            tx_cfg: applied,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_capacity_is_inbound_and_empty() {
        let packet = PacketBuffer::with_capacity(32);
        assert_eq!(packet.capacity(), 32);
        assert!(packet.is_empty());
        assert!(packet.rx_meta().is_some());
        assert!(packet.tx_meta().is_none());
    }

    #[test]
    fn test_outbound_holds_payload() {
        let cfg = TxConfig::default();
        let packet = PacketBuffer::outbound(cfg, &[1, 2, 3]);
        assert_eq!(packet.payload(), &[1, 2, 3]);
        assert_eq!(packet.tx_meta().unwrap().tx_cfg, cfg);
        assert!(packet.rx_meta().is_none());
    }

    #[test]
    fn test_set_payload_respects_capacity() {
        let mut packet = PacketBuffer::with_capacity(4);
        assert_eq!(packet.set_payload(&[0; 5]), Err(4));
        packet.set_payload(&[9, 8]).unwrap();
        assert_eq!(packet.payload(), &[9, 8]);
    }

    #[test]
    fn test_roles_are_exclusive() {
        let mut packet = PacketBuffer::with_capacity(8);
        packet.prepare_tx(TxConfig::default());
        assert!(packet.rx_meta().is_none());
        packet.clear();
        assert!(packet.tx_meta().is_none());
        assert!(packet.is_empty());
    }
}
