//! # Radio Error Handling
//!
//! This module defines the `RadioError` enum, which represents the rejections a
//! radio driver operation can return, and `SendError`, which hands a rejected
//! packet back to its owner.

use crate::radio::hal::TransceiverError;
use crate::radio::packet::PacketBuffer;
use thiserror::Error;

/// Represents the different error kinds returned by the radio driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    /// An operation was invoked before `init` succeeded.
    #[error("Radio driver not initialised")]
    NotInitialized,

    /// `init` was called on a driver that is already initialised.
    #[error("Radio driver already initialised")]
    AlreadyInitialized,

    /// `set_rx` was called with the configuration the radio already uses.
    #[error("Radio already in the requested RX mode")]
    AlreadyInThisMode,

    /// `set_idle` was called while the radio is already (commanded) idle.
    #[error("Radio already idle")]
    AlreadyIdle,

    /// A supplied RX/TX configuration is outside the supported parameters.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A packet length is outside the supported bounds.
    #[error("Invalid packet length {length} (supported 1..={max})")]
    SizeError { length: usize, max: usize },

    /// A required argument (callback) was not supplied.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A transmission is already in flight.
    #[error("Transmission already in progress")]
    Busy,

    /// The hardware could not be brought to the requested state.
    #[error("Radio failure: {0}")]
    Failure(String),
}

impl RadioError {
    /// Idempotency signals that callers may treat as success.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            RadioError::AlreadyInitialized | RadioError::AlreadyInThisMode | RadioError::AlreadyIdle
        )
    }
}

impl From<TransceiverError> for RadioError {
    fn from(err: TransceiverError) -> Self {
        RadioError::Failure(err.to_string())
    }
}

/// A rejected `send_packet` call. Ownership of the packet returns to the caller.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct SendError {
    pub kind: RadioError,
    pub packet: PacketBuffer,
}

impl SendError {
    pub(crate) fn new(kind: RadioError, packet: PacketBuffer) -> Self {
        Self { kind, packet }
    }

    /// Recover the packet that was not sent.
    pub fn into_packet(self) -> PacketBuffer {
        self.packet
    }
}
