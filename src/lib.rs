//! # d7phy-rs - Radio HAL for a DASH7-style Physical Layer
//!
//! The d7phy-rs crate is the hardware abstraction layer between a wireless
//! sensor network stack and its low-power radio transceiver. The upper layer
//! drives the radio through a small, non-blocking API and receives packets,
//! transmission completions and RSSI readiness through callbacks.
//!
//! ## Features
//!
//! - IDLE / RX / TX state machine where transmission always preempts reception
//!   and the previous mode is restored once a transmission completes
//! - Packet buffers owned by exactly one party at a time, moved by value
//!   through allocation, receive, release and transmit-complete handoffs
//! - RSSI measurement gated on the settling of the current RX configuration
//! - A bounded single-consumer event queue standing in for interrupt
//!   delivery, drained synchronously or by an async task
//! - A `Transceiver` trait for silicon drivers and a simulated transceiver
//!   with CRC checking and fault injection
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! d7phy-rs = "0.1.0"
//! ```
//!
//! ```rust
//! use d7phy::{
//!     event_channel, init_logger, BufferPool, PacketBuffer, RadioCallbacks,
//!     RadioDriver, RadioError, RxConfig, TxConfig,
//! };
//! use d7phy::radio::hal::{SimConfig, SimTransceiver};
//! ```

pub mod error;
pub mod logging;
pub mod radio;
pub mod util;

pub use crate::error::{RadioError, SendError};
pub use crate::logging::{init_logger, log_info};

pub use radio::channel::{ChannelBand, ChannelClass, ChannelCoding, ChannelId, RxConfig, TxConfig};
pub use radio::config::{DriverConfig, RadioSettings};
pub use radio::driver::{RadioDriver, RadioMode, RadioStats};
pub use radio::irq::{event_channel, run_event_loop};
pub use radio::lifecycle::{RadioCallbacks, RadioClient};
pub use radio::packet::{CrcStatus, PacketBuffer, RxMetadata, TxMetadata};
pub use radio::pool::BufferPool;
pub use radio::rssi::RssiReading;
