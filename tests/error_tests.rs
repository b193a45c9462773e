//! Unit tests for the `RadioError` enum, `SendError` and their `Display` output.

use d7phy::radio::hal::TransceiverError;
use d7phy::{PacketBuffer, RadioError, SendError, TxConfig};

/// Tests that the idempotency signals are formatted.
#[test]
fn test_idempotency_errors() {
    assert_eq!(RadioError::NotInitialized.to_string(), "Radio driver not initialised");
    assert_eq!(
        RadioError::AlreadyInitialized.to_string(),
        "Radio driver already initialised"
    );
    assert_eq!(
        RadioError::AlreadyInThisMode.to_string(),
        "Radio already in the requested RX mode"
    );
    assert_eq!(RadioError::AlreadyIdle.to_string(), "Radio already idle");
}

/// Tests that the `InvalidConfig` variant is correctly formatted.
#[test]
fn test_invalid_config_error() {
    let err = RadioError::InvalidConfig("EIRP 20 dBm outside [-39, 10]".to_string());
    assert_eq!(
        err.to_string(),
        "Invalid configuration: EIRP 20 dBm outside [-39, 10]"
    );
}

/// Tests that the `SizeError` variant names both bounds.
#[test]
fn test_size_error() {
    let err = RadioError::SizeError { length: 300, max: 255 };
    assert_eq!(err.to_string(), "Invalid packet length 300 (supported 1..=255)");
}

/// Tests that the remaining variants are correctly formatted.
#[test]
fn test_other_errors() {
    assert_eq!(
        RadioError::InvalidArgument("alloc callback missing").to_string(),
        "Invalid argument: alloc callback missing"
    );
    assert_eq!(RadioError::Busy.to_string(), "Transmission already in progress");
    assert_eq!(
        RadioError::Failure("timeout".to_string()).to_string(),
        "Radio failure: timeout"
    );
}

/// Tests which variants are idempotency signals.
#[test]
fn test_is_idempotent() {
    assert!(RadioError::AlreadyIdle.is_idempotent());
    assert!(RadioError::AlreadyInThisMode.is_idempotent());
    assert!(RadioError::AlreadyInitialized.is_idempotent());
    assert!(!RadioError::NotInitialized.is_idempotent());
    assert!(!RadioError::Busy.is_idempotent());
}

/// Tests that transceiver errors become `Failure`.
#[test]
fn test_from_transceiver_error() {
    let err: RadioError = TransceiverError::Failed("start_rx").into();
    assert_eq!(err, RadioError::Failure("start_rx failed".to_string()));

    let err: RadioError = TransceiverError::NoPacket.into();
    assert_eq!(err.to_string(), "Radio failure: No packet available in the RX FIFO");
}

/// Tests that a `SendError` displays its kind and gives the packet back.
#[test]
fn test_send_error_returns_packet() {
    let (irq, queue) = d7phy::event_channel(4);
    let (sim, _air) = d7phy::radio::hal::SimTransceiver::new(Default::default(), irq.clone());
    let radio = d7phy::RadioDriver::new(sim, irq, queue);

    let err: SendError = radio
        .send_packet(PacketBuffer::outbound(TxConfig::default(), &[1, 2]))
        .unwrap_err();
    assert_eq!(err.to_string(), "Radio driver not initialised");
    assert_eq!(err.into_packet().payload(), &[1, 2]);
}
