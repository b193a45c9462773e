//! Radio Event Queue
//!
//! Hardware events (packet detected, packet received, transmission done, RSSI
//! settled) are raised from interrupt context onto a bounded queue and handled
//! by exactly one consumer: either a synchronous drain
//! ([`RadioDriver::process_events`](crate::radio::driver::RadioDriver::process_events))
//! or the async [`run_event_loop`] task. Raising never blocks; when the queue
//! is full the event is dropped and counted.

use crate::radio::driver::RadioDriver;
use crate::radio::hal::Transceiver;
use crate::radio::packet::CrcStatus;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::{channel, error::TrySendError, Receiver, Sender};
use tokio::sync::{Mutex, MutexGuard};

/// Identifies one RX arm of the transceiver.
///
/// The driver hands a fresh epoch to the transceiver every time it (re-)enters
/// RX, and reception / RSSI events carry it back, so events belonging to an
/// abandoned configuration are recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RxEpoch(u32);

impl RxEpoch {
    pub fn next(self) -> Self {
        RxEpoch(self.0.wrapping_add(1))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

/// Hardware event types that can be queued
#[derive(Debug, Clone)]
pub enum RadioEvent {
    /// Start of a packet whose length is known
    PacketDetected {
        epoch: RxEpoch,
        length: usize,
        timestamp: Instant,
    },

    /// A packet of `length` bytes is complete and in the FIFO
    PacketReceived {
        epoch: RxEpoch,
        length: usize,
        crc_status: CrcStatus,
        lqi: u8,
        rssi: i16,
    },

    /// The reception in progress was lost (header error, sync lost)
    ReceptionFailed { epoch: RxEpoch },

    /// The transmission in flight has been sent
    TransmissionDone { timestamp: Instant },

    /// The RSSI measurement of the given arm became valid
    RssiSettled { epoch: RxEpoch },

    /// Raised by the driver after an owner call abandoned a reception, so the
    /// consumer hands the buffer back without waiting for the next hardware event
    ReceptionAborted,
}

impl RadioEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RadioEvent::PacketDetected { .. } => "PacketDetected",
            RadioEvent::PacketReceived { .. } => "PacketReceived",
            RadioEvent::ReceptionFailed { .. } => "ReceptionFailed",
            RadioEvent::TransmissionDone { .. } => "TransmissionDone",
            RadioEvent::RssiSettled { .. } => "RssiSettled",
            RadioEvent::ReceptionAborted => "ReceptionAborted",
        }
    }
}

/// Errors raising an event
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrqError {
    #[error("Event queue full, {0} event dropped")]
    QueueFull(&'static str),

    #[error("Event queue closed")]
    Closed,
}

/// Statistics for event delivery
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IrqStats {
    pub total_events: u64,
    pub events_dropped: u64,
}

#[derive(Debug, Default)]
struct IrqCounters {
    total: AtomicU64,
    dropped: AtomicU64,
}

/// Producer side of the event queue, handed to the transceiver
#[derive(Debug, Clone)]
pub struct IrqLine {
    tx: Sender<RadioEvent>,
    counters: Arc<IrqCounters>,
}

impl IrqLine {
    /// Queue an event. Never blocks; a full queue drops the event.
    pub fn raise(&self, event: RadioEvent) -> Result<(), IrqError> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        let name = event.name();
        match self.tx.try_send(event) {
            Ok(()) => {
                debug!("{name} event queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Event queue full, dropping {name}");
                Err(IrqError::QueueFull(name))
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(IrqError::Closed)
            }
        }
    }

    /// Queue a `ReceptionAborted` wake-up for the consumer. Not a hardware
    /// event, so it stays out of the statistics; a full queue already holds
    /// something that will wake the consumer.
    pub(crate) fn wake(&self) -> bool {
        self.tx.try_send(RadioEvent::ReceptionAborted).is_ok()
    }

    pub fn stats(&self) -> IrqStats {
        IrqStats {
            total_events: self.counters.total.load(Ordering::Relaxed),
            events_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side of the event queue
#[derive(Debug)]
pub struct EventQueue {
    rx: Mutex<Receiver<RadioEvent>>,
    capacity: usize,
}

impl EventQueue {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Exclusive consumer access, or `None` if another consumer holds it
    pub(crate) fn try_consumer(&self) -> Option<MutexGuard<'_, Receiver<RadioEvent>>> {
        self.rx.try_lock().ok()
    }

    pub(crate) async fn consumer(&self) -> MutexGuard<'_, Receiver<RadioEvent>> {
        self.rx.lock().await
    }
}

/// Create a connected event line / queue pair
///
/// # Arguments
/// * `capacity` - Maximum number of events to queue (at least 1)
pub fn event_channel(capacity: usize) -> (IrqLine, EventQueue) {
    let capacity = capacity.max(1);
    let (tx, rx) = channel(capacity);
    (
        IrqLine {
            tx,
            counters: Arc::new(IrqCounters::default()),
        },
        EventQueue {
            rx: Mutex::new(rx),
            capacity,
        },
    )
}

/// Event processor task: the single consumer of the driver's event queue
///
/// Runs until `shutdown` fires or every `IrqLine` is dropped. While it runs,
/// `process_events` calls find the queue taken and return immediately.
pub async fn run_event_loop<T>(
    radio: Arc<RadioDriver<T>>,
    mut shutdown: tokio::sync::oneshot::Receiver<()>,
) where
    T: Transceiver + 'static,
{
    debug!("Radio event loop started");

    let mut rx = radio.event_queue().consumer().await;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Radio event loop received shutdown signal");
                break;
            }

            event = rx.recv() => match event {
                Some(event) => radio.handle_event(event),
                None => break,
            }
        }
    }

    debug!("Radio event loop stopped");
}
