//! # Packet Buffer Lifecycle
//!
//! The owner of the radio supplies five callbacks at initialisation. Four of
//! them move a `PacketBuffer` across the driver boundary, and they are the only
//! places where ownership changes hands:
//!
//! 1. **allocate** - the driver needs storage for a detected packet
//! 2. **receive-complete** - a filled buffer goes to the owner
//! 3. **release** - an abandoned reception's buffer goes back, undelivered
//! 4. **transmit-complete** - the buffer given to `send_packet` comes back
//!
//! The fifth, **rssi-valid**, reports that the RSSI reading settled.
//!
//! All callbacks run on the event consumer, one at a time, and must not block.
//! They may call the driver's owner operations (`send_packet`, `set_rx`, ...)
//! but must not drain the event queue themselves.

use crate::error::RadioError;
use crate::radio::irq::RxEpoch;
use crate::radio::packet::PacketBuffer;
use crate::radio::rssi::RssiReading;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub type AllocFn = Box<dyn FnMut(usize) -> Option<PacketBuffer> + Send>;
pub type ReleaseFn = Box<dyn FnMut(PacketBuffer) + Send>;
pub type RxDoneFn = Box<dyn FnMut(PacketBuffer) + Send>;
pub type TxDoneFn = Box<dyn FnMut(PacketBuffer) + Send>;
pub type RssiValidFn = Box<dyn FnMut(RssiReading) + Send>;

/// Listener interface for the owner of the radio
///
/// An alternative to registering five closures. Methods take `&self`; state the
/// client shares with task context needs its own synchronisation.
pub trait RadioClient: Send + Sync {
    /// Buffer able to hold at least `length` bytes, or `None` to drop the packet
    fn alloc_packet(&self, length: usize) -> Option<PacketBuffer>;

    /// Take back a buffer whose reception was abandoned
    fn release_packet(&self, packet: PacketBuffer);

    /// Take ownership of a received packet
    fn packet_received(&self, packet: PacketBuffer);

    /// Take back a packet after its transmission
    fn packet_transmitted(&self, packet: PacketBuffer);

    fn rssi_valid(&self, reading: RssiReading);
}

/// The callback set registered with `RadioDriver::init`
#[derive(Default)]
pub struct RadioCallbacks {
    alloc: Option<AllocFn>,
    release: Option<ReleaseFn>,
    rx_done: Option<RxDoneFn>,
    tx_done: Option<TxDoneFn>,
    rssi_valid: Option<RssiValidFn>,
}

impl RadioCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_alloc<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize) -> Option<PacketBuffer> + Send + 'static,
    {
        self.alloc = Some(Box::new(f));
        self
    }

    pub fn on_release<F>(mut self, f: F) -> Self
    where
        F: FnMut(PacketBuffer) + Send + 'static,
    {
        self.release = Some(Box::new(f));
        self
    }

    pub fn on_rx<F>(mut self, f: F) -> Self
    where
        F: FnMut(PacketBuffer) + Send + 'static,
    {
        self.rx_done = Some(Box::new(f));
        self
    }

    pub fn on_tx<F>(mut self, f: F) -> Self
    where
        F: FnMut(PacketBuffer) + Send + 'static,
    {
        self.tx_done = Some(Box::new(f));
        self
    }

    pub fn on_rssi_valid<F>(mut self, f: F) -> Self
    where
        F: FnMut(RssiReading) + Send + 'static,
    {
        self.rssi_valid = Some(Box::new(f));
        self
    }

    /// Route all five callbacks to one client
    pub fn from_client<C>(client: Arc<C>) -> Self
    where
        C: RadioClient + 'static,
    {
        let alloc = Arc::clone(&client);
        let release = Arc::clone(&client);
        let rx = Arc::clone(&client);
        let tx = Arc::clone(&client);
        Self::new()
            .on_alloc(move |len| alloc.alloc_packet(len))
            .on_release(move |p| release.release_packet(p))
            .on_rx(move |p| rx.packet_received(p))
            .on_tx(move |p| tx.packet_transmitted(p))
            .on_rssi_valid(move |r| client.rssi_valid(r))
    }

    pub(crate) fn into_handlers(self) -> Result<Handlers, RadioError> {
        Ok(Handlers {
            alloc: self.alloc.ok_or(RadioError::InvalidArgument("alloc callback missing"))?,
            release: self
                .release
                .ok_or(RadioError::InvalidArgument("release callback missing"))?,
            rx_done: self.rx_done.ok_or(RadioError::InvalidArgument("rx callback missing"))?,
            tx_done: self.tx_done.ok_or(RadioError::InvalidArgument("tx callback missing"))?,
            rssi_valid: self
                .rssi_valid
                .ok_or(RadioError::InvalidArgument("rssi_valid callback missing"))?,
        })
    }
}

impl fmt::Debug for RadioCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadioCallbacks")
            .field("alloc", &self.alloc.is_some())
            .field("release", &self.release.is_some())
            .field("rx_done", &self.rx_done.is_some())
            .field("tx_done", &self.tx_done.is_some())
            .field("rssi_valid", &self.rssi_valid.is_some())
            .finish()
    }
}

/// A single step of callback work produced by the state machine
#[derive(Debug)]
pub(crate) enum Handoff {
    Allocate { epoch: RxEpoch, length: usize },
    Release(PacketBuffer),
    Deliver(PacketBuffer),
    Transmitted(PacketBuffer),
    RssiValid { epoch: RxEpoch, reading: RssiReading },
}

/// Driver bookkeeping consulted while handoffs run
pub(crate) trait HandoffLedger {
    /// Store an allocated buffer with the reception it was requested for. May
    /// hand it straight back (stale or undersized).
    fn attach(&mut self, epoch: RxEpoch, buffer: Option<PacketBuffer>) -> Option<Handoff>;

    /// The rssi-valid report of `epoch` is due. False if that arm is gone.
    fn confirm_rssi(&mut self, epoch: RxEpoch) -> bool;
}

/// A complete, validated callback set
pub(crate) struct Handlers {
    alloc: AllocFn,
    release: ReleaseFn,
    rx_done: RxDoneFn,
    tx_done: TxDoneFn,
    rssi_valid: RssiValidFn,
}

impl Handlers {
    /// Execute handoffs in order.
    ///
    /// A buffer the ledger hands back from an allocation is released before
    /// anything queued after the allocation.
    pub fn run<L: HandoffLedger>(&mut self, work: Vec<Handoff>, ledger: &mut L) {
        let mut work: VecDeque<Handoff> = work.into();
        while let Some(step) = work.pop_front() {
            match step {
                Handoff::Allocate { epoch, length } => {
                    let buffer = (self.alloc)(length);
                    if let Some(next) = ledger.attach(epoch, buffer) {
                        work.push_front(next);
                    }
                }
                Handoff::Release(packet) => (self.release)(packet),
                Handoff::Deliver(packet) => (self.rx_done)(packet),
                Handoff::Transmitted(packet) => (self.tx_done)(packet),
                Handoff::RssiValid { epoch, reading } => {
                    if ledger.confirm_rssi(epoch) {
                        (self.rssi_valid)(reading);
                    }
                }
            }
        }
    }
}

/// The reception currently owned by the driver
#[derive(Debug)]
pub(crate) struct Reception {
    pub epoch: RxEpoch,
    pub length: usize,
    pub timestamp: Instant,
    pub buffer: Option<PacketBuffer>,
}

/// What became of an allocation result
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AttachOutcome {
    Attached,
    /// No buffer was available; the packet is dropped
    Dropped,
    /// The buffer is smaller than requested; it goes back and the packet is dropped
    Undersized,
    /// The reception ended before the buffer arrived
    Stale,
}

/// Driver-side bookkeeping of inbound buffers
///
/// At most one reception is in flight. Buffers of abandoned receptions wait in
/// `aborted` until the event consumer releases them, which always happens
/// before the consumer handles the next event.
#[derive(Debug, Default)]
pub(crate) struct InboundLedger {
    current: Option<Reception>,
    aborted: VecDeque<PacketBuffer>,
}

impl InboundLedger {
    /// Start tracking a detected packet.
    ///
    /// A reception still in flight never saw its completion; it is replaced
    /// and returned so its buffer can go back.
    pub fn begin(
        &mut self,
        epoch: RxEpoch,
        length: usize,
        timestamp: Instant,
    ) -> Option<Reception> {
        self.current.replace(Reception {
            epoch,
            length,
            timestamp,
            buffer: None,
        })
    }

    /// Store the allocation result for the reception of `epoch`
    pub fn attach(
        &mut self,
        epoch: RxEpoch,
        buffer: Option<PacketBuffer>,
    ) -> (AttachOutcome, Option<Handoff>) {
        let reception = match self.current.as_mut() {
            Some(reception) if reception.epoch == epoch && reception.buffer.is_none() => reception,
            _ => return (AttachOutcome::Stale, buffer.map(Handoff::Release)),
        };
        match buffer {
            None => (AttachOutcome::Dropped, None),
            Some(buffer) if buffer.capacity() < reception.length => {
                (AttachOutcome::Undersized, Some(Handoff::Release(buffer)))
            }
            Some(buffer) => {
                reception.buffer = Some(buffer);
                (AttachOutcome::Attached, None)
            }
        }
    }

    /// End the reception of `epoch`, if that is the one in flight
    pub fn finish(&mut self, epoch: RxEpoch) -> Option<Reception> {
        match &self.current {
            Some(reception) if reception.epoch == epoch => self.current.take(),
            _ => None,
        }
    }

    /// Abandon the reception in flight. Returns true if a buffer now awaits release.
    pub fn abort(&mut self) -> bool {
        match self.current.take().and_then(|r| r.buffer) {
            Some(buffer) => {
                self.aborted.push_back(buffer);
                true
            }
            None => false,
        }
    }

    pub fn drain_aborted(&mut self) -> Vec<Handoff> {
        self.aborted.drain(..).map(Handoff::Release).collect()
    }

    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }
}
