//! Integration tests for packet buffer ownership: the allocation, receive,
//! release and transmit-complete handoffs, their ordering, and callbacks that
//! call back into the driver.


use d7phy::radio::hal::{SimConfig, SimFaults, SimTransceiver};
use d7phy::radio::irq::event_channel;
use d7phy::{
    BufferPool, CrcStatus, DriverConfig, PacketBuffer, RadioCallbacks, RadioClient,
    RadioDriver, RssiReading,
};
use radio_support::{assert_buffers_returned_in_order, quiet_sim, rx_cfg, tx_cfg, Call, Harness};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

#[test]
fn test_received_packet_carries_metadata() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(7)).unwrap();
    h.process();
    h.take_calls();

    assert!(h.air.inject(&[0xD7, 0x10, 0x20], -71.6));
    assert_eq!(h.process(), 2);

    let calls = h.take_calls();
    assert_eq!(calls[0], Call::Alloc { length: 3, granted: true });
    let Call::Received { payload, meta } = &calls[1] else {
        panic!("expected a delivery, got {calls:?}");
    };
    assert_eq!(payload, &vec![0xD7, 0x10, 0x20]);
    assert_eq!(meta.rx_cfg, rx_cfg(7));
    assert_eq!(meta.rssi, -72);
    assert_eq!(meta.crc_status, CrcStatus::Valid);
    assert!(meta.lqi > 0);
    assert!(meta.timestamp.is_some());

    assert_eq!(h.radio.stats().packets_received, 1);
    assert_eq!(h.pool.outstanding(), 0);
}

#[test]
fn test_corrupted_packet_delivered_with_invalid_crc() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.air.inject_corrupted(&[1, 2, 3, 4], -80.0);
    h.process();

    let delivered: Vec<_> = h
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Received { meta, .. } => Some(meta.crc_status),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, vec![CrcStatus::Invalid]);
    assert_eq!(h.radio.stats().packets_crc_error, 1);
}

#[test]
fn test_no_buffer_drops_reception_silently() {
    let h = Harness::with_config(quiet_sim(), DriverConfig::default(), BufferPool::new(0, 255));
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.process();
    h.take_calls();

    assert!(h.air.begin_reception(&[1, 2, 3], -60.0));
    h.process();
    assert_eq!(h.calls(), vec![Call::Alloc { length: 3, granted: false }]);
    assert!(h.radio.rx_busy());

    assert!(h.air.complete_reception());
    h.process();
    assert_eq!(h.count("rx"), 0);
    assert_eq!(h.count("release"), 0);
    assert!(!h.radio.rx_busy());
    assert!(h.radio.is_rx());
    assert_eq!(h.radio.stats().rx_dropped, 1);
}

#[test]
fn test_undersized_buffer_released_immediately() {
    let (irq, queue) = event_channel(16);
    let (sim, air) = SimTransceiver::new(quiet_sim(), irq.clone());
    let radio = RadioDriver::new(sim, irq, queue);

    let order = Arc::new(Mutex::new(Vec::new()));
    let (o1, o2, o3) = (order.clone(), order.clone(), order.clone());
    radio
        .init(
            RadioCallbacks::new()
                .on_alloc(move |len| {
                    o1.lock().unwrap().push(format!("alloc {len}"));
                    Some(PacketBuffer::with_capacity(len - 1))
                })
                .on_release(move |buf| o2.lock().unwrap().push(format!("release {}", buf.capacity())))
                .on_rx(move |_| o3.lock().unwrap().push("rx".to_string()))
                .on_tx(|_| {})
                .on_rssi_valid(|_| {}),
        )
        .unwrap();

    radio.set_rx(rx_cfg(0)).unwrap();
    air.inject(&[0; 10], -60.0);
    radio.process_events();

    assert_eq!(*order.lock().unwrap(), vec!["alloc 10", "release 9"]);
    assert_eq!(radio.stats().rx_dropped, 1);
}

#[test]
fn test_preempted_reception_released_before_tx_complete() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.process();
    h.take_calls();

    h.air.begin_reception(&[5; 20], -75.0);
    h.process();
    assert!(h.radio.rx_busy());
    assert_eq!(h.pool.outstanding(), 1);

    h.radio
        .send_packet(PacketBuffer::outbound(tx_cfg(0, 0), &[0xAB; 4]))
        .unwrap();
    assert!(!h.radio.rx_busy());
    h.process();

    assert_eq!(h.names(), vec!["alloc", "release", "tx", "rssi"]);
    assert_eq!(h.pool.outstanding(), 0);
    assert_eq!(h.radio.stats().rx_aborted, 1);
}

#[test]
fn test_aborted_reception_never_delivered() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.air.begin_reception(&[1; 8], -70.0);
    h.process();

    h.radio.set_rx(rx_cfg(1)).unwrap();
    // the hardware dropped the frame on re-tune
    assert!(!h.air.complete_reception());
    h.process();

    assert_eq!(h.count("rx"), 0);
    assert_eq!(h.count("release"), 1);
    assert_eq!(h.pool.outstanding(), 0);
}

#[test]
fn test_detection_for_abandoned_config_ignored() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.air.begin_reception(&[1; 8], -70.0);
    h.radio.set_idle().unwrap();
    h.process();

    assert_eq!(h.count("alloc"), 0);
    assert!(!h.radio.rx_busy());
}

#[test]
fn test_payload_read_failure_releases_buffer() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.air.set_faults(SimFaults::READ_PAYLOAD);
    h.air.inject(&[1, 2, 3], -70.0);
    h.process();

    assert_eq!(h.count("alloc"), 1);
    assert_eq!(h.count("release"), 1);
    assert_eq!(h.count("rx"), 0);
    assert_eq!(h.pool.outstanding(), 0);
}

#[test]
fn test_failed_reception_releases_buffer() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.air.begin_reception(&[1; 30], -90.0);
    h.process();
    assert!(h.air.fail_reception());
    h.process();

    assert_eq!(h.count("release"), 1);
    assert!(!h.radio.rx_busy());
    assert!(h.radio.is_rx());
}

#[test]
fn test_buffers_returned_exactly_once_across_mixed_traffic() {
    let h = Harness::new();
    h.radio.set_rx(rx_cfg(0)).unwrap();

    h.air.inject(&[1; 12], -70.0);
    h.process();

    h.air.begin_reception(&[2; 12], -70.0);
    h.process();
    h.radio.set_rx(rx_cfg(1)).unwrap();
    h.process();

    h.air.begin_reception(&[3; 12], -70.0);
    h.process();
    h.air.fail_reception();
    h.process();

    h.air.inject_corrupted(&[4; 12], -70.0);
    h.process();

    h.air.begin_reception(&[5; 12], -70.0);
    h.process();
    h.radio.set_idle().unwrap();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    h.air.inject(&[6; 12], -70.0);
    h.process();

    let calls = h.calls();
    assert_buffers_returned_in_order(&calls);
    assert_eq!(h.count("alloc"), 6);
    assert_eq!(h.count("rx"), 3);
    assert_eq!(h.count("release"), 3);
    assert_eq!(h.pool.outstanding(), 0);
}

#[test]
fn test_transmit_complete_is_deferred_to_consumer() {
    let h = Harness::with_sim(SimConfig {
        eirp_step_db: 3,
        ..quiet_sim()
    });
    h.radio
        .send_packet(PacketBuffer::outbound(tx_cfg(0, 5), &[0x11, 0x22]))
        .unwrap();
    assert_eq!(h.count("tx"), 0);

    h.process();
    let calls = h.calls();
    let Some(Call::Transmitted { payload, meta }) = calls.last() else {
        panic!("expected a transmit completion, got {calls:?}");
    };
    assert_eq!(payload, &vec![0x11, 0x22]);
    assert_eq!(meta.tx_cfg.eirp, 6);
    assert!(meta.timestamp.is_some());
    assert_eq!(h.air.transmitted()[0].cfg.eirp, 6);
    assert_eq!(h.radio.stats().packets_sent, 1);
}

#[test]
fn test_callbacks_may_call_owner_operations() {
    let (irq, queue) = event_channel(16);
    let (sim, air) = SimTransceiver::new(quiet_sim(), irq.clone());
    let radio = Arc::new(RadioDriver::new(sim, irq, queue));

    let slot: Arc<OnceLock<Arc<RadioDriver<SimTransceiver>>>> = Arc::new(OnceLock::new());
    let nested = Arc::new(Mutex::new(Vec::new()));
    let sent = Arc::new(AtomicUsize::new(0));

    let (rx_slot, rx_nested) = (slot.clone(), nested.clone());
    let tx_sent = sent.clone();
    radio
        .init(
            RadioCallbacks::new()
                .on_alloc(|len| Some(PacketBuffer::with_capacity(len)))
                .on_release(|_| {})
                .on_rx(move |_request| {
                    if let Some(radio) = rx_slot.get() {
                        rx_nested.lock().unwrap().push(radio.process_events());
                        radio
                            .send_packet(PacketBuffer::outbound(tx_cfg(0, 0), &[0xAC]))
                            .unwrap();
                    }
                })
                .on_tx(move |_| {
                    tx_sent.fetch_add(1, Ordering::SeqCst);
                })
                .on_rssi_valid(|_| {}),
        )
        .unwrap();
    assert!(slot.set(Arc::clone(&radio)).is_ok());

    radio.set_rx(rx_cfg(0)).unwrap();
    air.inject(&[0x01], -60.0);
    radio.process_events();

    assert_eq!(*nested.lock().unwrap(), vec![0]);
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    assert_eq!(air.transmitted()[0].payload, vec![0xAC]);
    assert!(radio.is_rx());
}

struct PooledClient {
    pool: BufferPool,
    received: Mutex<Vec<Vec<u8>>>,
    transmitted: AtomicUsize,
    rssi: Mutex<Option<RssiReading>>,
}

impl RadioClient for PooledClient {
    fn alloc_packet(&self, length: usize) -> Option<PacketBuffer> {
        self.pool.allocate(length)
    }

    fn release_packet(&self, packet: PacketBuffer) {
        self.pool.recycle(packet);
    }

    fn packet_received(&self, packet: PacketBuffer) {
        self.received.lock().unwrap().push(packet.payload().to_vec());
        self.pool.recycle(packet);
    }

    fn packet_transmitted(&self, _packet: PacketBuffer) {
        self.transmitted.fetch_add(1, Ordering::SeqCst);
    }

    fn rssi_valid(&self, reading: RssiReading) {
        *self.rssi.lock().unwrap() = Some(reading);
    }
}

#[test]
fn test_radio_client_trait() {
    let (irq, queue) = event_channel(16);
    let (sim, air) = SimTransceiver::new(quiet_sim(), irq.clone());
    let radio = RadioDriver::new(sim, irq, queue);
    let client = Arc::new(PooledClient {
        pool: BufferPool::new(2, 64),
        received: Mutex::new(Vec::new()),
        transmitted: AtomicUsize::new(0),
        rssi: Mutex::new(None),
    });
    radio
        .init(RadioCallbacks::from_client(Arc::clone(&client)))
        .unwrap();

    radio.set_rx(rx_cfg(2)).unwrap();
    air.inject(&[9, 8, 7], -65.0);
    radio.process_events();
    radio
        .send_packet(PacketBuffer::outbound(tx_cfg(2, 0), &[1]))
        .unwrap();
    radio.process_events();

    assert_eq!(*client.received.lock().unwrap(), vec![vec![9, 8, 7]]);
    assert_eq!(client.transmitted.load(Ordering::SeqCst), 1);
    assert_eq!(*client.rssi.lock().unwrap(), Some(RssiReading::new(-110)));
    assert_eq!(client.pool.outstanding(), 0);
}

#[test]
fn test_queue_overflow_counted_and_recoverable() {
    let h = Harness::with_config(
        SimConfig {
            auto_settle: false,
            ..quiet_sim()
        },
        DriverConfig {
            event_queue_capacity: 1,
            ..DriverConfig::default()
        },
        BufferPool::new(2, 255),
    );
    h.radio.set_rx(rx_cfg(0)).unwrap();

    // PacketReceived does not fit behind PacketDetected
    assert!(!h.air.inject(&[1, 2, 3], -60.0));
    assert_eq!(h.radio.stats().events_dropped, 1);

    h.process();
    assert!(h.radio.rx_busy());
    assert_eq!(h.pool.outstanding(), 1);

    h.radio.set_idle().unwrap();
    h.process();
    assert_eq!(h.pool.outstanding(), 0);
    assert_eq!(h.count("release"), 1);
}

fn single_slot_queue() -> Harness {
    Harness::with_config(
        SimConfig {
            auto_settle: false,
            ..quiet_sim()
        },
        DriverConfig {
            event_queue_capacity: 1,
            ..DriverConfig::default()
        },
        BufferPool::new(2, 255),
    )
}

#[test]
fn test_next_detection_replaces_reception_with_lost_completion() {
    let h = single_slot_queue();
    h.radio.set_rx(rx_cfg(0)).unwrap();

    assert!(!h.air.inject(&[1, 2, 3], -60.0));
    h.process();
    assert!(h.radio.rx_busy());

    // a longer frame follows; the stuck reception gives way to it
    let frame: Vec<u8> = (0x0A..=0x0F).collect();
    assert!(h.air.begin_reception(&frame, -62.0));
    h.process();
    assert!(h.air.complete_reception());
    h.process();

    let calls = h.calls();
    assert_eq!(h.names(), vec!["alloc", "release", "alloc", "rx"]);
    let Call::Received { payload, meta } = &calls[3] else {
        panic!("expected a delivery, got {calls:?}");
    };
    assert_eq!(payload, &frame);
    assert_eq!(meta.crc_status, CrcStatus::Valid);
    assert_buffers_returned_in_order(&calls);

    let stats = h.radio.stats();
    assert_eq!(stats.rx_dropped, 1);
    assert_eq!(stats.packets_received, 1);
    assert_eq!(h.pool.outstanding(), 0);
    assert!(!h.radio.rx_busy());
}

#[test]
fn test_completion_of_undetected_frame_is_dropped() {
    let h = single_slot_queue();
    h.radio.set_rx(rx_cfg(0)).unwrap();

    // the first frame's completion and the second frame's detection are lost
    assert!(!h.air.inject(&[1, 2, 3], -60.0));
    assert!(!h.air.begin_reception(&[9; 6], -60.0));
    h.process();
    assert!(h.air.complete_reception());
    h.process();

    assert_eq!(h.names(), vec!["alloc", "release"]);
    assert_eq!(h.radio.stats().rx_dropped, 1);
    assert_eq!(h.radio.stats().packets_received, 0);
    assert_eq!(h.pool.outstanding(), 0);
    assert!(!h.radio.rx_busy());
}

#[test]
fn test_abort_wake_up_not_counted_as_lost_event() {
    let h = single_slot_queue();
    h.radio.set_rx(rx_cfg(0)).unwrap();
    assert!(h.air.begin_reception(&[4; 4], -60.0));
    h.process();

    // queue full when set_idle posts its wake-up
    assert!(h.air.settle_rssi());
    h.radio.set_idle().unwrap();
    assert_eq!(h.radio.stats().events_dropped, 0);

    h.process();
    assert_eq!(h.names(), vec!["alloc", "release"]);
    assert_eq!(h.pool.outstanding(), 0);
}

#[test]
fn test_rssi_turns_valid_as_its_callback_runs() {
    let (irq, queue) = event_channel(16);
    let (sim, air) = SimTransceiver::new(
        SimConfig {
            auto_settle: false,
            ..quiet_sim()
        },
        irq.clone(),
    );
    let radio = Arc::new(RadioDriver::new(sim, irq, queue));

    let slot: Arc<OnceLock<Arc<RadioDriver<SimTransceiver>>>> = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (rssi_slot, rssi_seen) = (slot.clone(), seen.clone());
    radio
        .init(
            RadioCallbacks::new()
                .on_alloc(|_| None)
                .on_release(|_| {})
                .on_rx(|_| {})
                .on_tx(|_| {})
                .on_rssi_valid(move |reading| {
                    if let Some(radio) = rssi_slot.get() {
                        rssi_seen
                            .lock()
                            .unwrap()
                            .push((reading, radio.measure_rssi()));
                    }
                }),
        )
        .unwrap();
    assert!(slot.set(Arc::clone(&radio)).is_ok());

    radio.set_rx(rx_cfg(0)).unwrap();
    assert!(air.settle_rssi());
    // raised but not consumed yet
    assert!(!radio.rssi_valid());
    assert!(!radio.measure_rssi().is_valid());

    radio.process_events();
    let reading = RssiReading::new(-110);
    assert_eq!(*seen.lock().unwrap(), vec![(reading, reading)]);
    assert!(radio.rssi_valid());
}
