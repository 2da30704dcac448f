//! End-to-end RTC scenarios over loopback connector pairs.

use hicn::io::LoopbackConnector;
use hicn::transport::config::{ConsumerCallbacks, ProducerCallbacks};
use hicn::transport::name::MIN_PROBE_SUFFIX;
use hicn::transport::portal::Portal;
use hicn::transport::rtc::{RtcConsumer, RtcConsumerConfig, RtcProducer, RtcProducerConfig};
use hicn::transport::{Name, Prefix, StopHandle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const RATE_KBPS: u32 = 2048;
const PAYLOAD_SIZE: usize = 1400;

fn test_prefix() -> Prefix {
    "b001::/64".parse().unwrap()
}

fn flow_name() -> Name {
    test_prefix().name(0)
}

#[test]
fn test_rtc_rate_and_probe_nacks() {
    let (producer_io, consumer_io) = LoopbackConnector::pair();
    let stop = StopHandle::new();
    let producer_stop = stop.clone();

    let mut producer = RtcProducer::new(
        RtcProducerConfig {
            payload_size: PAYLOAD_SIZE,
            production_rate_kbps: RATE_KBPS,
            ..Default::default()
        },
        ProducerCallbacks::default(),
        Portal::new(Box::new(producer_io)),
    )
    .unwrap();
    producer.register_prefix(test_prefix());
    let counters = producer.counters();

    let producer_handle = thread::spawn(move || {
        producer
            .run(&producer_stop, Some(Duration::from_millis(2400)))
            .unwrap();
    });

    // Count NACKs arriving from the reserved probe range.
    let probe_nacks = Arc::new(AtomicU32::new(0));
    let seen = probe_nacks.clone();
    let mut callbacks = ConsumerCallbacks::default();
    callbacks.content_object_input = Some(Box::new(move |content| {
        if content.is_nack() && content.suffix() >= MIN_PROBE_SUFFIX {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let mut consumer = RtcConsumer::new(
        RtcConsumerConfig {
            payload_size: PAYLOAD_SIZE,
            ..Default::default()
        },
        callbacks,
        Portal::new(Box::new(consumer_io)),
    )
    .unwrap();

    let run = Duration::from_millis(2000);
    consumer.consume(flow_name(), Some(run)).unwrap();

    // The producer paces at the nominal rate.
    let produced_kbps =
        counters.produced_bytes() as f64 * 8.0 / 2400.0;
    assert!(
        (produced_kbps - RATE_KBPS as f64).abs() < RATE_KBPS as f64 * 0.05,
        "producer off nominal: {produced_kbps} kbps"
    );

    // The consumer receives within 5% of the production rate.
    let received_kbps =
        consumer.stats().bytes_received() as f64 * 8.0 / run.as_millis() as f64;
    assert!(
        received_kbps > RATE_KBPS as f64 * 0.95,
        "received only {received_kbps} kbps"
    );
    assert!(
        received_kbps < RATE_KBPS as f64 * 1.05,
        "received {received_kbps} kbps, above production"
    );

    // At least one probe round-trip completed.
    assert!(probe_nacks.load(Ordering::SeqCst) >= 1);
    assert!(consumer.stats().received_nacks() >= 1);
    assert!(consumer.delivered_datagrams() > 0);

    stop.stop();
    producer_handle.join().unwrap();
}

#[test]
fn test_rtc_interactive_toggle_is_gapless() {
    let (producer_io, _consumer_io) = LoopbackConnector::pair();
    let stop = StopHandle::new();
    let producer_stop = stop.clone();

    let mut producer = RtcProducer::new(
        RtcProducerConfig {
            payload_size: PAYLOAD_SIZE,
            production_rate_kbps: RATE_KBPS,
            ..Default::default()
        },
        ProducerCallbacks::default(),
        Portal::new(Box::new(producer_io)),
    )
    .unwrap();
    producer.register_prefix(test_prefix());
    let counters = producer.counters();
    let switch = producer.production_switch();

    let producer_handle = thread::spawn(move || {
        producer
            .run(&producer_stop, Some(Duration::from_millis(1500)))
            .unwrap();
    });

    // Produce 0.5s, pause 0.5s, produce 0.5s.
    thread::sleep(Duration::from_millis(500));
    switch.toggle();
    thread::sleep(Duration::from_millis(500));
    switch.toggle();
    producer_handle.join().unwrap();

    // Roughly one second of active production, minus the idle interval.
    let expected = RATE_KBPS as u64 * 1000 / 8; // bytes over 1s
    let produced = counters.produced_bytes();
    assert!(
        produced > expected * 7 / 10,
        "produced only {produced} of ~{expected} bytes"
    );
    assert!(
        produced < expected * 13 / 10,
        "produced {produced}, expected ~{expected} bytes"
    );

    // The suffix sequence is monotonic with no gaps even across the
    // toggles.
    assert_eq!(counters.production_segment() as u64, counters.produced_packets());

    stop.stop();
}
