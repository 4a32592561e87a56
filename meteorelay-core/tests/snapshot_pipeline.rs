//! Integration tests for the ingestion half of the relay
//!
//! Packets go through the cache, snapshots through the queue, and the
//! result through conversion and formatting, the same path the upload
//! worker takes minus the network.

use meteorelay_core::{
    upload_queue, Field, FieldValue, Packet, RequestFormatter, StandardConverter, UnitConverter,
    UnitSystem, ValueCache, DEFAULT_CACHE_STALE,
};
use proptest::prelude::*;
use serde_json::json;

#[test]
fn end_to_end_metric_scenario() {
    let mut cache = ValueCache::new();
    cache
        .update(&Packet::new(1000, UnitSystem::Metric).with(Field::OutTemp, 21.0))
        .unwrap();
    cache
        .update(&Packet::new(1005, UnitSystem::Metric).with(Field::WindSpeed, 3.2))
        .unwrap();

    let snapshot = cache.snapshot(Some(1006), DEFAULT_CACHE_STALE);
    assert_eq!(
        serde_json::to_value(&snapshot).unwrap(),
        json!({"outTemp": 21.0, "windSpeed": 3.2, "dateTime": 1006, "usUnits": 16})
    );

    let wire = StandardConverter
        .convert(&snapshot, UnitSystem::MetricWx)
        .unwrap();
    let query = RequestFormatter.render(&wire);

    // METRIC wind speed is km/h on the way in, m/s on the wire
    let parts: Vec<&str> = query.split('&').collect();
    assert_eq!(parts[0], "dateutc=now");
    assert!(parts.contains(&"tempc=21.0"));
    assert!(parts.contains(&"windspeedms=0.9"));
    assert_eq!(parts.len(), 3);
}

#[test]
fn end_to_end_metricwx_scenario() {
    let mut cache = ValueCache::new();
    cache
        .update(&Packet::new(1000, UnitSystem::MetricWx).with(Field::OutTemp, 21.0))
        .unwrap();
    cache
        .update(&Packet::new(1005, UnitSystem::MetricWx).with(Field::WindSpeed, 3.2))
        .unwrap();

    let wire = StandardConverter
        .convert(&cache.snapshot(Some(1006), DEFAULT_CACHE_STALE), UnitSystem::MetricWx)
        .unwrap();
    let query = RequestFormatter.render(&wire);

    let parts: Vec<&str> = query.split('&').collect();
    assert!(parts.contains(&"tempc=21.0"));
    assert!(parts.contains(&"windspeedms=3.2"));
}

#[test]
fn us_station_converts_to_wire_units() {
    let mut cache = ValueCache::new();
    let packet: Packet = serde_json::from_value(json!({
        "dateTime": 500,
        "usUnits": 1,
        "outTemp": 70.0,
        "windSpeed": 10.0,
        "dayRain": 0.1,
        "barometer": 29.92,
    }))
    .unwrap();
    cache.update(&packet).unwrap();

    let wire = StandardConverter
        .convert(&cache.snapshot(Some(500), DEFAULT_CACHE_STALE), UnitSystem::MetricWx)
        .unwrap();
    let query = RequestFormatter.render(&wire);

    assert!(query.contains("tempc=21.1"));
    assert!(query.contains("windspeedms=4.5"));
    assert!(query.contains("dailyrainmm=2.54"));
    assert!(query.contains("baromhpa=1013.207"));
}

#[test]
fn stale_fields_drop_out_of_the_query() {
    let mut cache = ValueCache::new();
    cache
        .update(&Packet::new(0, UnitSystem::MetricWx).with(Field::SoilTemp1, 12.0))
        .unwrap();
    cache
        .update(&Packet::new(900, UnitSystem::MetricWx).with(Field::OutTemp, 18.0))
        .unwrap();

    let snapshot = cache.snapshot(Some(1000), DEFAULT_CACHE_STALE);
    assert_eq!(snapshot.get(&Field::SoilTemp1), Some(FieldValue::Stale));

    let query = RequestFormatter.render(&snapshot);
    assert_eq!(query, "dateutc=now&tempc=18.0");
}

#[test]
fn rejected_packet_leaves_queue_contents_alone() {
    let mut cache = ValueCache::new();
    let (producer, consumer) = upload_queue(10);

    let good = Packet::new(10, UnitSystem::Metric).with(Field::OutHumidity, 50.0);
    cache.update(&good).unwrap();
    producer.push(cache.snapshot(Some(10), DEFAULT_CACHE_STALE));

    let bad = Packet::new(11, UnitSystem::Us).with(Field::OutHumidity, 99.0);
    assert!(cache.update(&bad).is_err());

    let item = consumer.try_pop().unwrap();
    assert_eq!(item.snapshot().value(&Field::OutHumidity), Some(50.0));
    assert!(consumer.try_pop().is_none());
}

fn field_strategy() -> impl Strategy<Value = Field> {
    prop::sample::select(Field::KNOWN.to_vec())
}

proptest! {
    #[test]
    fn merge_is_idempotent(
        values in prop::collection::vec((field_strategy(), -100.0f64..100.0), 0..10),
        ts in 0u64..10_000,
        at in 0u64..20_000,
    ) {
        let mut packet = Packet::new(ts, UnitSystem::Metric);
        for (field, value) in values {
            packet = packet.with(field, value);
        }

        let mut once = ValueCache::new();
        once.update(&packet).unwrap();

        let mut twice = ValueCache::new();
        twice.update(&packet).unwrap();
        twice.update(&packet).unwrap();

        prop_assert_eq!(
            once.snapshot(Some(at), DEFAULT_CACHE_STALE),
            twice.snapshot(Some(at), DEFAULT_CACHE_STALE)
        );
    }

    #[test]
    fn backlog_bound_keeps_newest(bound in 1usize..20, extra in 1usize..20) {
        let (producer, consumer) = upload_queue(bound);
        let cache = ValueCache::new();

        for ts in 0..(bound + extra) as u64 {
            producer.push(cache.snapshot(Some(ts), DEFAULT_CACHE_STALE));
        }

        let kept: Vec<u64> = std::iter::from_fn(|| consumer.try_pop())
            .map(|item| item.snapshot().timestamp())
            .collect();
        let expected: Vec<u64> = (extra as u64..(bound + extra) as u64).collect();
        prop_assert_eq!(kept, expected);
    }
}
