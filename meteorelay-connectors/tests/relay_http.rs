//! HTTP Integration Tests for the Relay
//!
//! Each test stands up a local mock collector and drives the real ureq
//! connector against it, either directly, through an [`UploadWorker`], or
//! through a full [`RelayService`].
//!
//! ## Test Scope
//!
//! - Connector: response body and status interpretation
//! - Worker: retry budget against a collector that keeps rejecting
//! - Service: packet in, GET with the expected query string out

use std::sync::atomic::Ordering;
use std::time::Duration;

use meteorelay_connectors::{
    Connector, Delivery, HttpConnector, PostError, PostOutcome, RelayConfig, RelayService,
    UploadWorker,
};
use meteorelay_core::{upload_queue, Field, Packet, UnitSystem, ValueCache};
use mockito::Matcher;

// ===== TEST CONSTANTS =====

const KEY: &str = "k3y";
const ID: &str = "st4tion";
const OBSERVE_PATH: &str = "/v1/observe/k3y/st4tion";

fn collector_config(server: &mockito::Server) -> RelayConfig {
    RelayConfig::new(KEY, ID)
        .server_url(format!("{}/v1/observe/<key>/<id>", server.url()))
        .post_interval_secs(0.0)
        .retry_wait_secs(0.0)
        .timeout_secs(5.0)
}

fn metricwx_packet(ts: u64) -> Packet {
    Packet::new(ts, UnitSystem::MetricWx)
        .with(Field::OutTemp, 21.0)
        .with(Field::WindSpeed, 3.2)
        .with(Field::OutHumidity, 55.0)
}

// ===== CONNECTOR =====

#[test]
fn test_connector_accepts_ok_body() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", OBSERVE_PATH)
        .match_query(Matcher::UrlEncoded("dateutc".into(), "now".into()))
        .with_status(200)
        .with_body("200 OK\n")
        .expect(1)
        .create();

    let mut connector = HttpConnector::new(Duration::from_secs(5));
    let url = format!("{}{}?dateutc=now&tempc=21.0", server.url(), OBSERVE_PATH);

    assert_eq!(connector.send(&url), Delivery::Delivered);
    assert_eq!(connector.stats().messages_sent, 1);
    mock.assert();
}

#[test]
fn test_connector_rejects_error_body() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_body("ERROR invalid key")
        .create();

    let mut connector = HttpConnector::new(Duration::from_secs(5));
    let delivery = connector.send(&format!("{}{}?dateutc=now", server.url(), OBSERVE_PATH));

    assert_eq!(
        delivery,
        Delivery::RejectedByServer("server returned 'ERROR invalid key'".into())
    );
    assert_eq!(
        connector.stats().last_error.as_deref(),
        Some("server returned 'ERROR invalid key'")
    );
}

#[test]
fn test_connector_rejects_error_status() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(500)
        .with_body("OK but broken")
        .create();

    let mut connector = HttpConnector::new(Duration::from_secs(5));
    let delivery = connector.send(&format!("{}{}?dateutc=now", server.url(), OBSERVE_PATH));

    match delivery {
        Delivery::RejectedByServer(reason) => assert!(reason.starts_with("HTTP 500")),
        other => panic!("expected rejection, got {:?}", other),
    }
}

// ===== WORKER =====

#[test]
fn test_worker_gives_up_after_max_tries() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", OBSERVE_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("ERROR invalid key")
        .expect(3)
        .create();

    let config = collector_config(&server).max_tries(3);
    let (producer, consumer) = upload_queue(config.max_backlog);
    let connector = HttpConnector::new(config.request_timeout());
    let mut worker = UploadWorker::new(&config, consumer, connector);

    let mut cache = ValueCache::new();
    let packet = metricwx_packet(1000);
    cache.update(&packet).unwrap();
    producer.push(cache.snapshot(Some(packet.date_time), config.cache_stale));
    drop(producer);

    worker.run();

    mock.assert();
    assert_eq!(worker.stats().failed.load(Ordering::Relaxed), 1);
    assert_eq!(worker.stats().attempts.load(Ordering::Relaxed), 3);
    assert_eq!(worker.connector().stats().messages_failed, 3);
}

#[test]
fn test_worker_post_reports_last_rejection() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("GET", Matcher::Any)
        .with_status(200)
        .with_body("ERROR station unknown")
        .create();

    let config = collector_config(&server).max_tries(2);
    let (_producer, consumer) = upload_queue(0);
    let mut worker = UploadWorker::new(&config, consumer, HttpConnector::new(config.request_timeout()));

    let outcome = worker.post(&format!("{}?dateutc=now", config.endpoint()));

    assert_eq!(
        outcome,
        PostOutcome::Failed {
            attempts: 2,
            last_error: PostError::Rejected("server returned 'ERROR station unknown'".into()),
        }
    );
}

// ===== SERVICE =====

#[test]
fn test_service_relays_packet_as_query() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", OBSERVE_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("dateutc".into(), "now".into()),
            Matcher::UrlEncoded("tempc".into(), "21.0".into()),
            Matcher::UrlEncoded("windspeedms".into(), "3.2".into()),
            Matcher::UrlEncoded("humidity".into(), "55".into()),
        ]))
        .with_status(200)
        .with_body("200 OK")
        .expect(1)
        .create();

    let mut service = RelayService::start(collector_config(&server)).unwrap();
    service.new_loop_packet(&metricwx_packet(1000)).unwrap();
    service.close();

    mock.assert();
    assert_eq!(service.stats().posted.load(Ordering::Relaxed), 1);
}

#[test]
fn test_service_skip_upload_sends_nothing() {
    let mut server = mockito::Server::new();
    let mock = server.mock("GET", Matcher::Any).expect(0).create();

    let config = collector_config(&server).skip_upload(true);
    let mut service = RelayService::start(config).unwrap();
    service.new_loop_packet(&metricwx_packet(1000)).unwrap();
    service.close();

    mock.assert();
    assert_eq!(service.stats().posted.load(Ordering::Relaxed), 1);
}
