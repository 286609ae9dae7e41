//! End-to-end datastream tests.
//!
//! A run streams sequence appends through a real socket (local domain socket
//! or INET loopback) to a server whose batch writer persists them into a
//! store; the stored experiment is then reloaded and checked.

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use trackstream::streaming::{Address, StreamClient, StreamServer, WireMessage, WriterMonitor};
use trackstream::{
    DatastreamConfig, Error, Experiment, FileStore, IdGenerator, IfExists, MemoryStore, Record,
    Store, Value, WireFormat,
};

const WAIT: Duration = Duration::from_secs(10);

fn fast(mut config: DatastreamConfig) -> DatastreamConfig {
    config.client_send_throttle = 0.0001;
    config.server_recv_throttle = 0.0001;
    config.writer_persist_throttle = 0.02;
    config
}

/// Experiment with one run holding an empty "metrics" sequence, already stored
fn stored_experiment(store: &dyn Store) -> Experiment {
    let mut ids = IdGenerator::sequential(100, 1);
    let mut experiment = Experiment::new("datastream", &mut ids);
    experiment.add_run(&mut ids).init_sequence("metrics");
    store.persist(&experiment, IfExists::Fail).unwrap();
    experiment
}

fn wait_processed(monitor: &WriterMonitor, expected: u64) {
    let deadline = Instant::now() + WAIT;
    while monitor.stats().processed < expected {
        assert!(
            Instant::now() < deadline,
            "writer processed {} of {} messages",
            monitor.stats().processed,
            expected
        );
        thread::sleep(Duration::from_millis(5));
    }
}

fn stream_ten_values(experiment: &mut Experiment, config: &DatastreamConfig) {
    let run = experiment.first_run_mut().unwrap();
    run.stream_scope(config, |run| {
        let metrics = run.sequence_mut("metrics").unwrap();
        for i in 0..10 {
            metrics.append([("v", i)])?;
        }
        Ok(())
    })
    .unwrap();
}

fn stored_values(store: &dyn Store, experiment: &Experiment) -> Vec<i64> {
    let mut loaded = store.load(&experiment.id_experiment).unwrap();
    let run = loaded.first_run_mut().unwrap();
    assert!(!run.sequence_mut("metrics").unwrap().is_streaming());

    let table = run.sequence_mut("metrics").unwrap().table().sorted_by_idx();
    assert_eq!(table.idx(), &(0..10).collect::<Vec<u64>>()[..]);
    table
        .column("v")
        .unwrap()
        .iter()
        .map(|v| v.as_ref().and_then(Value::as_i64).unwrap())
        .collect()
}

fn round_trip(server_config: DatastreamConfig, client_config: impl FnOnce(&Address) -> DatastreamConfig) {
    let store = MemoryStore::new();
    let mut experiment = stored_experiment(&store);

    let mut server = StreamServer::new(&server_config, store.clone()).unwrap();
    server.start(false).unwrap();
    let client_config = client_config(server.local_address().unwrap());

    stream_ten_values(&mut experiment, &client_config);

    // Local copy keeps its own rows as well
    let local = experiment.first_run_mut().unwrap();
    assert_eq!(local.sequence_mut("metrics").unwrap().size(), 10);
    assert!(!local.sequence_mut("metrics").unwrap().is_streaming());

    wait_processed(server.writer_monitor(), 10);
    assert!(server.writer_monitor().received().wait_timeout(WAIT));
    let stats = server.stop().unwrap();
    assert_eq!(stats.messages, 10);
    assert_eq!(stats.writer.dropped, 0);

    assert_eq!(stored_values(&store, &experiment), (0..10).collect::<Vec<i64>>());
}

#[test]
fn test_round_trip_over_local_socket() {
    let dir = TempDir::new().unwrap();
    let config = fast(DatastreamConfig::local(dir.path().join("ds.sock")));
    round_trip(config.clone(), |_| config);
}

#[test]
fn test_round_trip_over_inet_loopback() {
    let config = fast(DatastreamConfig::inet("127.0.0.1:0"));
    round_trip(config, |bound| fast(DatastreamConfig::inet(bound.to_string())));
}

#[test]
fn test_round_trip_with_json_wire_format() {
    let dir = TempDir::new().unwrap();
    let mut config = fast(DatastreamConfig::local(dir.path().join("json.sock")));
    config.wire_format = WireFormat::Json;
    round_trip(config.clone(), |_| config);
}

#[test]
fn test_round_trip_into_file_store() {
    let dir = TempDir::new().unwrap();
    let config = fast(DatastreamConfig::local(dir.path().join("file.sock")));
    let store = FileStore::open(dir.path().join("experiments")).unwrap();
    let mut experiment = stored_experiment(&store);

    let mut server = StreamServer::new(&config, store.clone()).unwrap();
    server.start(false).unwrap();
    stream_ten_values(&mut experiment, &config);
    wait_processed(server.writer_monitor(), 10);
    server.stop().unwrap();

    // A fresh store over the same directory sees the streamed rows
    let reopened = FileStore::open(dir.path().join("experiments")).unwrap();
    assert_eq!(stored_values(&reopened, &experiment), (0..10).collect::<Vec<i64>>());
}

#[test]
fn test_local_append_after_reload_continues_streamed_index() {
    let dir = TempDir::new().unwrap();
    let config = fast(DatastreamConfig::local(dir.path().join("reload.sock")));
    let store = MemoryStore::new();
    let mut experiment = stored_experiment(&store);

    let mut server = StreamServer::new(&config, store.clone()).unwrap();
    server.start(false).unwrap();
    stream_ten_values(&mut experiment, &config);
    wait_processed(server.writer_monitor(), 10);
    server.stop().unwrap();

    let mut loaded = store.load(&experiment.id_experiment).unwrap();
    let metrics = loaded.first_run_mut().unwrap().sequence_mut("metrics").unwrap();
    metrics.append([("v", 99)]).unwrap();

    let idx = metrics.table().sorted_by_idx().idx().to_vec();
    assert_eq!(idx, (0..11).collect::<Vec<u64>>());
}

#[test]
fn test_oversized_payload_never_reaches_socket() {
    let config = fast(DatastreamConfig::inet("127.0.0.1:9"));
    let client = StreamClient::new(&config, "exp", "run").unwrap();

    let mut values = BTreeMap::new();
    values.insert("blob".to_string(), Value::Bytes(vec![7u8; 2000]));
    let err = client
        .send_sequence_record("metrics", &Record::new(0, 0, values))
        .unwrap_err();

    match err {
        Error::PayloadTooLarge { size, budget } => {
            assert_eq!(budget, 1500);
            assert!(size > budget);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(client.stats().messages, 0);
}

#[test]
fn test_oversized_append_fails_at_call_site() {
    let dir = TempDir::new().unwrap();
    let config = fast(DatastreamConfig::local(dir.path().join("big.sock")));
    let mut ids = IdGenerator::sequential(0, 1);
    let mut experiment = Experiment::new("big", &mut ids);
    let run = experiment.add_run(&mut ids);
    run.init_sequence("metrics");

    let result = run.stream_scope(&config, |run| {
        run.sequence_mut("metrics")
            .unwrap()
            .append([("blob", vec![0u8; 8192])])
    });
    assert!(matches!(result, Err(Error::PayloadTooLarge { budget: 4096, .. })));

    // Rejected records are not kept locally either
    let seq = run.sequence_mut("metrics").unwrap();
    assert_eq!(seq.size(), 0);
    assert!(!seq.is_streaming());
}

#[test]
fn test_unresolvable_message_dropped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let config = fast(DatastreamConfig::local(dir.path().join("drop.sock")));
    let store = MemoryStore::new();
    let mut experiment = stored_experiment(&store);
    let id_run = experiment.first_run_mut().unwrap().id_run.clone();

    let mut server = StreamServer::new(&config, store.clone()).unwrap();
    server.start(false).unwrap();

    let stale = StreamClient::new(&config, "never-persisted", id_run.as_str()).unwrap();
    stale
        .send(&WireMessage::new(
            "never-persisted",
            id_run.as_str(),
            "metrics",
            Record::new(0, 0, BTreeMap::new()),
        ))
        .unwrap();
    stale.close();
    wait_processed(server.writer_monitor(), 1);

    // The writer keeps going after the drop
    stream_ten_values(&mut experiment, &config);
    wait_processed(server.writer_monitor(), 11);

    let stats = server.stop().unwrap();
    assert_eq!(stats.writer.processed, 11);
    assert_eq!(stats.writer.dropped, 1);
    assert!(!store.contains("never-persisted").unwrap());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_stop_persists_everything_processed() {
    let dir = TempDir::new().unwrap();
    let mut config = fast(DatastreamConfig::local(dir.path().join("stop.sock")));
    config.writer_persist_throttle = 0.2;
    let store = MemoryStore::new();
    let mut experiment = stored_experiment(&store);

    let mut server = StreamServer::new(&config, store.clone()).unwrap();
    server.start(false).unwrap();
    stream_ten_values(&mut experiment, &config);

    // Wait until every datagram has left the socket, then stop during the
    // writer's warm-up or pause
    let deadline = Instant::now() + WAIT;
    while server.messages() < 10 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    let stats = server.stop().unwrap();

    let mut loaded = store.load(&experiment.id_experiment).unwrap();
    let rows = loaded
        .first_run_mut()
        .unwrap()
        .sequence_mut("metrics")
        .unwrap()
        .size();
    assert_eq!(rows as u64, stats.writer.processed);
}

#[test]
fn test_lifecycle_errors() {
    let dir = TempDir::new().unwrap();
    let config = fast(DatastreamConfig::local(dir.path().join("life.sock")));

    let mut server = StreamServer::new(&config, MemoryStore::new()).unwrap();
    assert!(matches!(
        server.stop().unwrap_err(),
        Error::InvalidState { component: "server", .. }
    ));

    server.start(false).unwrap();
    assert!(matches!(
        server.start(false).unwrap_err(),
        Error::InvalidState { state: "listening", .. }
    ));
    server.stop().unwrap();
}

#[test]
fn test_second_server_on_same_port_fails_to_bind() {
    let config = fast(DatastreamConfig::inet("127.0.0.1:0"));
    let mut first = StreamServer::new(&config, MemoryStore::new()).unwrap();
    first.start(false).unwrap();
    let bound = first.local_address().unwrap().to_string();

    let mut second =
        StreamServer::new(&fast(DatastreamConfig::inet(bound)), MemoryStore::new()).unwrap();
    assert!(matches!(second.start(false).unwrap_err(), Error::Bind { .. }));

    first.stop().unwrap();
}
