//! Integration tests for the consumer against an in-process forwarder.
//!
//! Each test wires a [`Client`] to a [`Forwarder`] holding a forging producer
//! one hop away, a genuine producer three hops away and (usually) a signer,
//! then runs the scenario on a paused tokio clock.
//!
//! Run with verbose output: RUST_LOG=debug cargo test --test cache_poisoning -- --nocapture

use std::io::Write;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use ndnguard::{
    Client, ClientConfig, ConsumerStats, DelayLog, DelayTraceWriter, DelayTracer, EvilProducer,
    Forwarder, ForwarderStats, ModeKind, Producer, TRACE_HEADER, VerificationPolicy,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One-time tracing initialization
static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::EnvFilter::from_default_env()
        } else {
            tracing_subscriber::EnvFilter::new("warn")
        };

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

const GOOD_PAYLOAD: usize = 4096;
const EVIL_PAYLOAD: usize = 1000;

fn config() -> ClientConfig {
    let mut config = ClientConfig::new(
        "/prefix/data".parse().unwrap(),
        "/prefix/key".parse().unwrap(),
    );
    config.wait_time = Duration::from_secs(2);
    config.reaction_time = Duration::from_millis(500);
    config.max_seq = Some(3);
    config
}

fn network(with_evil: bool, with_signer: bool) -> Forwarder {
    let mut forwarder = Forwarder::default();
    if with_evil {
        forwarder.add_producer(
            EvilProducer::new("evil", "/prefix/data".parse().unwrap()).with_payload_size(EVIL_PAYLOAD),
            1,
        );
    }
    forwarder.add_producer(
        Producer::new("producer", "/prefix/data".parse().unwrap()).with_payload_size(GOOD_PAYLOAD),
        3,
    );
    if with_signer {
        forwarder.add_producer(Producer::new("signer", "/prefix/key".parse().unwrap()), 2);
    }
    forwarder
}

struct Scenario {
    client: Client,
    forwarder: JoinHandle<ForwarderStats>,
}

impl Scenario {
    fn start<T: DelayTracer + 'static>(config: ClientConfig, forwarder: Forwarder, tracer: T) -> Self {
        init_tracing();
        let (to_forwarder, forwarder_rx) = mpsc::channel(64);
        let (to_client, mut client_rx) = mpsc::channel::<Vec<u8>>(64);

        let forwarder = forwarder.spawn(forwarder_rx, to_client);
        let client = Client::spawn_with_tracer(config, to_forwarder, tracer).expect("valid config");

        let pump = client.clone();
        tokio::spawn(async move {
            while let Some(frame) = client_rx.recv().await {
                if pump.deliver(frame).await.is_err() {
                    break;
                }
            }
        });

        Self { client, forwarder }
    }

    async fn run_for(&self, duration: Duration) -> ConsumerStats {
        tokio::time::sleep(duration).await;
        self.client.stats().await.expect("client running")
    }

    async fn finish(self) -> ForwarderStats {
        self.client.quit().await;
        self.forwarder.await.expect("forwarder task")
    }
}

// ============================================================================
// Detection and Recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn forged_answers_are_detected_and_replaced() {
    let log = DelayLog::new();
    let scenario = Scenario::start(config(), network(true, true), log.clone());

    let stats = scenario.run_for(Duration::from_secs(12)).await;
    assert_eq!(stats.suspect, 3);
    assert_eq!(stats.verification_requests, 3);
    assert_eq!(stats.pursuits, 3);
    assert_eq!(stats.corrective_requests, 3);
    assert_eq!(stats.genuine, 3);
    assert_eq!(stats.confirmed, 3);
    assert_eq!(stats.abandoned, 0);
    assert_eq!(stats.faults, 0);

    let status = scenario.client.status().await.unwrap();
    assert_eq!(status.mode, ModeKind::Normal);
    assert!(status.finished);
    assert_eq!(status.outstanding, 0);

    let samples = log.content_samples();
    assert_eq!(samples.len(), 3);
    for sample in &samples {
        assert_eq!(sample.retx_count, 2, "original plus corrective request");
        assert_eq!(sample.hop_count, 3, "answered by the genuine producer");
        assert!(sample.full_delay > Duration::from_secs(2));
        assert!(sample.last_delay < Duration::from_millis(100));
    }

    let fwd = scenario.finish().await;
    assert_eq!(fwd.rejected_answers, 3, "forged variant refused for every corrective request");
    assert_eq!(fwd.nacks, 0);
}

#[tokio::test(start_paused = true)]
async fn clean_network_needs_no_verification() {
    let log = DelayLog::new();
    let scenario = Scenario::start(config(), network(false, true), log.clone());

    let stats = scenario.run_for(Duration::from_secs(8)).await;
    assert_eq!(stats.confirmed, 3);
    assert_eq!(stats.suspect, 0);
    assert_eq!(stats.verification_requests, 0);
    assert_eq!(stats.interests_sent, 3);

    let samples = log.content_samples();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.retx_count == 1 && s.hop_count == 3));
    scenario.finish().await;
}

#[tokio::test(start_paused = true)]
async fn verify_all_policy_holds_genuine_answers() {
    let mut config = config();
    config.verification = VerificationPolicy::Always;
    let log = DelayLog::new();
    let scenario = Scenario::start(config, network(false, true), log.clone());

    let stats = scenario.run_for(Duration::from_secs(12)).await;
    assert_eq!(stats.genuine, 3);
    assert_eq!(stats.verification_requests, 3);
    assert_eq!(stats.pursuits, 0);
    assert_eq!(stats.confirmed, 3);
    assert!(log.content_samples().iter().all(|s| s.retx_count == 1));
    scenario.finish().await;
}

#[tokio::test(start_paused = true)]
async fn missing_signer_never_confirms_forged_items() {
    let log = DelayLog::new();
    let scenario = Scenario::start(config(), network(true, false), log.clone());

    let stats = scenario.run_for(Duration::from_secs(10)).await;
    assert_eq!(stats.confirmed, 0);
    assert_eq!(stats.pursuits, 0);
    assert!(stats.nacks >= 2, "{stats:?}");
    assert!(stats.retransmissions >= 1, "{stats:?}");
    assert!(log.content_samples().is_empty());

    let fwd = scenario.finish().await;
    assert!(fwd.cache_hits >= 1, "retransmissions hit the poisoned cache");
}

// ============================================================================
// Delay Trace
// ============================================================================

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn delay_trace_records_corrective_retransmission() {
    let buf = SharedBuf::default();
    let mut config = config();
    config.max_seq = Some(1);
    let writer = DelayTraceWriter::new(
        buf.clone(),
        tokio::time::Instant::now().into_std(),
        "consumer1",
        0,
    );
    let scenario = Scenario::start(config, network(true, true), writer);

    let stats = scenario.run_for(Duration::from_secs(4)).await;
    assert_eq!(stats.confirmed, 1);
    scenario.finish().await;

    let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], TRACE_HEADER);

    // verification material first, then the item itself
    assert!(lines[1].contains("\tkey\tLastDelay\t"));
    let full: Vec<&str> = lines
        .iter()
        .find(|l| l.contains("\t0\tFullDelay\t"))
        .expect("full delay row for item 0")
        .split('\t')
        .collect();
    assert_eq!(full[1], "consumer1");
    assert_eq!(full[7], "2");
    assert_eq!(full[8], "3");
}
