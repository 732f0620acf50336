use std::fs::File;
use std::io::BufWriter;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use ndnguard::{
    Client, ClientConfig, DelayLog, DelayTraceWriter, DelayTracer, EvilProducer, Forwarder, Name,
    Producer, VerificationPolicy,
};

/// Capacity of each in-process link.
const LINK_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "ndnguard")]
#[command(author, version, about = "Cache-poisoning scenario: one consumer, a forging producer, a genuine producer and a signer", long_about = None)]
struct Args {
    /// Content prefix requested by the consumer.
    #[arg(long, default_value = "/prefix/data")]
    prefix: Name,

    /// Name of the verification material served by the signer.
    #[arg(long, default_value = "/prefix/key")]
    key: Name,

    /// Seconds between forward requests.
    #[arg(long, default_value = "2.0")]
    wait: f64,

    /// Seconds between steps while a dispute is open.
    #[arg(long, default_value = "0.5")]
    reaction: f64,

    /// Seconds before the first request.
    #[arg(long, default_value = "0")]
    start_delay: f64,

    /// Stop issuing forward requests at this sequence number.
    #[arg(long)]
    max_seq: Option<u32>,

    /// Payload size at or below which answers are suspect.
    #[arg(long, default_value = "1024")]
    good_data_size: usize,

    /// Payload size served by the genuine producer.
    #[arg(long, default_value = "4096")]
    good_payload: usize,

    /// Payload size of forged answers.
    #[arg(long, default_value = "1000")]
    evil_payload: usize,

    /// Payload size of the verification material.
    #[arg(long, default_value = "1024")]
    signer_payload: usize,

    /// Freshness period in seconds for all producers (0 never expires).
    #[arg(long, default_value = "0")]
    freshness: f64,

    /// One-hop link delay in milliseconds.
    #[arg(long, default_value = "10")]
    link_delay_ms: u64,

    #[arg(long, default_value = "100")]
    cs_capacity: usize,

    /// Hold every answer for verification, not just suspect ones.
    #[arg(long)]
    verify_all: bool,

    /// Scenario length in seconds.
    #[arg(short, long, default_value = "20")]
    duration: u64,

    /// Write the app-delay trace table to this file.
    #[arg(short, long, value_name = "PATH")]
    trace: Option<PathBuf>,

    #[arg(long, default_value = "5")]
    telemetry_interval: u64,
}

fn secs(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid {what}: {value}"))
}

fn client_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::new(args.prefix.clone(), args.key.clone());
    config.wait_time = secs(args.wait, "wait time")?;
    config.reaction_time = secs(args.reaction, "reaction time")?;
    config.start_delay = secs(args.start_delay, "start delay")?;
    config.max_seq = args.max_seq;
    config.good_data_size = args.good_data_size;
    if args.verify_all {
        config.verification = VerificationPolicy::Always;
    }
    config.validate().context("invalid client configuration")?;
    Ok(config)
}

fn forwarder(args: &Args) -> Result<Forwarder> {
    let capacity = NonZeroUsize::new(args.cs_capacity).context("content store capacity must be non-zero")?;
    let freshness = secs(args.freshness, "freshness")?;
    let mut forwarder = Forwarder::new(capacity, Duration::from_millis(args.link_delay_ms));

    forwarder.add_producer(
        EvilProducer::new("evil", args.prefix.clone())
            .with_payload_size(args.evil_payload)
            .with_freshness(freshness)
            .with_signature(0xbad),
        1,
    );
    forwarder.add_producer(
        Producer::new("producer", args.prefix.clone())
            .with_payload_size(args.good_payload)
            .with_freshness(freshness)
            .with_key_locator(args.key.clone()),
        3,
    );
    forwarder.add_producer(
        Producer::new("signer", args.key.clone())
            .with_payload_size(args.signer_payload)
            .with_freshness(freshness),
        2,
    );
    Ok(forwarder)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    let config = client_config(&args)?;
    let forwarder = forwarder(&args)?;

    match &args.trace {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create trace file {}", path.display()))?;
            let tracer = DelayTraceWriter::new(
                BufWriter::new(file),
                Instant::now().into_std(),
                "consumer",
                0,
            );
            run(&args, config, forwarder, tracer).await?;
            info!(path = %path.display(), "delay trace written");
        }
        None => {
            let log = DelayLog::new();
            run(&args, config, forwarder, log.clone()).await?;
            if let Some(worst) = log.content_samples().iter().map(|s| s.full_delay).max() {
                info!(samples = log.len(), worst_full_delay = ?worst, "delay summary");
            }
        }
    }

    Ok(())
}

async fn run<T: DelayTracer + 'static>(
    args: &Args,
    config: ClientConfig,
    forwarder: Forwarder,
    tracer: T,
) -> Result<()> {
    let (to_forwarder, forwarder_rx) = mpsc::channel(LINK_CAPACITY);
    let (to_client, mut client_rx) = mpsc::channel(LINK_CAPACITY);

    let forwarder_task = forwarder.spawn(forwarder_rx, to_client);
    let client = Client::spawn_with_tracer(config, to_forwarder, tracer)
        .context("failed to start client")?;
    info!(prefix = %args.prefix, key = %args.key, duration = args.duration, "scenario started");

    let deadline = time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let mut interval = time::interval(Duration::from_secs(args.telemetry_interval.max(1)));

    // Graceful shutdown on Ctrl+C
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting gracefully");
                break;
            }
            _ = &mut deadline => {
                info!("scenario duration elapsed");
                break;
            }
            frame = client_rx.recv() => {
                let Some(frame) = frame else {
                    warn!("forwarder link closed");
                    break;
                };
                client.deliver(frame).await?;
            }
            _ = interval.tick() => {
                let status = client.status().await?;
                info!(
                    mode = ?status.mode,
                    next_seq = status.next_sequence,
                    outstanding = status.outstanding,
                    rto = ?status.rto,
                    "telemetry snapshot"
                );
                if status.finished && status.outstanding == 0 {
                    info!("all sequences settled");
                    break;
                }
            }
        }
    }

    let stats = client.stats().await?;
    client.quit().await;
    drop(client_rx);
    let forwarder_stats = forwarder_task.await.context("forwarder task failed")?;

    info!(
        sent = stats.interests_sent,
        retransmissions = stats.retransmissions,
        genuine = stats.genuine,
        suspect = stats.suspect,
        verifications = stats.verification_requests,
        pursuits = stats.pursuits,
        confirmed = stats.confirmed,
        abandoned = stats.abandoned,
        nacks = stats.nacks,
        faults = stats.faults,
        "consumer summary"
    );
    info!(
        interests = forwarder_stats.interests,
        cache_hits = forwarder_stats.cache_hits,
        producer_answers = forwarder_stats.producer_answers,
        rejected = forwarder_stats.rejected_answers,
        "forwarder summary"
    );
    Ok(())
}
