//! # Client Driver
//!
//! Runs a [`Consumer`] on tokio using the handle/actor split:
//!
//! - [`Client`] is the cloneable handle. It feeds inbound frames and queries
//!   to the actor over an mpsc channel.
//! - `ClientActor` owns the consumer and processes one command at a time, so
//!   the state machine never sees concurrent events.
//!
//! ## Face
//!
//! The actor's face encodes interests as bincode frames onto an outbound
//! channel and implements timers as sleeping tasks that post back into the
//! command channel. Timer tasks hold only a weak sender, so an idle client
//! shuts down once every handle is dropped.
//!
//! A cancelled timer may already have posted its command. The actor forgets
//! the timer id on cancel and ignores expiries for ids it does not know.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::consumer::{Consumer, ConsumerStats, ModeKind};
use crate::messages::{Interest, Packet, decode_packet, encode_packet};
use crate::protocols::{DelayTracer, Face, NoopTracer, Timer, TimerId};

/// Capacity of the command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Point-in-time view of a running client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientStatus {
    pub mode: ModeKind,
    pub next_sequence: u32,
    pub outstanding: usize,
    pub rto: Duration,
    pub finished: bool,
}

enum Command {
    Frame(Vec<u8>),
    Expired { id: TimerId, timer: Timer },
    Stats(oneshot::Sender<ConsumerStats>),
    Status(oneshot::Sender<ClientStatus>),
    Quit,
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Clone, Debug)]
pub struct Client {
    cmd_tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Frame(bytes) => write!(f, "Frame({} bytes)", bytes.len()),
            Command::Expired { id, timer } => write!(f, "Expired({id:?}, {timer:?})"),
            Command::Stats(_) => write!(f, "Stats"),
            Command::Status(_) => write!(f, "Status"),
            Command::Quit => write!(f, "Quit"),
        }
    }
}

impl Client {
    /// Start a client whose interests leave as encoded frames on `outbound`.
    pub fn spawn(config: ClientConfig, outbound: mpsc::Sender<Vec<u8>>) -> Result<Self, ConfigError> {
        Self::spawn_with_tracer(config, outbound, NoopTracer)
    }

    pub fn spawn_with_tracer<T: DelayTracer + 'static>(
        config: ClientConfig,
        outbound: mpsc::Sender<Vec<u8>>,
        tracer: T,
    ) -> Result<Self, ConfigError> {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let face = ChannelFace::new(outbound, cmd_tx.downgrade());
        let consumer = Consumer::with_tracer(config, face, tracer)?;
        let actor = ClientActor { consumer };
        tokio::spawn(actor.run(cmd_rx));
        Ok(Self { cmd_tx })
    }

    /// Hand an inbound frame (data or nack) to the consumer.
    pub async fn deliver(&self, frame: Vec<u8>) -> Result<()> {
        self.cmd_tx
            .send(Command::Frame(frame))
            .await
            .map_err(|_| anyhow!("client actor closed"))
    }

    pub async fn stats(&self) -> Result<ConsumerStats> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stats(tx))
            .await
            .map_err(|_| anyhow!("client actor closed"))?;
        rx.await.map_err(|_| anyhow!("client actor closed"))
    }

    pub async fn status(&self) -> Result<ClientStatus> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status(tx))
            .await
            .map_err(|_| anyhow!("client actor closed"))?;
        rx.await.map_err(|_| anyhow!("client actor closed"))
    }

    /// Stop the consumer and its timers. Later calls fail.
    pub async fn quit(&self) {
        let _ = self.cmd_tx.send(Command::Quit).await;
    }
}

// ============================================================================
// Actor
// ============================================================================

struct ClientActor<T: DelayTracer> {
    consumer: Consumer<ChannelFace, T>,
}

impl<T: DelayTracer> ClientActor<T> {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        self.consumer.start();

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Frame(bytes) => self.handle_frame(&bytes),
                Command::Expired { id, timer } => {
                    if self.consumer.face_mut().take_fired(id) {
                        self.consumer.on_timer(timer);
                    }
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.consumer.stats());
                }
                Command::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Command::Quit => {
                    debug!("client actor quitting");
                    break;
                }
            }
        }

        self.consumer.stop();
        self.consumer.face_mut().cancel_all();
        info!(stats = ?self.consumer.stats(), "client stopped");
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        match decode_packet(bytes) {
            Ok(Packet::Data(data)) => self.consumer.on_data(data),
            Ok(Packet::Nack(nack)) => self.consumer.on_nack(nack),
            Ok(Packet::Interest(interest)) => {
                debug!(name = %interest.name, "consumer does not serve interests, dropping");
            }
            Err(e) => warn!(error = %e, len = bytes.len(), "malformed frame, dropping"),
        }
    }

    fn status(&self) -> ClientStatus {
        ClientStatus {
            mode: self.consumer.mode().kind(),
            next_sequence: self.consumer.next_sequence(),
            outstanding: self.consumer.tracker().outstanding(),
            rto: self.consumer.rto(),
            finished: self.consumer.is_finished(),
        }
    }
}

// ============================================================================
// Face
// ============================================================================

struct ChannelFace {
    outbound: mpsc::Sender<Vec<u8>>,
    cmd_tx: mpsc::WeakSender<Command>,
    timers: HashMap<TimerId, AbortHandle>,
    next_timer: u64,
}

impl ChannelFace {
    fn new(outbound: mpsc::Sender<Vec<u8>>, cmd_tx: mpsc::WeakSender<Command>) -> Self {
        Self {
            outbound,
            cmd_tx,
            timers: HashMap::new(),
            next_timer: 0,
        }
    }

    /// Forget a timer that fired. False if it was cancelled in the meantime.
    fn take_fired(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    fn cancel_all(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Face for ChannelFace {
    fn send_interest(&mut self, interest: Interest) {
        let name = interest.name.clone();
        let bytes = match encode_packet(&Packet::Interest(interest)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(name = %name, error = %e, "failed to encode interest");
                return;
            }
        };
        // A full or closed link loses the interest; the retransmission
        // timeout recovers it.
        if let Err(e) = self.outbound.try_send(bytes) {
            warn!(name = %name, error = %e, "outbound link rejected interest");
        }
    }

    fn schedule_after(&mut self, delay: Duration, timer: Timer) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        let cmd_tx = self.cmd_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = cmd_tx.upgrade() {
                let _ = tx.send(Command::Expired { id, timer }).await;
            }
        });
        self.timers.insert(id, task.abort_handle());
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }

    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}
