//! # In-Process Forwarder
//!
//! A single forwarding node sitting between one consumer face and a set of
//! producer applications. It is what the consumer talks to in the demo binary
//! and the integration tests.
//!
//! ## Interest Pipeline
//!
//! 1. **Content store**: the most recently used unexpired entry the interest
//!    matches (prefix and exclusion) answers at one hop
//! 2. **Producers**: tried nearest first; an answer that does not satisfy the
//!    interest is discarded and the next producer is asked
//! 3. **Nack**: `NoRoute` when nothing satisfies the interest
//!
//! Every producer answer that satisfies the interest is cached, forged or not.
//! That is the poisoning surface the consumer defends against.
//!
//! ## Security Limits
//!
//! | Limit | Purpose |
//! |-------|---------|
//! | `DEFAULT_CS_CAPACITY` | Bounded LRU content store |
//! | [`decode_packet`] bound | Malformed or oversized frames are dropped |

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::messages::{Data, Interest, Nack, NackReason, Packet, decode_packet, encode_packet};
use crate::name::Name;
use crate::producer::ProducerApp;

/// Content store capacity when none is configured.
pub const DEFAULT_CS_CAPACITY: usize = 100;

/// One-hop link delay when none is configured.
pub const DEFAULT_LINK_DELAY: Duration = Duration::from_millis(10);

/// Hop count reported for content-store hits.
const CACHE_HOPS: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub interests: u64,
    pub cache_hits: u64,
    pub producer_answers: u64,
    /// Producer answers discarded for not satisfying the interest.
    pub rejected_answers: u64,
    pub nacks: u64,
    pub malformed: u64,
}

#[derive(Debug)]
struct CacheEntry {
    data: Data,
    stored_at: Instant,
}

struct Route {
    app: Box<dyn ProducerApp>,
    hops: u32,
}

pub struct Forwarder {
    store: LruCache<Name, CacheEntry>,
    routes: Vec<Route>,
    link_delay: Duration,
    stats: ForwarderStats,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new(
            NonZeroUsize::new(DEFAULT_CS_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            DEFAULT_LINK_DELAY,
        )
    }
}

impl Forwarder {
    pub fn new(capacity: NonZeroUsize, link_delay: Duration) -> Self {
        Self {
            store: LruCache::new(capacity),
            routes: Vec::new(),
            link_delay,
            stats: ForwarderStats::default(),
        }
    }

    /// Attach a producer `hops` away. Producers are consulted in ascending
    /// hop order, ties in registration order.
    pub fn add_producer(&mut self, app: impl ProducerApp + 'static, hops: u32) {
        let hops = hops.max(1);
        info!(producer = app.label(), prefix = %app.prefix(), hops, "producer attached");
        let at = self.routes.partition_point(|r| r.hops <= hops);
        self.routes.insert(
            at,
            Route {
                app: Box::new(app),
                hops,
            },
        );
    }

    pub fn stats(&self) -> ForwarderStats {
        self.stats
    }

    pub fn cached(&self) -> usize {
        self.store.len()
    }

    /// Resolve one interest into the packet sent back to the consumer.
    pub fn process_interest(&mut self, interest: &Interest, now: Instant) -> Packet {
        self.stats.interests += 1;

        if let Some(mut data) = self.lookup(interest, now) {
            self.stats.cache_hits += 1;
            debug!(interest = %interest, name = %data.name, "content store hit");
            data.hop_count = Some(CACHE_HOPS);
            return Packet::Data(data);
        }

        for route in &mut self.routes {
            if !route.app.prefix().is_prefix_of(&interest.name) {
                continue;
            }
            let Some(mut data) = route.app.on_interest(interest) else {
                continue;
            };
            if !interest.matches(&data) {
                self.stats.rejected_answers += 1;
                trace!(
                    producer = route.app.label(),
                    name = %data.name,
                    "answer does not satisfy interest, trying next producer"
                );
                continue;
            }
            self.stats.producer_answers += 1;
            self.store.put(
                data.name.clone(),
                CacheEntry {
                    data: data.clone(),
                    stored_at: now,
                },
            );
            data.hop_count = Some(route.hops);
            debug!(producer = route.app.label(), name = %data.name, hops = route.hops, "producer answer");
            return Packet::Data(data);
        }

        self.stats.nacks += 1;
        debug!(interest = %interest, "no producer satisfies interest");
        Packet::Nack(Nack {
            interest: interest.clone(),
            reason: NackReason::NoRoute,
        })
    }

    fn lookup(&mut self, interest: &Interest, now: Instant) -> Option<Data> {
        let mut expired = Vec::new();
        let mut hit = None;
        for (name, entry) in self.store.iter() {
            if entry.data.is_expired_after(now.saturating_duration_since(entry.stored_at)) {
                expired.push(name.clone());
            } else if hit.is_none() && interest.matches(&entry.data) {
                hit = Some(name.clone());
            }
        }
        for name in expired {
            self.store.pop(&name);
        }
        let name = hit?;
        self.store.get(&name).map(|entry| entry.data.clone())
    }

    /// Reply delay for a packet leaving this node.
    fn reply_delay(&self, packet: &Packet) -> Duration {
        match packet {
            Packet::Data(data) => self.link_delay * data.hop_count.unwrap_or(CACHE_HOPS),
            _ => self.link_delay,
        }
    }

    /// Serve frames from `inbound` until it closes, delivering replies on
    /// `outbound` after the link delay. The task yields final statistics.
    pub fn spawn(
        self,
        inbound: mpsc::Receiver<Vec<u8>>,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> JoinHandle<ForwarderStats> {
        tokio::spawn(self.run(inbound, outbound))
    }

    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        outbound: mpsc::Sender<Vec<u8>>,
    ) -> ForwarderStats {
        while let Some(frame) = inbound.recv().await {
            let interest = match decode_packet(&frame) {
                Ok(Packet::Interest(interest)) => interest,
                Ok(other) => {
                    warn!(packet = ?other, "forwarder expects interests only, dropping");
                    self.stats.malformed += 1;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, len = frame.len(), "malformed frame, dropping");
                    self.stats.malformed += 1;
                    continue;
                }
            };

            let now = tokio::time::Instant::now().into_std();
            let reply = self.process_interest(&interest, now);
            let delay = self.reply_delay(&reply);
            let bytes = match encode_packet(&reply) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "failed to encode reply");
                    continue;
                }
            };
            let tx = outbound.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(bytes).await;
            });
        }
        debug!(stats = ?self.stats, "forwarder shutting down");
        self.stats
    }
}
