//! # ndnguard - Cache-Poisoning-Aware Named-Data Consumer
//!
//! ndnguard requests numbered content items by name and defends against
//! forged answers planted in network caches:
//!
//! - **Classification**: answers at or below the declared genuine payload size
//!   are suspect
//! - **Verification**: a suspect answer triggers a request for verification
//!   material before it is judged
//! - **Pursuit**: a forged answer is re-requested with an exclusion filter that
//!   names the forged variant, so caches and producers skip it
//!
//! ## Architecture
//!
//! The protocol is a sans-IO state machine ([`Consumer`]) driven through the
//! [`Face`] capability trait. [`Client`] runs it on tokio using the actor
//! pattern: a cloneable handle talks to a private actor that owns all mutable
//! state and processes one event at a time.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `name` | Hierarchical names and components |
//! | `exclude` | Exclusion filters and the forged-component rule |
//! | `messages` | Interest, Data and Nack wire packets with bounded bincode framing |
//! | `classify` | Size heuristic for genuine vs suspect answers |
//! | `tracker` | Outstanding requests, delay samples and RTO estimation |
//! | `config` | Consumer tunables and validation |
//! | `protocols` | `Face` and `DelayTracer` capability traits |
//! | `consumer` | Detection-and-recovery state machine |
//! | `client` | Tokio actor driving a consumer over frame channels |
//! | `tracer` | In-memory and tabular delay tracers |
//! | `producer` | Legitimate and forging producer applications |
//! | `forwarder` | In-process forwarder with an LRU content store |

mod classify;
mod client;
mod config;
mod consumer;
mod exclude;
mod forwarder;
mod messages;
mod name;
mod producer;
mod protocols;
mod tracer;
mod tracker;

pub use classify::{Classification, classify, classify_size};
pub use client::{Client, ClientStatus};
pub use config::{
    ClientConfig, ConfigError, DEFAULT_GOOD_DATA_SIZE, DEFAULT_REACTION_TIME, DEFAULT_RETX_TIMER,
    DEFAULT_WAIT_TIME, VerificationPolicy,
};
pub use consumer::{Consumer, ConsumerStats, Dispute, Mode, ModeKind};
pub use exclude::{DEFAULT_EXCLUDE_OFFSET, Exclude, ExcludeError, exclusion_for};
pub use forwarder::{DEFAULT_CS_CAPACITY, DEFAULT_LINK_DELAY, Forwarder, ForwarderStats};
pub use messages::{
    DEFAULT_INTEREST_LIFETIME, Data, Interest, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE, Nack, NackReason,
    Packet, SIGNATURE_TYPE_DIGEST_SHA256, SIGNATURE_TYPE_UNVERIFIABLE, SignatureInfo,
    decode_packet, encode_packet,
};
pub use name::{Component, Name, NameError};
pub use producer::{DEFAULT_PAYLOAD_SIZE, EVIL_COMPONENT, EvilProducer, Producer, ProducerApp};
pub use protocols::{DelayTracer, Face, NoopTracer, Timer, TimerId};
pub use tracer::{DelayLog, DelayTraceWriter, TRACE_HEADER, TracedDelay};
pub use tracker::{
    DEFAULT_INITIAL_RTO, DEFAULT_MAX_RTO, DEFAULT_MIN_RTO, DelaySample, RequestKey, RttEstimator,
    Tracker,
};
