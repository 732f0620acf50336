//! # Wire Packets
//!
//! This module defines the packet types exchanged between a consumer and the
//! forwarding layer. Packets cross a face as bincode frames decoded with size
//! limits to prevent memory exhaustion.
//!
//! ## Packet Types
//!
//! | Packet | Direction | Purpose |
//! |--------|-----------|---------|
//! | [`Interest`] | consumer → network | Request content by name |
//! | [`Data`] | network → consumer | Named payload with provenance marker |
//! | [`Nack`] | network → consumer | Network-level rejection of an interest |
//!
//! ## Security Limits
//!
//! - `MAX_PAYLOAD_SIZE`: largest content payload a producer may emit
//! - `MAX_PACKET_SIZE`: deserialization bound (payload plus framing)
//! - All decoding goes through [`decode_packet`] with the bound enforced

use std::fmt;
use std::time::Duration;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::exclude::Exclude;
use crate::name::Name;

/// Maximum content payload carried by a single data packet.
pub const MAX_PAYLOAD_SIZE: usize = 8800;

/// Maximum encoded packet size accepted by [`decode_packet`].
pub const MAX_PACKET_SIZE: u64 = (MAX_PAYLOAD_SIZE as u64) + 1024;

/// Default interest lifetime.
pub const DEFAULT_INTEREST_LIFETIME: Duration = Duration::from_secs(2);

/// Signature type of a plain digest signature.
pub const SIGNATURE_TYPE_DIGEST_SHA256: u8 = 0;

/// Signature type outside every assigned range; no key can check it.
pub const SIGNATURE_TYPE_UNVERIFIABLE: u8 = 255;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PACKET_SIZE)
        .with_fixint_encoding()
}

pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, bincode::Error> {
    bincode_options().serialize(packet)
}

/// Decode with size bounds enforced.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, bincode::Error> {
    bincode_options().deserialize(bytes)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interest {
    pub name: Name,
    pub nonce: u32,
    pub lifetime: Duration,
    pub exclude: Option<Exclude>,
}

impl Interest {
    pub fn new(name: Name, nonce: u32, lifetime: Duration) -> Self {
        Self {
            name,
            nonce,
            lifetime,
            exclude: None,
        }
    }

    pub fn with_exclude(mut self, exclude: Exclude) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Whether `data` satisfies this interest: the interest name is a prefix
    /// of the data name and the component right after it is not excluded.
    pub fn matches(&self, data: &Data) -> bool {
        if !self.name.is_prefix_of(&data.name) {
            return false;
        }
        match (&self.exclude, data.name.get(self.name.len())) {
            (Some(exclude), Some(next)) => !exclude.is_excluded(next),
            _ => true,
        }
    }
}

impl fmt::Display for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?nonce={:08x}", self.name, self.nonce)?;
        if let Some(exclude) = &self.exclude {
            write!(f, "&exclude={exclude}")?;
        }
        Ok(())
    }
}

/// Provenance marker attached to every data packet.
///
/// Nothing in this crate checks the signature; the marker is carried so that
/// forged packets are distinguishable in logs and traces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature_type: u8,
    pub key_locator: Option<Name>,
    pub value: Vec<u8>,
}

impl SignatureInfo {
    pub fn new(signature_type: u8, key_locator: Option<Name>, value: Vec<u8>) -> Self {
        Self {
            signature_type,
            key_locator,
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub name: Name,
    pub content: Vec<u8>,
    pub freshness: Duration,
    pub signature: SignatureInfo,
    /// Hops travelled from the answering cache or producer, if tagged.
    pub hop_count: Option<u32>,
}

impl Data {
    pub fn payload_size(&self) -> usize {
        self.content.len()
    }

    /// Whether a cached copy of this data has outlived its freshness period.
    /// A zero freshness period never expires.
    pub fn is_expired_after(&self, age: Duration) -> bool {
        !self.freshness.is_zero() && age >= self.freshness
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NackReason {
    NoRoute,
    Duplicate,
    Congestion,
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackReason::NoRoute => write!(f, "no route"),
            NackReason::Duplicate => write!(f, "duplicate"),
            NackReason::Congestion => write!(f, "congestion"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub interest: Interest,
    pub reason: NackReason,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Interest(Interest),
    Data(Data),
    Nack(Nack),
}
