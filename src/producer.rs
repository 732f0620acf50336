//! Producer applications answering interests inside a [`Forwarder`](crate::forwarder::Forwarder).
//!
//! | Producer | Answers with |
//! |----------|--------------|
//! | [`Producer`] | Data named exactly as the interest, digest signature |
//! | [`EvilProducer`] | Data named `interest/evil`, unverifiable signature |
//!
//! A signer is a plain [`Producer`] registered under the verification name.

use std::time::Duration;

use tracing::{debug, trace};

use crate::messages::{
    Data, Interest, MAX_PAYLOAD_SIZE, SIGNATURE_TYPE_DIGEST_SHA256, SIGNATURE_TYPE_UNVERIFIABLE,
    SignatureInfo,
};
use crate::name::{Component, Name};

/// Component appended to every forged name.
pub const EVIL_COMPONENT: &str = "evil";

/// Payload size when none is configured.
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;

/// Application attached to a forwarder under a prefix.
pub trait ProducerApp: Send {
    /// Short label for logs.
    fn label(&self) -> &str;

    fn prefix(&self) -> &Name;

    /// Answer `interest`, or `None` to stay silent.
    fn on_interest(&mut self, interest: &Interest) -> Option<Data>;
}

fn signature_value(signature: u32) -> Vec<u8> {
    signature.to_be_bytes().to_vec()
}

/// Legitimate producer, also used as the signer of verification material.
#[derive(Clone, Debug)]
pub struct Producer {
    label: String,
    prefix: Name,
    payload_size: usize,
    freshness: Duration,
    signature: u32,
    key_locator: Option<Name>,
    served: u64,
}

impl Producer {
    pub fn new(label: impl Into<String>, prefix: Name) -> Self {
        Self {
            label: label.into(),
            prefix,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            freshness: Duration::ZERO,
            signature: 0,
            key_locator: None,
            served: 0,
        }
    }

    /// Payloads above [`MAX_PAYLOAD_SIZE`] are clamped.
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size.min(MAX_PAYLOAD_SIZE);
        self
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_signature(mut self, signature: u32) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_key_locator(mut self, key_locator: Name) -> Self {
        self.key_locator = Some(key_locator);
        self
    }

    pub fn served(&self) -> u64 {
        self.served
    }
}

impl ProducerApp for Producer {
    fn label(&self) -> &str {
        &self.label
    }

    fn prefix(&self) -> &Name {
        &self.prefix
    }

    fn on_interest(&mut self, interest: &Interest) -> Option<Data> {
        if !self.prefix.is_prefix_of(&interest.name) {
            return None;
        }
        self.served += 1;
        trace!(producer = %self.label, name = %interest.name, "serving interest");
        Some(Data {
            name: interest.name.clone(),
            content: vec![0u8; self.payload_size],
            freshness: self.freshness,
            signature: SignatureInfo::new(
                SIGNATURE_TYPE_DIGEST_SHA256,
                self.key_locator.clone(),
                signature_value(self.signature),
            ),
            hop_count: None,
        })
    }
}

/// Attacker answering every interest under its prefix with a forged variant.
#[derive(Clone, Debug)]
pub struct EvilProducer {
    label: String,
    prefix: Name,
    payload_size: usize,
    freshness: Duration,
    signature: u32,
    key_locator: Option<Name>,
    forged: u64,
}

impl EvilProducer {
    pub fn new(label: impl Into<String>, prefix: Name) -> Self {
        Self {
            label: label.into(),
            prefix,
            payload_size: 512,
            freshness: Duration::ZERO,
            signature: 0,
            key_locator: None,
            forged: 0,
        }
    }

    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size.min(MAX_PAYLOAD_SIZE);
        self
    }

    pub fn with_freshness(mut self, freshness: Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Signature value that will never verify.
    pub fn with_signature(mut self, signature: u32) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_key_locator(mut self, key_locator: Name) -> Self {
        self.key_locator = Some(key_locator);
        self
    }

    pub fn forged(&self) -> u64 {
        self.forged
    }
}

impl ProducerApp for EvilProducer {
    fn label(&self) -> &str {
        &self.label
    }

    fn prefix(&self) -> &Name {
        &self.prefix
    }

    fn on_interest(&mut self, interest: &Interest) -> Option<Data> {
        if !self.prefix.is_prefix_of(&interest.name) {
            return None;
        }
        self.forged += 1;
        let name = interest.name.clone().append(Component::generic(EVIL_COMPONENT));
        debug!(producer = %self.label, name = %name, "forging answer");
        Some(Data {
            name,
            content: vec![0u8; self.payload_size],
            freshness: self.freshness,
            signature: SignatureInfo::new(
                SIGNATURE_TYPE_UNVERIFIABLE,
                self.key_locator.clone(),
                signature_value(self.signature),
            ),
            hop_count: None,
        })
    }
}
