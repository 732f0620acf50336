//! Response classification.
//!
//! Suspicion is decided from payload size alone: a response whose payload is
//! no larger than the operator-declared size of genuine content is treated as
//! possibly forged. Signatures are never checked here, so a forged payload
//! larger than the threshold is accepted as genuine.

use std::fmt;

use crate::messages::Data;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Genuine,
    Suspect,
}

impl Classification {
    pub fn is_suspect(self) -> bool {
        matches!(self, Classification::Suspect)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Genuine => write!(f, "genuine"),
            Classification::Suspect => write!(f, "suspect"),
        }
    }
}

/// Suspect iff `payload_size <= good_data_size`.
#[inline]
pub fn classify_size(payload_size: usize, good_data_size: usize) -> Classification {
    if payload_size <= good_data_size {
        Classification::Suspect
    } else {
        Classification::Genuine
    }
}

pub fn classify(data: &Data, good_data_size: usize) -> Classification {
    classify_size(data.payload_size(), good_data_size)
}
