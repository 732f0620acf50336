//! # Hierarchical Names
//!
//! Content in a named-data network is addressed by a hierarchical [`Name`]: an
//! ordered list of [`Component`]s rendered in URI form, e.g.
//! `/prefix/data/seq=7`.
//!
//! ## Component Types
//!
//! | Type | URI form | Use |
//! |------|----------|-----|
//! | Generic | `data`, `%00%FF` | Application-chosen labels |
//! | Sequence | `seq=7` | Per-item sequence numbers appended by consumers |
//!
//! Generic components are percent-encoded outside the URI unreserved set so
//! that every name round-trips through its string form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// URI prefix marking a typed sequence-number component.
const SEQUENCE_MARKER: &str = "seq=";

/// Errors produced while parsing a name from its URI form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Names must start with `/`.
    MissingLeadingSlash,
    /// A `%` escape was truncated or not valid hex.
    InvalidEscape(String),
    /// A `seq=` component did not carry a decimal number.
    InvalidSequence(String),
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::MissingLeadingSlash => write!(f, "name must start with '/'"),
            NameError::InvalidEscape(c) => write!(f, "invalid percent escape in component {c:?}"),
            NameError::InvalidSequence(c) => write!(f, "invalid sequence number component {c:?}"),
        }
    }
}

impl std::error::Error for NameError {}

/// A single name component.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Component {
    Generic(Vec<u8>),
    Sequence(u64),
}

impl Component {
    pub fn generic(value: impl AsRef<[u8]>) -> Self {
        Component::Generic(value.as_ref().to_vec())
    }

    pub fn sequence(seq: u64) -> Self {
        Component::Sequence(seq)
    }

    /// The sequence number carried by this component, if it is typed as one.
    pub fn to_sequence_number(&self) -> Option<u64> {
        match self {
            Component::Sequence(seq) => Some(*seq),
            Component::Generic(_) => None,
        }
    }

    fn parse(segment: &str) -> Result<Self, NameError> {
        if let Some(digits) = segment.strip_prefix(SEQUENCE_MARKER) {
            return digits
                .parse::<u64>()
                .map(Component::Sequence)
                .map_err(|_| NameError::InvalidSequence(segment.to_string()));
        }

        let bytes = segment.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' {
                let hex_pair = segment
                    .get(i + 1..i + 3)
                    .filter(|pair| pair.bytes().all(|b| b.is_ascii_hexdigit()))
                    .ok_or_else(|| NameError::InvalidEscape(segment.to_string()))?;
                let byte = u8::from_str_radix(hex_pair, 16)
                    .map_err(|_| NameError::InvalidEscape(segment.to_string()))?;
                out.push(byte);
                i += 3;
            } else {
                out.push(bytes[i]);
                i += 1;
            }
        }
        Ok(Component::Generic(out))
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Sequence(seq) => write!(f, "{SEQUENCE_MARKER}{seq}"),
            Component::Generic(bytes) => {
                for &b in bytes {
                    if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
                        write!(f, "{}", b as char)?;
                    } else {
                        write!(f, "%{b:02X}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// An ordered sequence of components.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    /// The root name `/`.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Component> {
        self.components.get(index)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    /// Builder-style append returning the extended name.
    pub fn append(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    pub fn with_sequence(&self, seq: u64) -> Self {
        self.clone().append(Component::sequence(seq))
    }

    /// True if every component of `self` matches the leading components of `other`.
    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.len() <= other.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Sequence number at `index`, if that component exists and is typed as one.
    pub fn sequence_at(&self, index: usize) -> Option<u64> {
        self.get(index).and_then(Component::to_sequence_number)
    }
}

impl FromStr for Name {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('/').ok_or(NameError::MissingLeadingSlash)?;
        let components = rest
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(Component::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { components })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{component}")?;
        }
        Ok(())
    }
}

impl From<Vec<Component>> for Name {
    fn from(components: Vec<Component>) -> Self {
        Self { components }
    }
}
