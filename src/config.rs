//! Consumer configuration.
//!
//! All tunables live in [`ClientConfig`], checked once by
//! [`ClientConfig::validate`] before a consumer is built.

use std::fmt;
use std::time::Duration;

use crate::exclude::DEFAULT_EXCLUDE_OFFSET;
use crate::messages::DEFAULT_INTEREST_LIFETIME;
use crate::name::Name;

/// Delay between a confirmed item and the next forward request.
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(2);

/// Delay used while verification or pursuit is pending.
pub const DEFAULT_REACTION_TIME: Duration = Duration::from_secs(1);

/// Payload size at or below which a response is suspect.
pub const DEFAULT_GOOD_DATA_SIZE: usize = 1024;

/// Period of the retransmission-timeout check.
pub const DEFAULT_RETX_TIMER: Duration = Duration::from_millis(50);

/// Which responses go through verification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerificationPolicy {
    /// Only suspect responses are verified; genuine ones are accepted at once.
    #[default]
    SuspectOnly,
    /// Every response is held until verification material arrives.
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The reaction delay must be strictly shorter than the steady-state delay,
    /// otherwise pending verification can starve forward progress.
    ReactionNotShorter { reaction: Duration, wait: Duration },
    EmptyVerificationName,
    /// Verification requests would be indistinguishable from content requests.
    VerificationUnderPrefix { prefix: String, verification: String },
    /// The exclusion offset must point past the sequence component.
    ExcludeOffsetTooSmall { offset: usize, min: usize },
    ZeroRetxTimer,
    ZeroInterestLifetime,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReactionNotShorter { reaction, wait } => write!(
                f,
                "reaction time {reaction:?} must be shorter than wait time {wait:?}"
            ),
            ConfigError::EmptyVerificationName => write!(f, "verification name must not be empty"),
            ConfigError::VerificationUnderPrefix { prefix, verification } => write!(
                f,
                "verification name {verification} must not live under content prefix {prefix}"
            ),
            ConfigError::ExcludeOffsetTooSmall { offset, min } => {
                write!(f, "exclude offset {offset} must be at least {min}")
            }
            ConfigError::ZeroRetxTimer => write!(f, "retransmission timer period must be non-zero"),
            ConfigError::ZeroInterestLifetime => write!(f, "interest lifetime must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Content prefix; item `n` is requested as `prefix/seq=n`.
    pub prefix: Name,
    /// Name of the verification material.
    pub verification_name: Name,
    /// Steady-state delay between forward requests.
    pub wait_time: Duration,
    /// Delay between steps while verification or pursuit is pending.
    pub reaction_time: Duration,
    /// Forward requests stop once the next sequence reaches this bound.
    pub max_seq: Option<u32>,
    /// Delay before the very first request.
    pub start_delay: Duration,
    /// Declared payload size of genuine content.
    pub good_data_size: usize,
    pub interest_lifetime: Duration,
    /// Period of the retransmission-timeout check.
    pub retx_timer: Duration,
    /// Component of a forged name excluded by corrective requests.
    pub exclude_offset: usize,
    pub verification: VerificationPolicy,
}

impl ClientConfig {
    pub fn new(prefix: Name, verification_name: Name) -> Self {
        Self {
            prefix,
            verification_name,
            wait_time: DEFAULT_WAIT_TIME,
            reaction_time: DEFAULT_REACTION_TIME,
            max_seq: None,
            start_delay: Duration::ZERO,
            good_data_size: DEFAULT_GOOD_DATA_SIZE,
            interest_lifetime: DEFAULT_INTEREST_LIFETIME,
            retx_timer: DEFAULT_RETX_TIMER,
            exclude_offset: DEFAULT_EXCLUDE_OFFSET,
            verification: VerificationPolicy::default(),
        }
    }

    /// Index of the sequence component in a content name.
    pub fn sequence_index(&self) -> usize {
        self.prefix.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reaction_time >= self.wait_time {
            return Err(ConfigError::ReactionNotShorter {
                reaction: self.reaction_time,
                wait: self.wait_time,
            });
        }
        if self.verification_name.is_empty() {
            return Err(ConfigError::EmptyVerificationName);
        }
        if self.prefix.is_prefix_of(&self.verification_name) {
            return Err(ConfigError::VerificationUnderPrefix {
                prefix: self.prefix.to_string(),
                verification: self.verification_name.to_string(),
            });
        }
        let min = self.sequence_index() + 1;
        if self.exclude_offset < min {
            return Err(ConfigError::ExcludeOffsetTooSmall {
                offset: self.exclude_offset,
                min,
            });
        }
        if self.retx_timer.is_zero() {
            return Err(ConfigError::ZeroRetxTimer);
        }
        if self.interest_lifetime.is_zero() {
            return Err(ConfigError::ZeroInterestLifetime);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new("/prefix/data".parse().unwrap(), "/prefix/key".parse().unwrap())
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = config();
        assert_eq!(cfg.sequence_index(), 2);
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn reaction_must_be_shorter_than_wait() {
        let mut cfg = config();
        cfg.reaction_time = cfg.wait_time;
        assert!(matches!(cfg.validate(), Err(ConfigError::ReactionNotShorter { .. })));

        cfg.reaction_time = cfg.wait_time + Duration::from_millis(1);
        assert!(matches!(cfg.validate(), Err(ConfigError::ReactionNotShorter { .. })));
    }

    #[test]
    fn verification_name_checks() {
        let mut cfg = config();
        cfg.verification_name = Name::root();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyVerificationName));

        cfg.verification_name = "/prefix/data/key".parse().unwrap();
        assert!(matches!(cfg.validate(), Err(ConfigError::VerificationUnderPrefix { .. })));
    }

    #[test]
    fn exclude_offset_must_follow_sequence() {
        let mut cfg = config();
        cfg.exclude_offset = 2;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ExcludeOffsetTooSmall { offset: 2, min: 3 })
        );
    }

    #[test]
    fn zero_periods_rejected() {
        let mut cfg = config();
        cfg.retx_timer = Duration::ZERO;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroRetxTimer));

        let mut cfg = config();
        cfg.interest_lifetime = Duration::ZERO;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroInterestLifetime));
    }
}
