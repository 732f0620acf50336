//! # Outstanding-Request Tracking
//!
//! The [`Tracker`] keeps one record per in-flight request and feeds the delay
//! telemetry emitted when a request is answered.
//!
//! ## Request Keys
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `Verification` | The single verification-material request |
//! | `Content(seq)` | Content item `seq` (forward, retransmitted, or corrective) |
//!
//! Keys order with `Verification` first, then content by sequence number, so
//! [`Tracker::next_retransmission`] serves a lost verification request before
//! any content retransmission and lower sequences before higher ones.
//!
//! ## Retransmission Timeout
//!
//! [`RttEstimator`] is a Jacobson/Karels mean-deviation estimator. Only
//! requests sent exactly once contribute samples (Karn's rule); each timeout
//! doubles the RTO until the next valid sample.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

/// RTO used before any sample has been taken.
pub const DEFAULT_INITIAL_RTO: Duration = Duration::from_secs(1);

/// Lower bound on the retransmission timeout.
pub const DEFAULT_MIN_RTO: Duration = Duration::from_millis(200);

/// Upper bound on the retransmission timeout (also caps backoff).
pub const DEFAULT_MAX_RTO: Duration = Duration::from_secs(20);

const RTT_ALPHA: f64 = 0.125;
const RTT_BETA: f64 = 0.25;
const RTO_K: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestKey {
    Verification,
    Content(u32),
}

impl RequestKey {
    pub fn sequence(self) -> Option<u32> {
        match self {
            RequestKey::Content(seq) => Some(seq),
            RequestKey::Verification => None,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::Verification => write!(f, "key"),
            RequestKey::Content(seq) => write!(f, "{seq}"),
        }
    }
}

/// Delay telemetry for one answered request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DelaySample {
    pub key: RequestKey,
    /// Time since the most recent transmission.
    pub last_delay: Duration,
    /// Time since the first transmission.
    pub full_delay: Duration,
    /// Number of transmissions, including the first.
    pub retx_count: u32,
    pub hop_count: u32,
}

#[derive(Clone, Copy, Debug)]
struct Record {
    first_sent: Instant,
    last_sent: Instant,
    retx_count: u32,
}

#[derive(Debug, Default)]
pub struct Tracker {
    records: BTreeMap<RequestKey, Record>,
    retx: BTreeSet<RequestKey>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a transmission of `key` at `now`. The first transmission opens the
    /// record; later ones refresh the last-send time and bump the count.
    pub fn record(&mut self, key: RequestKey, now: Instant) {
        self.retx.remove(&key);
        self.records
            .entry(key)
            .and_modify(|r| {
                r.last_sent = now;
                r.retx_count += 1;
            })
            .or_insert(Record {
                first_sent: now,
                last_sent: now,
                retx_count: 1,
            });
    }

    /// Close the record for an answered request and produce its telemetry.
    pub fn retire(&mut self, key: RequestKey, now: Instant, hop_count: u32) -> Option<DelaySample> {
        self.retx.remove(&key);
        let record = self.records.remove(&key)?;
        Some(DelaySample {
            key,
            last_delay: now.saturating_duration_since(record.last_sent),
            full_delay: now.saturating_duration_since(record.first_sent),
            retx_count: record.retx_count,
            hop_count,
        })
    }

    /// Drop a request without telemetry. Returns whether it was outstanding.
    pub fn abandon(&mut self, key: RequestKey) -> bool {
        self.retx.remove(&key);
        self.records.remove(&key).is_some()
    }

    /// Queue an outstanding request for retransmission.
    /// Keys with no open record are ignored.
    pub fn mark_for_retransmit(&mut self, key: RequestKey) -> bool {
        if self.records.contains_key(&key) {
            self.retx.insert(key)
        } else {
            false
        }
    }

    /// Withdraw `key` from the retransmission queue, keeping its record open.
    pub fn unqueue(&mut self, key: RequestKey) -> bool {
        self.retx.remove(&key)
    }

    /// Take the lowest queued retransmission.
    pub fn next_retransmission(&mut self) -> Option<RequestKey> {
        self.retx.pop_first()
    }

    /// Outstanding requests whose last transmission is at least `rto` old and
    /// that are not already queued for retransmission.
    pub fn expired(&self, now: Instant, rto: Duration) -> Vec<RequestKey> {
        self.records
            .iter()
            .filter(|(key, r)| {
                !self.retx.contains(key) && now.saturating_duration_since(r.last_sent) >= rto
            })
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn is_outstanding(&self, key: RequestKey) -> bool {
        self.records.contains_key(&key)
    }

    pub fn retx_count(&self, key: RequestKey) -> Option<u32> {
        self.records.get(&key).map(|r| r.retx_count)
    }

    pub fn has_pending_retransmissions(&self) -> bool {
        !self.retx.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.records.len()
    }
}

/// Mean-deviation RTT estimator producing the retransmission timeout.
#[derive(Clone, Debug)]
pub struct RttEstimator {
    srtt: Option<Duration>,
    rttvar: Duration,
    rto: Duration,
    min_rto: Duration,
    max_rto: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_RTO, DEFAULT_MIN_RTO, DEFAULT_MAX_RTO)
    }
}

impl RttEstimator {
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            srtt: None,
            rttvar: Duration::ZERO,
            rto: initial_rto.clamp(min_rto, max_rto),
            min_rto,
            max_rto,
        }
    }

    pub fn add_sample(&mut self, rtt: Duration) {
        let (srtt, rttvar) = match self.srtt {
            None => (rtt, rtt / 2),
            Some(srtt) => {
                let err = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                let rttvar = self.rttvar.mul_f64(1.0 - RTT_BETA) + err.mul_f64(RTT_BETA);
                let srtt = srtt.mul_f64(1.0 - RTT_ALPHA) + rtt.mul_f64(RTT_ALPHA);
                (srtt, rttvar)
            }
        };
        self.srtt = Some(srtt);
        self.rttvar = rttvar;
        self.rto = (srtt + rttvar * RTO_K).clamp(self.min_rto, self.max_rto);
    }

    /// Exponential backoff after a timeout.
    pub fn backoff(&mut self) {
        self.rto = (self.rto * 2).min(self.max_rto);
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn smoothed_rtt(&self) -> Option<Duration> {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn retire_reports_first_and_last_send_delays() {
        let t0 = Instant::now();
        let mut tracker = Tracker::new();
        let key = RequestKey::Content(4);

        tracker.record(key, t0);
        tracker.record(key, t0 + ms(300));
        assert_eq!(tracker.retx_count(key), Some(2));

        let sample = tracker.retire(key, t0 + ms(350), 2).unwrap();
        assert_eq!(sample.full_delay, ms(350));
        assert_eq!(sample.last_delay, ms(50));
        assert_eq!(sample.retx_count, 2);
        assert_eq!(sample.hop_count, 2);

        assert!(!tracker.is_outstanding(key));
        assert!(tracker.retire(key, t0 + ms(400), 0).is_none());
    }

    #[test]
    fn at_most_one_record_per_key() {
        let t0 = Instant::now();
        let mut tracker = Tracker::new();
        tracker.record(RequestKey::Content(1), t0);
        tracker.record(RequestKey::Content(1), t0);
        tracker.record(RequestKey::Verification, t0);
        assert_eq!(tracker.outstanding(), 2);
    }

    #[test]
    fn retransmissions_drain_lowest_key_first() {
        let t0 = Instant::now();
        let mut tracker = Tracker::new();
        for seq in [5, 2, 9] {
            tracker.record(RequestKey::Content(seq), t0);
        }
        tracker.record(RequestKey::Verification, t0);

        for key in [RequestKey::Content(9), RequestKey::Content(2), RequestKey::Verification] {
            assert!(tracker.mark_for_retransmit(key));
        }
        assert!(!tracker.mark_for_retransmit(RequestKey::Content(2)));
        assert!(!tracker.mark_for_retransmit(RequestKey::Content(77)));

        assert_eq!(tracker.next_retransmission(), Some(RequestKey::Verification));
        assert_eq!(tracker.next_retransmission(), Some(RequestKey::Content(2)));
        assert_eq!(tracker.next_retransmission(), Some(RequestKey::Content(9)));
        assert_eq!(tracker.next_retransmission(), None);
    }

    #[test]
    fn resend_and_abandon_clear_retransmit_queue() {
        let t0 = Instant::now();
        let mut tracker = Tracker::new();
        tracker.record(RequestKey::Content(1), t0);
        tracker.record(RequestKey::Content(2), t0);
        tracker.mark_for_retransmit(RequestKey::Content(1));
        tracker.mark_for_retransmit(RequestKey::Content(2));

        tracker.record(RequestKey::Content(1), t0 + ms(10));
        assert!(tracker.abandon(RequestKey::Content(2)));
        assert!(!tracker.abandon(RequestKey::Content(2)));
        assert!(!tracker.has_pending_retransmissions());
        assert_eq!(tracker.outstanding(), 1);
    }

    #[test]
    fn unqueue_keeps_record_open() {
        let t0 = Instant::now();
        let mut tracker = Tracker::new();
        tracker.record(RequestKey::Content(4), t0);
        tracker.mark_for_retransmit(RequestKey::Content(4));

        assert!(tracker.unqueue(RequestKey::Content(4)));
        assert!(!tracker.unqueue(RequestKey::Content(4)));
        assert!(!tracker.has_pending_retransmissions());
        assert!(tracker.is_outstanding(RequestKey::Content(4)));
        assert_eq!(tracker.retx_count(RequestKey::Content(4)), Some(1));
    }

    #[test]
    fn expiry_skips_fresh_and_queued_requests() {
        let t0 = Instant::now();
        let mut tracker = Tracker::new();
        tracker.record(RequestKey::Content(1), t0);
        tracker.record(RequestKey::Content(2), t0 + ms(900));
        tracker.record(RequestKey::Content(3), t0);
        tracker.mark_for_retransmit(RequestKey::Content(3));

        let expired = tracker.expired(t0 + ms(1000), ms(1000));
        assert_eq!(expired, vec![RequestKey::Content(1)]);
    }

    #[test]
    fn rtt_estimator_converges_and_backs_off() {
        let mut rtt = RttEstimator::default();
        assert_eq!(rtt.rto(), DEFAULT_INITIAL_RTO);

        rtt.add_sample(ms(100));
        assert_eq!(rtt.smoothed_rtt(), Some(ms(100)));
        // 100 + 4 * 50
        assert_eq!(rtt.rto(), ms(300));

        for _ in 0..50 {
            rtt.add_sample(ms(100));
        }
        assert_eq!(rtt.rto(), DEFAULT_MIN_RTO);

        rtt.backoff();
        assert_eq!(rtt.rto(), ms(400));
        for _ in 0..20 {
            rtt.backoff();
        }
        assert_eq!(rtt.rto(), DEFAULT_MAX_RTO);
    }
}
