//! # Poisoning-Aware Consumer
//!
//! [`Consumer`] is the client-side detection-and-recovery state machine. It
//! requests numbered content items under a prefix, flags suspicious answers,
//! fetches verification material for them, and when an answer is judged
//! forged re-requests the item while excluding the forged variant.
//!
//! ## Modes
//!
//! | Mode | Meaning | Request issued on next tick |
//! |------|---------|-----------------------------|
//! | `Normal` | Nothing disputed | Next forward sequence |
//! | `VerificationPending` | An answer is disputed | Verification material |
//! | `PursuitPending` | Disputed answer judged forged | Corrective request with exclusion |
//!
//! Everything remembered about a dispute travels inside the mode variant, so
//! the mode and its payload cannot disagree.
//!
//! ## Step Flow
//!
//! 1. **Normal tick**: drain retransmissions first, otherwise request `seq=n`
//! 2. **Answer**: size above threshold is accepted; at or below it opens a dispute
//! 3. **Verification answer**: a genuine original is acknowledged; a suspect one
//!    is pursued with the forged name's component excluded
//! 4. **Corrective answer**: classified again, possibly reopening verification
//! 5. **Nack**: verification nack leaves the item to retransmission; pursuit nack
//!    abandons it
//!
//! ## Pacing
//!
//! Every send arms exactly one "send next" timer: the start delay the first
//! time, the reaction time while a dispute is open, the wait time otherwise.
//! Arming while a timer is already pending is a no-op.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::classify::{Classification, classify};
use crate::config::{ClientConfig, ConfigError, VerificationPolicy};
use crate::exclude::{Exclude, exclusion_for};
use crate::messages::{Data, Interest, Nack};
use crate::name::Name;
use crate::protocols::{DelayTracer, Face, NoopTracer, Timer, TimerId};
use crate::tracker::{RequestKey, RttEstimator, Tracker};

// ============================================================================
// Session State
// ============================================================================

/// The disputed answer and the request context needed to pursue it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispute {
    pub seq: u32,
    /// Name of the original content request.
    pub request_name: Name,
    /// Nonce of the original content request, reused by corrective requests.
    pub nonce: u32,
    /// Most recent answer for `seq`.
    pub response: Data,
    pub classification: Classification,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Normal,
    VerificationPending {
        dispute: Dispute,
        /// Whether the verification request has gone out.
        issued: bool,
    },
    PursuitPending {
        dispute: Dispute,
        exclude: Exclude,
        /// Whether the corrective request has gone out.
        issued: bool,
    },
}

/// Mode without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    Normal,
    VerificationPending,
    PursuitPending,
}

impl Mode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Normal => ModeKind::Normal,
            Mode::VerificationPending { .. } => ModeKind::VerificationPending,
            Mode::PursuitPending { .. } => ModeKind::PursuitPending,
        }
    }

    pub fn dispute(&self) -> Option<&Dispute> {
        match self {
            Mode::Normal => None,
            Mode::VerificationPending { dispute, .. } | Mode::PursuitPending { dispute, .. } => {
                Some(dispute)
            }
        }
    }

    fn is_disputing(&self) -> bool {
        !matches!(self, Mode::Normal)
    }
}

/// Counters describing what a consumer has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub interests_sent: u64,
    pub retransmissions: u64,
    pub verification_requests: u64,
    pub corrective_requests: u64,
    pub genuine: u64,
    pub suspect: u64,
    pub confirmed: u64,
    pub pursuits: u64,
    pub abandoned: u64,
    pub nacks: u64,
    pub timeouts: u64,
    pub unsolicited: u64,
    pub faults: u64,
}

enum Step {
    Forward(u32),
    Verification,
    Pursuit,
    Idle,
}

// ============================================================================
// Consumer
// ============================================================================

pub struct Consumer<F: Face, T: DelayTracer = NoopTracer> {
    config: ClientConfig,
    face: F,
    tracer: T,
    mode: Mode,
    tracker: Tracker,
    rtt: RttEstimator,
    /// Nonce of the latest request per outstanding content sequence.
    nonces: BTreeMap<u32, u32>,
    next_seq: u32,
    send_timer: Option<TimerId>,
    retx_timer: Option<TimerId>,
    first_time: bool,
    active: bool,
    stats: ConsumerStats,
}

impl<F: Face> Consumer<F, NoopTracer> {
    pub fn new(config: ClientConfig, face: F) -> Result<Self, ConfigError> {
        Self::with_tracer(config, face, NoopTracer)
    }
}

impl<F: Face, T: DelayTracer> Consumer<F, T> {
    pub fn with_tracer(config: ClientConfig, face: F, tracer: T) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            face,
            tracer,
            mode: Mode::Normal,
            tracker: Tracker::new(),
            rtt: RttEstimator::default(),
            nonces: BTreeMap::new(),
            next_seq: 0,
            send_timer: None,
            retx_timer: None,
            first_time: true,
            active: false,
            stats: ConsumerStats::default(),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn rto(&self) -> std::time::Duration {
        self.rtt.rto()
    }

    /// Next forward sequence number to be requested.
    pub fn next_sequence(&self) -> u32 {
        self.next_seq
    }

    pub fn face(&self) -> &F {
        &self.face
    }

    pub fn face_mut(&mut self) -> &mut F {
        &mut self.face
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// No dispute open, nothing left to retransmit and no forward sequence
    /// left to request.
    pub fn is_finished(&self) -> bool {
        matches!(self.mode, Mode::Normal)
            && self.max_reached()
            && !self.tracker.has_pending_retransmissions()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn start(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        info!(
            prefix = %self.config.prefix,
            verification = %self.config.verification_name,
            "consumer started"
        );
        self.schedule_next();
        self.arm_retx_check();
    }

    /// Cancel every pending timer. Events delivered afterwards are ignored.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(id) = self.send_timer.take() {
            self.face.cancel(id);
        }
        if let Some(id) = self.retx_timer.take() {
            self.face.cancel(id);
        }
        info!(next_seq = self.next_seq, "consumer stopped");
    }

    // ------------------------------------------------------------------------
    // Inbound events
    // ------------------------------------------------------------------------

    pub fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::SendNext => {
                self.send_timer = None;
                self.send_next();
            }
            Timer::RetxCheck => {
                self.retx_timer = None;
                self.check_timeouts();
                self.arm_retx_check();
            }
        }
    }

    /// Round-trip timeout for `key`: queue it for retransmission.
    pub fn on_timeout(&mut self, key: RequestKey) {
        if !self.active {
            return;
        }
        if self.mark_timed_out(key) {
            self.rtt.backoff();
            self.schedule_next();
        }
    }

    pub fn on_data(&mut self, data: Data) {
        if !self.active {
            return;
        }
        let now = self.face.now();

        if self.config.verification_name.is_prefix_of(&data.name) {
            self.on_verification_data(data, now);
        } else {
            self.on_content_data(data, now);
        }

        if !self.is_finished() {
            self.schedule_next();
        }
    }

    pub fn on_nack(&mut self, nack: Nack) {
        if !self.active {
            return;
        }
        self.stats.nacks += 1;
        let name = &nack.interest.name;

        if self.config.verification_name.is_prefix_of(name) {
            if let Mode::VerificationPending { dispute, .. } = &self.mode {
                info!(
                    seq = dispute.seq,
                    reason = %nack.reason,
                    "verification rejected by network, leaving item to retransmission"
                );
                self.mode = Mode::Normal;
            } else {
                debug!(reason = %nack.reason, "nack for stale verification request");
            }
            self.tracker.abandon(RequestKey::Verification);
        } else if let Some(seq) = self.sequence_of(name) {
            match &self.mode {
                Mode::PursuitPending { dispute, .. } if dispute.seq == seq => {
                    warn!(
                        seq,
                        reason = %nack.reason,
                        "corrective request rejected by network, abandoning item"
                    );
                    self.abandon(seq);
                    self.mode = Mode::Normal;
                }
                _ => {
                    debug!(seq, reason = %nack.reason, "nack, awaiting retransmission timeout");
                }
            }
        } else {
            debug!(name = %name, reason = %nack.reason, "nack for unknown name");
        }

        if !self.is_finished() {
            self.schedule_next();
        }
    }

    // ------------------------------------------------------------------------
    // Response handling
    // ------------------------------------------------------------------------

    fn on_content_data(&mut self, data: Data, now: Instant) {
        let Some(seq) = self.sequence_of(&data.name) else {
            warn!(name = %data.name, "data outside content prefix, dropping");
            self.stats.unsolicited += 1;
            return;
        };
        if !self.tracker.is_outstanding(RequestKey::Content(seq)) {
            debug!(seq, name = %data.name, "data for a sequence not outstanding, dropping");
            self.stats.unsolicited += 1;
            return;
        }

        let open_dispute = self.mode.dispute().map(|d| d.seq);
        match (self.mode.kind(), open_dispute) {
            (ModeKind::Normal, _) => self.adjudicate(seq, data, now),
            (ModeKind::PursuitPending, Some(disputed)) if disputed == seq => {
                self.adjudicate(seq, data, now)
            }
            (_, Some(disputed)) if disputed == seq => {
                debug!(seq, "answer for disputed item while verification pending, ignoring");
            }
            _ => {
                // Late answer for another item while a dispute is open. Only a
                // genuine answer that needs no verification can be accepted.
                let classification = classify(&data, self.config.good_data_size);
                if classification == Classification::Genuine
                    && self.config.verification == VerificationPolicy::SuspectOnly
                {
                    self.stats.genuine += 1;
                    self.confirm(seq, now, data.hop_count.unwrap_or(0));
                } else {
                    debug!(
                        seq,
                        %classification,
                        "deferring answer while another item is disputed"
                    );
                }
            }
        }
    }

    fn adjudicate(&mut self, seq: u32, data: Data, now: Instant) {
        let classification = classify(&data, self.config.good_data_size);
        let size = data.payload_size();
        match classification {
            Classification::Genuine => self.stats.genuine += 1,
            Classification::Suspect => self.stats.suspect += 1,
        }

        if classification == Classification::Genuine
            && self.config.verification == VerificationPolicy::SuspectOnly
        {
            info!(seq, size, name = %data.name, "< DATA accepted");
            self.confirm(seq, now, data.hop_count.unwrap_or(0));
            self.mode = Mode::Normal;
            return;
        }

        let nonce = match self.mode.dispute() {
            Some(dispute) if dispute.seq == seq => dispute.nonce,
            _ => self.nonces.get(&seq).copied().unwrap_or_default(),
        };

        if classification.is_suspect() {
            warn!(
                seq,
                size,
                name = %data.name,
                signature_type = data.signature.signature_type,
                signature = hex::encode(&data.signature.value),
                "< DATA suspect, requesting verification"
            );
        } else {
            debug!(seq, size, name = %data.name, "< DATA held for verification");
        }

        // A timeout queued before the dispute opened must not refetch the
        // disputed item ahead of its verdict.
        if self.tracker.unqueue(RequestKey::Content(seq)) {
            debug!(seq, "parking queued retransmission of disputed item");
        }

        self.mode = Mode::VerificationPending {
            dispute: Dispute {
                seq,
                request_name: self.config.prefix.with_sequence(u64::from(seq)),
                nonce,
                response: data,
                classification,
            },
            issued: false,
        };
    }

    fn on_verification_data(&mut self, data: Data, now: Instant) {
        let dispute = match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::VerificationPending { dispute, .. } => dispute,
            other => {
                self.mode = other;
                debug!(name = %data.name, "verification data without a pending verification");
                self.stats.unsolicited += 1;
                self.tracker.abandon(RequestKey::Verification);
                return;
            }
        };

        self.retire(RequestKey::Verification, now, data.hop_count.unwrap_or(0));
        info!(
            seq = dispute.seq,
            key = %data.name,
            "< verification material received"
        );

        if !dispute.classification.is_suspect() {
            info!(seq = dispute.seq, "acknowledging verified item");
            let hop_count = dispute.response.hop_count.unwrap_or(0);
            self.confirm(dispute.seq, now, hop_count);
            return;
        }

        match exclusion_for(&dispute.response.name, self.config.exclude_offset) {
            Ok(exclude) => {
                info!(
                    seq = dispute.seq,
                    exclude = %exclude,
                    "pursuing replacement for forged item"
                );
                self.stats.pursuits += 1;
                self.mode = Mode::PursuitPending {
                    dispute,
                    exclude,
                    issued: false,
                };
            }
            Err(e) => {
                error!(
                    seq = dispute.seq,
                    error = %e,
                    "cannot exclude forged variant, abandoning item"
                );
                self.stats.faults += 1;
                self.abandon(dispute.seq);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    fn send_next(&mut self) {
        if !self.active {
            return;
        }

        let mut sent = false;
        while let Some(key) = self.tracker.next_retransmission() {
            if self.retransmit(key) {
                sent = true;
                break;
            }
        }
        if !sent {
            sent = self.send_fresh();
        }

        if sent || !self.is_finished() {
            self.schedule_next();
        } else {
            debug!(next_seq = self.next_seq, "all sequences requested, pacing stopped");
        }
    }

    fn retransmit(&mut self, key: RequestKey) -> bool {
        match key {
            RequestKey::Verification => {
                if matches!(self.mode, Mode::VerificationPending { .. }) {
                    self.send_verification();
                    true
                } else {
                    self.tracker.abandon(key);
                    false
                }
            }
            RequestKey::Content(seq) => {
                if matches!(&self.mode, Mode::PursuitPending { dispute, .. } if dispute.seq == seq) {
                    self.send_pursuit();
                } else {
                    info!(seq, "> retransmitting interest");
                    self.send_content(seq);
                }
                true
            }
        }
    }

    fn send_fresh(&mut self) -> bool {
        let step = match &self.mode {
            Mode::Normal if self.max_reached() => Step::Idle,
            Mode::Normal => Step::Forward(self.next_seq),
            Mode::VerificationPending { issued: false, .. } => Step::Verification,
            Mode::PursuitPending { issued: false, .. } => Step::Pursuit,
            _ => Step::Idle,
        };

        match step {
            Step::Forward(seq) => {
                self.next_seq += 1;
                info!(seq, total = self.next_seq, "> interest");
                self.send_content(seq);
                true
            }
            Step::Verification => {
                self.send_verification();
                true
            }
            Step::Pursuit => {
                self.send_pursuit();
                true
            }
            Step::Idle => false,
        }
    }

    fn send_content(&mut self, seq: u32) {
        let nonce: u32 = rand::random();
        let name = self.config.prefix.with_sequence(u64::from(seq));
        let interest = Interest::new(name, nonce, self.config.interest_lifetime);
        self.nonces.insert(seq, nonce);
        self.transmit(RequestKey::Content(seq), interest);
    }

    fn send_verification(&mut self) {
        let seq = match &mut self.mode {
            Mode::VerificationPending { dispute, issued } => {
                *issued = true;
                dispute.seq
            }
            _ => return,
        };
        let interest = Interest::new(
            self.config.verification_name.clone(),
            rand::random(),
            self.config.interest_lifetime,
        );
        info!(seq, name = %interest.name, "> verification request");
        self.stats.verification_requests += 1;
        self.transmit(RequestKey::Verification, interest);
    }

    fn send_pursuit(&mut self) {
        let (seq, interest) = match &mut self.mode {
            Mode::PursuitPending {
                dispute,
                exclude,
                issued,
            } => {
                *issued = true;
                let interest = Interest::new(
                    dispute.request_name.clone(),
                    dispute.nonce,
                    self.config.interest_lifetime,
                )
                .with_exclude(exclude.clone());
                (dispute.seq, interest)
            }
            _ => return,
        };
        info!(seq, interest = %interest, "> corrective request");
        self.stats.corrective_requests += 1;
        self.transmit(RequestKey::Content(seq), interest);
    }

    fn transmit(&mut self, key: RequestKey, interest: Interest) {
        let now = self.face.now();
        if self.tracker.is_outstanding(key) {
            self.stats.retransmissions += 1;
        }
        self.tracker.record(key, now);
        self.stats.interests_sent += 1;
        self.face.send_interest(interest);
    }

    // ------------------------------------------------------------------------
    // Timers and bookkeeping
    // ------------------------------------------------------------------------

    fn schedule_next(&mut self) {
        if !self.active || self.send_timer.is_some() {
            return;
        }
        let delay = if self.first_time {
            self.first_time = false;
            self.config.start_delay
        } else if self.mode.is_disputing() {
            self.config.reaction_time
        } else {
            self.config.wait_time
        };
        self.send_timer = Some(self.face.schedule_after(delay, Timer::SendNext));
    }

    fn arm_retx_check(&mut self) {
        if !self.active || self.retx_timer.is_some() {
            return;
        }
        self.retx_timer = Some(self.face.schedule_after(self.config.retx_timer, Timer::RetxCheck));
    }

    fn check_timeouts(&mut self) {
        let now = self.face.now();
        let rto = self.rtt.rto();
        let mut any = false;
        for key in self.tracker.expired(now, rto) {
            any |= self.mark_timed_out(key);
        }
        if any {
            self.rtt.backoff();
            self.schedule_next();
        }
    }

    fn mark_timed_out(&mut self, key: RequestKey) -> bool {
        // The disputed item waits for its verdict rather than being refetched.
        if let Mode::VerificationPending { dispute, .. } = &self.mode
            && key == RequestKey::Content(dispute.seq)
        {
            return false;
        }
        if self.tracker.mark_for_retransmit(key) {
            self.stats.timeouts += 1;
            debug!(key = %key, rto = ?self.rtt.rto(), "request timed out");
            true
        } else {
            false
        }
    }

    fn retire(&mut self, key: RequestKey, now: Instant, hop_count: u32) {
        let Some(sample) = self.tracker.retire(key, now, hop_count) else {
            return;
        };
        if sample.retx_count == 1 {
            self.rtt.add_sample(sample.last_delay);
        }
        debug!(
            key = %key,
            full_delay = ?sample.full_delay,
            last_delay = ?sample.last_delay,
            retx_count = sample.retx_count,
            hop_count,
            "request retired"
        );
        self.tracer.record(now, &sample);
    }

    fn confirm(&mut self, seq: u32, now: Instant, hop_count: u32) {
        self.retire(RequestKey::Content(seq), now, hop_count);
        self.nonces.remove(&seq);
        self.stats.confirmed += 1;
    }

    fn abandon(&mut self, seq: u32) {
        self.tracker.abandon(RequestKey::Content(seq));
        self.nonces.remove(&seq);
        self.stats.abandoned += 1;
    }

    fn max_reached(&self) -> bool {
        self.next_seq == u32::MAX || self.config.max_seq.is_some_and(|max| self.next_seq >= max)
    }

    fn sequence_of(&self, name: &Name) -> Option<u32> {
        if !self.config.prefix.is_prefix_of(name) {
            return None;
        }
        name.sequence_at(self.config.sequence_index())
            .and_then(|seq| u32::try_from(seq).ok())
    }
}
