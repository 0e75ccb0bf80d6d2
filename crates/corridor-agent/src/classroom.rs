//! Classroom agent: offers, evaluates and settles schedule shifts.
//!
//! One negotiation thread per classroom and round. The thread is closed
//! towards the coordinator by exactly one ACCEPT or REJECT naming this
//! classroom as proposer (or sent by it, when it declines to offer).

use std::collections::{BTreeMap, VecDeque};

use corridor_broker::{
    BrokerError, Envelope, ExecutedShift, IntervalReport, Message, MessageBroker, MessageKind,
    NegotiationRequest, Payload, Proposal, RejectReason, Rejection, ViolationNotice,
};
use chrono::Utc;
use corridor_core::congestion::exit_batches;
use corridor_core::{
    Adjustment, AgentId, AgentRole, Commitment, CommitmentId, CommitmentState, ExitBatch, ExitKind,
    NegotiationConfig, RoundId, ShiftDirection, StrikeRecord,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentControl, AgentCore, CLASSROOM_KINDS};
use crate::error::{AgentError, AgentResult};
use crate::policy::{self, OfferDecision};

/// Static parameters of a classroom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassroomProfile {
    /// Classroom id.
    pub id: AgentId,
    /// Usual number of students released per interval.
    pub attendance: u32,
    /// Readiness to shift, in `[0, 1]`.
    pub flexibility: f64,
    /// Probability of honoring an accepted shift, in `[0, 1]`.
    pub reliability: f64,
    /// Attendance varies by up to this many students per interval.
    pub jitter: u32,
    /// Direction this classroom shifts in.
    pub direction: ShiftDirection,
    /// Seed of the classroom's random source.
    pub seed: u64,
}

impl ClassroomProfile {
    /// A fully reliable classroom with fixed attendance.
    #[must_use]
    pub fn new(id: AgentId, attendance: u32, flexibility: f64) -> Self {
        Self {
            id,
            attendance,
            flexibility,
            reliability: 1.0,
            jitter: 0,
            direction: ShiftDirection::Earlier,
            seed: 0,
        }
    }

    /// Sets the reliability.
    #[must_use]
    pub const fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability;
        self
    }

    /// Sets the attendance jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: u32) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the shift direction.
    #[must_use]
    pub const fn with_direction(mut self, direction: ShiftDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Sets the random seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> AgentResult<()> {
        let fields = [("flexibility", self.flexibility), ("reliability", self.reliability)];
        for (name, value) in fields {
            if !(0.0..=1.0).contains(&value) {
                return Err(AgentError::InvalidProfile {
                    agent: self.id.clone(),
                    reason: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        Ok(())
    }
}

/// Observable state of a classroom, published after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassroomView {
    /// Attendance expected this interval.
    pub attendance: u32,
    /// Strikes as last reported by the bottleneck.
    pub strikes: StrikeRecord,
    /// Trust in each counter-party.
    pub trust: BTreeMap<AgentId, f64>,
    /// Non-zero obligation balances.
    pub obligations: BTreeMap<AgentId, i64>,
    /// Transitions applied.
    pub applied_transitions: usize,
    /// Accepted shifts waiting for the next tick.
    pub scheduled_shifts: usize,
    /// Whether an own offer awaits a reply.
    pub offer_pending: bool,
}

#[derive(Debug, Clone)]
struct RoundContext {
    id: RoundId,
    interval: u64,
    coordinator: AgentId,
    eligible: Vec<AgentId>,
    countered: bool,
}

#[derive(Debug, Clone)]
struct PendingOffer {
    round: RoundId,
    proposal: Proposal,
    deadline: Instant,
}

/// A classroom negotiating over the corridor.
#[derive(Debug)]
pub struct ClassroomAgent {
    core: AgentCore,
    profile: ClassroomProfile,
    config: NegotiationConfig,
    rng: StdRng,
    attendance: u32,
    strikes: StrikeRecord,
    round: Option<RoundContext>,
    pending: Option<PendingOffer>,
    deferred: VecDeque<Envelope>,
    scheduled: Vec<Commitment>,
    exit_plan: Vec<ExitBatch>,
    view_tx: watch::Sender<ClassroomView>,
}

impl ClassroomAgent {
    /// Creates a classroom.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::InvalidProfile` if flexibility or reliability is
    /// outside `[0, 1]`.
    pub fn new(profile: ClassroomProfile, config: NegotiationConfig) -> AgentResult<Self> {
        profile.validate()?;
        let core = AgentCore::new(profile.id.clone(), AgentRole::Classroom);
        let (view_tx, _) = watch::channel(ClassroomView {
            attendance: profile.attendance,
            ..ClassroomView::default()
        });
        Ok(Self {
            core,
            rng: StdRng::seed_from_u64(profile.seed),
            attendance: profile.attendance,
            profile,
            config,
            strikes: StrikeRecord::default(),
            round: None,
            pending: None,
            deferred: VecDeque::new(),
            scheduled: Vec::new(),
            exit_plan: Vec::new(),
            view_tx,
        })
    }

    /// Static parameters.
    #[must_use]
    pub const fn profile(&self) -> &ClassroomProfile {
        &self.profile
    }

    /// Attendance expected this interval.
    #[must_use]
    pub const fn attendance(&self) -> u32 {
        self.attendance
    }

    /// Strikes as last reported by the bottleneck.
    #[must_use]
    pub const fn strikes(&self) -> StrikeRecord {
        self.strikes
    }

    /// Returns true while below the violation limit.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        self.strikes.active() < self.config.violation_limit
    }

    /// The offer awaiting a reply, if any.
    #[must_use]
    pub fn pending_offer(&self) -> Option<&Proposal> {
        self.pending.as_ref().map(|p| &p.proposal)
    }

    /// Accepted shifts waiting for the next tick.
    #[must_use]
    pub fn scheduled(&self) -> &[Commitment] {
        &self.scheduled
    }

    /// Batches of the last staggered exit carried out; empty once the
    /// classroom leaves all at once again.
    #[must_use]
    pub fn exit_plan(&self) -> &[ExitBatch] {
        &self.exit_plan
    }

    /// Receiver of the classroom's observable state.
    #[must_use]
    pub fn subscribe_view(&self) -> watch::Receiver<ClassroomView> {
        self.view_tx.subscribe()
    }

    /// Current observable state.
    #[must_use]
    pub fn view(&self) -> ClassroomView {
        ClassroomView {
            attendance: self.attendance,
            strikes: self.strikes,
            trust: self.core.trust().snapshot(),
            obligations: self.core.ledger().snapshot(),
            applied_transitions: self.core.applied().len(),
            scheduled_shifts: self.scheduled.len(),
            offer_pending: self.pending.is_some(),
        }
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(self.view());
    }

    fn send(
        &self,
        broker: &MessageBroker,
        to: &AgentId,
        round: Option<RoundId>,
        payload: Payload,
    ) -> AgentResult<u64> {
        let message = Message::to(self.core.id().clone(), to.clone(), round, payload);
        Ok(broker.publish(message)?)
    }

    /// Sends a REJECT to the coordinator and, when given, to the counter-party.
    fn reject(
        &self,
        broker: &MessageBroker,
        round: RoundId,
        coordinator: &AgentId,
        counterparty: Option<&AgentId>,
        rejection: &Rejection,
    ) {
        for to in std::iter::once(coordinator).chain(counterparty) {
            let payload = Payload::Reject(rejection.clone());
            if let Err(error) = self.send(broker, to, Some(round), payload) {
                warn!(
                    agent = %self.core.id(),
                    to = %to,
                    %error,
                    reason = %rejection.reason,
                    "reject not delivered"
                );
            }
        }
    }

    /// Declines a round without an offer.
    fn decline(
        &self,
        broker: &MessageBroker,
        round: RoundId,
        coordinator: &AgentId,
        reason: RejectReason,
    ) {
        self.reject(broker, round, coordinator, None, &Rejection::declined(reason));
    }

    /// Publishes ACCEPT to the coordinator, then a copy to the counter-party.
    ///
    /// A refused ACCEPT turns into a REJECT so the thread still closes.
    fn accept(
        &self,
        broker: &MessageBroker,
        round: RoundId,
        proposal: &Proposal,
        counterparty: &AgentId,
    ) {
        let payload = Payload::Accept(proposal.clone());
        match self.send(broker, &proposal.coordinator, Some(round), payload) {
            Ok(seq) => {
                info!(
                    agent = %self.core.id(),
                    round = %round.short(),
                    proposer = %proposal.proposer,
                    acceptor = %proposal.acceptor,
                    adjustment = %proposal.adjustment,
                    seq,
                    "offer accepted"
                );
                let copy = Payload::Accept(proposal.clone());
                if let Err(error) = self.send(broker, counterparty, Some(round), copy) {
                    debug!(agent = %self.core.id(), %error, "accept copy not delivered");
                }
            }
            Err(error) => {
                let reason = match &error {
                    AgentError::Broker(BrokerError::PairConflict { .. }) => {
                        RejectReason::PairConflict
                    }
                    AgentError::Broker(BrokerError::RoundCancelled(_)) => RejectReason::Cancelled,
                    _ => RejectReason::Unreachable,
                };
                warn!(
                    agent = %self.core.id(),
                    round = %round.short(),
                    %error,
                    "accept refused by broker"
                );
                self.reject(
                    broker,
                    round,
                    &proposal.coordinator,
                    Some(counterparty),
                    &Rejection::of(proposal.clone(), reason),
                );
            }
        }
    }

    fn is_flagged(&self, round: Option<RoundId>) -> bool {
        if !self.is_eligible() {
            return true;
        }
        match (&self.round, round) {
            (Some(ctx), Some(round)) if ctx.id == round => !ctx.eligible.contains(self.core.id()),
            _ => false,
        }
    }

    fn on_request(
        &mut self,
        envelope: &Envelope,
        request: &NegotiationRequest,
        broker: &MessageBroker,
    ) -> AgentResult<()> {
        let Some(round) = envelope.round() else {
            return Ok(());
        };
        if self.pending.is_some() {
            debug!(
                agent = %self.core.id(),
                round = %round.short(),
                "offer pending, request deferred"
            );
            self.deferred.push_back(envelope.clone());
            return Ok(());
        }

        let coordinator = envelope.sender().clone();
        self.round = Some(RoundContext {
            id: round,
            interval: request.interval,
            coordinator: coordinator.clone(),
            eligible: request.eligible.clone(),
            countered: false,
        });

        if self.is_flagged(Some(round)) {
            info!(
                agent = %self.core.id(),
                strikes = self.strikes.active(),
                "flagged, not offering"
            );
            self.decline(broker, round, &coordinator, RejectReason::Ineligible);
            return Ok(());
        }

        let me = self.core.id().clone();
        let peers = request.eligible.iter().filter(|peer| **peer != me);
        let chosen = policy::choose_counterparty(peers, self.core.ledger(), self.core.trust());
        let Some(peer) = chosen.cloned() else {
            self.decline(broker, round, &coordinator, RejectReason::Declined);
            return Ok(());
        };

        let trust = self.core.trust().get(&peer);
        let balance = self.core.ledger().balance(&peer);
        let willingness = policy::willingness(self.profile.flexibility, balance, trust);
        let magnitude =
            policy::offer_magnitude(self.config.max_adjustment_mins, willingness, trust);
        debug!(
            agent = %me,
            peer = %peer,
            balance,
            trust = trust.value(),
            willingness,
            magnitude,
            "offer decision"
        );
        if magnitude == 0 {
            self.decline(broker, round, &coordinator, RejectReason::Declined);
            return Ok(());
        }

        // the coordinator's clock started when it published the request
        let waited = (Utc::now() - envelope.published_at).to_std().unwrap_or_default();
        let remaining = self.config.offer_timeout().checked_sub(waited);
        let Some(remaining) = remaining.filter(|d| !d.is_zero()) else {
            debug!(agent = %me, round = %round.short(), "request too old to offer");
            self.decline(broker, round, &coordinator, RejectReason::Timeout);
            return Ok(());
        };

        let kind =
            policy::exit_kind(self.profile.direction, self.attendance, request.snapshot.arrivals);
        let adjustment = Adjustment::of_kind(kind, magnitude, self.config.max_adjustment_mins)?
            .as_repayment(balance < 0);
        let proposal = Proposal {
            commitment_id: CommitmentId::new(),
            coordinator: coordinator.clone(),
            interval: request.interval,
            proposer: me,
            acceptor: peer.clone(),
            adjustment,
        };
        match self.send(broker, &peer, Some(round), Payload::Offer(proposal.clone())) {
            Ok(_) => {
                self.pending = Some(PendingOffer {
                    round,
                    proposal,
                    deadline: Instant::now() + remaining,
                });
            }
            Err(error) => {
                warn!(agent = %self.core.id(), peer = %peer, %error, "offer not delivered");
                let rejection = Rejection::of(proposal, RejectReason::Unreachable);
                self.reject(broker, round, &coordinator, None, &rejection);
            }
        }
        Ok(())
    }

    fn on_offer(
        &mut self,
        envelope: &Envelope,
        proposal: &Proposal,
        broker: &MessageBroker,
    ) -> AgentResult<()> {
        let Some(round) = envelope.round() else {
            return Ok(());
        };
        let proposer = envelope.sender().clone();
        if &proposal.acceptor != self.core.id() || proposal.proposer != proposer {
            warn!(agent = %self.core.id(), sender = %proposer, "misaddressed offer ignored");
            return Ok(());
        }
        let coordinator = proposal.coordinator.clone();
        let refuse = |reason: RejectReason| {
            let rejection = Rejection::of(proposal.clone(), reason);
            self.reject(broker, round, &coordinator, Some(&proposer), &rejection);
        };

        if proposal.adjustment.check(self.config.max_adjustment_mins).is_err() {
            refuse(RejectReason::Invalid);
            return Ok(());
        }
        if self.is_flagged(Some(round)) {
            refuse(RejectReason::Ineligible);
            return Ok(());
        }

        let trust = self.core.trust().get(&proposer);
        let debt = self.core.ledger().owed_to(&proposer);
        let bonus =
            policy::exit_bonus(&proposal.adjustment, self.attendance, self.core.ledger().net());
        let may_counter = self
            .round
            .as_ref()
            .is_none_or(|ctx| ctx.id != round || !ctx.countered);
        let decision = policy::evaluate_offer(
            trust,
            proposal.adjustment.magnitude(),
            self.config.max_adjustment_mins,
            debt,
            bonus,
            may_counter,
        );
        debug!(
            agent = %self.core.id(),
            proposer = %proposer,
            adjustment = %proposal.adjustment,
            trust = trust.value(),
            debt,
            bonus,
            ?decision,
            "offer evaluated"
        );

        match decision {
            OfferDecision::Accept => self.accept(broker, round, proposal, &proposer),
            OfferDecision::Reject => refuse(RejectReason::Refused),
            OfferDecision::Counter(magnitude) => {
                if let Some(ctx) = self.round.as_mut().filter(|ctx| ctx.id == round) {
                    ctx.countered = true;
                }
                let counter = proposal.with_adjustment(
                    proposal.adjustment.with_magnitude(magnitude, self.config.max_adjustment_mins)?,
                );
                let payload = Payload::CounterOffer(counter);
                if let Err(error) = self.send(broker, &proposer, Some(round), payload) {
                    warn!(agent = %self.core.id(), %error, "counter-offer not delivered");
                }
            }
        }
        Ok(())
    }

    fn on_counter(
        &mut self,
        envelope: &Envelope,
        counter: &Proposal,
        broker: &MessageBroker,
    ) -> AgentResult<()> {
        let Some(pending) = self
            .pending
            .take_if(|p| p.proposal.commitment_id == counter.commitment_id)
        else {
            debug!(agent = %self.core.id(), "stale counter-offer ignored");
            return Ok(());
        };
        let acceptor = envelope.sender().clone();
        let original = pending.proposal.adjustment;
        match policy::settle_counter(original.magnitude(), counter.adjustment.magnitude()) {
            Some(magnitude) => {
                let adjustment =
                    original.with_magnitude(magnitude, self.config.max_adjustment_mins)?;
                let settled = pending.proposal.with_adjustment(adjustment);
                self.accept(broker, pending.round, &settled, &acceptor);
            }
            None => self.reject(
                broker,
                pending.round,
                &pending.proposal.coordinator,
                Some(&acceptor),
                &Rejection::of(pending.proposal.clone(), RejectReason::CounterRefused),
            ),
        }
        self.resume_deferred(broker);
        Ok(())
    }

    fn settle_pending(
        &mut self,
        commitment_id: CommitmentId,
        outcome: &str,
        broker: &MessageBroker,
    ) {
        if self
            .pending
            .take_if(|p| p.proposal.commitment_id == commitment_id)
            .is_some()
        {
            debug!(
                agent = %self.core.id(),
                commitment = %commitment_id,
                outcome,
                "own offer settled"
            );
            self.resume_deferred(broker);
        }
    }

    fn on_reject(&mut self, envelope: &Envelope, rejection: &Rejection, broker: &MessageBroker) {
        if let Some(proposal) = &rejection.proposal {
            self.settle_pending(proposal.commitment_id, "rejected", broker);
            let from_coordinator = self
                .round
                .as_ref()
                .is_some_and(|ctx| &ctx.coordinator == envelope.sender());
            if from_coordinator {
                info!(
                    agent = %self.core.id(),
                    commitment = %proposal.commitment_id,
                    reason = %rejection.reason,
                    "commitment rejected by coordinator"
                );
            }
            return;
        }
        if rejection.reason != RejectReason::Cancelled {
            return;
        }
        let Some(cancelled) = envelope.round() else {
            return;
        };
        let coordinator = envelope.sender();
        let before = self.deferred.len();
        self.deferred.retain(|deferred| {
            deferred.round() != Some(cancelled) || deferred.sender() != coordinator
        });
        let dropped = before - self.deferred.len();

        let current = self
            .round
            .as_ref()
            .is_some_and(|ctx| ctx.id == cancelled && &ctx.coordinator == coordinator);
        if !current {
            if dropped > 0 {
                info!(
                    agent = %self.core.id(),
                    round = %cancelled.short(),
                    "deferred round cancelled"
                );
            }
            return;
        }
        info!(agent = %self.core.id(), round = %cancelled.short(), "round cancelled");
        self.round = None;
        if self.pending.take_if(|p| p.round == cancelled).is_some() {
            self.resume_deferred(broker);
        }
    }

    fn on_confirm(&mut self, commitment: &Commitment) {
        if !commitment.involves(self.core.id()) {
            return;
        }
        if !self.core.apply_transition(commitment) {
            return;
        }
        if commitment.state == CommitmentState::Accepted && &commitment.proposer == self.core.id() {
            info!(
                agent = %self.core.id(),
                commitment = %commitment.id,
                adjustment = %commitment.adjustment,
                "shift scheduled"
            );
            self.scheduled.push(commitment.clone());
        }
    }

    fn on_violation(&mut self, notice: &ViolationNotice) {
        if &notice.offender == self.core.id() {
            self.strikes = notice.strikes;
            if notice.strikes.active() >= notice.limit {
                warn!(
                    agent = %self.core.id(),
                    strikes = notice.strikes.active(),
                    "flagged non-negotiable"
                );
            }
        }
        if let Some(commitment) = &notice.commitment {
            if commitment.involves(self.core.id()) {
                self.core.apply_transition(commitment);
            }
        }
    }

    fn on_tick(
        &mut self,
        envelope: &Envelope,
        interval: u64,
        broker: &MessageBroker,
    ) -> AgentResult<()> {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|c| c.interval < interval);
        self.scheduled = later;

        let mut executed = Vec::with_capacity(due.len());
        self.exit_plan.clear();
        for commitment in due {
            let honored = self.rng.gen_bool(self.profile.reliability);
            if !honored {
                warn!(agent = %self.core.id(), commitment = %commitment.id, "shift not honored");
            } else if commitment.adjustment.kind() == ExitKind::Staggered {
                self.exit_plan = exit_batches(
                    self.attendance,
                    commitment.adjustment.magnitude(),
                    self.config.batch_spacing_mins,
                );
                debug!(
                    agent = %self.core.id(),
                    commitment = %commitment.id,
                    batches = self.exit_plan.len(),
                    "staggered exit"
                );
            }
            executed.push(ExecutedShift {
                commitment_id: commitment.id,
                applied_minutes: if honored { commitment.adjustment.minutes() } else { 0 },
            });
        }

        let jitter = i64::from(self.profile.jitter);
        let delta = if jitter == 0 { 0 } else { self.rng.gen_range(-jitter..=jitter) };
        let attendance = (i64::from(self.profile.attendance) + delta).max(0);
        self.attendance = u32::try_from(attendance).unwrap_or(u32::MAX);

        let report = IntervalReport {
            interval,
            expected_arrivals: self.attendance,
            executed,
        };
        self.send(broker, envelope.sender(), None, Payload::IntervalReport(report))?;
        Ok(())
    }

    fn resume_deferred(&mut self, broker: &MessageBroker) {
        while self.pending.is_none() {
            let Some(envelope) = self.deferred.pop_front() else {
                break;
            };
            if let Payload::NegotiationRequest(request) = envelope.payload() {
                if let Err(error) = self.on_request(&envelope, request, broker) {
                    warn!(agent = %self.core.id(), %error, "deferred request failed");
                }
            }
        }
    }

    fn revise_attendance(&mut self, attendance: u32, broker: &MessageBroker) {
        self.attendance = attendance;
        let Some(ctx) = &self.round else {
            return;
        };
        let report = IntervalReport {
            interval: ctx.interval,
            expected_arrivals: attendance,
            executed: Vec::new(),
        };
        info!(agent = %self.core.id(), attendance, round = %ctx.id.short(), "attendance revised");
        let payload = Payload::IntervalReport(report);
        if let Err(error) = self.send(broker, &ctx.coordinator, Some(ctx.id), payload) {
            warn!(agent = %self.core.id(), %error, "revised report not delivered");
        }
    }
}

impl Agent for ClassroomAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn handled_kinds(&self) -> &'static [MessageKind] {
        CLASSROOM_KINDS
    }

    fn handle(&mut self, envelope: &Envelope, broker: &MessageBroker) -> AgentResult<()> {
        let result = match envelope.payload() {
            Payload::NegotiationRequest(request) => self.on_request(envelope, request, broker),
            Payload::Offer(proposal) => self.on_offer(envelope, proposal, broker),
            Payload::CounterOffer(counter) => self.on_counter(envelope, counter, broker),
            Payload::Accept(proposal) => {
                self.settle_pending(proposal.commitment_id, "accepted", broker);
                Ok(())
            }
            Payload::Reject(rejection) => {
                self.on_reject(envelope, rejection, broker);
                Ok(())
            }
            Payload::CommitmentConfirm(commitment) => {
                self.on_confirm(commitment);
                Ok(())
            }
            Payload::ViolationNotice(notice) => {
                self.on_violation(notice);
                Ok(())
            }
            Payload::IntervalTick { interval } => self.on_tick(envelope, *interval, broker),
            Payload::IntervalReport(_) => Ok(()),
        };
        self.publish_view();
        result
    }

    fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    fn on_timeout(&mut self, broker: &MessageBroker) -> AgentResult<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let error = AgentError::NegotiationTimeout {
            agent: pending.proposal.acceptor.clone(),
            round: pending.round,
        };
        warn!(agent = %self.core.id(), %error, "offer timed out");
        let coordinator = pending.proposal.coordinator.clone();
        let acceptor = pending.proposal.acceptor.clone();
        self.reject(
            broker,
            pending.round,
            &coordinator,
            Some(&acceptor),
            &Rejection::of(pending.proposal, RejectReason::Timeout),
        );
        self.resume_deferred(broker);
        self.publish_view();
        Ok(())
    }

    fn control(&mut self, command: AgentControl, broker: &MessageBroker) {
        match command {
            AgentControl::Forgive { debtor, credits, reply } => {
                let forgiven = self.core.ledger_mut().forgive(&debtor, credits);
                info!(agent = %self.core.id(), debtor = %debtor, forgiven, "debt forgiven");
                self.publish_view();
                let _ = reply.send(forgiven);
            }
            AgentControl::ForgivenBy { creditor, credits, reply } => {
                let cleared = self.core.ledger_mut().forgiven_by(&creditor, credits);
                info!(agent = %self.core.id(), creditor = %creditor, cleared, "debt cleared");
                self.publish_view();
                let _ = reply.send(cleared);
            }
            AgentControl::ReviseAttendance { attendance } => {
                self.revise_attendance(attendance, broker);
                self.publish_view();
            }
        }
    }
}
