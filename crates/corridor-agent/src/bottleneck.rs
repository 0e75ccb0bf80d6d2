//! Bottleneck agent: monitors the corridor and runs negotiation rounds.
//!
//! Each interval walks `Idle → Monitoring → (Negotiating → Resolved) → Idle`.
//! The bottleneck is driven directly by [`BottleneckAgent::advance_interval`]
//! rather than by an actor loop: it collects replies from its own mailbox
//! until the round settles or the deadline passes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use corridor_broker::{
    Envelope, IntervalReport, Mailbox, Message, MessageBroker, MessageKind, NegotiationRequest,
    Payload, Proposal, RejectReason, Rejection, ViolationNotice,
};
use corridor_core::{
    AgentId, AgentRole, Commitment, CommitmentId, CongestionSnapshot, NegotiationConfig, RoundId,
    StrikeRecord, ViolationCounter,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::actor::dispatch;
use crate::agent::{Agent, AgentCore, BOTTLENECK_KINDS};
use crate::arbitration::{Candidate, Decision, Verdict, arbitrate};
use crate::error::{AgentError, AgentResult};
use crate::stats::{CommitmentRecord, IntervalStats, RoundOutcome};

/// Phase of the bottleneck's interval cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BottleneckPhase {
    /// Between intervals.
    #[default]
    Idle,
    /// Collecting interval reports.
    Monitoring,
    /// A round is open.
    Negotiating,
    /// Arbitration done, notifying parties.
    Resolved,
}

impl BottleneckPhase {
    /// Returns true if the phase machine allows moving to `target`.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        use BottleneckPhase::{Idle, Monitoring, Negotiating, Resolved};

        matches!(
            (self, target),
            (Idle, Monitoring)
                | (Monitoring, Idle | Negotiating)
                | (Negotiating, Resolved | Idle)
                | (Resolved, Idle)
        )
    }
}

impl fmt::Display for BottleneckPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Monitoring => write!(f, "Monitoring"),
            Self::Negotiating => write!(f, "Negotiating"),
            Self::Resolved => write!(f, "Resolved"),
        }
    }
}

#[derive(Debug)]
struct ActiveRound {
    id: RoundId,
    snapshot: CongestionSnapshot,
    open_threads: BTreeSet<AgentId>,
    candidates: Vec<Candidate>,
    seen: HashSet<CommitmentId>,
    cancelled: bool,
    timeouts: u32,
}

/// The corridor's bottleneck agent.
#[derive(Debug)]
pub struct BottleneckAgent {
    core: AgentCore,
    config: NegotiationConfig,
    mailbox: Mailbox,
    phase: BottleneckPhase,
    interval: u64,
    violations: ViolationCounter,
    classrooms: BTreeSet<AgentId>,
    reports: BTreeMap<AgentId, IntervalReport>,
    outstanding: Vec<Commitment>,
    round: Option<ActiveRound>,
}

impl BottleneckAgent {
    /// Creates the bottleneck and subscribes it to `broker`.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::AlreadySubscribed` if `id` is taken.
    pub fn new(
        id: AgentId,
        config: NegotiationConfig,
        broker: &MessageBroker,
    ) -> AgentResult<Self> {
        let mailbox = broker.subscribe(id.clone())?;
        Ok(Self {
            core: AgentCore::new(id, AgentRole::Bottleneck),
            violations: ViolationCounter::new(config.violation_limit),
            config,
            mailbox,
            phase: BottleneckPhase::Idle,
            interval: 0,
            classrooms: BTreeSet::new(),
            reports: BTreeMap::new(),
            outstanding: Vec::new(),
            round: None,
        })
    }

    /// Adds a classroom to the monitored set.
    pub fn register_classroom(&mut self, classroom: AgentId) {
        debug!(classroom = %classroom, "classroom registered");
        self.classrooms.insert(classroom);
    }

    /// Monitored classrooms.
    #[must_use]
    pub const fn classrooms(&self) -> &BTreeSet<AgentId> {
        &self.classrooms
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> BottleneckPhase {
        self.phase
    }

    /// Last interval started.
    #[must_use]
    pub const fn interval(&self) -> u64 {
        self.interval
    }

    /// Strike counters.
    #[must_use]
    pub const fn violations(&self) -> &ViolationCounter {
        &self.violations
    }

    /// Accepted commitments awaiting execution.
    #[must_use]
    pub fn outstanding(&self) -> &[Commitment] {
        &self.outstanding
    }

    /// Classrooms below the violation limit.
    #[must_use]
    pub fn eligible(&self) -> Vec<AgentId> {
        self.classrooms
            .iter()
            .filter(|c| self.violations.is_eligible(c))
            .cloned()
            .collect()
    }

    /// Clears the active strikes of `classroom` and tells it so.
    ///
    /// # Errors
    ///
    /// Returns the broker error if the notice cannot be delivered; the
    /// counter is reset regardless.
    pub fn reinstate(
        &mut self,
        classroom: &AgentId,
        broker: &MessageBroker,
    ) -> AgentResult<StrikeRecord> {
        let strikes = self.violations.reinstate(classroom);
        info!(classroom = %classroom, total = strikes.total, "classroom reinstated");
        let notice = ViolationNotice {
            offender: classroom.clone(),
            commitment: None,
            strikes,
            limit: self.violations.limit(),
        };
        broker.publish(Message::to(
            self.core.id().clone(),
            classroom.clone(),
            None,
            Payload::ViolationNotice(notice),
        ))?;
        Ok(strikes)
    }

    /// Runs one full interval: tick, reports, resolution of the previous
    /// interval's commitments, and a negotiation round if risk is too high.
    ///
    /// # Errors
    ///
    /// Fails only if the broker shut down or the mailbox closed; round-local
    /// failures are logged and reflected in the returned statistics.
    pub async fn advance_interval(&mut self, broker: &MessageBroker) -> AgentResult<IntervalStats> {
        let result = self.run_interval(broker).await;
        if result.is_err() {
            self.phase = BottleneckPhase::Idle;
            if let Some(round) = self.round.take() {
                broker.close_round(round.id);
            }
        }
        result
    }

    async fn run_interval(&mut self, broker: &MessageBroker) -> AgentResult<IntervalStats> {
        self.transition(BottleneckPhase::Monitoring)?;
        self.interval += 1;
        let interval = self.interval;
        self.reports.clear();

        broker.publish(Message::broadcast(
            self.core.id().clone(),
            None,
            Payload::IntervalTick { interval },
        ))?;
        let deadline = Instant::now() + self.config.round_timeout();
        if !self.collect(broker, deadline, Self::reports_complete).await? {
            warn!(interval, received = self.reports.len(), "interval reports incomplete");
        }

        let resolved = self.resolve_outstanding(broker);
        let snapshot = self.snapshot();
        let mut stats = IntervalStats::new(interval, &snapshot);
        stats.resolved = resolved;
        stats.missing_reports = self
            .classrooms
            .iter()
            .filter(|c| !self.reports.contains_key(*c))
            .cloned()
            .collect();
        info!(interval, arrivals = snapshot.arrivals, risk = snapshot.risk(), "corridor observed");

        if snapshot.exceeds(self.config.risk_threshold) {
            self.negotiate(snapshot, broker, &mut stats).await?;
        } else {
            self.transition(BottleneckPhase::Idle)?;
            stats.outcome = RoundOutcome::NoNegotiation;
            self.finish(&mut stats, &snapshot, 0);
        }
        Ok(stats)
    }

    fn transition(&mut self, target: BottleneckPhase) -> AgentResult<()> {
        if !self.phase.can_transition_to(&target) {
            return Err(AgentError::InvalidPhase {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }
        debug!(from = %self.phase, to = %target, "phase transition");
        self.phase = target;
        Ok(())
    }

    /// Drains the mailbox until `done` holds or `deadline` passes.
    async fn collect(
        &mut self,
        broker: &MessageBroker,
        deadline: Instant,
        done: fn(&Self) -> bool,
    ) -> AgentResult<bool> {
        while !done(self) {
            match timeout_at(deadline, self.mailbox.recv()).await {
                Ok(Some(envelope)) => dispatch(self, &envelope, broker),
                Ok(None) => return Err(AgentError::MailboxClosed(self.core.id().clone())),
                Err(_) => return Ok(false),
            }
        }
        Ok(true)
    }

    fn reports_complete(&self) -> bool {
        self.classrooms.iter().all(|c| self.reports.contains_key(c))
    }

    fn round_settled(&self) -> bool {
        self.round
            .as_ref()
            .is_none_or(|round| round.cancelled || round.open_threads.is_empty())
    }

    fn snapshot(&self) -> CongestionSnapshot {
        let per_agent = self
            .reports
            .iter()
            .map(|(agent, report)| (agent.clone(), report.expected_arrivals))
            .collect();
        CongestionSnapshot::from_arrivals(per_agent, &self.config)
    }

    fn send(&self, broker: &MessageBroker, to: &AgentId, round: Option<RoundId>, payload: Payload) {
        let message = Message::to(self.core.id().clone(), to.clone(), round, payload);
        if let Err(error) = broker.publish(message) {
            warn!(to = %to, %error, "notification not delivered");
        }
    }

    /// Sends `payload` to both parties of `commitment`.
    fn notify_parties(&self, broker: &MessageBroker, commitment: &Commitment, payload: &Payload) {
        for party in [&commitment.proposer, &commitment.acceptor] {
            self.send(broker, party, Some(commitment.round), payload.clone());
        }
    }

    /// Fulfils or violates every commitment for a past interval, based on
    /// the proposer's report.
    fn resolve_outstanding(&mut self, broker: &MessageBroker) -> Vec<CommitmentRecord> {
        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.outstanding)
            .into_iter()
            .partition(|c| c.interval < self.interval);
        self.outstanding = later;

        let mut records = Vec::with_capacity(due.len());
        for mut commitment in due {
            let applied = self
                .reports
                .get(&commitment.proposer)
                .and_then(|report| {
                    report
                        .executed
                        .iter()
                        .find(|shift| shift.commitment_id == commitment.id)
                })
                .map(|shift| shift.applied_minutes);

            if applied == Some(commitment.adjustment.minutes()) {
                if let Err(error) = commitment.fulfill() {
                    warn!(commitment = %commitment.id, %error, "cannot fulfil");
                    continue;
                }
                self.core.apply_transition(&commitment);
                info!(
                    commitment = %commitment.id,
                    proposer = %commitment.proposer,
                    adjustment = %commitment.adjustment,
                    "commitment fulfilled"
                );
                let confirm = Payload::CommitmentConfirm(commitment.clone());
                self.notify_parties(broker, &commitment, &confirm);
            } else {
                if let Err(error) = commitment.violate() {
                    warn!(commitment = %commitment.id, %error, "cannot violate");
                    continue;
                }
                self.core.apply_transition(&commitment);
                let strikes = self.violations.record_violation(&commitment.proposer);
                let error = AgentError::CommitmentViolation {
                    commitment: commitment.id,
                    agent: commitment.proposer.clone(),
                };
                warn!(
                    %error,
                    applied = ?applied,
                    strikes = strikes.active(),
                    "commitment not honored"
                );
                let notice = ViolationNotice {
                    offender: commitment.proposer.clone(),
                    commitment: Some(commitment.clone()),
                    strikes,
                    limit: self.violations.limit(),
                };
                self.notify_parties(broker, &commitment, &Payload::ViolationNotice(notice));
            }
            records.push(CommitmentRecord::of(&commitment));
        }
        records
    }

    async fn negotiate(
        &mut self,
        snapshot: CongestionSnapshot,
        broker: &MessageBroker,
        stats: &mut IntervalStats,
    ) -> AgentResult<()> {
        let round_id = RoundId::new();
        let eligible = self.eligible();
        stats.round = Some(round_id);
        self.transition(BottleneckPhase::Negotiating)?;
        broker.open_round(round_id, self.core.id().clone());

        if eligible.len() < 2 {
            warn!(
                round = %round_id.short(),
                eligible = eligible.len(),
                "too few eligible classrooms, congestion left to natural flow"
            );
            broker.close_round(round_id);
            self.transition(BottleneckPhase::Resolved)?;
            self.transition(BottleneckPhase::Idle)?;
            stats.outcome = RoundOutcome::Unresolved;
            self.finish(stats, &snapshot, 0);
            return Ok(());
        }

        info!(
            round = %round_id.short(),
            interval = self.interval,
            eligible = eligible.len(),
            "round opened"
        );
        self.round = Some(ActiveRound {
            id: round_id,
            snapshot: snapshot.clone(),
            open_threads: eligible.iter().cloned().collect(),
            candidates: Vec::new(),
            seen: HashSet::new(),
            cancelled: false,
            timeouts: 0,
        });
        let request = NegotiationRequest {
            interval: self.interval,
            snapshot: snapshot.clone(),
            eligible,
        };
        broker.publish(Message::broadcast(
            self.core.id().clone(),
            Some(round_id),
            Payload::NegotiationRequest(request),
        ))?;

        let deadline = Instant::now() + self.config.round_timeout();
        let settled = self.collect(broker, deadline, Self::round_settled).await?;
        let Some(round) = self.round.take() else {
            return Err(AgentError::InvalidPhase {
                from: self.phase.to_string(),
                to: BottleneckPhase::Resolved.to_string(),
            });
        };

        if round.cancelled {
            let swept = broker.cancel_round(round.id);
            broker.publish(Message::broadcast(
                self.core.id().clone(),
                Some(round.id),
                Payload::Reject(Rejection::declined(RejectReason::Cancelled)),
            ))?;
            broker.close_round(round.id);
            info!(
                round = %round.id.short(),
                swept,
                risk = round.snapshot.risk(),
                "round cancelled, risk subsided"
            );
            self.transition(BottleneckPhase::Idle)?;
            stats.outcome = RoundOutcome::Cancelled;
            self.finish(stats, &round.snapshot, 0);
            return Ok(());
        }

        if !settled {
            for agent in &round.open_threads {
                let error = AgentError::NegotiationTimeout {
                    agent: agent.clone(),
                    round: round.id,
                };
                warn!(%error, "thread left open");
            }
            stats.timeouts += u32::try_from(round.open_threads.len()).unwrap_or(u32::MAX);
        }
        stats.timeouts += round.timeouts;

        self.transition(BottleneckPhase::Resolved)?;
        let moved = self.resolve_round(&round, broker, stats);
        broker.close_round(round.id);
        self.transition(BottleneckPhase::Idle)?;
        self.finish(stats, &round.snapshot, moved);
        Ok(())
    }

    /// Arbitrates the round's candidates and notifies both parties of each.
    fn resolve_round(
        &mut self,
        round: &ActiveRound,
        broker: &MessageBroker,
        stats: &mut IntervalStats,
    ) -> u32 {
        let decisions = match arbitrate(round.candidates.clone(), &round.snapshot) {
            Ok(allocation) => {
                stats.outcome = if allocation.moved > 0 {
                    RoundOutcome::Resolved
                } else {
                    RoundOutcome::Unresolved
                };
                allocation.decisions
            }
            Err(error) => {
                error!(
                    round = %round.id.short(),
                    %error,
                    "allocation check failed, rejecting every candidate"
                );
                stats.outcome = RoundOutcome::Aborted;
                round
                    .candidates
                    .iter()
                    .map(|candidate| Decision {
                        candidate: candidate.clone(),
                        verdict: Verdict::Rejected(RejectReason::Aborted),
                    })
                    .collect()
            }
        };

        let mut moved = 0;
        for decision in decisions {
            let proposal = decision.candidate.proposal;
            let mut commitment = match proposal.to_commitment(round.id) {
                Ok(commitment) => commitment,
                Err(error) => {
                    warn!(
                        commitment = %proposal.commitment_id,
                        %error,
                        "malformed candidate dropped"
                    );
                    continue;
                }
            };
            match decision.verdict {
                Verdict::Admitted { moved: students } => {
                    if let Err(error) = commitment.accept() {
                        warn!(commitment = %commitment.id, %error, "cannot accept");
                        continue;
                    }
                    moved += students;
                    self.core.apply_transition(&commitment);
                    info!(
                        round = %round.id.short(),
                        commitment = %commitment.id,
                        proposer = %commitment.proposer,
                        acceptor = %commitment.acceptor,
                        adjustment = %commitment.adjustment,
                        moved = students,
                        "commitment admitted"
                    );
                    let confirm = Payload::CommitmentConfirm(commitment.clone());
                    self.notify_parties(broker, &commitment, &confirm);
                    stats.commitments.push(CommitmentRecord::of(&commitment).with_moved(students));
                    self.outstanding.push(commitment);
                }
                Verdict::Rejected(reason) => {
                    if let Err(error) = commitment.reject() {
                        warn!(commitment = %commitment.id, %error, "cannot reject");
                        continue;
                    }
                    self.core.apply_transition(&commitment);
                    info!(
                        round = %round.id.short(),
                        commitment = %commitment.id,
                        proposer = %commitment.proposer,
                        %reason,
                        "commitment rejected"
                    );
                    self.notify_parties(
                        broker,
                        &commitment,
                        &Payload::Reject(Rejection::of(proposal, reason)),
                    );
                    stats.commitments.push(CommitmentRecord::of(&commitment).with_reason(reason));
                }
            }
        }
        if moved == 0 {
            warn!(round = %round.id.short(), "congestion unresolved, natural flow");
        }
        moved
    }

    fn finish(&self, stats: &mut IntervalStats, snapshot: &CongestionSnapshot, moved: u32) {
        stats.record_flow(snapshot, moved);
        stats.trust = self.core.trust().snapshot();
        stats.violations = self.violations.totals();
        info!(
            interval = stats.interval,
            outcome = %stats.outcome,
            moved,
            utilization = stats.utilization,
            "interval closed"
        );
    }

    fn on_report(&mut self, envelope: &Envelope, report: &IntervalReport) {
        let sender = envelope.sender();
        if !self.classrooms.contains(sender) || report.interval != self.interval {
            debug!(sender = %sender, interval = report.interval, "stale report ignored");
            return;
        }
        let revision = envelope
            .round()
            .zip(self.round.as_ref())
            .is_some_and(|(r, round)| r == round.id);
        match self.reports.get_mut(sender) {
            Some(existing) if revision => existing.expected_arrivals = report.expected_arrivals,
            Some(_) if self.phase != BottleneckPhase::Monitoring => {
                debug!(sender = %sender, "late duplicate report ignored");
                return;
            }
            _ => {
                self.reports.insert(sender.clone(), report.clone());
            }
        }
        if !revision {
            return;
        }

        let snapshot = self.snapshot();
        let threshold = self.config.risk_threshold;
        if let Some(round) = self.round.as_mut() {
            info!(
                round = %round.id.short(),
                classroom = %sender,
                attendance = report.expected_arrivals,
                risk = snapshot.risk(),
                "attendance revised"
            );
            round.cancelled = !snapshot.exceeds(threshold);
            round.snapshot = snapshot;
        }
    }

    fn on_accept(&mut self, envelope: &Envelope, proposal: &Proposal) {
        let interval = self.interval;
        let max = self.config.max_adjustment_mins;
        let id = self.core.id().clone();
        let trust = self.core.trust().get(&proposal.proposer).value();
        let Some(round) = self.round.as_mut().filter(|r| Some(r.id) == envelope.round()) else {
            debug!(commitment = %proposal.commitment_id, "accept outside the active round ignored");
            return;
        };
        let sender = envelope.sender();
        if proposal.coordinator != id
            || (sender != &proposal.proposer && sender != &proposal.acceptor)
        {
            warn!(
                sender = %sender,
                commitment = %proposal.commitment_id,
                "accept from outside the pair ignored"
            );
            return;
        }
        if !round.seen.insert(proposal.commitment_id)
            || !round.open_threads.remove(&proposal.proposer)
        {
            debug!(commitment = %proposal.commitment_id, "thread already closed");
            return;
        }
        if proposal.interval != interval || proposal.adjustment.check(max).is_err() {
            warn!(commitment = %proposal.commitment_id, "invalid accept closes the thread");
            return;
        }
        debug!(
            round = %round.id.short(),
            proposer = %proposal.proposer,
            acceptor = %proposal.acceptor,
            adjustment = %proposal.adjustment,
            seq = envelope.seq,
            "candidate collected"
        );
        round.candidates.push(Candidate {
            proposal: proposal.clone(),
            seq: envelope.seq,
            trust,
        });
    }

    fn on_reject(&mut self, envelope: &Envelope, rejection: &Rejection) {
        let Some(round) = self.round.as_mut().filter(|r| Some(r.id) == envelope.round()) else {
            return;
        };
        let sender = envelope.sender();
        let thread = match &rejection.proposal {
            Some(proposal) if sender == &proposal.proposer || sender == &proposal.acceptor => {
                &proposal.proposer
            }
            Some(_) => {
                warn!(sender = %sender, "reject from outside the pair ignored");
                return;
            }
            None => sender,
        };
        if round.open_threads.remove(thread) {
            if rejection.reason == RejectReason::Timeout {
                round.timeouts += 1;
            }
            debug!(
                round = %round.id.short(),
                thread = %thread,
                reason = %rejection.reason,
                "thread closed"
            );
        }
    }
}

impl Agent for BottleneckAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn handled_kinds(&self) -> &'static [MessageKind] {
        BOTTLENECK_KINDS
    }

    fn handle(&mut self, envelope: &Envelope, _broker: &MessageBroker) -> AgentResult<()> {
        match envelope.payload() {
            Payload::IntervalReport(report) => self.on_report(envelope, report),
            Payload::Accept(proposal) => self.on_accept(envelope, proposal),
            Payload::Reject(rejection) => self.on_reject(envelope, rejection),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use corridor_core::{CommitmentState, ShiftDirection};
    use test_case::test_case;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::actor::ActorHandle;
    use crate::classroom::{ClassroomAgent, ClassroomProfile};

    fn agent(name: &str) -> AgentId {
        AgentId::new(name).unwrap()
    }

    fn config() -> NegotiationConfig {
        NegotiationConfig::builder()
            .round_timeout(Duration::from_millis(150))
            .build()
            .unwrap()
    }

    fn bottleneck(
        broker: &MessageBroker,
        config: &NegotiationConfig,
        rooms: &[&str],
    ) -> BottleneckAgent {
        let mut hub = BottleneckAgent::new(agent("Bottleneck"), config.clone(), broker).unwrap();
        for room in rooms {
            hub.register_classroom(agent(room));
        }
        hub
    }

    fn spawn_classroom(
        broker: &Arc<MessageBroker>,
        profile: ClassroomProfile,
        config: &NegotiationConfig,
        root: &CancellationToken,
    ) -> ActorHandle<ClassroomAgent> {
        let mailbox = broker.subscribe(profile.id.clone()).unwrap();
        let room = ClassroomAgent::new(profile, config.clone()).unwrap();
        ActorHandle::spawn(room, mailbox, Arc::clone(broker), root)
    }

    #[derive(Clone, Copy)]
    enum Script {
        Decline,
        Silent,
        Revise(u32),
    }

    /// A scripted classroom: reports fixed attendance and follows `script`
    /// when a round opens.
    fn scripted(
        broker: &Arc<MessageBroker>,
        name: &str,
        attendance: u32,
        script: Script,
    ) -> JoinHandle<()> {
        let mut mailbox = broker.subscribe(agent(name)).unwrap();
        let broker = Arc::clone(broker);
        let me = agent(name);
        tokio::spawn(async move {
            while let Some(envelope) = mailbox.recv().await {
                let hub = envelope.sender().clone();
                let round = envelope.round();
                let reply = |payload| {
                    let _ = broker.publish(Message::to(me.clone(), hub.clone(), round, payload));
                };
                match envelope.payload() {
                    Payload::IntervalTick { interval } => {
                        reply(Payload::IntervalReport(IntervalReport {
                            interval: *interval,
                            expected_arrivals: attendance,
                            executed: Vec::new(),
                        }));
                    }
                    Payload::NegotiationRequest(request) => match script {
                        Script::Decline => {
                            reply(Payload::Reject(Rejection::declined(RejectReason::Declined)));
                        }
                        Script::Silent => {}
                        Script::Revise(revised) => {
                            reply(Payload::IntervalReport(IntervalReport {
                                interval: request.interval,
                                expected_arrivals: revised,
                                executed: Vec::new(),
                            }));
                            reply(Payload::Reject(Rejection::declined(RejectReason::Declined)));
                        }
                    },
                    _ => {}
                }
            }
        })
    }

    // ========================================================================
    // Phase machine
    // ========================================================================

    #[test_case(BottleneckPhase::Idle, BottleneckPhase::Monitoring, true ; "idle to monitoring")]
    #[test_case(BottleneckPhase::Monitoring, BottleneckPhase::Idle, true ; "calm interval")]
    #[test_case(BottleneckPhase::Monitoring, BottleneckPhase::Negotiating, true ; "risk detected")]
    #[test_case(BottleneckPhase::Negotiating, BottleneckPhase::Idle, true ; "cancelled round")]
    #[test_case(BottleneckPhase::Negotiating, BottleneckPhase::Resolved, true ; "round resolved")]
    #[test_case(BottleneckPhase::Resolved, BottleneckPhase::Idle, true ; "back to idle")]
    #[test_case(BottleneckPhase::Idle, BottleneckPhase::Negotiating, false ; "skip monitoring")]
    #[test_case(BottleneckPhase::Resolved, BottleneckPhase::Negotiating, false ; "reopen resolved")]
    #[test_case(BottleneckPhase::Monitoring, BottleneckPhase::Resolved, false ; "resolve without round")]
    fn phase_transitions(from: BottleneckPhase, to: BottleneckPhase, allowed: bool) {
        assert_eq!(from.can_transition_to(&to), allowed);
    }

    // ========================================================================
    // Intervals
    // ========================================================================

    #[tokio::test]
    async fn calm_interval_skips_negotiation() {
        let broker = Arc::new(MessageBroker::new());
        let config = config();
        let mut hub = bottleneck(&broker, &config, &["A", "B"]);
        let a = scripted(&broker, "A", 20, Script::Silent);
        let b = scripted(&broker, "B", 25, Script::Silent);

        let stats = hub.advance_interval(&broker).await.unwrap();

        assert_eq!(stats.interval, 1);
        assert_eq!(stats.arrivals, 45);
        assert_eq!(stats.outcome, RoundOutcome::NoNegotiation);
        assert!(stats.round.is_none());
        assert!(stats.missing_reports.is_empty());
        assert_eq!(hub.phase(), BottleneckPhase::Idle);
        broker.shutdown();
        let _ = tokio::join!(a, b);
    }

    #[tokio::test]
    async fn missing_report_is_recorded() {
        let broker = Arc::new(MessageBroker::new());
        let config = config();
        let mut hub = bottleneck(&broker, &config, &["A", "B"]);
        let a = scripted(&broker, "A", 20, Script::Silent);
        let _b_box = broker.subscribe(agent("B")).unwrap();

        let stats = hub.advance_interval(&broker).await.unwrap();

        assert_eq!(stats.missing_reports, vec![agent("B")]);
        assert_eq!(stats.arrivals, 20);
        broker.shutdown();
        let _ = a.await;
    }

    #[tokio::test]
    async fn high_risk_admits_a_shift() {
        let broker = Arc::new(MessageBroker::new());
        let config = config();
        let root = CancellationToken::new();
        let mut hub = bottleneck(&broker, &config, &["A", "B"]);
        // 80 students, capacity 50: risk 0.6. B is inflexible and only accepts.
        let a_profile = ClassroomProfile::new(agent("A"), 40, 0.8);
        let a = spawn_classroom(&broker, a_profile, &config, &root);
        let b_profile = ClassroomProfile::new(agent("B"), 40, 0.1);
        let b = spawn_classroom(&broker, b_profile, &config, &root);

        let stats = hub.advance_interval(&broker).await.unwrap();

        assert!((stats.risk - 0.6).abs() < 1e-9);
        assert_eq!(stats.outcome, RoundOutcome::Resolved);
        let admitted: Vec<_> = stats.admitted().collect();
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].proposer, agent("A"));
        assert_eq!(admitted[0].acceptor, agent("B"));
        assert_eq!(admitted[0].minutes, -4);
        assert_eq!(stats.moved, 40);
        assert!((stats.utilization - 0.8).abs() < 1e-9);
        assert_eq!(stats.clearance_improvement_mins, 2);
        assert_eq!(hub.outstanding().len(), 1);
        assert_eq!(
            broker.round_status(stats.round.unwrap()),
            Some(corridor_broker::RoundStatus::Closed)
        );

        // next interval: A executes the shift and is rewarded
        let next = hub.advance_interval(&broker).await.unwrap();
        assert_eq!(next.resolved.len(), 1);
        assert_eq!(next.resolved[0].state, CommitmentState::Fulfilled);
        assert!((next.trust[&agent("A")] - 0.6).abs() < 1e-9);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let a = a.stop().await.unwrap();
        let b = b.stop().await.unwrap();
        assert!((b.core().trust().get(&agent("A")).value() - 0.6).abs() < 1e-9);
        // credits balance across the pair
        let credit = a.core().ledger().balance(&agent("B"));
        assert!(credit >= 4);
        assert_eq!(credit, -b.core().ledger().balance(&agent("A")));
    }

    #[tokio::test]
    async fn unhonored_shift_strikes_and_flags() {
        let broker = Arc::new(MessageBroker::new());
        let config = NegotiationConfig::builder()
            .round_timeout(Duration::from_millis(150))
            .violation_limit(1)
            .build()
            .unwrap();
        let root = CancellationToken::new();
        let mut hub = bottleneck(&broker, &config, &["A", "B"]);
        let a_profile = ClassroomProfile::new(agent("A"), 40, 0.8)
            .with_reliability(0.0)
            .with_direction(ShiftDirection::Later);
        let a = spawn_classroom(&broker, a_profile, &config, &root);
        let b_profile = ClassroomProfile::new(agent("B"), 40, 0.1);
        let b = spawn_classroom(&broker, b_profile, &config, &root);

        let first = hub.advance_interval(&broker).await.unwrap();
        assert_eq!(first.admitted().count(), 1);

        let second = hub.advance_interval(&broker).await.unwrap();
        assert_eq!(second.resolved[0].state, CommitmentState::Violated);
        assert_eq!(second.violations[&agent("A")], 1);
        assert!((second.trust[&agent("A")] - 0.3).abs() < 1e-9);
        // A is flagged: one eligible classroom cannot negotiate
        assert_eq!(second.outcome, RoundOutcome::Unresolved);
        assert!(second.commitments.is_empty());

        let strikes = hub.reinstate(&agent("A"), &broker).unwrap();
        assert_eq!(strikes.active(), 0);
        assert_eq!(hub.eligible(), vec![agent("A"), agent("B")]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let a = a.stop().await.unwrap();
        b.stop().await.unwrap();
        assert!(a.is_eligible());
        assert_eq!(a.strikes().total, 1);
        assert_eq!(a.core().ledger().balance(&agent("B")), 0);
    }

    #[tokio::test]
    async fn revised_attendance_cancels_round() {
        let broker = Arc::new(MessageBroker::new());
        let config = config();
        let mut hub = bottleneck(&broker, &config, &["A", "B"]);
        let a = scripted(&broker, "A", 40, Script::Revise(5));
        let b = scripted(&broker, "B", 40, Script::Decline);

        let stats = hub.advance_interval(&broker).await.unwrap();

        assert_eq!(stats.outcome, RoundOutcome::Cancelled);
        assert!(stats.commitments.is_empty());
        assert_eq!(stats.moved, 0);
        assert_eq!(hub.phase(), BottleneckPhase::Idle);
        assert_eq!(
            broker.round_status(stats.round.unwrap()),
            Some(corridor_broker::RoundStatus::Closed)
        );
        broker.shutdown();
        let _ = tokio::join!(a, b);
    }

    #[tokio::test]
    async fn silent_classrooms_time_out() {
        let broker = Arc::new(MessageBroker::new());
        let config = config();
        let mut hub = bottleneck(&broker, &config, &["A", "B"]);
        let a = scripted(&broker, "A", 40, Script::Silent);
        let b = scripted(&broker, "B", 40, Script::Silent);

        let stats = hub.advance_interval(&broker).await.unwrap();

        assert_eq!(stats.outcome, RoundOutcome::Unresolved);
        assert_eq!(stats.timeouts, 2);
        assert_eq!(hub.phase(), BottleneckPhase::Idle);
        broker.shutdown();
        let _ = tokio::join!(a, b);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unanswered_offer_times_out_inside_the_round() {
        let broker = Arc::new(MessageBroker::new());
        let config = config();
        let root = CancellationToken::new();
        let mut hub = bottleneck(&broker, &config, &["A", "B"]);
        // B declines its own thread and never answers A's offer
        let a_profile = ClassroomProfile::new(agent("A"), 40, 0.8);
        let a = spawn_classroom(&broker, a_profile, &config, &root);
        let b = scripted(&broker, "B", 40, Script::Decline);

        let started = Instant::now();
        let stats = hub.advance_interval(&broker).await.unwrap();

        // A's own timeout closes its thread before the round deadline
        assert!(started.elapsed() < config.round_timeout());
        assert_eq!(stats.timeouts, 1);
        assert!(stats.commitments.is_empty());
        a.stop().await.unwrap();
        broker.shutdown();
        let _ = b.await;
    }

    #[tokio::test]
    async fn shutdown_surfaces_as_error_and_resets_phase() {
        let broker = MessageBroker::new();
        let mut hub = bottleneck(&broker, &config(), &["A"]);
        broker.shutdown();
        assert!(hub.advance_interval(&broker).await.is_err());
        assert_eq!(hub.phase(), BottleneckPhase::Idle);
    }
}
