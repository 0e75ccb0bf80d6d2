//! The message broker.
//!
//! One queue lock covers every mailbox and the global sequence counter, so
//! all recipients observe published messages in the same order. Each agent
//! drains its [`Mailbox`] from its own task; handlers never run under a
//! broker lock.
//!
//! Lock order is pair map, then pair slot, then queue. The queue lock is
//! never held while a pair lock is requested.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use corridor_core::{AgentId, CommitmentState, RoundId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::message::{Envelope, Message, Payload, Recipient, ViolationNotice};
use crate::pairs::{LiveEntry, PairTable};

/// Closed rounds remembered so late ACCEPTs still fail with `RoundClosed`.
/// Older rounds are forgotten along with any pair entries they still hold.
pub const RETAINED_ROUNDS: usize = 64;

/// Lifecycle of a negotiation round as seen by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Acceptances are taken.
    Open,
    /// Cancelled before resolution; acceptances fail.
    Cancelled,
    /// Resolved and discarded; acceptances fail.
    Closed,
}

#[derive(Debug)]
struct RoundRecord {
    coordinator: AgentId,
    status: RoundStatus,
    log: Vec<Envelope>,
}

#[derive(Debug, Default)]
struct QueueState {
    mailboxes: HashMap<AgentId, mpsc::UnboundedSender<Envelope>>,
    order: Vec<AgentId>,
    rounds: HashMap<RoundId, RoundRecord>,
    retired: VecDeque<RoundId>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    fn check_open(&self, round: RoundId) -> BrokerResult<()> {
        match self.rounds.get(&round).map(|record| record.status) {
            Some(RoundStatus::Open) => Ok(()),
            Some(RoundStatus::Cancelled) => Err(BrokerError::RoundCancelled(round)),
            Some(RoundStatus::Closed) => Err(BrokerError::RoundClosed(round)),
            None => Err(BrokerError::UnknownRound(round)),
        }
    }

    fn is_coordinator(&self, round: RoundId, agent: &AgentId) -> bool {
        self.rounds
            .get(&round)
            .is_some_and(|record| &record.coordinator == agent)
    }

    fn enqueue(&mut self, message: Message) -> BrokerResult<u64> {
        if self.closed {
            return Err(BrokerError::Closed);
        }
        if let Recipient::Agent(id) = &message.recipient {
            if !self.mailboxes.contains_key(id) {
                warn!(
                    recipient = %id,
                    kind = %message.kind(),
                    "dropping message for unknown recipient"
                );
                return Err(BrokerError::UnknownRecipient(id.clone()));
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let envelope = Envelope {
            seq,
            published_at: Utc::now(),
            message,
        };

        let mut dead = Vec::new();
        match &envelope.message.recipient {
            Recipient::Agent(id) => {
                if let Some(tx) = self.mailboxes.get(id) {
                    if tx.send(envelope.clone()).is_err() {
                        dead.push(id.clone());
                    }
                }
            }
            Recipient::Broadcast => {
                for id in self.order.iter().filter(|id| **id != envelope.message.sender) {
                    if let Some(tx) = self.mailboxes.get(id) {
                        if tx.send(envelope.clone()).is_err() {
                            dead.push(id.clone());
                        }
                    }
                }
            }
        }
        for id in &dead {
            debug!(agent = %id, "mailbox dropped, unsubscribing");
            self.mailboxes.remove(id);
            self.order.retain(|other| other != id);
        }

        debug!(
            seq,
            kind = %envelope.kind(),
            sender = %envelope.message.sender,
            recipient = %envelope.message.recipient,
            "published"
        );

        if let Some(round) = envelope.message.round {
            if let Some(record) = self.rounds.get_mut(&round) {
                if record.status != RoundStatus::Closed {
                    record.log.push(envelope);
                }
            }
        }
        Ok(seq)
    }
}

/// Receiving end of an agent's queue. Messages arrive in publish order.
#[derive(Debug)]
pub struct Mailbox {
    owner: AgentId,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Mailbox {
    /// Agent the mailbox belongs to.
    #[must_use]
    pub const fn owner(&self) -> &AgentId {
        &self.owner
    }

    /// Waits for the next message; `None` once the broker drops the mailbox.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Next message if one is queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    /// Every queued message, in order.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(envelope) = self.try_recv() {
            out.push(envelope);
        }
        out
    }
}

/// Routes typed messages between registered agents.
///
/// Shared by reference (usually inside an `Arc`); all methods take `&self`.
#[derive(Debug, Default)]
pub struct MessageBroker {
    queue: Mutex<QueueState>,
    pairs: PairTable,
}

impl MessageBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent` and returns its mailbox.
    ///
    /// # Errors
    ///
    /// `AlreadySubscribed` if the agent has a live mailbox, `Closed` after shutdown.
    pub fn subscribe(&self, agent: AgentId) -> BrokerResult<Mailbox> {
        let mut queue = self.queue.lock();
        if queue.closed {
            return Err(BrokerError::Closed);
        }
        if queue
            .mailboxes
            .get(&agent)
            .is_some_and(|tx| !tx.is_closed())
        {
            return Err(BrokerError::AlreadySubscribed(agent));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        queue.mailboxes.insert(agent.clone(), tx);
        if !queue.order.contains(&agent) {
            queue.order.push(agent.clone());
        }
        info!(agent = %agent, "agent subscribed");
        Ok(Mailbox {
            owner: agent,
            receiver: rx,
        })
    }

    /// Removes `agent`'s mailbox; returns false if it had none.
    pub fn unsubscribe(&self, agent: &AgentId) -> bool {
        let mut queue = self.queue.lock();
        queue.order.retain(|other| other != agent);
        queue.mailboxes.remove(agent).is_some()
    }

    /// Returns true if `agent` has a mailbox.
    #[must_use]
    pub fn is_subscribed(&self, agent: &AgentId) -> bool {
        self.queue.lock().mailboxes.contains_key(agent)
    }

    /// Subscribed agents, in subscription order.
    #[must_use]
    pub fn subscribers(&self) -> Vec<AgentId> {
        self.queue.lock().order.clone()
    }

    /// Publishes `message` and returns its sequence number.
    ///
    /// ACCEPT is registered against the pair and enqueued inside the pair's
    /// critical section. Confirmations, violation notices and coordinator
    /// rejections update the pair's live entry the same way.
    ///
    /// # Errors
    ///
    /// - `UnknownRecipient` if the addressed agent has no mailbox
    /// - `PairConflict` if an ACCEPT collides with a live commitment of the pair
    /// - `RoundCancelled`, `RoundClosed`, `UnknownRound`, `MissingRound` for an ACCEPT outside an open round
    /// - `Closed` after shutdown
    pub fn publish(&self, message: Message) -> BrokerResult<u64> {
        match &message.payload {
            Payload::Accept(proposal) => {
                let round = message.round.ok_or(BrokerError::MissingRound)?;
                let id = proposal.commitment_id;
                let (proposer, acceptor) = (proposal.proposer.clone(), proposal.acceptor.clone());
                self.pairs.with_pair(&proposer, &acceptor, |key, slots| {
                    let mut queue = self.queue.lock();
                    queue.check_open(round)?;
                    let fresh = slots.entry(round).is_none();
                    slots.reserve(key, round, id)?;
                    queue.enqueue(message).inspect_err(|_| {
                        if fresh {
                            slots.release(round, id);
                        }
                    })
                })
            }
            Payload::CommitmentConfirm(commitment) => {
                let (round, id, state) = (commitment.round, commitment.id, commitment.state);
                let (proposer, acceptor) =
                    (commitment.proposer.clone(), commitment.acceptor.clone());
                self.pairs.with_pair(&proposer, &acceptor, |_, slots| {
                    let mut queue = self.queue.lock();
                    let seq = queue.enqueue(message)?;
                    match state {
                        CommitmentState::Accepted => slots.confirm(round, id),
                        CommitmentState::Proposed => {}
                        CommitmentState::Rejected
                        | CommitmentState::Fulfilled
                        | CommitmentState::Violated => {
                            slots.release(round, id);
                        }
                    }
                    Ok(seq)
                })
            }
            Payload::ViolationNotice(ViolationNotice {
                commitment: Some(commitment),
                ..
            }) => {
                let commitment = commitment.clone();
                self.pairs
                    .with_pair(&commitment.proposer, &commitment.acceptor, |_, slots| {
                        let seq = self.queue.lock().enqueue(message)?;
                        slots.release(commitment.round, commitment.id);
                        Ok(seq)
                    })
            }
            Payload::Reject(rejection) => {
                let (Some(round), Some(proposal)) = (message.round, rejection.proposal.clone())
                else {
                    return self.queue.lock().enqueue(message);
                };
                self.pairs
                    .with_pair(&proposal.proposer, &proposal.acceptor, |_, slots| {
                        let mut queue = self.queue.lock();
                        let from_coordinator = queue.is_coordinator(round, &message.sender);
                        let seq = queue.enqueue(message)?;
                        if from_coordinator {
                            slots.release(round, proposal.commitment_id);
                        }
                        Ok(seq)
                    })
            }
            _ => self.queue.lock().enqueue(message),
        }
    }

    /// Starts accepting ACCEPT messages for `round`, coordinated by `coordinator`.
    pub fn open_round(&self, round: RoundId, coordinator: AgentId) {
        let mut queue = self.queue.lock();
        queue.rounds.entry(round).or_insert_with(|| RoundRecord {
            coordinator,
            status: RoundStatus::Open,
            log: Vec::new(),
        });
        debug!(round = %round.short(), "round opened");
    }

    /// Cancels an open round and drops its still-proposed commitments.
    ///
    /// Returns how many pair entries were swept. After this returns, any
    /// ACCEPT for the round fails with `RoundCancelled`.
    pub fn cancel_round(&self, round: RoundId) -> usize {
        {
            let mut queue = self.queue.lock();
            match queue.rounds.get_mut(&round) {
                Some(record) if record.status == RoundStatus::Open => {
                    record.status = RoundStatus::Cancelled;
                }
                _ => return 0,
            }
        }
        let swept = self.pairs.sweep_round(round);
        info!(round = %round.short(), swept, "round cancelled");
        swept
    }

    /// Closes a round and returns its message log. Later ACCEPTs fail with
    /// `RoundClosed`.
    ///
    /// Only the last [`RETAINED_ROUNDS`] closed rounds are remembered; an
    /// ACCEPT for an older one fails with `UnknownRound`.
    pub fn close_round(&self, round: RoundId) -> Vec<Envelope> {
        let (log, expired) = {
            let mut queue = self.queue.lock();
            let log = match queue.rounds.get_mut(&round) {
                Some(record) if record.status != RoundStatus::Closed => {
                    record.status = RoundStatus::Closed;
                    let log = std::mem::take(&mut record.log);
                    queue.retired.push_back(round);
                    log
                }
                _ => Vec::new(),
            };
            let mut expired = Vec::new();
            while queue.retired.len() > RETAINED_ROUNDS {
                if let Some(old) = queue.retired.pop_front() {
                    queue.rounds.remove(&old);
                    expired.push(old);
                }
            }
            (log, expired)
        };
        self.pairs.sweep_round(round);
        for old in &expired {
            self.pairs.forget_round(*old);
        }
        let pairs = self.pairs.prune_idle();
        debug!(round = %round.short(), messages = log.len(), pairs, "round closed");
        log
    }

    /// Status of `round`, if it was ever opened.
    #[must_use]
    pub fn round_status(&self, round: RoundId) -> Option<RoundStatus> {
        self.queue.lock().rounds.get(&round).map(|record| record.status)
    }

    /// Messages published so far in `round` (empty once closed).
    #[must_use]
    pub fn round_log(&self, round: RoundId) -> Vec<Envelope> {
        self.queue
            .lock()
            .rounds
            .get(&round)
            .map(|record| record.log.clone())
            .unwrap_or_default()
    }

    /// Rounds the broker still tracks, open or closed.
    #[must_use]
    pub fn retained_rounds(&self) -> usize {
        self.queue.lock().rounds.len()
    }

    /// Pairs that currently own a critical section.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    /// Live commitment the pair `(a, b)` holds in `round`.
    #[must_use]
    pub fn live_commitment(&self, a: &AgentId, b: &AgentId, round: RoundId) -> Option<LiveEntry> {
        self.pairs.live_entry(a, b, round)
    }

    /// Drops every mailbox; receivers observe end of stream.
    pub fn shutdown(&self) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        queue.mailboxes.clear();
        queue.order.clear();
        info!("broker shut down");
    }

    /// Returns true after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }
}
