//! Runs an agent as a tokio task draining its mailbox.

use std::sync::Arc;

use corridor_broker::{Envelope, Mailbox, MessageBroker};
use corridor_core::AgentId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::agent::{Agent, AgentControl};
use crate::error::{AgentError, AgentResult};

/// Hands one envelope to `agent` if its handler table covers the kind.
pub fn dispatch<A: Agent + ?Sized>(agent: &mut A, envelope: &Envelope, broker: &MessageBroker) {
    let kind = envelope.kind();
    if !agent.handles(kind) {
        trace!(agent = %agent.id(), %kind, "no handler");
        return;
    }
    if let Err(error) = agent.handle(envelope, broker) {
        warn!(
            agent = %agent.id(),
            %kind,
            seq = envelope.seq,
            sender = %envelope.sender(),
            %error,
            "handler failed"
        );
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The actor loop: messages, control commands and the pending deadline,
/// until cancelled or the mailbox closes. Returns the agent.
pub async fn run<A: Agent>(
    mut agent: A,
    mut mailbox: Mailbox,
    mut control: mpsc::UnboundedReceiver<AgentControl>,
    broker: Arc<MessageBroker>,
    cancel: CancellationToken,
) -> A {
    info!(agent = %agent.id(), role = %agent.role(), "agent started");
    loop {
        let deadline = agent.deadline();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(command) = control.recv() => agent.control(command, &broker),
            () = wait_for(deadline) => {
                if let Err(error) = agent.on_timeout(&broker) {
                    warn!(agent = %agent.id(), %error, "timeout handling failed");
                }
            }
            envelope = mailbox.recv() => match envelope {
                Some(envelope) => dispatch(&mut agent, &envelope, &broker),
                None => {
                    debug!(agent = %agent.id(), "mailbox closed");
                    break;
                }
            },
        }
    }
    info!(agent = %agent.id(), "agent stopped");
    agent
}

/// A spawned agent task.
#[derive(Debug)]
pub struct ActorHandle<A> {
    id: AgentId,
    control: mpsc::UnboundedSender<AgentControl>,
    cancel: CancellationToken,
    join: JoinHandle<A>,
}

impl<A: Agent + 'static> ActorHandle<A> {
    /// Spawns `agent` on the current runtime.
    ///
    /// `cancel` is the parent token; the task listens on a child of it.
    pub fn spawn(
        agent: A,
        mailbox: Mailbox,
        broker: Arc<MessageBroker>,
        cancel: &CancellationToken,
    ) -> Self {
        let id = agent.id().clone();
        let (control, control_rx) = mpsc::unbounded_channel();
        let cancel = cancel.child_token();
        let join = tokio::spawn(run(agent, mailbox, control_rx, broker, cancel.clone()));
        Self {
            id,
            control,
            cancel,
            join,
        }
    }
}

impl<A> ActorHandle<A> {
    /// Id of the agent.
    #[must_use]
    pub const fn id(&self) -> &AgentId {
        &self.id
    }

    /// Sends a control command.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Stopped` if the task has exited.
    pub fn send(&self, command: AgentControl) -> AgentResult<()> {
        self.control
            .send(command)
            .map_err(|_| AgentError::Stopped(self.id.clone()))
    }

    /// Returns a sender that outlives borrows of the handle.
    #[must_use]
    pub fn controller(&self) -> mpsc::UnboundedSender<AgentControl> {
        self.control.clone()
    }

    /// Waits for the task to end on its own, once the broker closes its
    /// mailbox, and returns the agent. Buffered messages are handled first.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Task` if the task panicked.
    pub async fn join(self) -> AgentResult<A> {
        self.join
            .await
            .map_err(|error| AgentError::Task(error.to_string()))
    }

    /// Cancels the task and returns the agent.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Task` if the task panicked.
    pub async fn stop(self) -> AgentResult<A> {
        self.cancel.cancel();
        self.join
            .await
            .map_err(|error| AgentError::Task(error.to_string()))
    }
}
