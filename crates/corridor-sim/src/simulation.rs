//! The episode driver.
//!
//! One tokio task per classroom, the bottleneck on the caller's task, and a
//! single broker between them. Trust, obligations and strikes persist across
//! episodes for the life of the [`Simulation`].

use std::collections::BTreeMap;
use std::sync::Arc;

use corridor_agent::{
    ActorHandle, Agent, AgentControl, AgentError, BottleneckAgent, ClassroomAgent, ClassroomView,
    IntervalStats,
};
use corridor_broker::MessageBroker;
use corridor_core::{AgentId, StrikeRecord};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::episode::EpisodeStats;
use crate::error::{SimError, SimResult};
use crate::scenario::{BOTTLENECK_ID, Scenario};

struct Seat {
    handle: ActorHandle<ClassroomAgent>,
    view: watch::Receiver<ClassroomView>,
}

/// A running corridor simulation.
pub struct Simulation {
    broker: Arc<MessageBroker>,
    bottleneck: BottleneckAgent,
    classrooms: BTreeMap<AgentId, Seat>,
    cancel: CancellationToken,
    episodes: u64,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("classrooms", &self.classrooms.keys().collect::<Vec<_>>())
            .field("interval", &self.bottleneck.interval())
            .field("episodes", &self.episodes)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Validates `scenario`, spawns the classroom tasks and registers them
    /// with the bottleneck. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Config` or `SimError::InvalidScenario` if the
    /// scenario fails validation, `SimError::Agent` for a bad profile.
    pub fn new(scenario: Scenario) -> SimResult<Self> {
        scenario.validate()?;
        let Scenario {
            config,
            classrooms: profiles,
            trust,
        } = scenario;

        let broker = Arc::new(MessageBroker::new());
        let mut bottleneck =
            BottleneckAgent::new(AgentId::new(BOTTLENECK_ID)?, config.clone(), &broker)?;
        let cancel = CancellationToken::new();

        let mut classrooms = BTreeMap::new();
        for profile in profiles {
            let id = profile.id.clone();
            let mut agent = ClassroomAgent::new(profile, config.clone())?;
            for seed in trust.iter().filter(|seed| seed.observer == id) {
                agent.core_mut().trust_mut().set(seed.peer.clone(), seed.value);
            }
            let view = agent.subscribe_view();
            let mailbox = broker.subscribe(id.clone())?;
            bottleneck.register_classroom(id.clone());
            let handle = ActorHandle::spawn(agent, mailbox, Arc::clone(&broker), &cancel);
            classrooms.insert(id, Seat { handle, view });
        }
        for seed in trust.iter().filter(|seed| seed.observer.as_str() == BOTTLENECK_ID) {
            bottleneck.core_mut().trust_mut().set(seed.peer.clone(), seed.value);
        }

        info!(classrooms = classrooms.len(), capacity = config.capacity, "simulation started");
        Ok(Self {
            broker,
            bottleneck,
            classrooms,
            cancel,
            episodes: 0,
        })
    }

    /// The shared broker.
    #[must_use]
    pub const fn broker(&self) -> &Arc<MessageBroker> {
        &self.broker
    }

    /// The bottleneck agent.
    #[must_use]
    pub const fn bottleneck(&self) -> &BottleneckAgent {
        &self.bottleneck
    }

    /// Ids of the participating classrooms.
    pub fn classroom_ids(&self) -> impl Iterator<Item = &AgentId> {
        self.classrooms.keys()
    }

    /// Episodes run so far.
    #[must_use]
    pub const fn episodes(&self) -> u64 {
        self.episodes
    }

    fn seat(&self, id: &AgentId) -> SimResult<&Seat> {
        self.classrooms
            .get(id)
            .ok_or_else(|| SimError::UnknownClassroom(id.clone()))
    }

    /// Runs one interval.
    ///
    /// # Errors
    ///
    /// Fails only if the broker has shut down.
    pub async fn advance_interval(&mut self) -> SimResult<IntervalStats> {
        Ok(self.bottleneck.advance_interval(&self.broker).await?)
    }

    /// Runs `intervals` intervals as one episode.
    ///
    /// # Errors
    ///
    /// Fails only if the broker has shut down.
    pub async fn run_episode(&mut self, intervals: u32) -> SimResult<EpisodeStats> {
        self.episodes += 1;
        let mut collected = Vec::with_capacity(intervals as usize);
        for _ in 0..intervals {
            collected.push(self.advance_interval().await?);
        }
        let stats = EpisodeStats::from_intervals(self.episodes, collected);
        info!(
            episode = stats.episode,
            negotiations = stats.negotiations,
            admitted = stats.admitted,
            fulfilled = stats.fulfilled,
            violated = stats.violated,
            mean_utilization = stats.mean_utilization,
            "episode finished"
        );
        Ok(stats)
    }

    /// Latest published state of a classroom.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownClassroom` for an unknown id.
    pub fn classroom_view(&self, id: &AgentId) -> SimResult<ClassroomView> {
        Ok(self.seat(id)?.view.borrow().clone())
    }

    /// A control sender for a classroom, usable while an interval runs.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownClassroom` for an unknown id.
    pub fn controller(&self, id: &AgentId) -> SimResult<mpsc::UnboundedSender<AgentControl>> {
        Ok(self.seat(id)?.handle.controller())
    }

    /// Drops up to `credits` of what `debtor` owes `creditor`, on both
    /// ledgers. Returns the credits forgiven.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownClassroom` for an unknown id,
    /// `SimError::SelfForgiveness` if both ids are equal, and
    /// `AgentError::Stopped` if a classroom task has exited.
    pub async fn forgive(
        &self,
        creditor: &AgentId,
        debtor: &AgentId,
        credits: u32,
    ) -> SimResult<u32> {
        if creditor == debtor {
            return Err(SimError::SelfForgiveness(creditor.clone()));
        }
        let creditor_seat = self.seat(creditor)?;
        let debtor_seat = self.seat(debtor)?;

        let (reply, forgiven) = oneshot::channel();
        creditor_seat.handle.send(AgentControl::Forgive {
            debtor: debtor.clone(),
            credits,
            reply,
        })?;
        let forgiven = forgiven
            .await
            .map_err(|_| AgentError::Stopped(creditor.clone()))?;
        if forgiven == 0 {
            return Ok(0);
        }

        let (reply, cleared) = oneshot::channel();
        debtor_seat.handle.send(AgentControl::ForgivenBy {
            creditor: creditor.clone(),
            credits: forgiven,
            reply,
        })?;
        let cleared = cleared
            .await
            .map_err(|_| AgentError::Stopped(debtor.clone()))?;
        if cleared != forgiven {
            warn!(
                creditor = %creditor,
                debtor = %debtor,
                forgiven,
                cleared,
                "ledgers disagree on forgiven credits"
            );
        }
        info!(creditor = %creditor, debtor = %debtor, forgiven, "obligation forgiven");
        Ok(forgiven)
    }

    /// Clears a classroom's active strikes.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownClassroom` for an unknown id.
    pub fn reinstate(&mut self, id: &AgentId) -> SimResult<StrikeRecord> {
        self.seat(id)?;
        Ok(self.bottleneck.reinstate(id, &self.broker)?)
    }

    /// Changes a classroom's expected attendance. During a live round the
    /// classroom reports the revision to the bottleneck.
    ///
    /// # Errors
    ///
    /// Returns `SimError::UnknownClassroom` for an unknown id.
    pub fn revise_attendance(&self, id: &AgentId, attendance: u32) -> SimResult<()> {
        self.seat(id)?
            .handle
            .send(AgentControl::ReviseAttendance { attendance })?;
        Ok(())
    }

    /// Closes the broker and waits for every classroom to drain its mailbox.
    /// Returns the final classroom states.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Task` if a classroom task panicked.
    pub async fn shutdown(mut self) -> SimResult<Vec<ClassroomAgent>> {
        self.broker.shutdown();
        let mut agents = Vec::with_capacity(self.classrooms.len());
        for (_, seat) in std::mem::take(&mut self.classrooms) {
            agents.push(seat.handle.join().await?);
        }
        info!(episodes = self.episodes, "simulation shut down");
        Ok(agents)
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
