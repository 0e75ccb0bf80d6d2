//! Simulation scenarios.

use std::collections::BTreeSet;

use corridor_agent::ClassroomProfile;
use corridor_core::{AgentId, NegotiationConfig, ShiftDirection};
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Name the bottleneck agent registers under.
pub const BOTTLENECK_ID: &str = "Bottleneck";

/// A seeded trust value: `observer` trusts `peer` at `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSeed {
    /// Agent holding the opinion.
    pub observer: AgentId,
    /// Agent the opinion is about.
    pub peer: AgentId,
    /// Initial trust in `[0, 1]`.
    pub value: f64,
}

/// Everything needed to start a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Negotiation parameters.
    pub config: NegotiationConfig,
    /// Participating classrooms.
    pub classrooms: Vec<ClassroomProfile>,
    /// Initial trust values other than neutral.
    #[serde(default)]
    pub trust: Vec<TrustSeed>,
}

impl Scenario {
    /// A scenario with no classrooms yet.
    #[must_use]
    pub const fn new(config: NegotiationConfig) -> Self {
        Self {
            config,
            classrooms: Vec::new(),
            trust: Vec::new(),
        }
    }

    /// Adds a classroom.
    #[must_use]
    pub fn with_classroom(mut self, profile: ClassroomProfile) -> Self {
        self.classrooms.push(profile);
        self
    }

    /// Seeds `observer`'s trust in `peer`.
    #[must_use]
    pub fn with_trust(mut self, observer: AgentId, peer: AgentId, value: f64) -> Self {
        self.trust.push(TrustSeed { observer, peer, value });
        self
    }

    /// Three lecture classrooms sharing one corridor.
    ///
    /// Attendance fluctuates by up to five students per interval; `seed`
    /// makes the run reproducible.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Core` only if the built-in ids are rejected.
    pub fn lecture_hall(config: NegotiationConfig, seed: u64) -> SimResult<Self> {
        let rooms = [
            ("ClassroomA", 50, 0.8, 0.9, ShiftDirection::Earlier),
            ("ClassroomB", 40, 0.6, 0.75, ShiftDirection::Later),
            ("ClassroomC", 45, 0.9, 0.95, ShiftDirection::Earlier),
        ];
        let mut scenario = Self::new(config);
        for (offset, (name, attendance, flexibility, reliability, direction)) in
            (0u64..).zip(rooms)
        {
            let profile = ClassroomProfile::new(AgentId::new(name)?, attendance, flexibility)
                .with_reliability(reliability)
                .with_jitter(5)
                .with_direction(direction)
                .with_seed(seed.wrapping_add(offset));
            scenario = scenario.with_classroom(profile);
        }
        Ok(scenario)
    }

    /// Checks the configuration and the classroom set.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Config` for invalid parameters and
    /// `SimError::InvalidScenario` for fewer than two classrooms, duplicate
    /// ids, a classroom named like the bottleneck, or a bad trust seed.
    pub fn validate(&self) -> SimResult<()> {
        self.config.validate()?;
        if self.classrooms.len() < 2 {
            return Err(SimError::InvalidScenario(format!(
                "at least two classrooms are needed, got {}",
                self.classrooms.len()
            )));
        }
        let mut ids = BTreeSet::new();
        for profile in &self.classrooms {
            if profile.id.as_str() == BOTTLENECK_ID {
                return Err(SimError::InvalidScenario(format!(
                    "`{BOTTLENECK_ID}` is reserved for the bottleneck"
                )));
            }
            if !ids.insert(&profile.id) {
                return Err(SimError::InvalidScenario(format!(
                    "duplicate classroom `{}`",
                    profile.id
                )));
            }
        }
        for seed in &self.trust {
            if !(0.0..=1.0).contains(&seed.value) {
                return Err(SimError::InvalidScenario(format!(
                    "trust of {} in {} must be within [0, 1], got {}",
                    seed.observer, seed.peer, seed.value
                )));
            }
        }
        Ok(())
    }
}
