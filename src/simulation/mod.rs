//! The simulation driver: owns every registered component and runs the
//! per-step task graph (spec.md §4.7).
//!
//! The driver targets a single subdomain (`LocalCommunicator`) end to
//! end: construction, registration, the task graph, and `run()` are all
//! fully wired and tested against it. The distributed Cartesian
//! communicator and its non-blocking exchange engine
//! ([`crate::communication::MpiCommunicator`],
//! [`crate::exchange::MpiExchangeEngine`]) are complete building blocks
//! one level down, ready for a multi-rank driver to compose them in —
//! see DESIGN.md for why that composition is left as the documented
//! edge of this crate's scope rather than wired in here.

mod builder;
mod driver;

use std::collections::{HashMap, HashSet};

use crate::belonging::ObjectBelongingChecker;
use crate::bouncer::Bouncer;
use crate::cells::CellList;
use crate::checkpoint::CheckpointManager;
use crate::communication::LocalCommunicator;
use crate::config::RunConfig;
use crate::exchange::{helper::ExchangeHelper, PackedParticle, SingleNodeEngine};
use crate::integrator::Integrator;
use crate::interactions::InteractionManager;
use crate::particles::{ObjectVector, ParticleVector};
use crate::plugin::{PostprocessPlugin, SimulationPlugin};
use crate::scheduler::TaskScheduler;
use crate::state::SimulationState;
use crate::wall::Wall;

pub use builder::SimulationBuilder;

/// Owns every registered component and the compiled task graph that
/// drives them (spec.md §4.7). Construct one through
/// [`SimulationBuilder`] rather than directly.
pub struct Simulation {
    pub(crate) comm: LocalCommunicator,
    pub state: SimulationState,
    pub(crate) config: RunConfig,
    pub(crate) names: HashSet<String>,

    pub(crate) particle_vectors: HashMap<String, ParticleVector>,
    pub(crate) object_vectors: HashMap<String, ObjectVector>,

    pub(crate) cell_lists: Vec<CellList>,
    pub(crate) interactions: InteractionManager,
    pub(crate) integrators: HashMap<String, Box<dyn Integrator>>,
    pub(crate) bouncers: Vec<Box<dyn Bouncer>>,
    pub(crate) walls: HashMap<String, Box<dyn Wall>>,
    pub(crate) belonging_checkers: HashMap<String, Box<dyn ObjectBelongingChecker>>,
    pub(crate) plugins: Vec<Box<dyn SimulationPlugin>>,
    pub(crate) postprocess_plugins: Vec<Box<dyn PostprocessPlugin>>,

    pub(crate) scheduler: TaskScheduler,
    pub(crate) engine: SingleNodeEngine,

    pub(crate) particle_halo_helpers: HashMap<String, ExchangeHelper<PackedParticle>>,
    pub(crate) particle_redist_helpers: HashMap<String, ExchangeHelper<PackedParticle>>,
    pub(crate) object_halo_helpers: HashMap<String, ExchangeHelper<PackedParticle>>,
    pub(crate) object_redist_helpers: HashMap<String, ExchangeHelper<PackedParticle>>,
    pub(crate) object_halo_assignments: HashMap<String, Vec<(usize, crate::communication::Fragment)>>,

    pub(crate) checkpoint_manager: CheckpointManager,
}

impl Simulation {
    pub fn particle_vector(&self, name: &str) -> Option<&ParticleVector> {
        self.particle_vectors.get(name)
    }

    pub fn object_vector(&self, name: &str) -> Option<&ObjectVector> {
        self.object_vectors.get(name)
    }

    pub fn task_count(&self) -> usize {
        self.scheduler.task_count()
    }

    pub fn save_dependency_graph(&self, path: &std::path::Path) -> Result<(), crate::error::CoreError> {
        self.scheduler.save_dependency_graph_graphml(path)
    }
}
