//! Fluent registration surface (spec.md §4.7 phase 1): validates every
//! name once, at registration time, then drives phases 2-6 from `build`.
//! Grounded in the teacher's `simulation_builder.rs` chain of
//! `&mut Self`-returning setters, adapted to return `Result` per call
//! since registration here can fail (duplicate/reserved names,
//! bouncer/integrator mismatches) where the teacher's bevy plugin
//! registration could not.

use std::collections::HashSet;

use crate::belonging::ObjectBelongingChecker;
use crate::bouncer::Bouncer;
use crate::checkpoint::CheckpointManager;
use crate::communication::LocalCommunicator;
use crate::config::RunConfig;
use crate::error::CoreError;
use crate::exchange::SingleNodeEngine;
use crate::integrator::Integrator;
use crate::interactions::{Interaction, InteractionManager};
use crate::named::{validate_name, Named};
use crate::particles::{ObjectVector, ParticleVector};
use crate::plugin::{PostprocessPlugin, SimulationPlugin};
use crate::scheduler::TaskScheduler;
use crate::state::{DomainInfo, SimulationState};
use crate::wall::Wall;

use super::Simulation;

/// Builds a [`Simulation`] by registering named components, then
/// running phases 2-6 of spec.md §4.7 once, in order.
pub struct SimulationBuilder {
    sim: Simulation,
    cutoff_tolerance: f64,
}

impl SimulationBuilder {
    /// `config` supplies `dt` and the checkpoint folder; the caller is
    /// responsible for having already resolved `DomainInfo` from the
    /// rank grid (spec.md §4.1) before construction, since that step
    /// depends on the communicator this crate does not construct here.
    pub fn new(config: RunConfig, domain: DomainInfo) -> Self {
        let dt = config.dt;
        let checkpoint_folder = config.checkpoint_folder.clone();
        Self {
            sim: Simulation {
                comm: LocalCommunicator,
                state: SimulationState::new(dt, domain),
                config,
                names: HashSet::new(),
                particle_vectors: Default::default(),
                object_vectors: Default::default(),
                cell_lists: Vec::new(),
                interactions: InteractionManager::new(),
                integrators: Default::default(),
                bouncers: Vec::new(),
                walls: Default::default(),
                belonging_checkers: Default::default(),
                plugins: Vec::new(),
                postprocess_plugins: Vec::new(),
                scheduler: TaskScheduler::new(),
                engine: SingleNodeEngine::default(),
                particle_halo_helpers: Default::default(),
                particle_redist_helpers: Default::default(),
                object_halo_helpers: Default::default(),
                object_redist_helpers: Default::default(),
                object_halo_assignments: Default::default(),
                checkpoint_manager: CheckpointManager::new(checkpoint_folder),
            },
            cutoff_tolerance: 1e-9,
        }
    }

    /// Override the tolerance `prepare_cell_lists`/`prepare_interactions`
    /// dedupe cutoffs within (spec.md §4.7 phase 2, default matches
    /// `deduplicate_cutoffs`'s own doc default).
    pub fn cutoff_tolerance(&mut self, tolerance: f64) -> &mut Self {
        self.cutoff_tolerance = tolerance;
        self
    }

    fn claim_name(&mut self, name: &str) -> Result<(), CoreError> {
        validate_name(name, self.sim.names.iter().cloned())?;
        self.sim.names.insert(name.to_string());
        Ok(())
    }

    pub fn register_particle_vector(&mut self, pv: ParticleVector) -> Result<&mut Self, CoreError> {
        let name = pv.name().to_string();
        self.claim_name(&name)?;
        self.sim.particle_vectors.insert(name, pv);
        Ok(self)
    }

    pub fn register_object_vector(&mut self, ov: ObjectVector) -> Result<&mut Self, CoreError> {
        let name = ov.name().to_string();
        self.claim_name(&name)?;
        self.sim.object_vectors.insert(name, ov);
        Ok(self)
    }

    pub fn register_integrator(&mut self, pv_name: &str, integrator: Box<dyn Integrator>) -> Result<&mut Self, CoreError> {
        let name = integrator.name().to_string();
        self.claim_name(&name)?;
        self.sim.integrators.insert(pv_name.to_string(), integrator);
        Ok(self)
    }

    pub fn register_bouncer(&mut self, bouncer: Box<dyn Bouncer>) -> Result<&mut Self, CoreError> {
        let name = bouncer.name().to_string();
        self.claim_name(&name)?;
        self.sim.bouncers.push(bouncer);
        Ok(self)
    }

    pub fn register_wall(&mut self, wall: Box<dyn Wall>) -> Result<&mut Self, CoreError> {
        let name = wall.name().to_string();
        self.claim_name(&name)?;
        self.sim.walls.insert(name, wall);
        Ok(self)
    }

    pub fn register_interaction(
        &mut self,
        interaction: Box<dyn Interaction>,
        pv1: impl Into<String>,
        pv2: impl Into<String>,
    ) -> Result<&mut Self, CoreError> {
        self.sim.interactions.register(interaction, pv1, pv2)?;
        Ok(self)
    }

    pub fn register_belonging_checker(
        &mut self,
        name: impl Into<String>,
        checker: Box<dyn ObjectBelongingChecker>,
    ) -> Result<&mut Self, CoreError> {
        let name = name.into();
        self.claim_name(&name)?;
        self.sim.belonging_checkers.insert(name, checker);
        Ok(self)
    }

    pub fn register_plugin(&mut self, plugin: Box<dyn SimulationPlugin>) -> Result<&mut Self, CoreError> {
        let name = plugin.name().to_string();
        self.claim_name(&name)?;
        self.sim.plugins.push(plugin);
        Ok(self)
    }

    pub fn register_postprocess_plugin(&mut self, plugin: Box<dyn PostprocessPlugin>) -> Result<&mut Self, CoreError> {
        let name = plugin.name().to_string();
        self.claim_name(&name)?;
        self.sim.postprocess_plugins.push(plugin);
        Ok(self)
    }

    /// Initial object-belonging split, deferred to after every PV/OV is
    /// registered (spec.md §4.7 phase 7). `assignments` is
    /// `(checker_name, source_pv_name, object_vector_name)`; the caller
    /// owns turning the resulting partitions into new PV registrations
    /// before `build()`.
    pub fn run_splitters(&mut self, assignments: &[(String, String, String)]) -> Result<&mut Self, CoreError> {
        self.sim.exec_splitters(assignments)?;
        Ok(self)
    }

    /// Runs phases 2-6 of spec.md §4.7 (cell lists, interaction
    /// validation, bouncer/integrator validation, exchange engines, the
    /// task graph) and returns the ready-to-`run` [`Simulation`].
    pub fn build(mut self) -> Result<Simulation, CoreError> {
        self.sim.prepare_cell_lists(self.cutoff_tolerance)?;
        self.sim.prepare_interactions(self.cutoff_tolerance)?;
        self.sim.prepare_bouncers_and_walls()?;
        self.sim.prepare_engines();
        self.sim.create_tasks_and_build_dependencies()?;
        Ok(self.sim)
    }
}
