//! Shared fakes for the end-to-end tests (spec.md §8). Every trait here
//! stands in for a numerics collaborator the engine itself never
//! implements (spec.md §1): the fakes only ever move data in ways a
//! test can assert on.

use std::sync::{Arc, Mutex};

use glam::DVec3;
use mirheo_core::channels::StreamToken;
use mirheo_core::config::RunConfig;
use mirheo_core::error::CoreError;
use mirheo_core::integrator::Integrator;
use mirheo_core::named::Named;
use mirheo_core::particles::ParticleVector;
use mirheo_core::plugin::SimulationPlugin;
use mirheo_core::state::{DomainInfo, SimulationState};

pub fn run_config(nsteps_checkpoint: u32, folder: std::path::PathBuf) -> RunConfig {
    RunConfig {
        rank_grid: mirheo_core::config::RankGrid { nx: 1, ny: 1, nz: 1 },
        subdomain_extent: [10.0, 10.0, 10.0],
        dt: 0.01,
        checkpoint_stride: nsteps_checkpoint,
        gpu_aware_mpi: false,
        checkpoint_folder: folder,
    }
}

pub fn domain() -> DomainInfo {
    DomainInfo::new(DVec3::ZERO, DVec3::splat(10.0), DVec3::splat(10.0))
}

/// Explicit-Euler drift: `x += v * dt`. Stands in for a real integrator
/// (velocity-Verlet, rigid motion, ...), which is out of this crate's
/// scope (spec.md §1 Non-goals).
pub struct EulerDrift {
    name: String,
}

impl EulerDrift {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Named for EulerDrift {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Integrator for EulerDrift {
    fn stage(&mut self, pv: &mut ParticleVector, state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        for (pos, vel) in pv.local.positions.iter_mut().zip(pv.local.velocities.iter()) {
            *pos += *vel * state.dt;
        }
        if !pv.local.positions.is_empty() {
            pv.mark_moved();
        }
        Ok(())
    }
}

/// Records the step number every time a hook fires, so tests can assert
/// on call counts and relative ordering without inspecting private
/// driver state.
#[derive(Clone, Default)]
pub struct CallLog(pub Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct SpyPlugin {
    name: String,
    log: CallLog,
}

impl SpyPlugin {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self { name: name.into(), log }
    }
}

impl Named for SpyPlugin {
    fn name(&self) -> &str {
        &self.name
    }
}

impl SimulationPlugin for SpyPlugin {
    fn before_forces(&mut self, state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        self.log.push(format!("before_forces:{}", state.current_step));
        Ok(())
    }

    fn after_integration(&mut self, state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        self.log.push(format!("after_integration:{}", state.current_step));
        Ok(())
    }
}
