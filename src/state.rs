use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpointable;
use crate::error::CoreError;
use crate::named::Named;

/// The local subdomain's geometry within the global Cartesian decomposition
/// (spec.md §4.1): this rank's origin and extent within the global box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainInfo {
    pub origin: DVec3,
    pub local_size: DVec3,
    pub global_size: DVec3,
}

impl DomainInfo {
    pub fn new(origin: DVec3, local_size: DVec3, global_size: DVec3) -> Self {
        Self {
            origin,
            local_size,
            global_size,
        }
    }

    /// Affine transform from subdomain-local to global coordinates.
    pub fn local_to_global(&self, local: DVec3) -> DVec3 {
        local + self.origin
    }

    /// Affine transform from global to subdomain-local coordinates.
    pub fn global_to_local(&self, global: DVec3) -> DVec3 {
        global - self.origin
    }

    pub fn contains_local(&self, local: DVec3) -> bool {
        local.cmpge(DVec3::ZERO).all() && local.cmplt(self.local_size).all()
    }
}

/// Two-value text record persisted to `_simulation.state` (spec.md §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StateRecord {
    current_time: f64,
    current_step: u64,
}

/// Global clock, timestep, and local-subdomain geometry (spec.md §4.1).
///
/// Process-wide in concept, but owned and mutated only by the driver;
/// every other component receives it as an explicit `&SimulationState`
/// handle (spec.md §9 "no ambient state").
#[derive(Debug, Clone)]
pub struct SimulationState {
    pub current_step: u64,
    pub current_time: f64,
    pub dt: f64,
    pub domain: DomainInfo,
}

impl SimulationState {
    pub fn new(dt: f64, domain: DomainInfo) -> Self {
        Self {
            current_step: 0,
            current_time: 0.0,
            dt,
            domain,
        }
    }

    /// Mutated only by the driver, once per step, after the step's task
    /// graph has run to completion.
    pub fn advance(&mut self) {
        self.current_step += 1;
        self.current_time += self.dt;
    }

    pub fn checkpoint(&self, folder: &std::path::Path) -> Result<(), CoreError> {
        let record = StateRecord {
            current_time: self.current_time,
            current_step: self.current_step,
        };
        let path = folder.join("_simulation.state");
        let contents = format!("{} {}", record.current_time, record.current_step);
        std::fs::write(&path, contents)
            .map_err(|e| CoreError::Restart(format!("failed to write {:?}: {e}", path)))
    }

    pub fn restart(&mut self, folder: &std::path::Path) -> Result<(), CoreError> {
        let path = folder.join("_simulation.state");
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| CoreError::Restart(format!("failed to read {:?}: {e}", path)))?;
        let mut parts = contents.split_whitespace();
        let current_time: f64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CoreError::Restart(format!("malformed record in {:?}", path)))?;
        let current_step: u64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CoreError::Restart(format!("malformed record in {:?}", path)))?;
        self.current_time = current_time;
        self.current_step = current_step;
        Ok(())
    }
}

impl Named for SimulationState {
    fn name(&self) -> &str {
        "clock"
    }
}

impl Checkpointable for SimulationState {
    fn checkpoint(&self, folder: &std::path::Path) -> Result<(), CoreError> {
        self.checkpoint(folder)
    }

    fn restart(&mut self, folder: &std::path::Path) -> Result<(), CoreError> {
        self.restart(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SimulationState {
        SimulationState::new(
            0.01,
            DomainInfo::new(DVec3::ZERO, DVec3::splat(8.0), DVec3::splat(8.0)),
        )
    }

    #[test]
    fn advance_updates_clock() {
        let mut s = state();
        for _ in 0..10 {
            s.advance();
        }
        assert_eq!(s.current_step, 10);
        assert!((s.current_time - 0.1).abs() < 1e-12);
    }

    #[test]
    fn checkpoint_restart_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = state();
        for _ in 0..50 {
            s.advance();
        }
        s.checkpoint(dir.path()).unwrap();

        let mut fresh = state();
        fresh.restart(dir.path()).unwrap();
        assert_eq!(fresh.current_step, s.current_step);
        assert!((fresh.current_time - s.current_time).abs() < 1e-12);
    }
}
