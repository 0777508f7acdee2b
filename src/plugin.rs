//! Simulation-side and post-process-side plugin hooks (spec.md §4.6).
//!
//! A plugin observes or perturbs the step without owning data of its own;
//! what it actually does at each hook (inject a thermostat term, log an
//! observable, stream a frame out to a post-process rank) is outside this
//! crate's concern (spec.md §1) — the engine only guarantees the hooks
//! fire at these exact points in the per-step task graph.

use crate::channels::StreamToken;
use crate::error::CoreError;
use crate::named::Named;
use crate::state::SimulationState;

/// A component that taps into the simulation-rank side of the step
/// (spec.md §4.6). Every hook has a no-op default so a plugin only
/// overrides the points it cares about.
pub trait SimulationPlugin: Named {
    fn before_cell_lists(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }

    fn before_forces(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }

    /// Serialise whatever this plugin wants to ship to its post-process
    /// counterpart and hand it to the caller-supplied channel; the wire
    /// encoding itself is out of scope (spec.md §1, Non-goals).
    fn serialize_and_send(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }

    fn before_integration(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }

    fn after_integration(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }

    fn before_particle_distribution(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }

    /// Stride (in steps) this plugin wants to run at; `1` every step.
    fn stride(&self) -> u32 {
        1
    }
}

/// The post-process-rank counterpart of a [`SimulationPlugin`]: receives
/// whatever `serialize_and_send` shipped and does something with it
/// (spec.md §4.6). Runs on separate ranks from the simulation proper in
/// the source system; here it's simply a distinct trait so a single
/// binary can still wire a no-op or in-process postprocess stage.
pub trait PostprocessPlugin: Named {
    fn deserialize(&mut self, _state: &SimulationState) -> Result<(), CoreError> {
        Ok(())
    }

    fn stride(&self) -> u32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingPlugin {
        name: String,
        before_forces_calls: u32,
    }

    impl Named for CountingPlugin {
        fn name(&self) -> &str {
            &self.name
        }
    }

    impl SimulationPlugin for CountingPlugin {
        fn before_forces(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
            self.before_forces_calls += 1;
            Ok(())
        }
    }

    #[test]
    fn unused_hooks_default_to_no_op() {
        let mut plugin = CountingPlugin {
            name: "counter".into(),
            before_forces_calls: 0,
        };
        let state = SimulationState::new(
            0.01,
            crate::state::DomainInfo::new(glam::DVec3::ZERO, glam::DVec3::splat(10.0), glam::DVec3::splat(10.0)),
        );
        plugin.before_cell_lists(&state, StreamToken::default()).unwrap();
        plugin.before_forces(&state, StreamToken::default()).unwrap();
        assert_eq!(plugin.before_forces_calls, 1);
    }
}
