//! The integrator contract (spec.md §1, Non-goals: the numerics of any
//! concrete scheme — velocity-Verlet, rigid-body, membrane elasticity —
//! are an external collaborator's concern). The engine only needs to
//! know when to call it and that it advances positions/velocities and
//! marks the PV moved.

use crate::channels::StreamToken;
use crate::error::CoreError;
use crate::named::Named;
use crate::particles::ParticleVector;
use crate::state::SimulationState;

/// Advances a `ParticleVector`'s positions/velocities by one step
/// (spec.md §4.6 `beforeIntegration`/`afterIntegration` window). Bound
/// to exactly one PV at registration (spec.md §9: a bouncer without a
/// matching integrator is a configuration error, see
/// [`crate::error::ConfigurationError::BouncerWithoutIntegrator`]).
pub trait Integrator: Named {
    fn stage(&mut self, pv: &mut ParticleVector, state: &SimulationState, stream: StreamToken) -> Result<(), CoreError>;
}
