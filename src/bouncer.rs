//! The bouncer contract (spec.md §1, Non-goals: collision-resolution
//! numerics against wall/object geometry are an external collaborator's
//! concern). A bouncer is always paired with the integrator that moved
//! the particles it corrects (spec.md §9).

use crate::channels::StreamToken;
use crate::error::CoreError;
use crate::named::Named;
use crate::particles::ParticleVector;
use crate::state::SimulationState;

/// Corrects a PV's positions/velocities after integration against some
/// external geometry (a [`crate::wall::Wall`] or an object surface),
/// e.g. reflecting particles that would otherwise tunnel through a
/// boundary this step.
pub trait Bouncer: Named {
    /// Name of the PV this bouncer is bound to; used at registration to
    /// verify the PV also has a registered integrator (spec.md §9).
    fn pv_name(&self) -> &str;

    fn bounce(&mut self, pv: &mut ParticleVector, state: &SimulationState, stream: StreamToken) -> Result<(), CoreError>;
}
