//! The wall contract (spec.md §1, Non-goals: concrete wall geometry —
//! planes, cylinders, signed-distance fields — is an external
//! collaborator's concern). The engine only needs a name to bind
//! bouncers to and a per-step hook to refresh any cached field.

use crate::channels::StreamToken;
use crate::error::CoreError;
use crate::named::Named;
use crate::state::SimulationState;

/// Static or slowly-evolving boundary geometry a [`crate::bouncer::Bouncer`]
/// resolves collisions against.
pub trait Wall: Named {
    /// Refresh any cached representation (e.g. a level-set field) ahead
    /// of this step's bounce phase. Most walls are static and leave this
    /// as a no-op.
    fn prepare(&mut self, _state: &SimulationState, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }
}
