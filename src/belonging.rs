//! Object-belonging classification (spec.md §1, Non-goals: the
//! geometric inside/outside test itself — mesh raycasting, analytic
//! implicit surfaces — is an external collaborator's concern). The
//! engine uses this only to split a mixed PV into inside/outside halves
//! at setup time.

use crate::particles::{ObjectVector, ParticleVector};

/// Classifies particles of a PV as belonging to one of the objects in an
/// `ObjectVector`, or to neither.
pub trait ObjectBelongingChecker {
    /// Split `pv` into particles that belong to some object in `objects`
    /// and particles that don't, returning the local indices of each
    /// half. Does not itself mutate either vector; the caller is
    /// expected to build new PVs from the returned partitions.
    fn split(&self, pv: &ParticleVector, objects: &ObjectVector) -> BelongingSplit;
}

#[derive(Debug, Default, Clone)]
pub struct BelongingSplit {
    pub inside: Vec<usize>,
    pub outside: Vec<usize>,
}
