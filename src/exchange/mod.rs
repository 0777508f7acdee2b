//! The exchange layer: halo and redistribution traffic for particles and
//! objects, and the two-phase engines that drive it (spec.md §4.4).

mod engine;
pub mod helper;
mod object_halo;
mod object_redistribute;
mod particle_halo;
mod particle_redistribute;

pub use engine::{ExchangeEngine, MpiExchangeEngine, SingleNodeEngine};
pub use helper::ExchangeHelper;
pub use object_halo::{ObjectExtraExchanger, ObjectHaloExchanger, ObjectReverseExchanger};
pub use object_redistribute::ObjectRedistributor;
pub use particle_halo::ParticleHaloExchanger;
pub use particle_redistribute::ParticleRedistributor;

use crate::channels::StreamToken;
use crate::error::CoreError;

/// One send/recv particle record: coordinate, velocity, two id fields,
/// plus every persistent named channel value carried alongside, keyed by
/// name (spec.md §3 "persistent channels survive redistribution").
/// Halo exchangers leave the two channel fields empty — halo copies are
/// read-only and rebuilt every step, so carrying persistent channels
/// through them is not required by spec.md §3's invariant, which is
/// scoped to redistribution.
#[derive(Debug, Clone, Default)]
pub struct PackedParticle {
    pub pos: glam::DVec3,
    pub vel: glam::DVec3,
    pub id1: u32,
    pub id2: u32,
    pub persistent_f64: Vec<(String, f64)>,
    pub persistent_vec3: Vec<(String, glam::DVec3)>,
}

/// The polymorphic interface every exchanger variant implements
/// (spec.md §4.4): `ParticleHaloExchanger`, `ParticleRedistributor`,
/// `ObjectHaloExchanger`, `ObjectRedistributor`,
/// `ObjectExtraExchanger`/`ObjectReverseExchanger`.
pub trait ParticleExchanger {
    /// Compute and record send sizes per fragment/rank for this step.
    fn prepare_sizes(&mut self, stream: StreamToken) -> Result<(), CoreError>;

    /// Pack the data into the exchange helper's send buffers.
    fn prepare_data(&mut self, stream: StreamToken) -> Result<(), CoreError>;

    /// After the engine has received data, fold it into the owning PV's
    /// local or halo storage.
    fn combine_and_upload_data(&mut self, stream: StreamToken) -> Result<(), CoreError>;

    /// Whether this exchanger has any work to do this step (some
    /// exchangers, e.g. a stride-gated wall check, may opt out).
    fn need_exchange(&self) -> bool {
        true
    }
}
