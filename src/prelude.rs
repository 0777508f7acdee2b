//! Flat re-export of the types most call sites need, mirroring the
//! teacher's `prelude.rs`.

pub use crate::belonging::{BelongingSplit, ObjectBelongingChecker};
pub use crate::bouncer::Bouncer;
pub use crate::cells::{CellList, CellListRole};
pub use crate::channels::{ChannelElement, ChannelType, ExtraDataManager, Persistence, StreamToken};
pub use crate::checkpoint::{Checkpointable, CheckpointManager};
pub use crate::communication::{Fragment, LocalCommunicator, NeighbourTopology, Rank, SizedCommunicator};
pub use crate::config::{CommandLineOptions, RankGrid, RunConfig};
pub use crate::error::{ConfigurationError, CoreError, CoreResult};
pub use crate::integrator::Integrator;
pub use crate::interactions::{Interaction, InteractionManager, Stage};
pub use crate::named::Named;
pub use crate::particles::{ObjectVector, ParticleVector, Partition};
pub use crate::plugin::{PostprocessPlugin, SimulationPlugin};
pub use crate::scheduler::{Priority, TaskScheduler};
pub use crate::simulation::{Simulation, SimulationBuilder};
pub use crate::state::{DomainInfo, SimulationState};
pub use crate::wall::Wall;

#[cfg(feature = "mpi")]
pub use crate::communication::MpiCommunicator;
