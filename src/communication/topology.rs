use super::{Fragment, Rank, SizedCommunicator};

/// Common interface the exchange layer drives every fragment-to-rank
/// lookup through, regardless of whether the run is single-node or
/// split across an MPI Cartesian grid (spec.md §4.4).
pub trait NeighbourTopology: SizedCommunicator {
    fn neighbour_rank(&self, fragment: Fragment) -> Rank;
}

impl NeighbourTopology for super::LocalCommunicator {
    /// A single rank is its own periodic neighbour in every direction.
    fn neighbour_rank(&self, _fragment: Fragment) -> Rank {
        0
    }
}

#[cfg(feature = "mpi")]
impl NeighbourTopology for super::MpiCommunicator {
    fn neighbour_rank(&self, fragment: Fragment) -> Rank {
        super::MpiCommunicator::neighbour_rank(self, fragment)
    }
}
