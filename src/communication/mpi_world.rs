use mpi::collective::SystemOperation;
use mpi::topology::{Communicator as MpiTopologyCommunicator, Process};
use mpi::traits::*;

use super::{Fragment, Rank, SizedCommunicator};

/// Wraps the Cartesian sub-communicator the process topology splits out
/// (spec.md §6 "Process topology"): `nx * ny * nz` ranks arranged on a
/// 3D periodic grid, plus the per-rank lookup from [`Fragment`] to
/// neighbour rank that the exchange layer drives everything else from.
pub struct MpiCommunicator {
    world: mpi::topology::SimpleCommunicator,
    dims: [i32; 3],
    coords: [i32; 3],
    gpu_aware: bool,
}

impl MpiCommunicator {
    pub fn new(dims: [i32; 3], gpu_aware: bool) -> Self {
        let universe = mpi::initialize().expect("MPI_Init failed");
        let world = universe.world();
        let rank = world.rank();
        let coords = rank_to_coords(rank, dims);
        // The `universe` handle is intentionally leaked: it must outlive
        // the whole run, and the process topology owns exactly one.
        std::mem::forget(universe);
        Self {
            world,
            dims,
            coords,
            gpu_aware,
        }
    }

    pub fn gpu_aware(&self) -> bool {
        self.gpu_aware
    }

    /// Neighbour rank in the given [`Fragment`] direction, wrapping
    /// periodically on each axis (the Cartesian communicator is periodic).
    pub fn neighbour_rank(&self, fragment: Fragment) -> Rank {
        let wrap = |c: i32, d: i32| ((c % d) + d) % d;
        let nc = [
            wrap(self.coords[0] + fragment.0 as i32, self.dims[0]),
            wrap(self.coords[1] + fragment.1 as i32, self.dims[1]),
            wrap(self.coords[2] + fragment.2 as i32, self.dims[2]),
        ];
        coords_to_rank(nc, self.dims)
    }

    pub fn process_at_rank(&self, rank: Rank) -> Process<'_> {
        self.world.process_at_rank(rank)
    }

    pub fn all_gather_sum_usize(&self, value: usize) -> usize {
        let mut total = 0usize;
        self.world
            .all_reduce_into(&value, &mut total, SystemOperation::sum());
        total
    }

    pub fn barrier(&self) {
        self.world.barrier();
    }
}

impl SizedCommunicator for MpiCommunicator {
    fn rank(&self) -> Rank {
        self.world.rank()
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }
}

fn rank_to_coords(rank: Rank, dims: [i32; 3]) -> [i32; 3] {
    let z = rank % dims[2];
    let y = (rank / dims[2]) % dims[1];
    let x = rank / (dims[2] * dims[1]);
    [x, y, z]
}

fn coords_to_rank(coords: [i32; 3], dims: [i32; 3]) -> Rank {
    (coords[0] * dims[1] * dims[2]) + (coords[1] * dims[2]) + coords[2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_roundtrip() {
        let dims = [2, 3, 4];
        for x in 0..dims[0] {
            for y in 0..dims[1] {
                for z in 0..dims[2] {
                    let rank = coords_to_rank([x, y, z], dims);
                    assert_eq!(rank_to_coords(rank, dims), [x, y, z]);
                }
            }
        }
    }
}
