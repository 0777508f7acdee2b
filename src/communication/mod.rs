//! Rank-indexed communication plumbing shared by the exchange layer (spec.md
//! §4.4). Grounded in the teacher's `communication/mod.rs` split between a
//! loopback ("local") communicator and a real MPI one, and in
//! `sweep/communicator.rs`'s non-blocking send/request-tracking pattern.

mod data_by_rank;
mod fragment;
mod single_node;
mod sized;
mod topology;

#[cfg(feature = "mpi")]
mod mpi_world;

pub use data_by_rank::DataByRank;
pub use fragment::Fragment;
pub use single_node::LocalCommunicator;
pub use sized::SizedCommunicator;
pub use topology::NeighbourTopology;

#[cfg(feature = "mpi")]
pub use mpi_world::MpiCommunicator;

/// MPI rank (or, in the single-node build, always `0`).
pub type Rank = i32;
