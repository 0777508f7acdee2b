use super::Rank;

/// Minimal shape every communicator exposes, mirroring the teacher's
/// `SizedCommunicator` trait.
pub trait SizedCommunicator {
    fn rank(&self) -> Rank;
    fn size(&self) -> usize;

    fn other_ranks(&self) -> Vec<Rank> {
        (0..self.size() as Rank).filter(|r| *r != self.rank()).collect()
    }
}
