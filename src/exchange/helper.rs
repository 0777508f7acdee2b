use crate::communication::{DataByRank, Fragment, Rank, SizedCommunicator};

/// Per-(PV, kind) buffers for one exchange: send sizes, send offsets
/// (prefix-sum), send buffer; symmetric recv sizes/offsets/buffer
/// (spec.md §4.4). Buffers are grow-only within a run, mirroring pinned
/// device memory that is never shrunk once allocated.
pub struct ExchangeHelper<T> {
    pub send_sizes: DataByRank<usize>,
    pub send_offsets: DataByRank<usize>,
    pub send_buffers: DataByRank<Vec<T>>,
    pub recv_sizes: DataByRank<usize>,
    pub recv_offsets: DataByRank<usize>,
    pub recv_buffers: DataByRank<Vec<T>>,
    max_capacity: DataByRank<usize>,
    bulk_send_count: usize,
}

impl<T: Clone + Default> ExchangeHelper<T> {
    pub fn new<C: SizedCommunicator>(comm: &C) -> Self {
        Self {
            send_sizes: DataByRank::from_communicator(comm),
            send_offsets: DataByRank::from_communicator(comm),
            send_buffers: DataByRank::from_communicator(comm),
            recv_sizes: DataByRank::from_communicator(comm),
            recv_offsets: DataByRank::from_communicator(comm),
            recv_buffers: DataByRank::from_communicator(comm),
            max_capacity: DataByRank::from_communicator(comm),
            bulk_send_count: 0,
        }
    }

    /// Record how many elements will be sent to `rank` and grow (never
    /// shrink) the send buffer's reserved capacity to match.
    pub fn set_send_size(&mut self, rank: Rank, size: usize) {
        self.send_sizes.insert(rank, size);
        let current = self.max_capacity.get(rank).copied().unwrap_or(0);
        if size > current {
            self.max_capacity.insert(rank, size);
            if let Some(buf) = self.send_buffers.get_mut(rank) {
                buf.reserve(size - buf.capacity().min(size));
            }
        }
    }

    pub fn clear_sends(&mut self) {
        for (_, buf) in self.send_buffers.iter_mut() {
            buf.clear();
        }
        self.bulk_send_count = 0;
    }

    pub fn push_send(&mut self, rank: Rank, fragment: Fragment, value: T) {
        if fragment.is_bulk() {
            self.bulk_send_count += 1;
        }
        if let Some(buf) = self.send_buffers.get_mut(rank) {
            buf.push(value);
        } else {
            self.send_buffers.insert(rank, vec![value]);
        }
    }

    /// Number of values pushed under the bulk fragment since the last
    /// `clear_sends` — used to tell a genuine self-message apart from an
    /// empty exchange without comparing a rank id to a fragment slot
    /// (spec.md §4.4).
    pub fn bulk_send_count(&self) -> usize {
        self.bulk_send_count
    }

    pub fn total_send_size(&self) -> usize {
        self.send_buffers.iter().map(|(_, b)| b.len()).sum()
    }

    pub fn total_recv_size(&self) -> usize {
        self.recv_buffers.iter().map(|(_, b)| b.len()).sum()
    }
}
