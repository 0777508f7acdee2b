//! Uniform-grid spatial index family (spec.md §4.3).

use glam::{DVec3, IVec3};

use crate::channels::{ChannelElement, ExtraDataManager, Persistence, StreamToken};
use crate::error::CoreError;
use crate::particles::ParticleVector;

/// Whether a position outside the grid is clamped into range or
/// reported as out-of-bounds. Owned particles are always in-range by
/// construction and use `Clamped`; halo probing (testing whether a
/// ghost particle falls in this subdomain's grid) uses `Unclamped` and
/// must handle the `None` case (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Clamped,
    Unclamped,
}

/// Whether a cell list is the PV's primary cell list (it rules the
/// local particle order after build) or a secondary one (keeps its own
/// reordered copy). At most one primary cell list exists per PV, and
/// only for non-object PVs (spec.md §3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellListRole {
    Primary,
    Secondary,
}

/// A uniform grid built from one `(PV, cutoff)` pair. Holds its own
/// private channel storage (for secondary lists) and a *weak* reference
/// to the owning PV by name + role — the driver owns both the PV and
/// the cell list; the cell list never owns the PV (spec.md §9).
pub struct CellList {
    pub pv_name: String,
    pub cutoff: f64,
    pub role: CellListRole,
    dims: IVec3,
    cell_size: DVec3,
    origin: DVec3,
    pub cell_starts: Vec<u32>,
    pub cell_sizes: Vec<u32>,
    /// `order[i]` is the original index of the particle now at
    /// cell-sorted position `i`.
    pub order: Vec<u32>,
    last_built_motion_stamp: Option<u64>,
    pub private_channels: ExtraDataManager,
}

impl CellList {
    pub fn new(pv_name: impl Into<String>, cutoff: f64, local_size: DVec3, role: CellListRole) -> Self {
        let dims = (local_size / cutoff).floor().max(DVec3::ONE).as_ivec3();
        let cell_size = DVec3::new(
            local_size.x / dims.x as f64,
            local_size.y / dims.y as f64,
            local_size.z / dims.z as f64,
        );
        Self {
            pv_name: pv_name.into(),
            cutoff,
            role,
            dims,
            cell_size,
            origin: DVec3::ZERO,
            cell_starts: Vec::new(),
            cell_sizes: Vec::new(),
            order: Vec::new(),
            last_built_motion_stamp: None,
            private_channels: ExtraDataManager::new(),
        }
    }

    pub fn num_cells(&self) -> usize {
        (self.dims.x * self.dims.y * self.dims.z).max(0) as usize
    }

    /// Row-major (x fastest) cell id, per spec.md §4.3. Returns `None`
    /// under `Unclamped` projection when `pos` falls outside the grid.
    pub fn cell_id(&self, pos: DVec3, mode: ProjectionMode) -> Option<u32> {
        let rel = (pos - self.origin) / self.cell_size;
        let raw = IVec3::new(rel.x.floor() as i32, rel.y.floor() as i32, rel.z.floor() as i32);
        let coord = match mode {
            ProjectionMode::Clamped => raw.clamp(IVec3::ZERO, self.dims - IVec3::ONE),
            ProjectionMode::Unclamped => {
                if (raw.cmplt(IVec3::ZERO) | raw.cmpge(self.dims)).any() {
                    return None;
                }
                raw
            }
        };
        Some((coord.x + self.dims.x * (coord.y + self.dims.y * coord.z)) as u32)
    }

    /// A rebuild is needed iff the owning PV's motion stamp has advanced
    /// since the last build (spec.md §4.3).
    pub fn needs_rebuild(&self, pv_motion_stamp: u64) -> bool {
        self.last_built_motion_stamp != Some(pv_motion_stamp)
    }

    /// Compute cell ids, prefix-sum cell sizes, and produce the
    /// cell-major permutation. For a primary cell list this reorders
    /// the PV's local storage in place; for a secondary list the
    /// permutation is recorded but positions are copied into private
    /// storage, leaving the PV's order untouched.
    pub fn build(&mut self, pv: &mut ParticleVector, _stream: StreamToken) -> Result<(), CoreError> {
        let n = pv.local.len();
        let mut cell_of = Vec::with_capacity(n);
        for &pos in &pv.local.positions {
            let id = self
                .cell_id(pos, ProjectionMode::Clamped)
                .expect("clamped projection always yields a cell id");
            cell_of.push(id);
        }

        let num_cells = self.num_cells();
        let mut sizes = vec![0u32; num_cells];
        for &c in &cell_of {
            sizes[c as usize] += 1;
        }
        let mut starts = vec![0u32; num_cells + 1];
        for i in 0..num_cells {
            starts[i + 1] = starts[i] + sizes[i];
        }

        let mut cursor = starts.clone();
        let mut order = vec![0u32; n];
        for (original_index, &c) in cell_of.iter().enumerate() {
            let slot = cursor[c as usize];
            order[slot as usize] = original_index as u32;
            cursor[c as usize] += 1;
        }

        if matches!(self.role, CellListRole::Primary) {
            reorder_partition(&mut pv.local, &order);
        }

        self.cell_starts = starts;
        self.cell_sizes = sizes;
        self.order = order;
        self.last_built_motion_stamp = Some(pv.motion_stamp());
        Ok(())
    }

    /// Copy PV channels into this cell list's reordered private layout
    /// (spec.md §4.3 `gatherChannels`).
    pub fn gather_channels<T: ChannelElement>(
        &mut self,
        pv: &ParticleVector,
        names: &[&str],
        _stream: StreamToken,
    ) -> Result<(), CoreError> {
        for &name in names {
            let src = pv.local.channels.get_channel::<T>(name)?;
            let persistence = pv
                .local
                .channels
                .persistence_of(name)
                .unwrap_or(Persistence::Transient);
            let ty = pv.local.channels.type_of(name).unwrap();
            self.private_channels
                .create_channel::<T>(name, ty, persistence, self.order.len())?;
            let dst = self.private_channels.get_channel_mut::<T>(name)?;
            dst.clear();
            dst.extend(self.order.iter().map(|&i| src[i as usize].clone()));
        }
        Ok(())
    }

    /// Add this cell list's private channel values back into the owning
    /// PV's channels in original indexing (spec.md §4.3
    /// `accumulateChannels`).
    pub fn accumulate_channels<T>(
        &self,
        pv: &mut ParticleVector,
        names: &[&str],
        _stream: StreamToken,
    ) -> Result<(), CoreError>
    where
        T: ChannelElement + std::ops::AddAssign + Copy,
    {
        for &name in names {
            let src = self.private_channels.get_channel::<T>(name)?.clone();
            let dst = pv.local.channels.get_channel_mut::<T>(name)?;
            for (sorted_idx, &orig_idx) in self.order.iter().enumerate() {
                dst[orig_idx as usize] += src[sorted_idx];
            }
        }
        Ok(())
    }

    pub fn clear_channels<T: ChannelElement>(&mut self, names: &[&str], stream: StreamToken) -> Result<(), CoreError> {
        for &name in names {
            self.private_channels.clear_device::<T>(name, stream)?;
        }
        Ok(())
    }
}

fn reorder_partition(partition: &mut crate::particles::Partition, order: &[u32]) {
    let gather = |v: &[DVec3]| order.iter().map(|&i| v[i as usize]).collect::<Vec<_>>();
    partition.positions = gather(&partition.positions);
    partition.velocities = gather(&partition.velocities);
    partition.id1 = order.iter().map(|&i| partition.id1[i as usize]).collect();
    partition.id2 = order.iter().map(|&i| partition.id2[i as usize]).collect();
    let names: Vec<String> = partition.channels.names().map(|s| s.to_string()).collect();
    for name in names {
        if let Ok(buf) = partition.channels.get_channel::<f64>(&name) {
            let reordered: Vec<f64> = order.iter().map(|&i| buf[i as usize]).collect();
            *partition.channels.get_channel_mut::<f64>(&name).unwrap() = reordered;
        } else if let Ok(buf) = partition.channels.get_channel::<DVec3>(&name) {
            let reordered: Vec<DVec3> = order.iter().map(|&i| buf[i as usize]).collect();
            *partition.channels.get_channel_mut::<DVec3>(&name).unwrap() = reordered;
        }
    }
}

/// Given the multiset of cutoffs declared by bound interactions on one
/// PV, sort descending and deduplicate within `tolerance` (spec.md
/// §4.7 phase 2). Returns the distinct cutoffs, largest first.
pub fn deduplicate_cutoffs(mut cutoffs: Vec<f64>, tolerance: f64) -> Vec<f64> {
    cutoffs.sort_by(|a, b| b.partial_cmp(a).unwrap());
    let mut out: Vec<f64> = Vec::new();
    for c in cutoffs {
        if out.last().map_or(true, |&last| (last - c).abs() > tolerance) {
            out.push(c);
        }
    }
    out
}

/// For a requested cutoff, the smallest cell list whose cutoff is `>=`
/// the requested one within `tolerance` (spec.md §4.5).
pub fn best_fit_cutoff(available: &[f64], requested: f64, tolerance: f64) -> Option<f64> {
    available
        .iter()
        .copied()
        .filter(|&c| c + tolerance >= requested)
        .fold(None, |best, c| match best {
            None => Some(c),
            Some(b) if c < b => Some(c),
            Some(b) => Some(b),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelType, Persistence};

    fn filled_pv(positions: Vec<DVec3>) -> ParticleVector {
        let mut pv = ParticleVector::new("test");
        let n = positions.len();
        pv.local.positions = positions;
        pv.local.velocities = vec![DVec3::ZERO; n];
        pv.local.id1 = (0..n as u32).collect();
        pv.local.id2 = vec![0; n];
        pv
    }

    #[test]
    fn build_produces_consistent_prefix_sums() {
        let mut pv = filled_pv(vec![
            DVec3::new(0.1, 0.1, 0.1),
            DVec3::new(0.1, 0.1, 0.1),
            DVec3::new(1.9, 1.9, 1.9),
        ]);
        let mut cl = CellList::new("test", 1.0, DVec3::splat(2.0), CellListRole::Primary);
        cl.build(&mut pv, StreamToken::default()).unwrap();

        for i in 0..pv.local.len() {
            let pos = pv.local.positions[i];
            let cell = cl.cell_id(pos, ProjectionMode::Clamped).unwrap() as usize;
            let start = cl.cell_starts[cell] as usize;
            let end = cl.cell_starts[cell + 1] as usize;
            assert!(i >= start && i < end, "particle {i} not within its cell's range");
        }
    }

    #[test]
    fn dedup_within_tolerance() {
        let cutoffs = vec![1.0, 1.0001, 2.0, 2.0002, 1.5];
        let deduped = deduplicate_cutoffs(cutoffs, 1e-3);
        assert_eq!(deduped, vec![2.0, 1.5, 1.0]);
    }

    #[test]
    fn best_fit_picks_smallest_sufficient() {
        let available = vec![1.0, 1.5, 2.0];
        assert_eq!(best_fit_cutoff(&available, 1.2, 1e-6), Some(1.5));
        assert_eq!(best_fit_cutoff(&available, 2.1, 1e-6), None);
    }

    #[test]
    fn gather_then_accumulate_matches_original_indexing() {
        let mut pv = filled_pv(vec![
            DVec3::new(1.9, 0.1, 0.1),
            DVec3::new(0.1, 0.1, 0.1),
        ]);
        pv.create_channel::<f64>("density", ChannelType::Scalar, Persistence::Transient)
            .unwrap();
        {
            let buf = pv.local.channels.get_channel_mut::<f64>("density").unwrap();
            buf[0] = 7.0;
            buf[1] = 3.0;
        }
        let mut cl = CellList::new("test", 1.0, DVec3::splat(2.0), CellListRole::Secondary);
        cl.build(&mut pv, StreamToken::default()).unwrap();
        cl.gather_channels::<f64>(&pv, &["density"], StreamToken::default()).unwrap();

        // zero the PV channel, then accumulate back from the cell list
        pv.local.channels.clear_device::<f64>("density", StreamToken::default()).unwrap();
        cl.accumulate_channels::<f64>(&mut pv, &["density"], StreamToken::default()).unwrap();

        let buf = pv.local.channels.get_channel::<f64>("density").unwrap();
        assert_eq!(buf[0], 7.0);
        assert_eq!(buf[1], 3.0);
    }
}
