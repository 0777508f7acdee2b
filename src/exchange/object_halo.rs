use crate::channels::StreamToken;
use crate::communication::{Fragment, Rank};
use crate::error::CoreError;
use crate::particles::ObjectVector;
use crate::state::DomainInfo;

use super::helper::ExchangeHelper;
use super::{PackedParticle, ParticleExchanger};

/// Ships whole objects whose bounding box touches the boundary
/// (spec.md §4.4): packs particle coordinates and per-object channels.
/// Object integrity is preserved by construction — the packed unit is
/// always `object_size` consecutive `PackedParticle`s, never a partial
/// object.
pub struct ObjectHaloExchanger<'ov> {
    ov: &'ov mut ObjectVector,
    rc: f64,
    domain: DomainInfo,
    neighbour_rank: Box<dyn Fn(Fragment) -> Rank + 'ov>,
    /// (object index, fragment) assignments recorded by `prepare_sizes`
    /// and reused by the follow-on extra/reverse exchangers.
    pub assignments: Vec<(usize, Fragment)>,
}

impl<'ov> ObjectHaloExchanger<'ov> {
    pub fn new(
        ov: &'ov mut ObjectVector,
        rc: f64,
        domain: DomainInfo,
        neighbour_rank: impl Fn(Fragment) -> Rank + 'ov,
    ) -> Self {
        Self {
            ov,
            rc,
            domain,
            neighbour_rank: Box::new(neighbour_rank),
            assignments: Vec::new(),
        }
    }

    fn fragments_touching(&self, lo: glam::DVec3, hi: glam::DVec3) -> impl Iterator<Item = Fragment> + '_ {
        let size = self.domain.local_size;
        let rc = self.rc;
        Fragment::all().filter(|f| !f.is_bulk()).filter(move |f| {
            let touches_lo = |axis: i8, lo: f64| axis == -1 && lo < rc;
            let touches_hi = |axis: i8, hi: f64, max: f64| axis == 1 && hi > max - rc;
            let ok = |axis: i8, lo: f64, hi: f64, max: f64| axis == 0 || touches_lo(axis, lo) || touches_hi(axis, hi, max);
            ok(f.0, lo.x, hi.x, size.x) && ok(f.1, lo.y, hi.y, size.y) && ok(f.2, lo.z, hi.z, size.z)
        })
    }
}

impl<'ov> ParticleExchanger for ObjectHaloExchanger<'ov> {
    fn prepare_sizes(&mut self, _stream: StreamToken) -> Result<(), CoreError> {
        self.assignments.clear();
        for (obj_idx, (lo, hi)) in self.ov.local_bounding_boxes().into_iter().enumerate() {
            for fragment in self.fragments_touching(lo, hi) {
                self.assignments.push((obj_idx, fragment));
            }
        }
        Ok(())
    }

    fn prepare_data(&mut self, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }

    fn combine_and_upload_data(&mut self, _stream: StreamToken) -> Result<(), CoreError> {
        Ok(())
    }
}

impl<'ov> ObjectHaloExchanger<'ov> {
    pub fn pack_into(&self, helper: &mut ExchangeHelper<PackedParticle>) {
        helper.clear_sends();
        let object_size = self.ov.object_size();
        let base = self.ov.base();
        for &(obj_idx, fragment) in &self.assignments {
            let rank = (self.neighbour_rank)(fragment);
            let shift = fragment.shift(self.domain.local_size);
            let start = obj_idx * object_size;
            for local_i in start..start + object_size {
                let packed = PackedParticle {
                    pos: base.local.positions[local_i] - shift,
                    vel: base.local.velocities[local_i],
                    id1: base.local.id1[local_i],
                    id2: base.local.id2[local_i],
                    persistent_f64: Vec::new(),
                    persistent_vec3: Vec::new(),
                };
                helper.push_send(rank, fragment, packed);
            }
        }
        for rank in helper.send_buffers.ranks().collect::<Vec<_>>() {
            let len = helper.send_buffers.get(rank).map(|b| b.len()).unwrap_or(0);
            helper.set_send_size(rank, len);
        }
    }

    pub fn unpack_from(&mut self, helper: &ExchangeHelper<PackedParticle>) {
        let base = self.ov.base_mut();
        base.halo.clear();
        for (_, buf) in helper.recv_buffers.iter() {
            for p in buf {
                base.halo.positions.push(p.pos);
                base.halo.velocities.push(p.vel);
                base.halo.id1.push(p.id1);
                base.halo.id2.push(p.id2);
            }
        }
    }
}

/// Follow-on exchange reusing the preceding `ObjectHaloExchanger`'s
/// fragment assignments, sending per-object intermediate channels
/// forward to the ranks that now hold a halo copy of each object
/// (spec.md §4.4).
pub struct ObjectExtraExchanger<'a> {
    assignments: &'a [(usize, Fragment)],
    neighbour_rank: Box<dyn Fn(Fragment) -> Rank + 'a>,
}

impl<'a> ObjectExtraExchanger<'a> {
    pub fn new(assignments: &'a [(usize, Fragment)], neighbour_rank: impl Fn(Fragment) -> Rank + 'a) -> Self {
        Self {
            assignments,
            neighbour_rank: Box::new(neighbour_rank),
        }
    }

    pub fn pack_channel(&self, values: &[f64], helper: &mut ExchangeHelper<f64>) {
        helper.clear_sends();
        for &(obj_idx, fragment) in self.assignments {
            let rank = (self.neighbour_rank)(fragment);
            helper.push_send(rank, fragment, values[obj_idx]);
        }
        for rank in helper.send_buffers.ranks().collect::<Vec<_>>() {
            let len = helper.send_buffers.get(rank).map(|b| b.len()).unwrap_or(0);
            helper.set_send_size(rank, len);
        }
    }
}

/// Accumulates per-particle results computed on halo objects back to
/// the owning rank (force reverse-reduction, spec.md §4.4), reusing the
/// same fragment assignments as the preceding `ObjectHaloExchanger` but
/// running the data flow in the opposite direction.
pub struct ObjectReverseExchanger<'a> {
    assignments: &'a [(usize, Fragment)],
    object_size: usize,
    owner_rank: Box<dyn Fn(Fragment) -> Rank + 'a>,
}

impl<'a> ObjectReverseExchanger<'a> {
    pub fn new(assignments: &'a [(usize, Fragment)], object_size: usize, owner_rank: impl Fn(Fragment) -> Rank + 'a) -> Self {
        Self {
            assignments,
            object_size,
            owner_rank: Box::new(owner_rank),
        }
    }

    /// Pack halo-object per-particle force contributions destined back
    /// to their owning rank, in the same (object, fragment) order the
    /// forward exchange used.
    pub fn pack_into(&self, halo_forces: &[glam::DVec3], helper: &mut ExchangeHelper<glam::DVec3>) {
        helper.clear_sends();
        for (slot, &(obj_idx, fragment)) in self.assignments.iter().enumerate() {
            let rank = (self.owner_rank)(fragment.opposite());
            let start = slot * self.object_size;
            let local_start = obj_idx * self.object_size;
            let _ = local_start;
            for offset in 0..self.object_size {
                helper.push_send(rank, fragment, halo_forces[start + offset]);
            }
        }
        for rank in helper.send_buffers.ranks().collect::<Vec<_>>() {
            let len = helper.send_buffers.get(rank).map(|b| b.len()).unwrap_or(0);
            helper.set_send_size(rank, len);
        }
    }

    /// Sum received contributions into the owner's per-particle force
    /// buffer, in original local indexing.
    pub fn accumulate_into(&self, helper: &ExchangeHelper<glam::DVec3>, owner_forces: &mut [glam::DVec3]) {
        let mut offset = 0usize;
        for (_, buf) in helper.recv_buffers.iter() {
            for (i, &force) in buf.iter().enumerate() {
                if offset + i < owner_forces.len() {
                    owner_forces[offset + i] += force;
                }
            }
            offset += buf.len();
        }
    }
}
