use crate::channels::StreamToken;
use crate::communication::{Fragment, Rank, SizedCommunicator};
use crate::error::CoreError;
use crate::particles::ParticleVector;
use crate::state::DomainInfo;

use super::helper::ExchangeHelper;
use super::{PackedParticle, ParticleExchanger};

/// Copies particles within `rc` of a subdomain boundary into the
/// fragment(s) they project onto, shifting coordinates so the receiver
/// sees particles in its own local frame (spec.md §4.4).
pub struct ParticleHaloExchanger<'pv> {
    pv: &'pv mut ParticleVector,
    rc: f64,
    domain: DomainInfo,
    neighbour_rank: Box<dyn Fn(Fragment) -> Rank + 'pv>,
    assignments: Vec<(usize, Fragment)>,
}

impl<'pv> ParticleHaloExchanger<'pv> {
    pub fn new(
        pv: &'pv mut ParticleVector,
        rc: f64,
        domain: DomainInfo,
        neighbour_rank: impl Fn(Fragment) -> Rank + 'pv,
    ) -> Self {
        Self {
            pv,
            rc,
            domain,
            neighbour_rank: Box::new(neighbour_rank),
            assignments: Vec::new(),
        }
    }

    /// Every fragment direction a particle near the boundary projects
    /// onto (a corner particle projects onto up to 7 non-bulk fragments).
    fn fragments_for(&self, local_pos: glam::DVec3) -> impl Iterator<Item = Fragment> + '_ {
        let size = self.domain.local_size;
        let rc = self.rc;
        Fragment::all().filter(move |f| !f.is_bulk()).filter(move |f| {
            let near_lo = |c: f64, axis: i8| axis == -1 && c < rc;
            let near_hi = |c: f64, max: f64, axis: i8| axis == 1 && c > max - rc;
            let ok_axis = |c: f64, max: f64, axis: i8| axis == 0 || near_lo(c, axis) || near_hi(c, max, axis);
            ok_axis(local_pos.x, size.x, f.0) && ok_axis(local_pos.y, size.y, f.1) && ok_axis(local_pos.z, size.z, f.2)
                && (f.0 != 0 || f.1 != 0 || f.2 != 0)
        })
    }
}

impl<'pv> ParticleExchanger for ParticleHaloExchanger<'pv> {
    fn prepare_sizes(&mut self, _stream: StreamToken) -> Result<(), CoreError> {
        self.assignments.clear();
        for (i, &pos) in self.pv.local.positions.iter().enumerate() {
            for fragment in self.fragments_for(pos) {
                self.assignments.push((i, fragment));
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

impl<'pv> ParticleHaloExchanger<'pv> {
    /// Pack assigned particles into `helper`'s send buffers, rank by
    /// rank, applying the coordinate shift for each fragment.
    pub fn pack_into(&self, helper: &mut ExchangeHelper<PackedParticle>) {
        helper.clear_sends();
        for &(i, fragment) in &self.assignments {
            let rank = (self.neighbour_rank)(fragment);
            let shift = fragment.shift(self.domain.local_size);
            let packed = PackedParticle {
                pos: self.pv.local.positions[i] - shift,
                vel: self.pv.local.velocities[i],
                id1: self.pv.local.id1[i],
                id2: self.pv.local.id2[i],
                persistent_f64: Vec::new(),
                persistent_vec3: Vec::new(),
            };
            helper.push_send(rank, fragment, packed);
        }
        for rank in helper.send_buffers.ranks().collect::<Vec<_>>() {
            let len = helper.send_buffers.get(rank).map(|b| b.len()).unwrap_or(0);
            helper.set_send_size(rank, len);
        }
    }

    /// Unpack `helper`'s recv buffers into the PV's halo partition. Must
    /// be called only after the exchange engine's `finalize`.
    pub fn unpack_from(&mut self, helper: &ExchangeHelper<PackedParticle>) {
        self.pv.halo.clear();
        for (_, buf) in helper.recv_buffers.iter() {
            for p in buf {
                self.pv.halo.positions.push(p.pos);
                self.pv.halo.velocities.push(p.vel);
                self.pv.halo.id1.push(p.id1);
                self.pv.halo.id2.push(p.id2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn domain() -> DomainInfo {
        DomainInfo::new(DVec3::ZERO, DVec3::splat(10.0), DVec3::splat(10.0))
    }

    #[test]
    fn corner_particle_projects_onto_seven_fragments() {
        let mut pv = ParticleVector::new("water");
        pv.local.positions = vec![DVec3::new(0.2, 0.2, 0.2)];
        pv.local.velocities = vec![DVec3::ZERO];
        pv.local.id1 = vec![0];
        pv.local.id2 = vec![0];
        let exch = ParticleHaloExchanger::new(&mut pv, 1.0, domain(), |_| 0);
        let count = exch.fragments_for(DVec3::new(0.2, 0.2, 0.2)).count();
        assert_eq!(count, 7);
    }

    #[test]
    fn interior_particle_has_no_fragments() {
        let mut pv = ParticleVector::new("water");
        let exch = ParticleHaloExchanger::new(&mut pv, 1.0, domain(), |_| 0);
        let count = exch.fragments_for(DVec3::new(5.0, 5.0, 5.0)).count();
        assert_eq!(count, 0);
    }
}
