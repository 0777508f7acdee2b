use crate::channels::StreamToken;
use crate::communication::{Fragment, Rank};
use crate::error::CoreError;
use crate::particles::ParticleVector;
use crate::state::DomainInfo;

use super::helper::ExchangeHelper;
use super::{PackedParticle, ParticleExchanger};

/// Moves particles whose position has left the local subdomain into the
/// correct neighbour fragment (spec.md §4.4). A non-empty bulk fragment
/// on any rank other than the bulk target itself is a programming error
/// — every particle that stays local must be classified as bulk, never
/// sent.
pub struct ParticleRedistributor<'pv> {
    pv: &'pv mut ParticleVector,
    domain: DomainInfo,
    neighbour_rank: Box<dyn Fn(Fragment) -> Rank + 'pv>,
    leaving: Vec<(usize, Fragment)>,
}

impl<'pv> ParticleRedistributor<'pv> {
    pub fn new(pv: &'pv mut ParticleVector, domain: DomainInfo, neighbour_rank: impl Fn(Fragment) -> Rank + 'pv) -> Self {
        Self {
            pv,
            domain,
            neighbour_rank: Box::new(neighbour_rank),
            leaving: Vec::new(),
        }
    }

    fn fragment_for(&self, local_pos: glam::DVec3) -> Fragment {
        let size = self.domain.local_size;
        let axis = |c: f64, max: f64| -> i8 {
            if c < 0.0 {
                -1
            } else if c >= max {
                1
            } else {
                0
            }
        };
        Fragment(axis(local_pos.x, size.x), axis(local_pos.y, size.y), axis(local_pos.z, size.z))
    }
}

impl<'pv> ParticleExchanger for ParticleRedistributor<'pv> {
    fn prepare_sizes(&mut self, _stream: StreamToken) -> Result<(), CoreError> {
        self.leaving.clear();
        for (i, &pos) in self.pv.local.positions.iter().enumerate() {
            let fragment = self.fragment_for(pos);
            if !fragment.is_bulk() {
                self.leaving.push((i, fragment));
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

impl<'pv> ParticleRedistributor<'pv> {
    pub fn pack_into(&mut self, helper: &mut ExchangeHelper<PackedParticle>) -> Result<(), CoreError> {
        helper.clear_sends();
        // Remove leaving particles from local storage in reverse index
        // order so earlier indices stay valid, shifting into the
        // receiver's local frame as we go.
        let persistent_names: Vec<String> = self.pv.local.channels.persistent_names().map(|s| s.to_string()).collect();
        let mut leaving = self.leaving.clone();
        leaving.sort_by(|a, b| b.0.cmp(&a.0));
        for (i, fragment) in leaving {
            if fragment.is_bulk() {
                return Err(CoreError::InvariantViolation {
                    task: "ParticleRedistributor::pack_into".to_string(),
                    detail: "a particle classified as leaving cannot target the bulk fragment".to_string(),
                });
            }
            let rank = (self.neighbour_rank)(fragment);
            let shift = fragment.shift(self.domain.local_size);
            let mut persistent_f64 = Vec::new();
            let mut persistent_vec3 = Vec::new();
            for name in &persistent_names {
                if let Ok(buf) = self.pv.local.channels.get_channel::<f64>(name) {
                    persistent_f64.push((name.clone(), buf[i]));
                } else if let Ok(buf) = self.pv.local.channels.get_channel::<glam::DVec3>(name) {
                    persistent_vec3.push((name.clone(), buf[i]));
                }
            }
            let packed = PackedParticle {
                pos: self.pv.local.positions[i] - shift,
                vel: self.pv.local.velocities[i],
                id1: self.pv.local.id1[i],
                id2: self.pv.local.id2[i],
                persistent_f64,
                persistent_vec3,
            };
            self.pv.local.positions.swap_remove(i);
            self.pv.local.velocities.swap_remove(i);
            self.pv.local.id1.swap_remove(i);
            self.pv.local.id2.swap_remove(i);
            for name in &persistent_names {
                if let Ok(buf) = self.pv.local.channels.get_channel_mut::<f64>(name) {
                    buf.swap_remove(i);
                } else if let Ok(buf) = self.pv.local.channels.get_channel_mut::<glam::DVec3>(name) {
                    buf.swap_remove(i);
                }
            }
            helper.push_send(rank, fragment, packed);
        }
        for rank in helper.send_buffers.ranks().collect::<Vec<_>>() {
            let len = helper.send_buffers.get(rank).map(|b| b.len()).unwrap_or(0);
            helper.set_send_size(rank, len);
        }
        if !self.leaving.is_empty() {
            self.pv.mark_moved();
        }
        Ok(())
    }

    pub fn unpack_from(&mut self, helper: &ExchangeHelper<PackedParticle>) {
        let mut received_any = false;
        for (_, buf) in helper.recv_buffers.iter() {
            for p in buf {
                self.pv.local.positions.push(p.pos);
                self.pv.local.velocities.push(p.vel);
                self.pv.local.id1.push(p.id1);
                self.pv.local.id2.push(p.id2);
                for (name, value) in &p.persistent_f64 {
                    if let Ok(dst) = self.pv.local.channels.get_channel_mut::<f64>(name) {
                        dst.push(*value);
                    }
                }
                for (name, value) in &p.persistent_vec3 {
                    if let Ok(dst) = self.pv.local.channels.get_channel_mut::<glam::DVec3>(name) {
                        dst.push(*value);
                    }
                }
                received_any = true;
            }
        }
        if received_any {
            self.pv.mark_moved();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn particle_past_boundary_is_classified_leaving() {
        let mut pv = ParticleVector::new("water");
        pv.local.positions = vec![DVec3::new(10.5, 1.0, 1.0), DVec3::new(1.0, 1.0, 1.0)];
        pv.local.velocities = vec![DVec3::ZERO; 2];
        pv.local.id1 = vec![0, 1];
        pv.local.id2 = vec![0, 0];
        let domain = DomainInfo::new(DVec3::ZERO, DVec3::splat(10.0), DVec3::splat(10.0));
        let mut redist = ParticleRedistributor::new(&mut pv, domain, |_| 1);
        redist.prepare_sizes(StreamToken::default()).unwrap();
        assert_eq!(redist.leaving.len(), 1);
        assert_eq!(redist.leaving[0].1, Fragment(1, 0, 0));
    }

    #[test]
    fn persistent_channel_survives_pack_and_unpack() {
        use crate::channels::{ChannelType, Persistence};
        use crate::communication::LocalCommunicator;

        let domain = DomainInfo::new(DVec3::ZERO, DVec3::splat(10.0), DVec3::splat(10.0));

        let mut source = ParticleVector::new("water");
        source.local.positions = vec![DVec3::new(10.5, 1.0, 1.0), DVec3::new(1.0, 1.0, 1.0)];
        source.local.velocities = vec![DVec3::ZERO; 2];
        source.local.id1 = vec![7, 8];
        source.local.id2 = vec![0, 0];
        source
            .create_channel::<f64>("mass", ChannelType::Scalar, Persistence::Persistent)
            .unwrap();
        source.local.channels.get_channel_mut::<f64>("mass").unwrap()[0] = 42.0;

        let mut redist = ParticleRedistributor::new(&mut source, domain, |_| 1);
        redist.prepare_sizes(StreamToken::default()).unwrap();
        let mut helper = ExchangeHelper::new(&LocalCommunicator::default());
        redist.pack_into(&mut helper).unwrap();

        // Swapped in place of the removed leaver: the original second
        // particle, whose mass was never set (defaults to 0.0).
        assert_eq!(source.local.id1, vec![8]);
        assert_eq!(source.local.channels.get_channel::<f64>("mass").unwrap(), &vec![0.0]);
        let sent = helper.send_buffers.get(1).cloned().unwrap_or_default();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].persistent_f64, vec![("mass".to_string(), 42.0)]);

        // Simulate the engine handing the sent record to a destination
        // rank's partition, which has the same channel registered.
        helper.recv_buffers.insert(0, sent);
        let mut dest = ParticleVector::new("water");
        dest.create_channel::<f64>("mass", ChannelType::Scalar, Persistence::Persistent)
            .unwrap();
        let mut dest_redist = ParticleRedistributor::new(&mut dest, domain, |_| 1);
        dest_redist.unpack_from(&helper);
        assert_eq!(dest.local.id1, vec![7]);
        assert_eq!(dest.local.channels.get_channel::<f64>("mass").unwrap(), &vec![42.0]);
    }
}
