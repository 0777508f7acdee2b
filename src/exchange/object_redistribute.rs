use glam::DVec3;

use crate::channels::StreamToken;
use crate::communication::{Fragment, Rank};
use crate::error::CoreError;
use crate::particles::ObjectVector;
use crate::state::DomainInfo;

use super::helper::ExchangeHelper;
use super::{PackedParticle, ParticleExchanger};

/// Ships whole objects whose centre-of-mass has crossed into a
/// neighbour subdomain (spec.md §4.4). Every particle of a redistributed
/// object moves together; `spec.md §8`'s "all of its particles land on
/// the same rank" invariant falls directly out of operating on whole
/// `object_size`-sized chunks rather than individual particles.
pub struct ObjectRedistributor<'ov> {
    ov: &'ov mut ObjectVector,
    domain: DomainInfo,
    neighbour_rank: Box<dyn Fn(Fragment) -> Rank + 'ov>,
    leaving: Vec<(usize, Fragment)>,
}

impl<'ov> ObjectRedistributor<'ov> {
    pub fn new(ov: &'ov mut ObjectVector, domain: DomainInfo, neighbour_rank: impl Fn(Fragment) -> Rank + 'ov) -> Self {
        Self {
            ov,
            domain,
            neighbour_rank: Box::new(neighbour_rank),
            leaving: Vec::new(),
        }
    }

    fn fragment_for(&self, com_local: glam::DVec3) -> Fragment {
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
        Fragment(axis(com_local.x, size.x), axis(com_local.y, size.y), axis(com_local.z, size.z))
    }
}

impl<'ov> ParticleExchanger for ObjectRedistributor<'ov> {
    fn prepare_sizes(&mut self, _stream: StreamToken) -> Result<(), CoreError> {
        self.leaving.clear();
        for (obj_idx, com) in self.ov.local_centres_of_mass().into_iter().enumerate() {
            let fragment = self.fragment_for(com);
            if !fragment.is_bulk() {
                self.leaving.push((obj_idx, fragment));
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

/// Per-object persistent channel names are carried on the wire by
/// stamping their value onto every particle of the object under a
/// prefixed key, alongside that particle's own per-particle persistent
/// channels — there is no separate per-object wire record, so the
/// object-level value just rides along `object_size` times and is read
/// back off the first particle of each received object.
const OBJECT_CHANNEL_PREFIX: &str = "obj:";

impl<'ov> ObjectRedistributor<'ov> {
    pub fn pack_into(&mut self, helper: &mut ExchangeHelper<PackedParticle>) -> Result<(), CoreError> {
        helper.clear_sends();
        let object_size = self.ov.object_size();
        let persistent_names: Vec<String> = self.ov.base().local.channels.persistent_names().map(|s| s.to_string()).collect();
        let object_persistent_names: Vec<String> = self.ov.object_channels.persistent_names().map(|s| s.to_string()).collect();
        let mut leaving = self.leaving.clone();
        leaving.sort_by(|a, b| b.0.cmp(&a.0));
        for (obj_idx, fragment) in leaving {
            if fragment.is_bulk() {
                return Err(CoreError::InvariantViolation {
                    task: "ObjectRedistributor::pack_into".to_string(),
                    detail: "an object classified as leaving cannot target the bulk fragment".to_string(),
                });
            }
            let rank = (self.neighbour_rank)(fragment);
            let shift = fragment.shift(self.domain.local_size);
            let mut object_f64 = Vec::new();
            let mut object_vec3 = Vec::new();
            for name in &object_persistent_names {
                if let Ok(buf) = self.ov.object_channels.get_channel::<f64>(name) {
                    object_f64.push((format!("{OBJECT_CHANNEL_PREFIX}{name}"), buf[obj_idx]));
                } else if let Ok(buf) = self.ov.object_channels.get_channel::<DVec3>(name) {
                    object_vec3.push((format!("{OBJECT_CHANNEL_PREFIX}{name}"), buf[obj_idx]));
                }
            }
            let base = self.ov.base_mut();
            let start = obj_idx * object_size;
            for local_i in start..start + object_size {
                let mut persistent_f64 = object_f64.clone();
                let mut persistent_vec3 = object_vec3.clone();
                for name in &persistent_names {
                    if let Ok(buf) = base.local.channels.get_channel::<f64>(name) {
                        persistent_f64.push((name.clone(), buf[local_i]));
                    } else if let Ok(buf) = base.local.channels.get_channel::<DVec3>(name) {
                        persistent_vec3.push((name.clone(), buf[local_i]));
                    }
                }
                let packed = PackedParticle {
                    pos: base.local.positions[local_i] - shift,
                    vel: base.local.velocities[local_i],
                    id1: base.local.id1[local_i],
                    id2: base.local.id2[local_i],
                    persistent_f64,
                    persistent_vec3,
                };
                helper.push_send(rank, fragment, packed);
            }
            // Remove the whole object's particle range; correctness of
            // subsequent indices for other `leaving` objects relies on
            // iterating in descending `obj_idx` order.
            base.local.positions.drain(start..start + object_size);
            base.local.velocities.drain(start..start + object_size);
            base.local.id1.drain(start..start + object_size);
            base.local.id2.drain(start..start + object_size);
            for name in &persistent_names {
                if let Ok(buf) = base.local.channels.get_channel_mut::<f64>(name) {
                    buf.drain(start..start + object_size);
                } else if let Ok(buf) = base.local.channels.get_channel_mut::<DVec3>(name) {
                    buf.drain(start..start + object_size);
                }
            }
            for name in &object_persistent_names {
                if let Ok(buf) = self.ov.object_channels.get_channel_mut::<f64>(name) {
                    buf.remove(obj_idx);
                } else if let Ok(buf) = self.ov.object_channels.get_channel_mut::<DVec3>(name) {
                    buf.remove(obj_idx);
                }
            }
        }
        for rank in helper.send_buffers.ranks().collect::<Vec<_>>() {
            let len = helper.send_buffers.get(rank).map(|b| b.len()).unwrap_or(0);
            helper.set_send_size(rank, len);
        }
        if !self.leaving.is_empty() {
            self.ov.base_mut().mark_moved();
        }
        Ok(())
    }

    pub fn unpack_from(&mut self, helper: &ExchangeHelper<PackedParticle>) {
        let mut received_any = false;
        let object_size = self.ov.object_size().max(1);
        let mut received_objects_f64: Vec<(String, Vec<f64>)> = Vec::new();
        let mut received_objects_vec3: Vec<(String, Vec<DVec3>)> = Vec::new();
        {
            let base = self.ov.base_mut();
            let mut particle_in_object = 0usize;
            for (_, buf) in helper.recv_buffers.iter() {
                for p in buf {
                    base.local.positions.push(p.pos);
                    base.local.velocities.push(p.vel);
                    base.local.id1.push(p.id1);
                    base.local.id2.push(p.id2);
                    for (name, value) in &p.persistent_f64 {
                        if let Some(obj_name) = name.strip_prefix(OBJECT_CHANNEL_PREFIX) {
                            if particle_in_object == 0 {
                                match received_objects_f64.iter_mut().find(|(n, _)| n == obj_name) {
                                    Some((_, v)) => v.push(*value),
                                    None => received_objects_f64.push((obj_name.to_string(), vec![*value])),
                                }
                            }
                        } else if let Ok(dst) = base.local.channels.get_channel_mut::<f64>(name) {
                            dst.push(*value);
                        }
                    }
                    for (name, value) in &p.persistent_vec3 {
                        if let Some(obj_name) = name.strip_prefix(OBJECT_CHANNEL_PREFIX) {
                            if particle_in_object == 0 {
                                match received_objects_vec3.iter_mut().find(|(n, _)| n == obj_name) {
                                    Some((_, v)) => v.push(*value),
                                    None => received_objects_vec3.push((obj_name.to_string(), vec![*value])),
                                }
                            }
                        } else if let Ok(dst) = base.local.channels.get_channel_mut::<DVec3>(name) {
                            dst.push(*value);
                        }
                    }
                    particle_in_object = (particle_in_object + 1) % object_size;
                    received_any = true;
                }
            }
            if received_any {
                base.mark_moved();
            }
        }
        for (name, mut values) in received_objects_f64 {
            if let Ok(dst) = self.ov.object_channels.get_channel_mut::<f64>(&name) {
                dst.append(&mut values);
            }
        }
        for (name, mut values) in received_objects_vec3 {
            if let Ok(dst) = self.ov.object_channels.get_channel_mut::<DVec3>(&name) {
                dst.append(&mut values);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelType, Persistence};
    use crate::communication::LocalCommunicator;

    #[test]
    fn per_particle_and_per_object_persistent_channels_survive_redistribute() {
        let domain = DomainInfo::new(DVec3::ZERO, DVec3::splat(10.0), DVec3::splat(10.0));

        let mut source = ObjectVector::new("cell", 2);
        source.base_mut().local.positions = vec![DVec3::new(10.5, 1.0, 1.0), DVec3::new(10.2, 1.0, 1.0)];
        source.base_mut().local.velocities = vec![DVec3::ZERO; 2];
        source.base_mut().local.id1 = vec![1, 2];
        source.base_mut().local.id2 = vec![0, 0];
        source
            .base_mut()
            .create_channel::<f64>("drag", ChannelType::Scalar, Persistence::Persistent)
            .unwrap();
        source.base_mut().local.channels.get_channel_mut::<f64>("drag").unwrap()[0] = 3.0;
        source.base_mut().local.channels.get_channel_mut::<f64>("drag").unwrap()[1] = 4.0;
        source
            .create_object_channel::<f64>("volume", ChannelType::Scalar, Persistence::Persistent)
            .unwrap();
        source.object_channels.get_channel_mut::<f64>("volume").unwrap()[0] = 99.0;

        let mut redist = ObjectRedistributor::new(&mut source, domain, |_| 1);
        redist.prepare_sizes(StreamToken::default()).unwrap();
        assert_eq!(redist.leaving, vec![(0, Fragment(1, 0, 0))]);
        let mut helper = ExchangeHelper::new(&LocalCommunicator::default());
        redist.pack_into(&mut helper).unwrap();
        assert!(source.base().local.positions.is_empty());
        assert!(source.object_channels.get_channel::<f64>("volume").unwrap().is_empty());

        let sent = helper.send_buffers.get(1).cloned().unwrap_or_default();
        assert_eq!(sent.len(), 2);

        helper.recv_buffers.insert(0, sent);
        let mut dest = ObjectVector::new("cell", 2);
        dest.base_mut()
            .create_channel::<f64>("drag", ChannelType::Scalar, Persistence::Persistent)
            .unwrap();
        dest.create_object_channel::<f64>("volume", ChannelType::Scalar, Persistence::Persistent)
            .unwrap();
        let mut dest_redist = ObjectRedistributor::new(&mut dest, domain, |_| 1);
        dest_redist.unpack_from(&helper);

        assert_eq!(dest.base().local.id1, vec![1, 2]);
        assert_eq!(dest.base().local.channels.get_channel::<f64>("drag").unwrap(), &vec![3.0, 4.0]);
        assert_eq!(dest.object_channels.get_channel::<f64>("volume").unwrap(), &vec![99.0]);
    }
}
