use std::path::Path;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::channels::{ChannelElement, ChannelType, ExtraDataManager, Persistence, StreamToken};
use crate::checkpoint::Checkpointable;
use crate::error::CoreError;
use crate::named::Named;

/// One contiguous sequence of particles: coordinate, velocity, two 32-bit
/// id fields, plus whatever named channels have been created on it
/// (spec.md §3). `local` holds resident particles; `halo` holds ghost
/// copies, read-only between exchange unpack and the next redistribute.
#[derive(Default)]
pub struct Partition {
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
    pub id1: Vec<u32>,
    pub id2: Vec<u32>,
    pub channels: ExtraDataManager,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn create_channel<T: ChannelElement>(
        &mut self,
        name: &str,
        ty: ChannelType,
        persistence: Persistence,
    ) -> Result<(), CoreError> {
        let len = self.len();
        self.channels.create_channel::<T>(name, ty, persistence, len)
    }

    /// Zero every transient channel plus positions/velocities-adjacent
    /// force-like buffers are handled by the interaction manager; this
    /// only clears named channel storage (spec.md §3 "begin each step
    /// zero-valued").
    pub fn clear_transient_channels<T: ChannelElement>(&mut self, stream: StreamToken) {
        self.channels.clear_all_transient::<T>(stream);
    }

    fn resize_channels<T: ChannelElement>(&mut self, new_len: usize) {
        let names: Vec<String> = self.channels.names().map(|s| s.to_string()).collect();
        for name in names {
            let _ = self.channels.resize_channel::<T>(&name, new_len);
        }
    }

    pub fn truncate(&mut self, new_len: usize) {
        self.positions.truncate(new_len);
        self.velocities.truncate(new_len);
        self.id1.truncate(new_len);
        self.id2.truncate(new_len);
        self.resize_channels::<f64>(new_len);
        self.resize_channels::<DVec3>(new_len);
    }

    /// Append another partition's particles (used by unpack during halo
    /// exchange and redistribution). Only persistent channels travel;
    /// a channel present on `self` but missing from `other` is padded
    /// with zeroes so indices stay aligned.
    pub fn append(&mut self, mut other: Partition) {
        let names: Vec<String> = self.channels.persistent_names().map(|s| s.to_string()).collect();
        let mut carried_f64: Vec<(String, Vec<f64>)> = Vec::new();
        let mut carried_vec3: Vec<(String, Vec<DVec3>)> = Vec::new();
        for name in &names {
            if let Ok(src) = other.channels.get_channel::<f64>(name) {
                carried_f64.push((name.clone(), src.clone()));
            } else if let Ok(src) = other.channels.get_channel::<DVec3>(name) {
                carried_vec3.push((name.clone(), src.clone()));
            }
        }

        self.positions.append(&mut other.positions);
        self.velocities.append(&mut other.velocities);
        self.id1.append(&mut other.id1);
        self.id2.append(&mut other.id2);

        for (name, mut src) in carried_f64 {
            if let Ok(dst) = self.channels.get_channel_mut::<f64>(&name) {
                dst.append(&mut src);
            }
        }
        for (name, mut src) in carried_vec3 {
            if let Ok(dst) = self.channels.get_channel_mut::<DVec3>(&name) {
                dst.append(&mut src);
            }
        }
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.velocities.clear();
        self.id1.clear();
        self.id2.clear();
        self.resize_channels::<f64>(0);
        self.resize_channels::<DVec3>(0);
    }

    /// Snapshot positions, velocities, ids, and every persistent named
    /// channel into a serializable record (spec.md §6, §8 round-trip
    /// law). Positions/velocities are plain `Vec<DVec3>`, not
    /// type-erased, so they round-trip directly; persistent channels are
    /// carried the same way `append` carries them across a redistribute.
    pub fn to_record(&self) -> PartitionRecord {
        let mut persistent_f64 = Vec::new();
        let mut persistent_vec3 = Vec::new();
        for name in self.channels.persistent_names() {
            if let Ok(buf) = self.channels.get_channel::<f64>(name) {
                persistent_f64.push((name.to_string(), buf.clone()));
            } else if let Ok(buf) = self.channels.get_channel::<DVec3>(name) {
                persistent_vec3.push((name.to_string(), buf.clone()));
            }
        }
        PartitionRecord {
            positions: self.positions.clone(),
            velocities: self.velocities.clone(),
            id1: self.id1.clone(),
            id2: self.id2.clone(),
            persistent_f64,
            persistent_vec3,
        }
    }

    /// Restore positions, velocities, ids, and every persistent channel
    /// already registered on `self` from `record`. A channel named in
    /// `record` that hasn't been created on `self` yet (the interaction
    /// that owns it hasn't run since restart) is skipped, same as
    /// `append`'s handling of a channel missing on the destination.
    pub fn restore_from_record(&mut self, record: PartitionRecord) {
        self.positions = record.positions;
        self.velocities = record.velocities;
        self.id1 = record.id1;
        self.id2 = record.id2;
        for (name, buf) in record.persistent_f64 {
            if let Ok(dst) = self.channels.get_channel_mut::<f64>(&name) {
                *dst = buf;
            }
        }
        for (name, buf) in record.persistent_vec3 {
            if let Ok(dst) = self.channels.get_channel_mut::<DVec3>(&name) {
                *dst = buf;
            }
        }
    }
}

/// On-disk shape of a checkpointed `Partition` (spec.md §6). Plain
/// `serde_yaml`, matching `config.rs`'s own on-disk record convention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub positions: Vec<DVec3>,
    pub velocities: Vec<DVec3>,
    pub id1: Vec<u32>,
    pub id2: Vec<u32>,
    pub persistent_f64: Vec<(String, Vec<f64>)>,
    pub persistent_vec3: Vec<(String, Vec<DVec3>)>,
}

/// A named species of point particles (spec.md §3). Holds `local` and
/// `halo` partitions and a monotonically increasing motion stamp that
/// cell lists compare against to decide whether a rebuild is needed.
pub struct ParticleVector {
    name: String,
    pub local: Partition,
    pub halo: Partition,
    motion_stamp: u64,
}

impl ParticleVector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local: Partition::default(),
            halo: Partition::default(),
            motion_stamp: 0,
        }
    }

    /// Called by integrators, bouncers, and belonging-splitters — the
    /// only phases allowed to mutate local storage (spec.md §5).
    pub fn mark_moved(&mut self) {
        self.motion_stamp += 1;
    }

    pub fn motion_stamp(&self) -> u64 {
        self.motion_stamp
    }

    pub fn create_channel<T: ChannelElement>(
        &mut self,
        name: &str,
        ty: ChannelType,
        persistence: Persistence,
    ) -> Result<(), CoreError> {
        self.local.create_channel::<T>(name, ty, persistence)?;
        self.halo.create_channel::<T>(name, ty, persistence)
    }
}

impl Named for ParticleVector {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Checkpointable for ParticleVector {
    fn checkpoint(&self, folder: &Path) -> Result<(), CoreError> {
        let record = self.local.to_record();
        let path = self.record_path(folder, "pv.yaml");
        let contents = serde_yaml::to_string(&record)
            .map_err(|e| CoreError::Restart(format!("failed to serialize '{}': {e}", self.name())))?;
        std::fs::write(&path, contents).map_err(|e| CoreError::Restart(format!("failed to write {:?}: {e}", path)))
    }

    fn restart(&mut self, folder: &Path) -> Result<(), CoreError> {
        let path = self.record_path(folder, "pv.yaml");
        let contents =
            std::fs::read_to_string(&path).map_err(|e| CoreError::Restart(format!("failed to read {:?}: {e}", path)))?;
        let record: PartitionRecord =
            serde_yaml::from_str(&contents).map_err(|e| CoreError::Restart(format!("malformed record in {:?}: {e}", path)))?;
        self.local.restore_from_record(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_moved_advances_motion_stamp() {
        let mut pv = ParticleVector::new("water");
        assert_eq!(pv.motion_stamp(), 0);
        pv.mark_moved();
        pv.mark_moved();
        assert_eq!(pv.motion_stamp(), 2);
    }

    #[test]
    fn truncate_resizes_channels_too() {
        let mut pv = ParticleVector::new("water");
        pv.local.positions = vec![DVec3::ZERO; 4];
        pv.create_channel::<f64>("density", ChannelType::Scalar, Persistence::Transient)
            .unwrap();
        pv.local.truncate(2);
        assert_eq!(pv.local.channels.len_of("density"), Some(2));
    }
}
