use std::path::Path;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::vector::{ParticleVector, PartitionRecord};
use crate::channels::{ChannelElement, ChannelType, ExtraDataManager, Persistence};
use crate::checkpoint::Checkpointable;
use crate::error::CoreError;
use crate::named::Named;

/// Immutable vertex/triangle topology shared across all objects of one OV
/// (spec.md §3).
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<DVec3>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn vertices_per_object(&self) -> usize {
        self.vertices.len()
    }
}

/// A [`ParticleVector`] whose particles are grouped into fixed-size
/// objects — membranes or rigid bodies (spec.md §3). Adds per-object
/// channels and, optionally, a shared immutable [`Mesh`].
///
/// Halo exchange of an OV ships whole objects, never individual
/// particles (spec.md §3 "Object integrity").
pub struct ObjectVector {
    base: ParticleVector,
    object_size: usize,
    pub object_channels: ExtraDataManager,
    pub halo_object_channels: ExtraDataManager,
    mesh: Option<Mesh>,
}

impl ObjectVector {
    pub fn new(name: impl Into<String>, object_size: usize) -> Self {
        Self {
            base: ParticleVector::new(name),
            object_size,
            object_channels: ExtraDataManager::new(),
            halo_object_channels: ExtraDataManager::new(),
            mesh: None,
        }
    }

    pub fn with_mesh(mut self, mesh: Mesh) -> Result<Self, CoreError> {
        if mesh.vertices_per_object() != self.object_size {
            return Err(CoreError::InvariantViolation {
                task: "registerObjectVector".to_string(),
                detail: format!(
                    "object size {} does not match mesh vertex count {}",
                    self.object_size,
                    mesh.vertices_per_object()
                ),
            });
        }
        self.mesh = Some(mesh);
        Ok(self)
    }

    pub fn object_size(&self) -> usize {
        self.object_size
    }

    pub fn num_local_objects(&self) -> usize {
        self.base.local.len() / self.object_size.max(1)
    }

    pub fn num_halo_objects(&self) -> usize {
        self.base.halo.len() / self.object_size.max(1)
    }

    pub fn mesh(&self) -> Option<&Mesh> {
        self.mesh.as_ref()
    }

    pub fn base(&self) -> &ParticleVector {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut ParticleVector {
        &mut self.base
    }

    pub fn create_object_channel<T: ChannelElement>(
        &mut self,
        name: &str,
        ty: ChannelType,
        persistence: Persistence,
    ) -> Result<(), CoreError> {
        let local_len = self.num_local_objects();
        let halo_len = self.num_halo_objects();
        self.object_channels.create_channel::<T>(name, ty, persistence, local_len)?;
        self.halo_object_channels.create_channel::<T>(name, ty, persistence, halo_len)
    }

    /// Per-object centre-of-mass, recomputed from particle positions.
    /// Used by `ObjectRedistributor` to decide which fragment an object
    /// belongs to.
    pub fn local_centres_of_mass(&self) -> Vec<DVec3> {
        self.base
            .local
            .positions
            .chunks(self.object_size.max(1))
            .map(|chunk| chunk.iter().copied().sum::<DVec3>() / (chunk.len() as f64))
            .collect()
    }

    pub fn local_bounding_boxes(&self) -> Vec<(DVec3, DVec3)> {
        self.base
            .local
            .positions
            .chunks(self.object_size.max(1))
            .map(|chunk| {
                let min = chunk.iter().copied().fold(DVec3::SPLAT_MAX, DVec3::min);
                let max = chunk.iter().copied().fold(DVec3::SPLAT_MIN, DVec3::max);
                (min, max)
            })
            .collect()
    }
}

impl Named for ObjectVector {
    fn name(&self) -> &str {
        self.base.name()
    }
}

/// On-disk shape of a checkpointed `ObjectVector` (spec.md §6):
/// particle-level state plus per-object persistent channels, which the
/// base `ParticleVector` record has no room for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectVectorRecord {
    pub base: PartitionRecord,
    pub object_persistent_f64: Vec<(String, Vec<f64>)>,
    pub object_persistent_vec3: Vec<(String, Vec<DVec3>)>,
}

fn object_channels_to_record(mgr: &ExtraDataManager) -> (Vec<(String, Vec<f64>)>, Vec<(String, Vec<DVec3>)>) {
    let mut f64s = Vec::new();
    let mut vec3s = Vec::new();
    for name in mgr.persistent_names() {
        if let Ok(buf) = mgr.get_channel::<f64>(name) {
            f64s.push((name.to_string(), buf.clone()));
        } else if let Ok(buf) = mgr.get_channel::<DVec3>(name) {
            vec3s.push((name.to_string(), buf.clone()));
        }
    }
    (f64s, vec3s)
}

impl Checkpointable for ObjectVector {
    fn checkpoint(&self, folder: &Path) -> Result<(), CoreError> {
        let (object_persistent_f64, object_persistent_vec3) = object_channels_to_record(&self.object_channels);
        let record = ObjectVectorRecord {
            base: self.base.local.to_record(),
            object_persistent_f64,
            object_persistent_vec3,
        };
        let path = self.record_path(folder, "ov.yaml");
        let contents = serde_yaml::to_string(&record)
            .map_err(|e| CoreError::Restart(format!("failed to serialize '{}': {e}", self.name())))?;
        std::fs::write(&path, contents).map_err(|e| CoreError::Restart(format!("failed to write {:?}: {e}", path)))
    }

    fn restart(&mut self, folder: &Path) -> Result<(), CoreError> {
        let path = self.record_path(folder, "ov.yaml");
        let contents =
            std::fs::read_to_string(&path).map_err(|e| CoreError::Restart(format!("failed to read {:?}: {e}", path)))?;
        let record: ObjectVectorRecord = serde_yaml::from_str(&contents)
            .map_err(|e| CoreError::Restart(format!("malformed record in {:?}: {e}", path)))?;
        self.base.local.restore_from_record(record.base);
        for (name, buf) in record.object_persistent_f64 {
            if let Ok(dst) = self.object_channels.get_channel_mut::<f64>(&name) {
                *dst = buf;
            }
        }
        for (name, buf) in record.object_persistent_vec3 {
            if let Ok(dst) = self.object_channels.get_channel_mut::<DVec3>(&name) {
                *dst = buf;
            }
        }
        Ok(())
    }
}

trait DVecExtremes {
    const SPLAT_MAX: DVec3;
    const SPLAT_MIN: DVec3;
}

impl DVecExtremes for DVec3 {
    const SPLAT_MAX: DVec3 = DVec3::splat(f64::MAX);
    const SPLAT_MIN: DVec3 = DVec3::splat(f64::MIN);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_size_mismatch_is_rejected() {
        let ov = ObjectVector::new("cells", 10);
        let mesh = Mesh {
            vertices: vec![DVec3::ZERO; 12],
            triangles: vec![],
        };
        assert!(ov.with_mesh(mesh).is_err());
    }

    #[test]
    fn object_counts_divide_evenly() {
        let mut ov = ObjectVector::new("cells", 4);
        ov.base_mut().local.positions = vec![DVec3::ZERO; 12];
        assert_eq!(ov.num_local_objects(), 3);
    }
}
