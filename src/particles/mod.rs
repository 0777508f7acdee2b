mod object_vector;
mod vector;

pub use object_vector::{Mesh, ObjectVector};
pub use vector::{Partition, ParticleVector, PartitionRecord};
