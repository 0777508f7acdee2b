//! Named-channel storage with persistence flags (spec.md §4.2).

use std::any::Any;
use std::collections::HashMap;

use glam::DVec3;

use crate::error::CoreError;

/// Declared element shape of a channel. `Custom` covers object-level or
/// interaction-private payloads that don't fit scalar/float3/float4
/// (e.g. a rigid-motion quaternion+torque bundle); the manager only
/// needs to know enough to size and persist the buffer, never to
/// interpret it — that's left to the owning interaction/integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Scalar,
    Float3,
    Float4,
    Custom,
}

/// Whether a channel survives redistribution/restart (`Persistent`) or is
/// cleared every step (`Transient`), spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Persistent,
    Transient,
}

/// A type-erased, resizable channel buffer. Stands in for a device-side
/// array: the device/kernel layer is out of scope (spec.md §1), so
/// "clearing on `stream`" here just means zeroing the host buffer — the
/// `stream` parameter is carried through call sites purely so the API
/// shape matches the source's `(..., stream)` convention.
struct Channel {
    ty: ChannelType,
    persistence: Persistence,
    data: Box<dyn Any + Send + Sync>,
    len: usize,
}

/// An opaque device-stream handle. The engine never dereferences it; it
/// exists so task signatures carry the same `(..., stream)` shape the
/// source's GPU-resident version does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamToken(pub u32);

pub trait ChannelElement: Any + Send + Sync + Clone + Default {
    fn zero() -> Self;
}

impl ChannelElement for f64 {
    fn zero() -> Self {
        0.0
    }
}

impl ChannelElement for DVec3 {
    fn zero() -> Self {
        DVec3::ZERO
    }
}

impl ChannelElement for [f64; 4] {
    fn zero() -> Self {
        [0.0; 4]
    }
}

/// Per-(PV or cell list) named-channel storage (spec.md §4.2).
#[derive(Default)]
pub struct ExtraDataManager {
    channels: HashMap<String, Channel>,
}

impl ExtraDataManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn persistence_of(&self, name: &str) -> Option<Persistence> {
        self.channels.get(name).map(|c| c.persistence)
    }

    pub fn type_of(&self, name: &str) -> Option<ChannelType> {
        self.channels.get(name).map(|c| c.ty)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(|s| s.as_str())
    }

    pub fn persistent_names(&self) -> impl Iterator<Item = &str> {
        self.channels
            .iter()
            .filter(|(_, c)| c.persistence == Persistence::Persistent)
            .map(|(n, _)| n.as_str())
    }

    /// Idempotent if `name` already exists with the same `ChannelType`;
    /// fails with `ChannelTypeConflict` if it exists with a different one.
    pub fn create_channel<T: ChannelElement>(
        &mut self,
        name: &str,
        ty: ChannelType,
        persistence: Persistence,
        len: usize,
    ) -> Result<(), CoreError> {
        if let Some(existing) = self.channels.get(name) {
            if existing.ty != ty {
                return Err(CoreError::ChannelTypeConflict {
                    name: name.to_string(),
                });
            }
            return Ok(());
        }
        self.channels.insert(
            name.to_string(),
            Channel {
                ty,
                persistence,
                data: Box::new(vec![T::zero(); len]),
                len,
            },
        );
        Ok(())
    }

    pub fn get_channel<T: ChannelElement>(&self, name: &str) -> Result<&Vec<T>, CoreError> {
        let channel = self.channels.get(name).ok_or_else(|| {
            CoreError::Exchange(format!("channel '{name}' does not exist"))
        })?;
        channel
            .data
            .downcast_ref::<Vec<T>>()
            .ok_or_else(|| CoreError::ChannelTypeConflict {
                name: name.to_string(),
            })
    }

    pub fn get_channel_mut<T: ChannelElement>(&mut self, name: &str) -> Result<&mut Vec<T>, CoreError> {
        let channel = self.channels.get_mut(name).ok_or_else(|| {
            CoreError::Exchange(format!("channel '{name}' does not exist"))
        })?;
        channel
            .data
            .downcast_mut::<Vec<T>>()
            .ok_or_else(|| CoreError::ChannelTypeConflict {
                name: name.to_string(),
            })
    }

    /// Zero a channel on the given (conceptual) stream.
    pub fn clear_device<T: ChannelElement>(&mut self, name: &str, _stream: StreamToken) -> Result<(), CoreError> {
        let buf = self.get_channel_mut::<T>(name)?;
        buf.iter_mut().for_each(|v| *v = T::zero());
        Ok(())
    }

    pub fn clear_all_transient<T: ChannelElement>(&mut self, _stream: StreamToken) {
        for channel in self.channels.values_mut() {
            if channel.persistence == Persistence::Transient {
                if let Some(buf) = channel.data.downcast_mut::<Vec<T>>() {
                    buf.iter_mut().for_each(|v| *v = T::zero());
                }
            }
        }
    }

    /// Resize every channel buffer to `new_len`, zero-filling growth.
    /// Buffers only ever grow or shrink to match the owning partition's
    /// particle count; there is no independent capacity concept exposed.
    pub fn resize_channel<T: ChannelElement>(&mut self, name: &str, new_len: usize) -> Result<(), CoreError> {
        let channel = self.channels.get_mut(name).ok_or_else(|| {
            CoreError::Exchange(format!("channel '{name}' does not exist"))
        })?;
        let buf = channel
            .data
            .downcast_mut::<Vec<T>>()
            .ok_or_else(|| CoreError::ChannelTypeConflict {
                name: name.to_string(),
            })?;
        buf.resize(new_len, T::zero());
        channel.len = new_len;
        Ok(())
    }

    pub fn len_of(&self, name: &str) -> Option<usize> {
        self.channels.get(name).map(|c| c.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent_for_same_type() {
        let mut mgr = ExtraDataManager::new();
        mgr.create_channel::<f64>("density", ChannelType::Scalar, Persistence::Transient, 4)
            .unwrap();
        mgr.create_channel::<f64>("density", ChannelType::Scalar, Persistence::Transient, 4)
            .unwrap();
        assert!(mgr.check_exists("density"));
    }

    #[test]
    fn create_with_different_type_conflicts() {
        let mut mgr = ExtraDataManager::new();
        mgr.create_channel::<f64>("density", ChannelType::Scalar, Persistence::Transient, 4)
            .unwrap();
        let err = mgr
            .create_channel::<DVec3>("density", ChannelType::Float3, Persistence::Transient, 4)
            .unwrap_err();
        assert!(matches!(err, CoreError::ChannelTypeConflict { .. }));
    }

    #[test]
    fn clear_zeroes_buffer() {
        let mut mgr = ExtraDataManager::new();
        mgr.create_channel::<f64>("density", ChannelType::Scalar, Persistence::Transient, 4)
            .unwrap();
        {
            let buf = mgr.get_channel_mut::<f64>("density").unwrap();
            buf.iter_mut().for_each(|v| *v = 1.0);
        }
        mgr.clear_device::<f64>("density", StreamToken::default()).unwrap();
        assert!(mgr.get_channel::<f64>("density").unwrap().iter().all(|&v| v == 0.0));
    }
}
