use crate::channels::StreamToken;
use crate::error::CoreError;

/// Relative priority among tasks whose dependencies are simultaneously
/// satisfied (spec.md §4.6). Marking `High` on halo pack/unpack and
/// local force clearing pushes them ahead of lower-priority interior
/// work so network latency is hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

pub type TaskFn = Box<dyn FnMut(StreamToken) -> Result<(), CoreError> + Send>;

/// A named task: one callable, an optional "every-N-steps" stride, and a
/// priority (spec.md §4.6).
pub struct Task {
    pub(crate) id: usize,
    pub name: String,
    pub priority: Priority,
    pub stride: u32,
    pub(crate) callback: TaskFn,
}

impl Task {
    pub fn runs_on_step(&self, step: u64) -> bool {
        self.stride <= 1 || step % self.stride as u64 == 0
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("stride", &self.stride)
            .finish()
    }
}
