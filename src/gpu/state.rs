use std::collections::HashMap;

use super::structs::{GraphicsBuffer, ResourceState, Texture};
use crate::utils::Handle;

/// A buffer or texture whose execution state is tracked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TrackedResource {
    Buffer(Handle<GraphicsBuffer>),
    Texture(Handle<Texture>),
}

impl From<Handle<GraphicsBuffer>> for TrackedResource {
    fn from(value: Handle<GraphicsBuffer>) -> Self {
        TrackedResource::Buffer(value)
    }
}

impl From<Handle<Texture>> for TrackedResource {
    fn from(value: Handle<Texture>) -> Self {
        TrackedResource::Texture(value)
    }
}

/// Barrier the tracker asks the backend to record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Transition {
    pub resource: TrackedResource,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Single source of truth for the execution state of every buffer and
/// texture. A transition is emitted only when the requested state differs
/// from the tracked one.
#[derive(Default)]
pub struct ResourceStateTracker {
    states: HashMap<TrackedResource, ResourceState>,
    log: Option<Vec<Transition>>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: impl Into<TrackedResource>, initial: ResourceState) {
        self.states.insert(resource.into(), initial);
    }

    pub fn forget(&mut self, resource: impl Into<TrackedResource>) {
        self.states.remove(&resource.into());
    }

    pub fn state(&self, resource: impl Into<TrackedResource>) -> Option<ResourceState> {
        self.states.get(&resource.into()).copied()
    }

    /// Moves `resource` to `requested`, returning the barrier to record if
    /// the state changed. Untracked resources are treated as `Common`.
    pub fn request(
        &mut self,
        resource: impl Into<TrackedResource>,
        requested: ResourceState,
    ) -> Option<Transition> {
        let resource = resource.into();
        let current = self.states.get(&resource).copied().unwrap_or_default();
        if current == requested {
            return None;
        }

        self.states.insert(resource, requested);
        let transition = Transition {
            resource,
            before: current,
            after: requested,
        };
        if let Some(log) = self.log.as_mut() {
            log.push(transition);
        }
        Some(transition)
    }

    /// Starts recording every emitted transition.
    pub fn enable_log(&mut self) {
        self.log.get_or_insert_with(Vec::new);
    }

    /// Returns and clears the recorded transitions.
    pub fn take_log(&mut self) -> Vec<Transition> {
        self.log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn tracked_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_state_changes() {
        let mut tracker = ResourceStateTracker::new();
        let tex = Handle::<Texture>::new(1, 0);
        tracker.register(tex, ResourceState::Present);
        assert!(tracker.request(tex, ResourceState::Present).is_none());

        let barrier = tracker.request(tex, ResourceState::RenderTarget).unwrap();
        assert_eq!(barrier.before, ResourceState::Present);
        assert_eq!(barrier.after, ResourceState::RenderTarget);
        assert!(tracker.request(tex, ResourceState::RenderTarget).is_none());
        assert_eq!(tracker.state(tex), Some(ResourceState::RenderTarget));
    }

    #[test]
    fn buffer_state_changes() {
        let mut tracker = ResourceStateTracker::new();
        let buf = Handle::<GraphicsBuffer>::new(1, 0);
        assert!(tracker.request(buf, ResourceState::CopySource).is_some());
        assert!(tracker.request(buf, ResourceState::CopySource).is_none());
        assert!(tracker.request(buf, ResourceState::CopyDestination).is_some());
    }

    #[test]
    fn buffers_and_textures_do_not_alias() {
        let mut tracker = ResourceStateTracker::new();
        tracker.register(Handle::<GraphicsBuffer>::new(0, 0), ResourceState::GenericRead);
        tracker.register(Handle::<Texture>::new(0, 0), ResourceState::Present);
        assert_eq!(
            tracker.state(Handle::<GraphicsBuffer>::new(0, 0)),
            Some(ResourceState::GenericRead)
        );
        assert_eq!(tracker.tracked_count(), 2);
    }

    #[test]
    fn log_records_only_emitted_barriers() {
        let mut tracker = ResourceStateTracker::new();
        let buf = Handle::<GraphicsBuffer>::new(2, 0);
        tracker.enable_log();
        tracker.request(buf, ResourceState::ShaderWrite);
        tracker.request(buf, ResourceState::ShaderWrite);
        tracker.request(buf, ResourceState::CopySource);

        let log = tracker.take_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].before, ResourceState::ShaderWrite);
        assert!(tracker.take_log().is_empty());
    }
}
