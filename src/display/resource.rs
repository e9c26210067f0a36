//! Protocol objects whose destruction is observed by listeners.
//!
//! The remote side owns the object. Observers never hold the handle itself,
//! only an id into the display arena plus a [`ListenerId`] registered on the
//! [`TrackedResource`]. When the remote object goes away every listener is
//! notified exactly once, in registration order, and the handle is dropped.

/// Arena key of a [`Surface`](super::surface::Surface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub(crate) u32);

/// Arena key of a [`BufferHandle`](super::buffer::BufferHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

/// Identifies one destroy registration. Allocated by whoever listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// The tracked object a destroy notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Surface(SurfaceId),
    Buffer(BufferId),
}

/// Receiver of destroy notifications.
pub trait DestroyListener {
    /// `resource` is already unusable when this runs: its handle must not be
    /// touched and no further request may be issued against it.
    fn on_resource_destroyed(&mut self, listener: ListenerId, resource: ResourceKey);
}

impl DestroyListener for () {
    fn on_resource_destroyed(&mut self, _listener: ListenerId, _resource: ResourceKey) {}
}

/// A remote handle plus its ordered destroy listeners.
#[derive(Debug)]
pub struct TrackedResource<H> {
    handle: Option<H>,
    listeners: Vec<ListenerId>,
}

impl<H> TrackedResource<H> {
    pub fn new(handle: H) -> Self {
        Self {
            handle: Some(handle),
            listeners: Vec::new(),
        }
    }

    /// The handle, `None` once destroyed.
    pub fn resource(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_some()
    }

    /// Registers `listener`. Registrations on a destroyed resource are ignored.
    pub fn add_destroy_listener(&mut self, listener: ListenerId) {
        if self.handle.is_none() {
            return;
        }
        if !self.listeners.contains(&listener) {
            self.listeners.push(listener);
        }
    }

    /// Returns whether `listener` was registered.
    pub fn remove_destroy_listener(&mut self, listener: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| *l != listener);
        before != self.listeners.len()
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    pub fn listeners(&self) -> &[ListenerId] {
        &self.listeners
    }

    /// Runs `notify` for every listener in registration order, then
    /// invalidates the handle and hands it back. A second call notifies
    /// nobody and returns `None`.
    pub fn destroy(&mut self, mut notify: impl FnMut(ListenerId)) -> Option<H> {
        let handle = self.handle.take()?;
        for listener in std::mem::take(&mut self.listeners) {
            notify(listener);
        }
        Some(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listeners_notified_in_registration_order() {
        let mut resource = TrackedResource::new("buffer");
        resource.add_destroy_listener(ListenerId::new(3));
        resource.add_destroy_listener(ListenerId::new(1));
        resource.add_destroy_listener(ListenerId::new(2));

        let mut seen = Vec::new();
        let handle = resource.destroy(|l| seen.push(l.raw()));

        assert_eq!(handle, Some("buffer"));
        assert_eq!(seen, vec![3, 1, 2]);
        assert!(resource.resource().is_none());
    }

    #[test]
    fn destroy_notifies_exactly_once() {
        let mut resource = TrackedResource::new(7u32);
        resource.add_destroy_listener(ListenerId::new(1));
        resource.add_destroy_listener(ListenerId::new(1));

        let mut count = 0;
        resource.destroy(|_| count += 1);
        assert!(resource.destroy(|_| count += 1).is_none());
        assert_eq!(count, 1);
    }

    #[test]
    fn removed_listener_is_not_notified() {
        let mut resource = TrackedResource::new(());
        resource.add_destroy_listener(ListenerId::new(1));
        resource.add_destroy_listener(ListenerId::new(2));
        assert!(resource.remove_destroy_listener(ListenerId::new(1)));
        assert!(!resource.remove_destroy_listener(ListenerId::new(9)));

        let mut seen = Vec::new();
        resource.destroy(|l| seen.push(l));
        assert_eq!(seen, vec![ListenerId::new(2)]);
    }

    #[test]
    fn no_registration_after_destroy() {
        let mut resource = TrackedResource::new(());
        resource.destroy(|_| {});
        resource.add_destroy_listener(ListenerId::new(4));
        assert!(!resource.has_listeners());
    }
}
