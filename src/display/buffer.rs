use super::resource::{BufferId, TrackedResource};

/// One attachment of a client buffer, placed at an (x, y) offset.
///
/// Every attach creates a fresh handle even when the client re-attaches the
/// same buffer, so listeners bound to an earlier attachment are not confused
/// by a later one.
#[derive(Debug)]
pub struct BufferHandle<B> {
    id: BufferId,
    resource: TrackedResource<B>,
    x: i32,
    y: i32,
    pending: bool,
}

impl<B> BufferHandle<B> {
    pub(crate) fn new(id: BufferId, buffer: B, x: i32, y: i32) -> Self {
        Self {
            id,
            resource: TrackedResource::new(buffer),
            x,
            y,
            pending: true,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn resource(&self) -> Option<&B> {
        self.resource.resource()
    }

    pub fn offset(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// Whether a surface still holds this handle in its pending state.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub(crate) fn set_pending(&mut self, pending: bool) {
        self.pending = pending;
    }

    pub(crate) fn tracked(&self) -> &TrackedResource<B> {
        &self.resource
    }

    pub(crate) fn tracked_mut(&mut self) -> &mut TrackedResource<B> {
        &mut self.resource
    }

    /// Neither pending nor observed: nothing can reach it anymore.
    pub(crate) fn is_unreferenced(&self) -> bool {
        !self.pending && !self.resource.has_listeners()
    }
}
