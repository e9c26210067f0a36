//! Server side of the surface protocol.
//!
//! [`ViewDisplay`] owns every protocol object of the embedding client in two
//! arenas (surfaces and buffer handles) and runs the commit state machine.
//! It never talks to the hardware: embedders observe attach and commit
//! through [`SurfaceHandler`] and resource destruction through
//! [`DestroyListener`].

use std::{collections::HashMap, fmt};

use tracing::{debug, trace, warn};

pub mod buffer;
pub mod damage;
pub mod protocol;
pub mod resource;
pub mod surface;
pub mod wayland;

#[cfg(test)]
pub(crate) mod testing;

use buffer::BufferHandle;
use resource::{BufferId, DestroyListener, ListenerId, ResourceKey, SurfaceId};
use surface::{CallbackKind, CallbackToken, CommitState, Surface, SurfaceType};

/// Client buffer as seen by the compositor.
pub trait BufferResource: fmt::Debug + Clone + PartialEq {
    /// Tells the client the compositor no longer reads the buffer.
    fn send_release(&self);
}

/// Client frame callback.
pub trait CallbackResource: fmt::Debug + PartialEq {
    /// Delivers the callback with a millisecond timestamp. Consumes it.
    fn send_done(self, time: u32);

    /// Drops the callback without delivering it.
    fn discard(self)
    where
        Self: Sized,
    {
    }
}

/// Handle types of one protocol transport.
pub trait Protocol: 'static {
    type Surface: fmt::Debug + Clone;
    type Buffer: BufferResource;
    type Callback: CallbackResource;
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("Surface limit of {0} reached")]
    NoMemory(usize),
    #[error("Unknown surface: {0:?}")]
    UnknownSurface(SurfaceId),
}

/// Embedder hooks on the surface lifecycle.
///
/// Buffer handles superseded during an attach are destroyed while the hook
/// owner is borrowed, so the same value also receives destroy notifications.
pub trait SurfaceHandler<P: Protocol>: DestroyListener {
    /// Builds the surface for a create request.
    fn create_surface(&mut self, id: SurfaceId, handle: P::Surface, ty: SurfaceType) -> Surface<P> {
        Surface::new(id, handle, ty)
    }

    /// Runs right after a new pending buffer was recorded.
    fn surface_attached(
        &mut self,
        _display: &mut ViewDisplay<P>,
        _surface: SurfaceId,
        _buffer: Option<BufferId>,
    ) {
    }

    /// Runs during commit, after callbacks moved to the current queue and
    /// before the pending state is cleared.
    fn surface_committed(
        &mut self,
        _display: &mut ViewDisplay<P>,
        _surface: SurfaceId,
        _state: &CommitState,
    ) {
    }
}

impl<P: Protocol> SurfaceHandler<P> for () {}

#[derive(Debug)]
pub struct ViewDisplay<P: Protocol> {
    surfaces: HashMap<SurfaceId, Surface<P>>,
    buffers: HashMap<BufferId, BufferHandle<P::Buffer>>,
    main_surface: Option<SurfaceId>,
    next_surface: u32,
    next_buffer: u32,
    max_surfaces: usize,
}

impl<P: Protocol> ViewDisplay<P> {
    pub fn new(max_surfaces: usize) -> Self {
        Self {
            surfaces: HashMap::new(),
            buffers: HashMap::new(),
            main_surface: None,
            next_surface: 0,
            next_buffer: 0,
            max_surfaces,
        }
    }

    /// Allocates the id of a surface about to be created.
    pub fn reserve_surface_id(&mut self) -> Result<SurfaceId, DisplayError> {
        if self.surfaces.len() >= self.max_surfaces {
            return Err(DisplayError::NoMemory(self.max_surfaces));
        }
        let id = SurfaceId(self.next_surface);
        self.next_surface = self.next_surface.wrapping_add(1);
        Ok(id)
    }

    /// Creates a surface through the handler's factory. The first on-screen
    /// surface created while none is designated becomes the main surface.
    pub fn create_surface(
        &mut self,
        id: SurfaceId,
        handle: P::Surface,
        ty: SurfaceType,
        handler: &mut impl SurfaceHandler<P>,
    ) -> SurfaceId {
        let surface = handler.create_surface(id, handle, ty);
        debug!(surface = ?id, ?ty, "surface created");
        self.surfaces.insert(id, surface);
        if ty == SurfaceType::OnScreen && self.main_surface.is_none() {
            self.main_surface = Some(id);
        }
        id
    }

    pub fn main_surface(&self) -> Option<SurfaceId> {
        self.main_surface
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface<P>> {
        self.surfaces.get(&id)
    }

    pub fn surface_mut(&mut self, id: SurfaceId) -> Option<&mut Surface<P>> {
        self.surfaces.get_mut(&id)
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    pub fn buffer(&self, id: BufferId) -> Option<&BufferHandle<P::Buffer>> {
        self.buffers.get(&id)
    }

    /// The client buffer behind a handle, if both are still alive.
    pub fn buffer_resource(&self, id: BufferId) -> Option<&P::Buffer> {
        self.buffers.get(&id).and_then(|b| b.resource())
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Records `buffer` (or an explicit null) as the pending buffer.
    /// A previously pending handle is destroyed right away.
    pub fn attach(
        &mut self,
        surface: SurfaceId,
        buffer: Option<P::Buffer>,
        x: i32,
        y: i32,
        handler: &mut impl SurfaceHandler<P>,
    ) -> Result<Option<BufferId>, DisplayError> {
        if !self.surfaces.contains_key(&surface) {
            return Err(DisplayError::UnknownSurface(surface));
        }

        let new_id = buffer.map(|buffer| {
            let id = BufferId(self.next_buffer);
            self.next_buffer = self.next_buffer.wrapping_add(1);
            self.buffers.insert(id, BufferHandle::new(id, buffer, x, y));
            id
        });

        let previous = self
            .surfaces
            .get_mut(&surface)
            .and_then(|s| s.attach(new_id));
        if let Some(previous) = previous {
            trace!(surface = ?surface, buffer = ?previous, "pending buffer superseded");
            self.destroy_buffer_handle(previous, &mut *handler);
        }

        handler.surface_attached(self, surface, new_id);
        Ok(new_id)
    }

    pub fn damage(
        &mut self,
        surface: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<(), DisplayError> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(DisplayError::UnknownSurface(surface))?
            .damage(x, y, width, height);
        Ok(())
    }

    pub fn request_frame_callback(
        &mut self,
        surface: SurfaceId,
        callback: P::Callback,
        kind: CallbackKind,
    ) -> Result<CallbackToken, DisplayError> {
        match self.surfaces.get_mut(&surface) {
            Some(s) => Ok(s.request_frame_callback(callback, kind)),
            None => {
                callback.discard();
                Err(DisplayError::UnknownSurface(surface))
            }
        }
    }

    /// Applies the pending state of `surface`.
    pub fn commit(
        &mut self,
        surface: SurfaceId,
        handler: &mut impl SurfaceHandler<P>,
    ) -> Result<(), DisplayError> {
        let state = self
            .surfaces
            .get_mut(&surface)
            .ok_or(DisplayError::UnknownSurface(surface))?
            .begin_commit();

        handler.surface_committed(self, surface, &state);

        let pending = self.surfaces.get_mut(&surface).and_then(|s| s.clear_pending());
        if let Some(buffer) = pending {
            if let Some(handle) = self.buffers.get_mut(&buffer) {
                handle.set_pending(false);
            }
            self.reclaim_buffer(buffer);
        }
        Ok(())
    }

    /// Delivers the current callbacks of `surface`.
    pub fn frame_complete(&mut self, surface: SurfaceId, time: u32) {
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.frame_complete(time);
        }
    }

    /// Removes a callback its client destroyed before delivery.
    pub fn forget_callback(&mut self, surface: SurfaceId, callback: &P::Callback) {
        if let Some(s) = self.surfaces.get_mut(&surface) {
            s.forget_callback(callback);
        }
    }

    /// Sends a release for the buffer behind `buffer` if it is still alive.
    pub fn send_buffer_release(&self, buffer: BufferId) {
        if let Some(resource) = self.buffer_resource(buffer) {
            resource.send_release();
        }
    }

    pub fn add_destroy_listener(&mut self, resource: ResourceKey, listener: ListenerId) -> bool {
        match resource {
            ResourceKey::Surface(id) => match self.surfaces.get_mut(&id) {
                Some(s) => {
                    s.tracked_mut().add_destroy_listener(listener);
                    true
                }
                None => false,
            },
            ResourceKey::Buffer(id) => match self.buffers.get_mut(&id) {
                Some(b) => {
                    b.tracked_mut().add_destroy_listener(listener);
                    true
                }
                None => false,
            },
        }
    }

    /// Unregisters `listener`. A buffer handle nobody references anymore is
    /// reclaimed.
    pub fn remove_destroy_listener(&mut self, resource: ResourceKey, listener: ListenerId) {
        match resource {
            ResourceKey::Surface(id) => {
                if let Some(s) = self.surfaces.get_mut(&id) {
                    s.tracked_mut().remove_destroy_listener(listener);
                }
            }
            ResourceKey::Buffer(id) => {
                if let Some(b) = self.buffers.get_mut(&id) {
                    b.tracked_mut().remove_destroy_listener(listener);
                }
                self.reclaim_buffer(id);
            }
        }
    }

    /// The client destroyed `surface`: listeners are notified, queued
    /// callbacks are dropped and the pending buffer handle goes with it.
    pub fn destroy_surface(&mut self, surface: SurfaceId, listener: &mut impl DestroyListener) {
        let Some(mut s) = self.surfaces.remove(&surface) else {
            warn!(surface = ?surface, "destroy of unknown surface");
            return;
        };
        s.tracked_mut()
            .destroy(|l| listener.on_resource_destroyed(l, ResourceKey::Surface(surface)));
        s.discard_callbacks();
        if self.main_surface == Some(surface) {
            self.main_surface = None;
        }
        if let Some(buffer) = s.clear_pending() {
            if let Some(handle) = self.buffers.get_mut(&buffer) {
                handle.set_pending(false);
            }
            self.reclaim_buffer(buffer);
        }
        debug!(surface = ?surface, "surface destroyed");
    }

    /// The client destroyed `buffer`: every handle wrapping it is destroyed.
    pub fn buffer_destroyed(&mut self, buffer: &P::Buffer, listener: &mut impl DestroyListener) {
        let ids: Vec<BufferId> = self
            .buffers
            .iter()
            .filter(|(_, handle)| handle.resource() == Some(buffer))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            for surface in self.surfaces.values_mut() {
                surface.drop_pending_buffer(id);
            }
            self.destroy_buffer_handle(id, listener);
        }
    }

    fn destroy_buffer_handle(&mut self, id: BufferId, listener: &mut impl DestroyListener) {
        if let Some(mut handle) = self.buffers.remove(&id) {
            handle
                .tracked_mut()
                .destroy(|l| listener.on_resource_destroyed(l, ResourceKey::Buffer(id)));
        }
    }

    fn reclaim_buffer(&mut self, id: BufferId) {
        if self
            .buffers
            .get(&id)
            .is_some_and(|handle| handle.is_unreferenced())
        {
            trace!(buffer = ?id, "buffer handle reclaimed");
            self.buffers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::{MockBuffer, MockCallback, MockProtocol};

    #[derive(Default)]
    struct Recorder {
        destroyed: Vec<(ListenerId, ResourceKey)>,
        attached: Vec<(SurfaceId, Option<BufferId>)>,
        committed: Vec<(SurfaceId, CommitState, Option<MockBuffer>)>,
    }

    impl DestroyListener for Recorder {
        fn on_resource_destroyed(&mut self, listener: ListenerId, resource: ResourceKey) {
            self.destroyed.push((listener, resource));
        }
    }

    impl SurfaceHandler<MockProtocol> for Recorder {
        fn surface_attached(
            &mut self,
            _display: &mut ViewDisplay<MockProtocol>,
            surface: SurfaceId,
            buffer: Option<BufferId>,
        ) {
            self.attached.push((surface, buffer));
        }

        fn surface_committed(
            &mut self,
            display: &mut ViewDisplay<MockProtocol>,
            surface: SurfaceId,
            state: &CommitState,
        ) {
            let buffer = state.buffer.and_then(|b| display.buffer_resource(b).cloned());
            self.committed.push((surface, *state, buffer));
        }
    }

    fn display_with_surface(ty: SurfaceType) -> (ViewDisplay<MockProtocol>, SurfaceId) {
        let mut display = ViewDisplay::new(4);
        let id = display.reserve_surface_id().unwrap();
        display.create_surface(id, 1, ty, &mut ());
        (display, id)
    }

    #[test]
    fn last_attach_wins() {
        let (mut display, surface) = display_with_surface(SurfaceType::OnScreen);
        let mut recorder = Recorder::default();
        let b1 = MockBuffer::new(1);
        let b2 = MockBuffer::new(2);

        let first = display
            .attach(surface, Some(b1.clone()), 0, 0, &mut recorder)
            .unwrap()
            .unwrap();
        display.add_destroy_listener(ResourceKey::Buffer(first), ListenerId::new(9));
        display
            .attach(surface, Some(b2.clone()), 0, 0, &mut recorder)
            .unwrap();
        display.commit(surface, &mut recorder).unwrap();

        assert_eq!(
            recorder.destroyed,
            vec![(ListenerId::new(9), ResourceKey::Buffer(first))]
        );
        assert!(display.buffer(first).is_none());
        let (_, state, buffer) = &recorder.committed[0];
        assert!(state.buffer_attached);
        assert_eq!(buffer.as_ref(), Some(&b2));
        assert_eq!(b1.releases(), 0);
    }

    #[test]
    fn null_attach_is_recorded() {
        let (mut display, surface) = display_with_surface(SurfaceType::OnScreen);
        let mut recorder = Recorder::default();
        display.attach(surface, None, 0, 0, &mut recorder).unwrap();
        display.commit(surface, &mut recorder).unwrap();

        assert_eq!(recorder.attached, vec![(surface, None)]);
        let (_, state, _) = recorder.committed[0];
        assert!(state.buffer_attached);
        assert_eq!(state.buffer, None);
    }

    #[test]
    fn unobserved_buffer_is_reclaimed_after_commit() {
        let (mut display, surface) = display_with_surface(SurfaceType::OnScreen);
        display
            .attach(surface, Some(MockBuffer::new(1)), 0, 0, &mut ())
            .unwrap();
        assert_eq!(display.buffer_count(), 1);
        display.commit(surface, &mut ()).unwrap();
        assert_eq!(display.buffer_count(), 0);
    }

    #[test]
    fn observed_buffer_outlives_commit_until_unobserved() {
        let (mut display, surface) = display_with_surface(SurfaceType::OnScreen);
        let id = display
            .attach(surface, Some(MockBuffer::new(1)), 0, 0, &mut ())
            .unwrap()
            .unwrap();
        display.add_destroy_listener(ResourceKey::Buffer(id), ListenerId::new(1));
        display.commit(surface, &mut ()).unwrap();
        assert!(display.buffer(id).is_some());

        display.remove_destroy_listener(ResourceKey::Buffer(id), ListenerId::new(1));
        assert!(display.buffer(id).is_none());
    }

    #[test]
    fn client_buffer_destroy_notifies_every_handle() {
        let (mut display, surface) = display_with_surface(SurfaceType::OnScreen);
        let buffer = MockBuffer::new(5);
        let first = display
            .attach(surface, Some(buffer.clone()), 0, 0, &mut ())
            .unwrap()
            .unwrap();
        display.add_destroy_listener(ResourceKey::Buffer(first), ListenerId::new(1));
        display.commit(surface, &mut ()).unwrap();
        let second = display
            .attach(surface, Some(buffer.clone()), 0, 0, &mut ())
            .unwrap()
            .unwrap();

        let mut recorder = Recorder::default();
        display.buffer_destroyed(&buffer, &mut recorder);

        assert_eq!(
            recorder.destroyed,
            vec![(ListenerId::new(1), ResourceKey::Buffer(first))]
        );
        assert!(display.buffer(first).is_none());
        assert!(display.buffer(second).is_none());
        assert_eq!(display.surface(surface).unwrap().pending_buffer(), None);
    }

    #[test]
    fn destroying_surface_drops_callbacks_and_notifies() {
        let (mut display, surface) = display_with_surface(SurfaceType::OnScreen);
        let (cb, log) = MockCallback::new();
        display
            .request_frame_callback(surface, cb, CallbackKind::Frame)
            .unwrap();
        display.commit(surface, &mut ()).unwrap();
        display.add_destroy_listener(ResourceKey::Surface(surface), ListenerId::new(3));

        let mut recorder = Recorder::default();
        display.destroy_surface(surface, &mut recorder);
        display.frame_complete(surface, 10);

        assert_eq!(
            recorder.destroyed,
            vec![(ListenerId::new(3), ResourceKey::Surface(surface))]
        );
        assert!(log.done().is_empty());
        assert!(log.discarded());
        assert_eq!(display.main_surface(), None);
    }

    #[test]
    fn first_onscreen_surface_is_main() {
        let mut display = ViewDisplay::<MockProtocol>::new(4);
        let offscreen = display.reserve_surface_id().unwrap();
        display.create_surface(offscreen, 1, SurfaceType::OffScreen, &mut ());
        assert_eq!(display.main_surface(), None);

        let first = display.reserve_surface_id().unwrap();
        display.create_surface(first, 2, SurfaceType::OnScreen, &mut ());
        let second = display.reserve_surface_id().unwrap();
        display.create_surface(second, 3, SurfaceType::OnScreen, &mut ());
        assert_eq!(display.main_surface(), Some(first));
    }

    #[test]
    fn surface_limit_reports_no_memory() {
        let mut display = ViewDisplay::<MockProtocol>::new(1);
        let id = display.reserve_surface_id().unwrap();
        display.create_surface(id, 1, SurfaceType::OnScreen, &mut ());
        assert!(matches!(
            display.reserve_surface_id(),
            Err(DisplayError::NoMemory(1))
        ));
    }

    #[test]
    fn requests_on_unknown_surface_fail() {
        let mut display = ViewDisplay::<MockProtocol>::new(1);
        let (cb, log) = MockCallback::new();
        let missing = SurfaceId(7);
        assert!(display.commit(missing, &mut ()).is_err());
        assert!(display.damage(missing, 0, 0, 1, 1).is_err());
        assert!(display
            .request_frame_callback(missing, cb, CallbackKind::Frame)
            .is_err());
        assert!(log.discarded());
    }
}
