//! Presentation pipeline.
//!
//! [`ViewBackend`] turns commits of on-screen surfaces into page flips and
//! sequences buffer release and frame callbacks against flip completion.
//! Scanout buffer objects and protocol objects live in separate arenas: a
//! buffer object is bound to protocol objects only through an [`FbInfo`]
//! holding ids plus destroy listeners.

use std::{collections::HashMap, marker::PhantomData, os::fd::RawFd};

use tracing::{debug, error, info, trace, warn};

pub mod device;
pub mod drm;
pub mod event_source;
pub mod fb_info;
pub mod presentation;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{FrameError, PresentationDevice};
pub use fb_info::FbInfo;
pub use presentation::PresentationState;

use crate::{
    display::{
        resource::{BufferId, DestroyListener, ListenerId, ResourceKey, SurfaceId},
        surface::{CommitState, SurfaceType},
        Protocol, SurfaceHandler, ViewDisplay,
    },
    host::ViewHost,
};

pub struct ViewBackend<P: Protocol, D: PresentationDevice> {
    device: Option<D>,
    presentation: PresentationState<D::BufferObject>,
    bindings: HashMap<ListenerId, FbInfo>,
    bound_objects: HashMap<D::BufferObject, ListenerId>,
    next_listener: u64,
    _protocol: PhantomData<fn() -> P>,
}

impl<P, D> std::fmt::Debug for ViewBackend<P, D>
where
    P: Protocol,
    D: PresentationDevice,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewBackend")
            .field("inert", &self.device.is_none())
            .field("presentation", &self.presentation)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl<P, D> ViewBackend<P, D>
where
    P: Protocol,
    D: PresentationDevice<ClientBuffer = P::Buffer>,
{
    /// Takes over `device` and puts a blank frame on screen. Without a
    /// device the backend is inert: commits are accepted, nothing is shown.
    pub fn new(device: Option<D>) -> Self {
        let mut backend = Self {
            device,
            presentation: PresentationState::default(),
            bindings: HashMap::new(),
            bound_objects: HashMap::new(),
            next_listener: 0,
            _protocol: PhantomData,
        };

        match backend.device.as_mut().map(|d| d.present_initial()) {
            Some(Ok(bo)) => {
                debug!(?bo, "initial frame on screen");
                backend.presentation.set_initial(bo);
            }
            Some(Err(err)) => error!("Failed to present initial frame: {err}"),
            None => warn!("View backend has no output, running inert"),
        }
        backend
    }

    pub fn inert() -> Self {
        Self::new(None)
    }

    pub fn is_inert(&self) -> bool {
        self.device.is_none()
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    pub fn presentation(&self) -> &PresentationState<D::BufferObject> {
        &self.presentation
    }

    /// Output size, `(0, 0)` when inert.
    pub fn size(&self) -> (u32, u32) {
        self.device.as_ref().map(|d| d.size()).unwrap_or((0, 0))
    }

    /// Reports the negotiated output size to the host.
    pub fn initialize(&self, host: &mut impl ViewHost) {
        let (width, height) = self.size();
        info!(width, height, "view backend initialized");
        host.set_size(width, height);
    }

    /// Renderer processes never connect to this backend.
    pub fn renderer_host_fd(&self) -> Option<RawFd> {
        None
    }

    pub fn fb_info(&self, bo: D::BufferObject) -> Option<&FbInfo> {
        self.bound_objects
            .get(&bo)
            .and_then(|listener| self.bindings.get(listener))
    }

    fn bind_buffer_object(&mut self, bo: D::BufferObject) -> ListenerId {
        if let Some(listener) = self.bound_objects.get(&bo) {
            return *listener;
        }
        let listener = ListenerId::new(self.next_listener);
        self.next_listener += 1;
        self.bindings.insert(listener, FbInfo::new(listener));
        self.bound_objects.insert(bo, listener);
        listener
    }

    fn binding_mut(&mut self, bo: D::BufferObject) -> Option<&mut FbInfo> {
        let listener = self.bound_objects.get(&bo)?;
        self.bindings.get_mut(listener)
    }

    /// Renders `buffer` for `surface` and schedules its flip.
    ///
    /// # Panics
    ///
    /// If a flip is still pending. No hardware call is made in that case.
    #[profiling::function]
    pub fn flip_buffer(&mut self, display: &mut ViewDisplay<P>, surface: SurfaceId, buffer: BufferId) {
        let Some(device) = self.device.as_mut() else {
            trace!(?surface, "inert backend, commit not presented");
            return;
        };
        self.presentation.ensure_flip_allowed();

        let Some(resource) = display.buffer_resource(buffer) else {
            debug!(?buffer, "buffer gone before render");
            return;
        };
        if let Err(err) = device.import_buffer(resource) {
            warn!(?surface, "{err}");
            return;
        }
        if let Err(err) = device.render_imported() {
            warn!(?surface, "{err}");
            return;
        }
        let bo = match device.lock_front_buffer() {
            Ok(bo) => bo,
            Err(err) => {
                warn!(?surface, "{err}");
                return;
            }
        };

        let listener = self.bind_buffer_object(bo);
        if let Some(info) = self.bindings.get_mut(&listener) {
            info.set_buffer(display, Some(buffer));
            info.set_surface(display, Some(surface));
        }

        let result = match self.device.as_mut() {
            Some(device) => device.page_flip(bo),
            None => return,
        };
        match result {
            Ok(()) => {
                trace!(?bo, ?surface, "page flip scheduled");
                self.presentation.schedule(bo);
            }
            Err(err) => {
                warn!(?surface, "{err}");
                if let Some(info) = self.bindings.get_mut(&listener) {
                    info.set_buffer(display, None);
                    info.set_surface(display, None);
                }
                if let Some(device) = self.device.as_mut() {
                    device.release_buffer_object(bo);
                }
            }
        }
    }

    /// Handles the completion event of the pending flip. `time` is the
    /// vblank timestamp in milliseconds.
    #[profiling::function]
    pub fn page_flip_complete(&mut self, display: &mut ViewDisplay<P>, time: u32) {
        let Some(previous) = self.presentation.complete() else {
            warn!("page flip event without a pending flip");
            return;
        };

        if let Some(previous) = previous {
            if let Some(info) = self.binding_mut(previous) {
                info.release_buffer(display);
            }
            if let Some(device) = self.device.as_mut() {
                device.release_buffer_object(previous);
            }
        }

        if let Some(current) = self.presentation.current() {
            if let Some(info) = self.binding_mut(current) {
                info.send_frame_callback(display, time);
            }
        }
    }

    /// Drops every binding and returns all buffer objects. The device is
    /// released afterwards; the backend stays inert.
    pub fn teardown(&mut self, display: &mut ViewDisplay<P>) {
        for (_, mut info) in self.bindings.drain() {
            info.set_buffer(display, None);
            info.set_surface(display, None);
        }
        self.bound_objects.clear();
        let objects: Vec<_> = self.presentation.take_all().collect();
        if let Some(mut device) = self.device.take() {
            for bo in objects {
                device.release_buffer_object(bo);
            }
        }
        info!("view backend torn down");
    }
}

impl<P, D> DestroyListener for ViewBackend<P, D>
where
    P: Protocol,
    D: PresentationDevice,
{
    fn on_resource_destroyed(&mut self, listener: ListenerId, resource: ResourceKey) {
        if let Some(info) = self.bindings.get_mut(&listener) {
            trace!(?listener, ?resource, "bound resource destroyed");
            info.on_resource_destroyed(resource);
        }
    }
}

impl<P, D> SurfaceHandler<P> for ViewBackend<P, D>
where
    P: Protocol,
    D: PresentationDevice<ClientBuffer = P::Buffer>,
{
    fn surface_attached(
        &mut self,
        _display: &mut ViewDisplay<P>,
        surface: SurfaceId,
        buffer: Option<BufferId>,
    ) {
        trace!(?surface, ?buffer, "buffer attached");
    }

    fn surface_committed(
        &mut self,
        display: &mut ViewDisplay<P>,
        surface: SurfaceId,
        state: &CommitState,
    ) {
        let on_screen = display
            .surface(surface)
            .is_some_and(|s| s.surface_type() == SurfaceType::OnScreen);
        match state.buffer {
            Some(buffer) if state.buffer_attached && on_screen => {
                self.flip_buffer(display, surface, buffer)
            }
            _ => {}
        }
    }
}
