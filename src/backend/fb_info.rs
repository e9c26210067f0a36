use crate::display::{
    resource::{BufferId, ListenerId, ResourceKey, SurfaceId},
    Protocol, ViewDisplay,
};

/// Ties one scanout buffer object to the client buffer and the surface whose
/// content it holds.
///
/// Both references are ids observed through a destroy listener. When either
/// resource dies the reference is dropped and nothing is sent to it later.
#[derive(Debug)]
pub struct FbInfo {
    listener: ListenerId,
    buffer: Option<BufferId>,
    surface: Option<SurfaceId>,
}

impl FbInfo {
    pub fn new(listener: ListenerId) -> Self {
        Self {
            listener,
            buffer: None,
            surface: None,
        }
    }

    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    pub fn set_buffer<P: Protocol>(&mut self, display: &mut ViewDisplay<P>, buffer: Option<BufferId>) {
        if let Some(old) = self.buffer.take() {
            display.remove_destroy_listener(ResourceKey::Buffer(old), self.listener);
        }
        if let Some(new) = buffer {
            if display.add_destroy_listener(ResourceKey::Buffer(new), self.listener) {
                self.buffer = Some(new);
            }
        }
    }

    pub fn set_surface<P: Protocol>(
        &mut self,
        display: &mut ViewDisplay<P>,
        surface: Option<SurfaceId>,
    ) {
        if let Some(old) = self.surface.take() {
            display.remove_destroy_listener(ResourceKey::Surface(old), self.listener);
        }
        if let Some(new) = surface {
            if display.add_destroy_listener(ResourceKey::Surface(new), self.listener) {
                self.surface = Some(new);
            }
        }
    }

    /// Hands the client buffer back to its owner.
    pub fn release_buffer<P: Protocol>(&mut self, display: &mut ViewDisplay<P>) {
        if let Some(buffer) = self.buffer {
            display.send_buffer_release(buffer);
            self.set_buffer(display, None);
        }
    }

    /// Completes the frame of the bound surface.
    pub fn send_frame_callback<P: Protocol>(&mut self, display: &mut ViewDisplay<P>, time: u32) {
        if let Some(surface) = self.surface {
            display.frame_complete(surface, time);
            self.set_surface(display, None);
        }
    }

    /// The listener registration died with the resource, only the reference
    /// is dropped here.
    pub fn on_resource_destroyed(&mut self, resource: ResourceKey) {
        match resource {
            ResourceKey::Surface(id) if self.surface == Some(id) => self.surface = None,
            ResourceKey::Buffer(id) if self.buffer == Some(id) => self.buffer = None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{
        surface::{CallbackKind, SurfaceType},
        testing::{MockBuffer, MockCallback, MockProtocol},
    };

    fn setup() -> (ViewDisplay<MockProtocol>, SurfaceId, BufferId, MockBuffer) {
        let mut display = ViewDisplay::new(2);
        let surface = display.reserve_surface_id().unwrap();
        display.create_surface(surface, 1, SurfaceType::OnScreen, &mut ());
        let client_buffer = MockBuffer::new(1);
        let buffer = display
            .attach(surface, Some(client_buffer.clone()), 0, 0, &mut ())
            .unwrap()
            .unwrap();
        (display, surface, buffer, client_buffer)
    }

    #[test]
    fn release_sends_once_and_unbinds() {
        let (mut display, surface, buffer, client_buffer) = setup();
        let mut info = FbInfo::new(ListenerId::new(1));
        info.set_buffer(&mut display, Some(buffer));
        display.commit(surface, &mut ()).unwrap();
        assert!(display.buffer(buffer).is_some());

        info.release_buffer(&mut display);
        info.release_buffer(&mut display);

        assert_eq!(client_buffer.releases(), 1);
        assert_eq!(info.buffer(), None);
        assert!(display.buffer(buffer).is_none());
    }

    #[test]
    fn frame_callback_goes_to_bound_surface() {
        let (mut display, surface, _, _) = setup();
        let (cb, log) = MockCallback::new();
        display
            .request_frame_callback(surface, cb, CallbackKind::Frame)
            .unwrap();
        display.commit(surface, &mut ()).unwrap();

        let mut info = FbInfo::new(ListenerId::new(1));
        info.set_surface(&mut display, Some(surface));
        info.send_frame_callback(&mut display, 1000);
        info.send_frame_callback(&mut display, 2000);

        assert_eq!(log.done(), vec![1000]);
        assert_eq!(info.surface(), None);
    }

    #[test]
    fn destroyed_resource_is_forgotten() {
        let (mut display, surface, buffer, client_buffer) = setup();
        let mut info = FbInfo::new(ListenerId::new(1));
        info.set_buffer(&mut display, Some(buffer));
        info.set_surface(&mut display, Some(surface));

        info.on_resource_destroyed(ResourceKey::Buffer(buffer));
        info.on_resource_destroyed(ResourceKey::Surface(surface));
        info.release_buffer(&mut display);

        assert_eq!(client_buffer.releases(), 0);
        assert_eq!((info.buffer(), info.surface()), (None, None));
    }

    #[test]
    fn binding_to_missing_resource_is_ignored() {
        let (mut display, _, _, _) = setup();
        let mut info = FbInfo::new(ListenerId::new(1));
        info.set_surface(&mut display, Some(SurfaceId(42)));
        assert_eq!(info.surface(), None);
    }
}
