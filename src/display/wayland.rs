//! Binds [`ViewDisplay`] to `wayland-server`.
//!
//! States embedding the display implement [`ViewDisplayHandler`] and forward
//! the protocol objects to [`ViewDisplayGlobal`] with
//! [`delegate_view_display!`](crate::delegate_view_display).

use smithay::reexports::wayland_server::{
    backend::{ClientId, GlobalId},
    protocol::{
        wl_buffer::WlBuffer,
        wl_callback::WlCallback,
        wl_display,
        wl_surface::{self, WlSurface},
    },
    Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource,
};
use tracing::{debug, trace, warn};

use super::{
    protocol::{nc_compositor, NcCompositor, NC_COMPOSITOR_VERSION},
    resource::SurfaceId,
    surface::{CallbackKind, SurfaceType},
    BufferResource, CallbackResource, Protocol, SurfaceHandler, ViewDisplay,
};

/// Protocol handles of a `wayland-server` client.
#[derive(Debug)]
pub enum Wayland {}

impl Protocol for Wayland {
    type Surface = WlSurface;
    type Buffer = WlBuffer;
    type Callback = WlCallback;
}

impl BufferResource for WlBuffer {
    fn send_release(&self) {
        if self.is_alive() {
            self.release();
        }
    }
}

impl CallbackResource for WlCallback {
    fn send_done(self, time: u32) {
        if self.is_alive() {
            self.done(time);
        }
    }

    /// `done` is the only destructor of `wl_callback`, and sending it would
    /// report a frame that never happened. The server drops its handle and
    /// the client side object lives until the client disconnects.
    fn discard(self) {
        trace!(callback = ?self, "frame callback discarded without done");
    }
}

/// User data of a `wl_surface` created through `nc_compositor`.
#[derive(Debug)]
pub struct SurfaceData {
    pub id: SurfaceId,
}

/// User data of a `wl_callback`: the surface it was requested on.
#[derive(Debug)]
pub struct CallbackData {
    pub surface: SurfaceId,
}

/// Access to the display and the hooks it reports to.
pub trait ViewDisplayHandler {
    type Hooks: SurfaceHandler<Wayland>;

    fn view_display_state(&mut self) -> (&mut ViewDisplay<Wayland>, &mut Self::Hooks);
}

/// The advertised `nc_compositor` global.
#[derive(Debug)]
pub struct ViewDisplayGlobal {
    global: GlobalId,
}

impl ViewDisplayGlobal {
    pub fn new<D>(display: &DisplayHandle) -> Self
    where
        D: GlobalDispatch<NcCompositor, ()> + 'static,
    {
        let global = display.create_global::<D, NcCompositor, _>(NC_COMPOSITOR_VERSION, ());
        debug!(?global, "nc_compositor global created");
        Self { global }
    }

    pub fn global(&self) -> GlobalId {
        self.global.clone()
    }

    /// Withdraws the advertisement. Existing surfaces keep working.
    pub fn destroy<D: 'static>(self, display: &DisplayHandle) {
        display.remove_global::<D>(self.global);
    }
}

fn create_surface<D>(
    state: &mut D,
    compositor: &NcCompositor,
    id: New<WlSurface>,
    ty: SurfaceType,
    data_init: &mut DataInit<'_, D>,
) where
    D: Dispatch<WlSurface, SurfaceData> + ViewDisplayHandler + 'static,
{
    let (display, hooks) = state.view_display_state();
    let surface_id = match display.reserve_surface_id() {
        Ok(surface_id) => surface_id,
        Err(err) => {
            warn!(?compositor, "{err}");
            data_init.post_error(id, wl_display::Error::NoMemory, err.to_string());
            return;
        }
    };
    let surface = data_init.init(id, SurfaceData { id: surface_id });
    display.create_surface(surface_id, surface, ty, hooks);
}

impl<D> GlobalDispatch<NcCompositor, (), D> for ViewDisplayGlobal
where
    D: GlobalDispatch<NcCompositor, ()>
        + Dispatch<NcCompositor, ()>
        + Dispatch<WlSurface, SurfaceData>
        + Dispatch<WlCallback, CallbackData>
        + ViewDisplayHandler
        + 'static,
{
    fn bind(
        _state: &mut D,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<NcCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, D>,
    ) {
        data_init.init(resource, ());
    }
}

impl<D> Dispatch<NcCompositor, (), D> for ViewDisplayGlobal
where
    D: Dispatch<NcCompositor, ()>
        + Dispatch<WlSurface, SurfaceData>
        + Dispatch<WlCallback, CallbackData>
        + ViewDisplayHandler
        + 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        compositor: &NcCompositor,
        request: nc_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        profiling::scope!("nc_compositor::request");
        match request {
            nc_compositor::Request::Destroy => {}
            nc_compositor::Request::CreateSurface { id } => {
                create_surface(state, compositor, id, SurfaceType::OnScreen, data_init);
            }
            nc_compositor::Request::CreateOffscreenSurface { id } => {
                create_surface(state, compositor, id, SurfaceType::OffScreen, data_init);
            }
            nc_compositor::Request::RenderCallback { callback, surface } => {
                let Some(surface_id) = surface.data::<SurfaceData>().map(|d| d.id) else {
                    data_init.post_error(
                        callback,
                        wl_display::Error::InvalidObject,
                        "Surface was not created by nc_compositor",
                    );
                    return;
                };
                let callback = data_init.init(callback, CallbackData { surface: surface_id });
                let (display, _) = state.view_display_state();
                if let Err(err) =
                    display.request_frame_callback(surface_id, callback, CallbackKind::Render)
                {
                    warn!("render_callback: {err}");
                }
            }
        }
    }
}

impl<D> Dispatch<WlSurface, SurfaceData, D> for ViewDisplayGlobal
where
    D: Dispatch<WlSurface, SurfaceData>
        + Dispatch<WlCallback, CallbackData>
        + ViewDisplayHandler
        + 'static,
{
    fn request(
        state: &mut D,
        _client: &Client,
        surface: &WlSurface,
        request: wl_surface::Request,
        data: &SurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, D>,
    ) {
        profiling::scope!("wl_surface::request");
        let (display, hooks) = state.view_display_state();
        let result = match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                display.attach(data.id, buffer, x, y, hooks).map(|_| ())
            }
            wl_surface::Request::Damage {
                x,
                y,
                width,
                height,
            } => display.damage(data.id, x, y, width, height),
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, CallbackData { surface: data.id });
                display
                    .request_frame_callback(data.id, callback, CallbackKind::Frame)
                    .map(|_| ())
            }
            wl_surface::Request::Commit => display.commit(data.id, hooks),
            wl_surface::Request::Destroy => Ok(()),
            _ => {
                surface.post_error(wl_display::Error::InvalidMethod, "Unsupported method");
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(?surface, "{err}");
        }
    }

    fn destroyed(state: &mut D, _client: ClientId, _surface: &WlSurface, data: &SurfaceData) {
        let (display, hooks) = state.view_display_state();
        display.destroy_surface(data.id, hooks);
    }
}

impl<D> Dispatch<WlCallback, CallbackData, D> for ViewDisplayGlobal
where
    D: Dispatch<WlCallback, CallbackData> + ViewDisplayHandler + 'static,
{
    fn request(
        _state: &mut D,
        _client: &Client,
        _callback: &WlCallback,
        _request: <WlCallback as Resource>::Request,
        _data: &CallbackData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, D>,
    ) {
    }

    fn destroyed(state: &mut D, _client: ClientId, callback: &WlCallback, data: &CallbackData) {
        let (display, _) = state.view_display_state();
        display.forget_callback(data.surface, callback);
    }
}

/// Routes `nc_compositor`, `wl_surface` and `wl_callback` to
/// [`ViewDisplayGlobal`].
#[macro_export]
macro_rules! delegate_view_display {
    ($(@<$( $lt:tt $( : $clt:tt $(+ $dlt:tt )* )? ),+>)? $ty: ty) => {
        smithay::reexports::wayland_server::delegate_global_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::display::protocol::NcCompositor: ()
        ] => $crate::display::wayland::ViewDisplayGlobal);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            $crate::display::protocol::NcCompositor: ()
        ] => $crate::display::wayland::ViewDisplayGlobal);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_server::protocol::wl_surface::WlSurface: $crate::display::wayland::SurfaceData
        ] => $crate::display::wayland::ViewDisplayGlobal);
        smithay::reexports::wayland_server::delegate_dispatch!($(@< $( $lt $( : $clt $(+ $dlt )* )? ),+ >)? $ty: [
            smithay::reexports::wayland_server::protocol::wl_callback::WlCallback: $crate::display::wayland::CallbackData
        ] => $crate::display::wayland::ViewDisplayGlobal);
    };
}
