use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use smithay::{
    delegate_shm,
    reexports::{
        calloop::{generic::Generic, EventLoop, Interest, LoopHandle, Mode, PostAction},
        wayland_server::{
            backend::{ClientData, ClientId, DisconnectReason},
            protocol::wl_buffer::WlBuffer,
            Display, DisplayHandle,
        },
    },
    wayland::{
        buffer::BufferHandler,
        shm::{ShmHandler, ShmState},
        socket::ListeningSocketSource,
    },
};
use tracing::{error, info, warn};

use crate::{
    backend::{
        drm::{self, DrmOutput},
        event_source::{FlipEvent, FlipEventSource},
        ViewBackend,
    },
    config::Config,
    delegate_view_display,
    display::{
        wayland::{ViewDisplayGlobal, ViewDisplayHandler, Wayland},
        ViewDisplay,
    },
    host::ViewHost,
};

/// Per-client data. Only one client is served at a time.
#[derive(Debug)]
pub struct ClientState {
    connected: Arc<AtomicBool>,
}

impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        info!(?client_id, "client connected");
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        info!(?client_id, ?reason, "client disconnected");
        self.connected.store(false, Ordering::SeqCst);
    }
}

pub struct NestedState {
    pub display_handle: DisplayHandle,
    pub view_display: ViewDisplay<Wayland>,
    pub backend: ViewBackend<Wayland, DrmOutput>,
    pub global: Option<ViewDisplayGlobal>,
    pub shm_state: ShmState,
    pub socket_name: Option<String>,
    pub running: Arc<AtomicBool>,
    client_connected: Arc<AtomicBool>,
    served_client: bool,
}

impl NestedState {
    /// Sets up the output, the protocol globals and the client socket.
    ///
    /// Without a usable DRM output the state is created with an inert
    /// backend and no `nc_compositor` global.
    ///
    /// # Panics
    ///
    /// If EGL or GL cannot be brought up on a discovered output.
    pub fn init(
        display: Display<NestedState>,
        handle: LoopHandle<'static, NestedState>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let display_handle = display.handle();

        let (backend, global) = match drm::discover(&config.render_card) {
            Ok(discovery) => {
                handle
                    .insert_source(
                        FlipEventSource::new(discovery.device_fd()),
                        |event, _, state: &mut NestedState| state.on_page_flip(event),
                    )
                    .map_err(|err| anyhow::anyhow!("Failed to init DRM event source: {}", err.error))?;

                let global = ViewDisplayGlobal::new::<Self>(&display_handle);

                let output = match DrmOutput::new(discovery, &display_handle, config.clear_color) {
                    Ok(output) => output,
                    Err(err) => panic!("{err}"),
                };
                (ViewBackend::new(Some(output)), Some(global))
            }
            Err(err) => {
                error!("ViewBackend: {err}");
                (ViewBackend::inert(), None)
            }
        };

        let shm_state = ShmState::new::<Self>(&display_handle, Vec::new());

        let source = match &config.socket_name {
            Some(name) => ListeningSocketSource::with_name(name),
            None => ListeningSocketSource::new_auto(),
        }
        .context("Failed to bind wayland socket")?;
        let socket_name = source.socket_name().to_string_lossy().into_owned();
        handle
            .insert_source(source, |client_stream, _, state| state.accept_client(client_stream))
            .map_err(|err| anyhow::anyhow!("Failed to init wayland socket source: {}", err.error))?;
        info!(name = socket_name, "Listening on wayland socket");

        handle
            .insert_source(
                Generic::new(display, Interest::READ, Mode::Level),
                |_, display, state| {
                    profiling::scope!("dispatch_clients");
                    // Safety: we don't drop the display
                    unsafe {
                        display.get_mut().dispatch_clients(state)?;
                    }
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|err| anyhow::anyhow!("Failed to init wayland server source: {}", err.error))?;

        Ok(Self {
            display_handle,
            view_display: ViewDisplay::new(config.limits.max_surfaces),
            backend,
            global,
            shm_state,
            socket_name: Some(socket_name),
            running: Arc::new(AtomicBool::new(true)),
            client_connected: Arc::new(AtomicBool::new(false)),
            served_client: false,
        })
    }

    fn accept_client(&mut self, stream: std::os::unix::net::UnixStream) {
        if self.client_connected.load(Ordering::SeqCst) {
            warn!("Rejecting wayland client, another client is already connected");
            return;
        }
        let data = Arc::new(ClientState {
            connected: self.client_connected.clone(),
        });
        match self.display_handle.insert_client(stream, data) {
            Ok(_) => {
                self.client_connected.store(true, Ordering::SeqCst);
                self.served_client = true;
            }
            Err(err) => warn!("Error adding wayland client: {}", err),
        }
    }

    pub fn on_page_flip(&mut self, event: FlipEvent) {
        profiling::scope!("page_flip");
        self.backend
            .page_flip_complete(&mut self.view_display, event.timestamp_ms());
    }

    /// False once stopped or once the served client went away.
    pub fn is_running(&self) -> bool {
        let client_gone = self.served_client && !self.client_connected.load(Ordering::SeqCst);
        self.running.load(Ordering::SeqCst) && !client_gone
    }
}

impl Drop for NestedState {
    fn drop(&mut self) {
        self.backend.teardown(&mut self.view_display);
        if let Some(global) = self.global.take() {
            global.destroy::<Self>(&self.display_handle);
        }
    }
}

impl ViewDisplayHandler for NestedState {
    type Hooks = ViewBackend<Wayland, DrmOutput>;

    fn view_display_state(&mut self) -> (&mut ViewDisplay<Wayland>, &mut Self::Hooks) {
        (&mut self.view_display, &mut self.backend)
    }
}

impl BufferHandler for NestedState {
    fn buffer_destroyed(&mut self, buffer: &WlBuffer) {
        self.view_display.buffer_destroyed(buffer, &mut self.backend);
    }
}

impl ShmHandler for NestedState {
    fn shm_state(&self) -> &ShmState {
        &self.shm_state
    }
}

delegate_shm!(NestedState);
delegate_view_display!(NestedState);

/// Runs the compositor until its client disconnects.
///
/// Without a usable output the backend stays inert and nothing could ever
/// be shown, so this returns an error right after reporting the `(0, 0)`
/// size to `host` instead of serving clients.
pub fn run(config: &Config, host: &mut impl ViewHost) -> anyhow::Result<()> {
    let mut event_loop: EventLoop<NestedState> =
        EventLoop::try_new().context("Failed to create event loop")?;
    let display: Display<NestedState> =
        Display::new().context("Failed to create wayland display")?;
    let mut state = NestedState::init(display, event_loop.handle(), config)?;

    state.backend.initialize(host);
    if state.backend.is_inert() {
        anyhow::bail!(
            "No usable output on {}, nothing to present to",
            config.render_card.display()
        );
    }

    while state.is_running() {
        event_loop
            .dispatch(None, &mut state)
            .context("Event loop dispatch failed")?;
        state
            .display_handle
            .flush_clients()
            .context("Failed to flush clients")?;
    }
    info!("nested compositor stopped");
    Ok(())
}
