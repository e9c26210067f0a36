//! DRM/KMS output driven through GBM and EGL.
//!
//! Startup is split in two. [`discover`] opens the render device and picks
//! connector, mode and CRTC; failures there leave the compositor without an
//! output. [`DrmOutput::new`] then brings up EGL and GL on top of the GBM
//! surface; failures there are fatal to the caller.

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io,
    os::fd::OwnedFd,
    path::{Path, PathBuf},
};

use smithay::{
    backend::{
        allocator::gbm::GbmDevice,
        drm::DrmDeviceFd,
        egl::{
            self,
            context::{GlAttributes, PixelFormatRequirements},
            display::EGLBufferReader,
            ffi::egl::{self as egl_ffi, types::EGLSurface},
            wrap_egl_call_bool, wrap_egl_call_ptr, EGLBuffer, EGLContext, EGLDisplay, EGLError,
        },
    },
    reexports::{
        drm::{
            control::{
                connector, crtc, framebuffer, Device as ControlDevice, Mode, PageFlipFlags,
            },
            Device as _,
        },
        gbm::{self, AsRaw, BufferObjectFlags},
        wayland_server::{protocol::wl_buffer::WlBuffer, DisplayHandle},
    },
    utils::DeviceFd,
    wayland::shm::{self, BufferAccessError},
};
use tracing::{debug, info, warn};

mod gles;

use gles::QuadProgram;

use super::{FrameError, PresentationDevice};

/// Failure to find a usable output. The backend runs inert.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Couldn't open DRM device {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("Cannot authenticate DRM device: {0}")]
    Authenticate(#[source] io::Error),
    #[error("Cannot create GBM device: {0}")]
    GbmDevice(#[source] io::Error),
    #[error("Cannot get DRM resources: {0}")]
    Resources(#[source] io::Error),
    #[error("No DRM connector")]
    NoConnector,
    #[error("No DRM mode")]
    NoMode,
    #[error("No DRM encoder")]
    NoEncoder,
    #[error("No CRTC for the connected encoder")]
    NoCrtc,
    #[error("Cannot create GBM surface: {0}")]
    GbmSurface(#[source] io::Error),
}

/// Failure to bring up rendering on a discovered output. Fatal.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Cannot create EGL display: {0}")]
    Display(#[source] egl::Error),
    #[error("Cannot create EGL context: {0}")]
    Context(#[source] egl::Error),
    #[error("Cannot create EGL surface: {0}")]
    Surface(#[source] EGLError),
    #[error("Cannot make EGL context current: {0}")]
    MakeCurrent(#[source] EGLError),
    #[error("Missing GL extension {0}")]
    MissingExtension(&'static str),
    #[error("GL setup failed: {0}")]
    Gl(String),
    #[error("Cannot bind Wayland display to EGL: {0}")]
    BindWlDisplay(#[source] egl::Error),
}

/// A connected output with its mode and the objects needed to drive it.
pub struct DrmDiscovery {
    path: PathBuf,
    fd: DrmDeviceFd,
    gbm: GbmDevice<DrmDeviceFd>,
    gbm_surface: gbm::Surface<()>,
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
}

impl std::fmt::Debug for DrmDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmDiscovery")
            .field("path", &self.path)
            .field("connector", &self.connector)
            .field("crtc", &self.crtc)
            .field("mode", &self.mode)
            .finish()
    }
}

impl DrmDiscovery {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connector(&self) -> connector::Handle {
        self.connector
    }

    pub fn crtc(&self) -> crtc::Handle {
        self.crtc
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn size(&self) -> (u32, u32) {
        let (w, h) = self.mode.size();
        (w as u32, h as u32)
    }

    /// The device fd, for the flip event source.
    pub fn device_fd(&self) -> DrmDeviceFd {
        self.fd.clone()
    }
}

/// Index of the mode with the largest pixel area; the first wins ties.
fn largest_mode(sizes: impl IntoIterator<Item = (u16, u16)>) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, (w, h)) in sizes.into_iter().enumerate() {
        let area = w as u32 * h as u32;
        if best.map_or(area > 0, |(_, best_area)| area > best_area) {
            best = Some((index, area));
        }
    }
    best.map(|(index, _)| index)
}

/// Opens `path` and selects the first connected connector, its largest
/// mode and the CRTC of its current encoder.
pub fn discover(path: &Path) -> Result<DrmDiscovery, DiscoveryError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| DiscoveryError::Open {
            path: path.to_owned(),
            source,
        })?;
    let fd = DrmDeviceFd::new(DeviceFd::from(OwnedFd::from(file)));

    let token = fd
        .generate_auth_token()
        .map_err(DiscoveryError::Authenticate)?;
    fd.authenticate_auth_token(token)
        .map_err(DiscoveryError::Authenticate)?;

    let gbm = GbmDevice::new(fd.clone()).map_err(DiscoveryError::GbmDevice)?;

    let resources = fd.resource_handles().map_err(DiscoveryError::Resources)?;
    let connector = resources
        .connectors()
        .iter()
        .filter_map(|handle| fd.get_connector(*handle, false).ok())
        .find(|info| info.state() == connector::State::Connected)
        .ok_or(DiscoveryError::NoConnector)?;

    let modes = connector.modes();
    let mode = largest_mode(modes.iter().map(|m| m.size()))
        .map(|index| modes[index])
        .ok_or(DiscoveryError::NoMode)?;

    let encoder = connector
        .current_encoder()
        .or_else(|| connector.encoders().first().copied())
        .and_then(|handle| fd.get_encoder(handle).ok())
        .ok_or(DiscoveryError::NoEncoder)?;
    let crtc = encoder
        .crtc()
        .or_else(|| {
            resources
                .filter_crtcs(encoder.possible_crtcs())
                .first()
                .copied()
        })
        .ok_or(DiscoveryError::NoCrtc)?;

    let (width, height) = mode.size();
    let gbm_surface = gbm
        .create_surface::<()>(
            width as u32,
            height as u32,
            gbm::Format::Argb8888,
            BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
        )
        .map_err(DiscoveryError::GbmSurface)?;

    info!(
        path = %path.display(),
        connector = ?connector.handle(),
        ?crtc,
        width,
        height,
        "DRM output discovered"
    );

    Ok(DrmDiscovery {
        path: path.to_owned(),
        fd,
        gbm,
        gbm_surface,
        connector: connector.handle(),
        crtc,
        mode,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoKey(usize);

/// The scanout pipeline of one DRM output.
pub struct DrmOutput {
    imported: Option<EGLBuffer>,
    quad: QuadProgram,
    egl_reader: Option<EGLBufferReader>,
    egl_surface: EGLSurface,
    context: EGLContext,
    egl_display: EGLDisplay,
    locked: HashMap<BoKey, gbm::BufferObject<()>>,
    framebuffers: HashMap<BoKey, framebuffer::Handle>,
    gbm_surface: gbm::Surface<()>,
    _gbm: GbmDevice<DrmDeviceFd>,
    fd: DrmDeviceFd,
    connector: connector::Handle,
    crtc: crtc::Handle,
    mode: Mode,
    clear_color: [f32; 4],
}

impl std::fmt::Debug for DrmOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmOutput")
            .field("crtc", &self.crtc)
            .field("mode", &self.mode)
            .field("locked", &self.locked.len())
            .field("framebuffers", &self.framebuffers.len())
            .finish()
    }
}

impl DrmOutput {
    /// Brings up EGL and GL on the discovered output and binds `display`
    /// so clients can hand over EGL buffers.
    pub fn new(
        discovery: DrmDiscovery,
        display: &DisplayHandle,
        clear_color: [f32; 4],
    ) -> Result<Self, SetupError> {
        let DrmDiscovery {
            fd,
            gbm,
            gbm_surface,
            connector,
            crtc,
            mode,
            ..
        } = discovery;

        // SAFETY: the GBM device outlives the display, both are owned here.
        let egl_display =
            unsafe { EGLDisplay::new(gbm.clone()) }.map_err(SetupError::Display)?;
        let attributes = GlAttributes {
            version: (2, 0),
            profile: None,
            debug: false,
            vsync: false,
        };
        let context = EGLContext::new_with_config(
            &egl_display,
            attributes,
            PixelFormatRequirements::_8_bit(),
        )
        .map_err(SetupError::Context)?;

        let display_handle = **egl_display.get_display_handle();
        // SAFETY: the GBM surface is kept alive in `self` and destroyed after
        // the EGL surface in `Drop`.
        let egl_surface = wrap_egl_call_ptr(|| unsafe {
            egl_ffi::CreatePlatformWindowSurfaceEXT(
                display_handle,
                context.config_id(),
                gbm_surface.as_raw() as *mut _,
                std::ptr::null(),
            )
        })
        .map_err(SetupError::Surface)?;

        // SAFETY: surface and context belong to `display_handle`.
        wrap_egl_call_bool(|| unsafe {
            egl_ffi::MakeCurrent(
                display_handle,
                egl_surface,
                egl_surface,
                context.get_context_handle(),
            )
        })
        .map_err(SetupError::MakeCurrent)?;

        let (width, height) = mode.size();
        // SAFETY: the context was made current above.
        let quad = unsafe { QuadProgram::new(width as u32, height as u32) }?;

        let egl_reader = egl_display
            .bind_wl_display(display)
            .map_err(SetupError::BindWlDisplay)?;

        info!(?crtc, width, height, "EGL initialized on DRM output");

        Ok(Self {
            imported: None,
            quad,
            egl_reader: Some(egl_reader),
            egl_surface,
            context,
            egl_display,
            locked: HashMap::new(),
            framebuffers: HashMap::new(),
            gbm_surface,
            _gbm: gbm,
            fd,
            connector,
            crtc,
            mode,
            clear_color,
        })
    }

    fn display_handle(&self) -> egl_ffi::types::EGLDisplay {
        **self.egl_display.get_display_handle()
    }

    fn swap_buffers(&self) -> Result<(), FrameError> {
        let display = self.display_handle();
        // SAFETY: surface created on this display and not yet destroyed.
        wrap_egl_call_bool(|| unsafe { egl_ffi::SwapBuffers(display, self.egl_surface) })
            .map(|_| ())
            .map_err(|err| FrameError::Render(err.to_string()))
    }

    fn framebuffer_for(&mut self, key: BoKey) -> Result<framebuffer::Handle, FrameError> {
        if let Some(fb) = self.framebuffers.get(&key) {
            return Ok(*fb);
        }
        let bo = self
            .locked
            .get(&key)
            .ok_or_else(|| FrameError::LockFrontBuffer("buffer object not locked".into()))?;
        let fb = self
            .fd
            .add_framebuffer(bo, 24, 32)
            .map_err(FrameError::Framebuffer)?;
        debug!(?key, ?fb, "framebuffer created");
        self.framebuffers.insert(key, fb);
        Ok(fb)
    }

    fn import_shm(&self, buffer: &WlBuffer) -> Result<(), BufferAccessError> {
        let result = shm::with_buffer_contents(buffer, |ptr, len, data| {
            // SAFETY: context is current; smithay keeps the pool mapped for
            // the duration of the closure.
            unsafe { self.quad.upload_shm(ptr, len, data) }
        })?;
        result.map_err(|err| {
            warn!("{err}");
            BufferAccessError::NotReadable
        })
    }
}

impl PresentationDevice for DrmOutput {
    type ClientBuffer = WlBuffer;
    type BufferObject = BoKey;

    fn size(&self) -> (u32, u32) {
        let (w, h) = self.mode.size();
        (w as u32, h as u32)
    }

    fn present_initial(&mut self) -> Result<BoKey, FrameError> {
        // SAFETY: context made current in `new`, single-threaded use.
        unsafe { self.quad.clear(self.clear_color) };
        self.swap_buffers()?;
        let bo = self.lock_front_buffer()?;
        let result = self.framebuffer_for(bo).and_then(|fb| {
            self.fd
                .set_crtc(self.crtc, Some(fb), (0, 0), &[self.connector], Some(self.mode))
                .map_err(FrameError::Modeset)
        });
        if let Err(err) = result {
            self.locked.remove(&bo);
            return Err(err);
        }
        Ok(bo)
    }

    #[profiling::function]
    fn import_buffer(&mut self, buffer: &WlBuffer) -> Result<(), FrameError> {
        self.imported = None;

        match self.import_shm(buffer) {
            Ok(()) => return Ok(()),
            Err(BufferAccessError::NotManaged) => {}
            Err(err) => return Err(FrameError::Import(err.to_string())),
        }

        let reader = self
            .egl_reader
            .as_ref()
            .ok_or_else(|| FrameError::Import("EGL display not bound".into()))?;
        let egl_buffer = reader
            .egl_buffer_contents(buffer)
            .map_err(|err| FrameError::Import(err.to_string()))?;
        let image = egl_buffer
            .image(0)
            .ok_or_else(|| FrameError::Import("EGL buffer has no image".into()))?;
        // SAFETY: context current, the image lives in `self.imported` until
        // the next import.
        unsafe { self.quad.bind_image(image) };
        self.imported = Some(egl_buffer);
        Ok(())
    }

    #[profiling::function]
    fn render_imported(&mut self) -> Result<(), FrameError> {
        // SAFETY: context made current in `new`.
        unsafe { self.quad.draw(self.clear_color) }?;
        self.swap_buffers()
    }

    fn lock_front_buffer(&mut self) -> Result<BoKey, FrameError> {
        // SAFETY: called right after a swap on the surface's EGL window.
        let bo = unsafe { self.gbm_surface.lock_front_buffer() }
            .map_err(|err| FrameError::LockFrontBuffer(err.to_string()))?;
        let key = BoKey(bo.as_raw() as usize);
        self.locked.insert(key, bo);
        Ok(key)
    }

    fn page_flip(&mut self, bo: BoKey) -> Result<(), FrameError> {
        let fb = self.framebuffer_for(bo)?;
        self.fd
            .page_flip(self.crtc, fb, PageFlipFlags::EVENT, None)
            .map_err(FrameError::PageFlip)
    }

    fn release_buffer_object(&mut self, bo: BoKey) {
        // Dropping a locked buffer object hands it back to the GBM surface.
        self.locked.remove(&bo);
    }
}

impl Drop for DrmOutput {
    fn drop(&mut self) {
        let display = self.display_handle();
        self.imported = None;
        // SAFETY: context still current, the program is not used afterwards.
        unsafe { self.quad.destroy() };
        self.egl_reader = None;
        // SAFETY: releasing the current context and destroying our surface on
        // the display that created them.
        unsafe {
            egl_ffi::MakeCurrent(
                display,
                egl_ffi::NO_SURFACE,
                egl_ffi::NO_SURFACE,
                egl_ffi::NO_CONTEXT,
            );
            egl_ffi::DestroySurface(display, self.egl_surface);
        }
        self.locked.clear();
        for (_, fb) in self.framebuffers.drain() {
            if let Err(err) = self.fd.destroy_framebuffer(fb) {
                warn!(?fb, "Failed to remove framebuffer: {err}");
            }
        }
        info!("DRM output released");
    }
}
