use std::{fmt::Debug, hash::Hash, io};

/// Per-frame failure. The frame is dropped, the pipeline keeps running.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Failed to import client buffer: {0}")]
    Import(String),
    #[error("Failed to render frame: {0}")]
    Render(String),
    #[error("Failed to lock front buffer: {0}")]
    LockFrontBuffer(String),
    #[error("Failed to create framebuffer: {0}")]
    Framebuffer(#[source] io::Error),
    #[error("Failed to set CRTC: {0}")]
    Modeset(#[source] io::Error),
    #[error("Failed to schedule page flip: {0}")]
    PageFlip(#[source] io::Error),
}

/// Scanout hardware behind the presentation pipeline.
///
/// Only one client buffer is imported at a time; a new import replaces the
/// previous one.
pub trait PresentationDevice {
    type ClientBuffer;
    /// Buffer object locked from the swapchain.
    type BufferObject: Copy + Eq + Hash + Debug;

    /// Output size in pixels.
    fn size(&self) -> (u32, u32);

    /// Clears the output, swaps and scans the result out with a modeset.
    fn present_initial(&mut self) -> Result<Self::BufferObject, FrameError>;

    fn import_buffer(&mut self, buffer: &Self::ClientBuffer) -> Result<(), FrameError>;

    /// Draws the imported buffer as a full-screen quad and swaps.
    fn render_imported(&mut self) -> Result<(), FrameError>;

    /// Takes the buffer object the last swap rendered into.
    fn lock_front_buffer(&mut self) -> Result<Self::BufferObject, FrameError>;

    /// Requests a flip to `bo` with a completion event.
    fn page_flip(&mut self, bo: Self::BufferObject) -> Result<(), FrameError>;

    /// Returns `bo` to the swapchain.
    fn release_buffer_object(&mut self, bo: Self::BufferObject);
}
