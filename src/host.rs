//! Embedder side of the view backend lifecycle.
//!
//! A host creates the compositor, calls
//! [`ViewBackend::initialize`](crate::backend::ViewBackend::initialize) once
//! to learn the output size and drops the compositor to destroy it.

use tracing::info;

pub trait ViewHost {
    /// The size the embedded view has to render at.
    fn set_size(&mut self, width: u32, height: u32);
}

/// Host of the standalone binary, it only records and logs the size.
#[derive(Debug, Default)]
pub struct LoggingHost {
    size: Option<(u32, u32)>,
}

impl LoggingHost {
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }
}

impl ViewHost for LoggingHost {
    fn set_size(&mut self, width: u32, height: u32) {
        info!(width, height, "view size negotiated");
        self.size = Some((width, height));
    }
}
