//! Private surface factory global advertised to the embedding client.

pub mod gen {
    pub use smithay::reexports::wayland_server;
    pub use smithay::reexports::wayland_server::protocol::__interfaces::*;
    pub use smithay::reexports::wayland_server::protocol::*;
    pub use smithay::reexports::wayland_server::*;

    wayland_scanner::generate_interfaces!("./protocols/nc-compositor-v1.xml");
    wayland_scanner::generate_server_code!("./protocols/nc-compositor-v1.xml");
}

pub use gen::nc_compositor::{self, NcCompositor};

pub const NC_COMPOSITOR_VERSION: u32 = 1;
