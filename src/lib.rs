pub mod backend;
pub mod config;
pub mod display;
pub mod host;
pub mod state;

pub use state::{run, NestedState};
