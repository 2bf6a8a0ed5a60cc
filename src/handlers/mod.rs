pub mod config;
pub mod predict;

pub use config::*;
pub use predict::predict;
