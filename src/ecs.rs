mod types;
mod world;

pub use types::*;
pub use world::*;
