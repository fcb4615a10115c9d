pub mod dataset;
pub mod errors;
pub mod resources;

pub use dataset::*;
pub use errors::*;
pub use resources::*;
