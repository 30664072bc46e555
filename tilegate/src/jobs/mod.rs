//! Job drivers combining the operator, the stores and the origin client.

mod clean;
mod seed;
mod summary;

pub use clean::*;
pub use seed::*;
pub use summary::*;
