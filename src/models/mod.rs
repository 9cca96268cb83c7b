//! Response model library.
//!
//! Models are implemented as small, pure functions so that fitting/sampling code
//! can stay generic over the closed `ModelKind` enumeration.

pub mod model;
pub mod response;

pub use model::*;
pub use response::*;
