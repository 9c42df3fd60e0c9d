//! Core constants, codec errors and transport seams.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
