//! Test utilities shared by unit and integration tests

pub mod assertions;
pub mod faulty;
pub mod fixtures;
pub mod recording;

pub use assertions::*;
pub use faulty::*;
pub use fixtures::*;
pub use recording::*;
