//! Post-processing effects

mod bloom;

pub use bloom::*;
