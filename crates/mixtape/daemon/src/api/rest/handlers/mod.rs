//! API request handlers

mod challenges;
mod system;

pub use challenges::*;
pub use system::*;
