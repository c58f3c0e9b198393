//! REST API over the signature consensus engine

pub mod handlers;
pub mod router;
pub mod state;
