//! Signature track consensus for the shared mixtape.
//!
//! A track's signature flag is never flipped by a single admin. Instead a
//! member opens a *challenge* against the track, the group's admins vote on
//! it, and the challenge resolves once a majority quorum agrees, every admin
//! has voted, or the voting window lapses.
//!
//! This crate defines:
//! - the challenge/vote data model and quorum math
//! - storage contracts for challenges, the track catalog and the admin roster
//! - an in-memory adapter and a PostgreSQL adapter (`postgres` feature)
//! - [`SignatureConsensusEngine`], which drives the challenge lifecycle
//!
//! Design stance:
//! - The store is the only source of truth. The engine holds no shared
//!   mutable state, so every exclusion guarantee comes from storage
//!   constraints and conditional updates.
//! - Expiry is evaluated lazily on every read and write that touches a
//!   challenge. There is no background sweeper.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod clock;
mod config;
mod engine;
mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod quorum;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ConsensusConfig;
pub use engine::SignatureConsensusEngine;
pub use error::{ConsensusError, ConsensusResult, StorageError, StorageResult};
pub use memory::InMemoryConsensusStore;
pub use model::{
    ActiveChallengeEntry, Challenge, ChallengeId, ChallengeKind, ChallengeResult, ChallengeStatus,
    ChallengeView, MemberId, MemberRole, SignatureFlip, Tally, TrackId, Vote,
};
pub use traits::{
    AdminRoster, ChallengeStore, ConsensusBackend, QueryWindow, TerminalTransition, TrackCatalog,
    VoteWrite,
};
