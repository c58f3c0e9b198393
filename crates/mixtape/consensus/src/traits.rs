use crate::model::{
    Challenge, ChallengeId, ChallengeResult, ChallengeStatus, MemberId, MemberRole, SignatureFlip,
    TrackId, Vote,
};
use crate::StorageResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Generic query window for paged reads. A `limit` of zero means unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

/// Read access to the group roster. Owned by the membership system.
#[async_trait]
pub trait AdminRoster: Send + Sync {
    /// Number of members currently holding administrator capability.
    async fn admin_count(&self) -> StorageResult<u32>;

    /// Role of a member, or `None` if the member is unknown.
    async fn member_role(&self, member_id: &MemberId) -> StorageResult<Option<MemberRole>>;

    async fn is_admin(&self, member_id: &MemberId) -> StorageResult<bool> {
        Ok(self
            .member_role(member_id)
            .await?
            .is_some_and(MemberRole::is_admin))
    }
}

/// Signature flag access on the track catalog.
#[async_trait]
pub trait TrackCatalog: Send + Sync {
    /// Current flag, or `None` if the track does not exist.
    async fn signature_flag(&self, track_id: &TrackId) -> StorageResult<Option<bool>>;

    async fn set_signature_flag(&self, track_id: &TrackId, is_signature: bool)
        -> StorageResult<()>;
}

/// Terminal state written by [`ChallengeStore::finalize_challenge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalTransition {
    pub status: ChallengeStatus,
    pub result: ChallengeResult,
    pub resolved_at: DateTime<Utc>,
}

impl TerminalTransition {
    pub fn resolved(result: ChallengeResult, at: DateTime<Utc>) -> Self {
        Self {
            status: ChallengeStatus::Resolved,
            result,
            resolved_at: at,
        }
    }

    pub fn expired(at: DateTime<Utc>) -> Self {
        Self {
            status: ChallengeStatus::Expired,
            result: ChallengeResult::Rejected,
            resolved_at: at,
        }
    }
}

/// Outcome of a conditional vote upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteWrite {
    /// The vote row was inserted or overwritten.
    Recorded,
    /// The challenge was no longer active or had lapsed; nothing was written.
    Closed,
}

/// Persistence contract for challenges and votes.
///
/// Implementations must make each method atomic on its own. The engine relies
/// on three storage-level guarantees instead of in-process locks:
/// - at most one `active` challenge per track (uniqueness constraint)
/// - votes are only written while the challenge is active and unexpired
/// - terminal transitions only apply to challenges that are still active
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Insert a new active challenge, together with the challenger's automatic
    /// vote when there is one.
    ///
    /// Fails with `StorageError::Conflict` if the track already has an active
    /// challenge, and `StorageError::NotFound` if the track does not exist.
    async fn insert_challenge(
        &self,
        challenge: &Challenge,
        initial_vote: Option<&Vote>,
    ) -> StorageResult<()>;

    /// The track's active challenge, if any. Does not evaluate expiry.
    async fn active_challenge(&self, track_id: &TrackId) -> StorageResult<Option<Challenge>>;

    async fn get_challenge(&self, challenge_id: &ChallengeId) -> StorageResult<Option<Challenge>>;

    /// Every challenge ever opened on the track, newest first.
    async fn list_challenges(
        &self,
        track_id: &TrackId,
        window: QueryWindow,
    ) -> StorageResult<Vec<Challenge>>;

    /// Insert or overwrite `(challenge_id, member_id)` if the challenge is
    /// still active and `now` is not past its expiry.
    async fn upsert_vote(&self, vote: &Vote, now: DateTime<Utc>) -> StorageResult<VoteWrite>;

    async fn list_votes(&self, challenge_id: &ChallengeId) -> StorageResult<Vec<Vote>>;

    /// Move an active challenge into a terminal state and apply `flip` to the
    /// track in the same unit.
    ///
    /// Returns `false` without writing anything if the challenge had already
    /// left the active state.
    async fn finalize_challenge(
        &self,
        challenge_id: &ChallengeId,
        transition: &TerminalTransition,
        flip: Option<&SignatureFlip>,
    ) -> StorageResult<bool>;
}

/// Everything the engine needs from a single backend.
pub trait ConsensusBackend: ChallengeStore + TrackCatalog + AdminRoster + Send + Sync {}

impl<T> ConsensusBackend for T where T: ChallengeStore + TrackCatalog + AdminRoster + Send + Sync {}
