//! In-memory reference implementation of the consensus storage traits.
//!
//! Tracks, roster, challenges and votes live behind a single lock, so every
//! trait method is atomic and the active-challenge uniqueness check behaves
//! like the partial unique index of the PostgreSQL adapter. Production
//! deployments should use a transactional backend shared by all instances.

use crate::model::{
    Challenge, ChallengeId, ChallengeStatus, MemberId, MemberRole, SignatureFlip, TrackId, Vote,
};
use crate::traits::{
    AdminRoster, ChallengeStore, QueryWindow, TerminalTransition, TrackCatalog, VoteWrite,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct ConsensusState {
    tracks: HashMap<TrackId, bool>,
    members: HashMap<MemberId, MemberRole>,
    challenges: HashMap<ChallengeId, Challenge>,
    votes: BTreeMap<(ChallengeId, MemberId), bool>,
}

/// In-memory consensus backend: track catalog, admin roster and challenge store.
#[derive(Default)]
pub struct InMemoryConsensusStore {
    state: RwLock<ConsensusState>,
}

impl InMemoryConsensusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(self, track_id: impl Into<String>, is_signature: bool) -> Self {
        self.insert_track(TrackId::new(track_id), is_signature);
        self
    }

    pub fn with_member(self, member_id: impl Into<String>, role: MemberRole) -> Self {
        self.upsert_member(MemberId::new(member_id), role);
        self
    }

    pub fn insert_track(&self, track_id: TrackId, is_signature: bool) {
        if let Ok(mut guard) = self.state.write() {
            guard.tracks.insert(track_id, is_signature);
        }
    }

    /// Add a member or change their role.
    pub fn upsert_member(&self, member_id: MemberId, role: MemberRole) {
        if let Ok(mut guard) = self.state.write() {
            guard.members.insert(member_id, role);
        }
    }

    pub fn remove_member(&self, member_id: &MemberId) {
        if let Ok(mut guard) = self.state.write() {
            guard.members.remove(member_id);
        }
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, ConsensusState>> {
        self.state
            .read()
            .map_err(|_| StorageError::Backend("consensus state lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, ConsensusState>> {
        self.state
            .write()
            .map_err(|_| StorageError::Backend("consensus state lock poisoned".to_string()))
    }
}

#[async_trait]
impl AdminRoster for InMemoryConsensusStore {
    async fn admin_count(&self) -> StorageResult<u32> {
        let guard = self.read()?;
        let count = guard.members.values().filter(|r| r.is_admin()).count();
        u32::try_from(count)
            .map_err(|_| StorageError::InvariantViolation("admin count overflow".to_string()))
    }

    async fn member_role(&self, member_id: &MemberId) -> StorageResult<Option<MemberRole>> {
        let guard = self.read()?;
        Ok(guard.members.get(member_id).copied())
    }
}

#[async_trait]
impl TrackCatalog for InMemoryConsensusStore {
    async fn signature_flag(&self, track_id: &TrackId) -> StorageResult<Option<bool>> {
        let guard = self.read()?;
        Ok(guard.tracks.get(track_id).copied())
    }

    async fn set_signature_flag(
        &self,
        track_id: &TrackId,
        is_signature: bool,
    ) -> StorageResult<()> {
        let mut guard = self.write()?;
        let flag = guard
            .tracks
            .get_mut(track_id)
            .ok_or_else(|| StorageError::NotFound(format!("track {} not found", track_id)))?;
        *flag = is_signature;
        Ok(())
    }
}

#[async_trait]
impl ChallengeStore for InMemoryConsensusStore {
    async fn insert_challenge(
        &self,
        challenge: &Challenge,
        initial_vote: Option<&Vote>,
    ) -> StorageResult<()> {
        let mut guard = self.write()?;

        if !guard.tracks.contains_key(&challenge.track_id) {
            return Err(StorageError::NotFound(format!(
                "track {} not found",
                challenge.track_id
            )));
        }
        if guard.challenges.contains_key(&challenge.id) {
            return Err(StorageError::Conflict(format!(
                "challenge {} already exists",
                challenge.id
            )));
        }
        if challenge.is_active()
            && guard
                .challenges
                .values()
                .any(|c| c.track_id == challenge.track_id && c.is_active())
        {
            return Err(StorageError::Conflict(format!(
                "track {} already has an active challenge",
                challenge.track_id
            )));
        }
        if let Some(vote) = initial_vote {
            if vote.challenge_id != challenge.id {
                return Err(StorageError::InvalidInput(format!(
                    "initial vote targets challenge {}, expected {}",
                    vote.challenge_id, challenge.id
                )));
            }
        }

        guard
            .challenges
            .insert(challenge.id.clone(), challenge.clone());
        if let Some(vote) = initial_vote {
            guard
                .votes
                .insert((vote.challenge_id.clone(), vote.member_id.clone()), vote.agree);
        }
        Ok(())
    }

    async fn active_challenge(&self, track_id: &TrackId) -> StorageResult<Option<Challenge>> {
        let guard = self.read()?;
        Ok(guard
            .challenges
            .values()
            .find(|c| &c.track_id == track_id && c.is_active())
            .cloned())
    }

    async fn get_challenge(&self, challenge_id: &ChallengeId) -> StorageResult<Option<Challenge>> {
        let guard = self.read()?;
        Ok(guard.challenges.get(challenge_id).cloned())
    }

    async fn list_challenges(
        &self,
        track_id: &TrackId,
        window: QueryWindow,
    ) -> StorageResult<Vec<Challenge>> {
        let guard = self.read()?;
        let mut values = guard
            .challenges
            .values()
            .filter(|c| &c.track_id == track_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(apply_window(values, window))
    }

    async fn upsert_vote(&self, vote: &Vote, now: DateTime<Utc>) -> StorageResult<VoteWrite> {
        let mut guard = self.write()?;
        let open = match guard.challenges.get(&vote.challenge_id) {
            Some(challenge) => challenge.is_active() && now <= challenge.expires_at,
            None => {
                return Err(StorageError::NotFound(format!(
                    "challenge {} not found",
                    vote.challenge_id
                )))
            }
        };
        if !open {
            return Ok(VoteWrite::Closed);
        }
        guard
            .votes
            .insert((vote.challenge_id.clone(), vote.member_id.clone()), vote.agree);
        Ok(VoteWrite::Recorded)
    }

    async fn list_votes(&self, challenge_id: &ChallengeId) -> StorageResult<Vec<Vote>> {
        let guard = self.read()?;
        Ok(guard
            .votes
            .iter()
            .filter(|((cid, _), _)| cid == challenge_id)
            .map(|((cid, member_id), agree)| Vote {
                challenge_id: cid.clone(),
                member_id: member_id.clone(),
                agree: *agree,
            })
            .collect())
    }

    async fn finalize_challenge(
        &self,
        challenge_id: &ChallengeId,
        transition: &TerminalTransition,
        flip: Option<&SignatureFlip>,
    ) -> StorageResult<bool> {
        if transition.status == ChallengeStatus::Active {
            return Err(StorageError::InvalidInput(
                "terminal transition cannot target the active state".to_string(),
            ));
        }

        let mut guard = self.write()?;
        let state = &mut *guard;
        let challenge = state.challenges.get_mut(challenge_id).ok_or_else(|| {
            StorageError::NotFound(format!("challenge {} not found", challenge_id))
        })?;
        if !challenge.is_active() {
            return Ok(false);
        }
        if let Some(flip) = flip {
            if !state.tracks.contains_key(&flip.track_id) {
                return Err(StorageError::NotFound(format!(
                    "track {} not found",
                    flip.track_id
                )));
            }
        }

        challenge.status = transition.status;
        challenge.result = Some(transition.result);
        challenge.resolved_at = Some(transition.resolved_at);
        if let Some(flip) = flip {
            state
                .tracks
                .insert(flip.track_id.clone(), flip.is_signature);
        }
        Ok(true)
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}
