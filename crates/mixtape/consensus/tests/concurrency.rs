//! Races between concurrent callers sharing one backend.

mod common;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{fixture, member, track};
use mixtape_consensus::{
    Challenge, ChallengeId, ChallengeResult, ChallengeStatus, ChallengeStore, ConsensusError,
    InMemoryConsensusStore, QueryWindow, SignatureConsensusEngine, SignatureFlip, StorageResult,
    TerminalTransition, TrackCatalog, TrackId, Vote, VoteWrite,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Delegating store that never reports an active challenge, so every creator
/// gets past the pre-check and only the storage constraint can stop them.
struct BlindStore {
    inner: Arc<InMemoryConsensusStore>,
}

#[async_trait]
impl ChallengeStore for BlindStore {
    async fn insert_challenge(
        &self,
        challenge: &Challenge,
        initial_vote: Option<&Vote>,
    ) -> StorageResult<()> {
        self.inner.insert_challenge(challenge, initial_vote).await
    }

    async fn active_challenge(&self, _track_id: &TrackId) -> StorageResult<Option<Challenge>> {
        Ok(None)
    }

    async fn get_challenge(&self, challenge_id: &ChallengeId) -> StorageResult<Option<Challenge>> {
        self.inner.get_challenge(challenge_id).await
    }

    async fn list_challenges(
        &self,
        track_id: &TrackId,
        window: QueryWindow,
    ) -> StorageResult<Vec<Challenge>> {
        self.inner.list_challenges(track_id, window).await
    }

    async fn upsert_vote(&self, vote: &Vote, now: DateTime<Utc>) -> StorageResult<VoteWrite> {
        self.inner.upsert_vote(vote, now).await
    }

    async fn list_votes(&self, challenge_id: &ChallengeId) -> StorageResult<Vec<Vote>> {
        self.inner.list_votes(challenge_id).await
    }

    async fn finalize_challenge(
        &self,
        challenge_id: &ChallengeId,
        transition: &TerminalTransition,
        flip: Option<&SignatureFlip>,
    ) -> StorageResult<bool> {
        self.inner
            .finalize_challenge(challenge_id, transition, flip)
            .await
    }
}

/// Delegating store that counts terminal transitions that actually applied.
struct CountingStore {
    inner: Arc<InMemoryConsensusStore>,
    applied: AtomicUsize,
    flips: AtomicUsize,
}

#[async_trait]
impl ChallengeStore for CountingStore {
    async fn insert_challenge(
        &self,
        challenge: &Challenge,
        initial_vote: Option<&Vote>,
    ) -> StorageResult<()> {
        self.inner.insert_challenge(challenge, initial_vote).await
    }

    async fn active_challenge(&self, track_id: &TrackId) -> StorageResult<Option<Challenge>> {
        self.inner.active_challenge(track_id).await
    }

    async fn get_challenge(&self, challenge_id: &ChallengeId) -> StorageResult<Option<Challenge>> {
        self.inner.get_challenge(challenge_id).await
    }

    async fn list_challenges(
        &self,
        track_id: &TrackId,
        window: QueryWindow,
    ) -> StorageResult<Vec<Challenge>> {
        self.inner.list_challenges(track_id, window).await
    }

    async fn upsert_vote(&self, vote: &Vote, now: DateTime<Utc>) -> StorageResult<VoteWrite> {
        self.inner.upsert_vote(vote, now).await
    }

    async fn list_votes(&self, challenge_id: &ChallengeId) -> StorageResult<Vec<Vote>> {
        self.inner.list_votes(challenge_id).await
    }

    async fn finalize_challenge(
        &self,
        challenge_id: &ChallengeId,
        transition: &TerminalTransition,
        flip: Option<&SignatureFlip>,
    ) -> StorageResult<bool> {
        let applied = self
            .inner
            .finalize_challenge(challenge_id, transition, flip)
            .await?;
        if applied {
            self.applied.fetch_add(1, Ordering::SeqCst);
            if flip.is_some() {
                self.flips.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(applied)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_yields_one_challenge() {
    let fx = fixture(&["a", "b", "c", "d", "e"], &[], &[("t", false)]);
    let engine = Arc::new(fx.engine);

    let mut handles = Vec::new();
    for who in ["a", "b", "c", "d", "e"] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_challenge(&track("t"), &member(who)).await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(ConsensusError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);

    let history = fx
        .store
        .list_challenges(&track("t"), QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn storage_uniqueness_is_reported_as_conflict() {
    let fx = fixture(&["a", "b", "c"], &[], &[("t", false)]);
    let blind = Arc::new(BlindStore {
        inner: fx.store.clone(),
    });
    let engine = Arc::new(
        SignatureConsensusEngine::new(blind, fx.store.clone(), fx.store.clone())
            .with_clock(fx.clock.clone()),
    );

    let mut handles = Vec::new();
    for who in ["a", "b", "c"] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.create_challenge(&track("t"), &member(who)).await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(ConsensusError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 2);

    let history = fx
        .store
        .list_challenges(&track("t"), QueryWindow::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deciding_votes_resolve_once() {
    let fx = fixture(
        &["a", "b", "c", "d", "e", "f", "g"],
        &[],
        &[("t", false)],
    );
    let counting = Arc::new(CountingStore {
        inner: fx.store.clone(),
        applied: AtomicUsize::new(0),
        flips: AtomicUsize::new(0),
    });
    let engine = Arc::new(
        SignatureConsensusEngine::new(counting.clone(), fx.store.clone(), fx.store.clone())
            .with_clock(fx.clock.clone()),
    );

    // Threshold is 4; "a" votes automatically, "b" and "c" bring it to one short.
    let opened = engine
        .create_challenge(&track("t"), &member("a"))
        .await
        .unwrap();
    for who in ["b", "c"] {
        engine.cast_vote(&track("t"), &member(who), true).await.unwrap();
    }

    let mut handles = Vec::new();
    for who in ["d", "e", "f", "g"] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.cast_vote(&track("t"), &member(who), true).await
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(view) => assert_eq!(view.challenge.result, Some(ChallengeResult::Approved)),
            // A voter that arrives after the winner finds no active challenge.
            Err(ConsensusError::NotFound(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(counting.applied.load(Ordering::SeqCst), 1);
    assert_eq!(counting.flips.load(Ordering::SeqCst), 1);
    assert_eq!(fx.store.signature_flag(&track("t")).await.unwrap(), Some(true));

    let stored = fx
        .store
        .get_challenge(&opened.challenge.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ChallengeStatus::Resolved);
    assert_eq!(stored.result, Some(ChallengeResult::Approved));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn expiry_and_resolution_never_both_apply() {
    let fx = fixture(&["a", "b", "c"], &[], &[("t", false)]);
    let counting = Arc::new(CountingStore {
        inner: fx.store.clone(),
        applied: AtomicUsize::new(0),
        flips: AtomicUsize::new(0),
    });
    let engine = Arc::new(
        SignatureConsensusEngine::new(counting.clone(), fx.store.clone(), fx.store.clone())
            .with_clock(fx.clock.clone()),
    );
    let opened = engine
        .create_challenge(&track("t"), &member("a"))
        .await
        .unwrap();

    fx.clock.advance(chrono::Duration::hours(48) + chrono::Duration::seconds(1));

    let reader = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.active_challenge(&track("t"), &member("b")).await })
    };
    let voter = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.cast_vote(&track("t"), &member("b"), true).await })
    };

    assert!(reader.await.unwrap().unwrap().is_none());
    match voter.await.unwrap() {
        Err(ConsensusError::Expired(_)) | Err(ConsensusError::NotFound(_)) => {}
        other => panic!("late vote was not refused: {other:?}"),
    }

    assert_eq!(counting.applied.load(Ordering::SeqCst), 1);
    assert_eq!(counting.flips.load(Ordering::SeqCst), 0);
    let stored = fx
        .store
        .get_challenge(&opened.challenge.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ChallengeStatus::Expired);
    assert_eq!(fx.store.signature_flag(&track("t")).await.unwrap(), Some(false));
}
