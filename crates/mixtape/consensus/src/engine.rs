//! Challenge lifecycle engine.
//!
//! Every operation reads fresh state from the store, applies lazy expiry
//! before acting on an active challenge, and relies on the store's
//! conditional writes for exclusion between concurrent callers.

use crate::clock::{Clock, SystemClock};
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, ConsensusResult, StorageError};
use crate::model::{
    ActiveChallengeEntry, Challenge, ChallengeId, ChallengeKind, ChallengeResult, ChallengeStatus,
    ChallengeView, MemberId, TrackId, Vote,
};
use crate::quorum;
use crate::traits::{
    AdminRoster, ChallengeStore, ConsensusBackend, QueryWindow, TerminalTransition, TrackCatalog,
    VoteWrite,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Drives signature challenges from creation to resolution.
pub struct SignatureConsensusEngine {
    store: Arc<dyn ChallengeStore>,
    catalog: Arc<dyn TrackCatalog>,
    roster: Arc<dyn AdminRoster>,
    clock: Arc<dyn Clock>,
    config: ConsensusConfig,
}

impl SignatureConsensusEngine {
    pub fn new(
        store: Arc<dyn ChallengeStore>,
        catalog: Arc<dyn TrackCatalog>,
        roster: Arc<dyn AdminRoster>,
    ) -> Self {
        Self {
            store,
            catalog,
            roster,
            clock: Arc::new(SystemClock),
            config: ConsensusConfig::default(),
        }
    }

    /// Build an engine whose store, catalog and roster are one backend.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ConsensusBackend + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ConsensusConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Open a challenge against the track's current signature flag.
    ///
    /// Admin challengers get an automatic agreeing vote, which resolves the
    /// challenge immediately when it alone meets the threshold.
    #[instrument(skip(self), fields(track_id = %track_id, challenger_id = %challenger_id))]
    pub async fn create_challenge(
        &self,
        track_id: &TrackId,
        challenger_id: &MemberId,
    ) -> ConsensusResult<ChallengeView> {
        require_id("track id", track_id.as_str())?;
        require_id("member id", challenger_id.as_str())?;
        let now = self.clock.now();

        let is_signature = self
            .catalog
            .signature_flag(track_id)
            .await?
            .ok_or_else(|| ConsensusError::NotFound(format!("track {} not found", track_id)))?;
        let role = self
            .roster
            .member_role(challenger_id)
            .await?
            .ok_or_else(|| {
                ConsensusError::NotFound(format!("member {} not found", challenger_id))
            })?;

        if let Some(existing) = self.store.active_challenge(track_id).await? {
            if existing.is_lapsed_at(now) {
                self.expire(&existing, now).await?;
            } else {
                return Err(active_conflict(track_id));
            }
        }

        let total_admins = self.roster.admin_count().await?;
        let challenge = Challenge {
            id: ChallengeId::generate(),
            track_id: track_id.clone(),
            challenger_id: challenger_id.clone(),
            kind: ChallengeKind::for_current_flag(is_signature),
            status: ChallengeStatus::Active,
            result: None,
            total_admins,
            threshold: quorum::threshold_for(total_admins),
            created_at: now,
            expires_at: now + self.config.challenge_ttl(),
            resolved_at: None,
        };
        let auto_vote = role.is_admin().then(|| Vote {
            challenge_id: challenge.id.clone(),
            member_id: challenger_id.clone(),
            agree: true,
        });

        match self
            .store
            .insert_challenge(&challenge, auto_vote.as_ref())
            .await
        {
            Ok(()) => {}
            Err(StorageError::Conflict(detail)) => {
                warn!(%detail, "concurrent challenge creation lost the uniqueness race");
                return Err(active_conflict(track_id));
            }
            Err(StorageError::NotFound(detail)) => return Err(ConsensusError::NotFound(detail)),
            Err(err) => return Err(err.into()),
        }
        info!(
            challenge_id = %challenge.id,
            kind = challenge.kind.as_str(),
            total_admins,
            threshold = challenge.threshold,
            "Opened signature challenge"
        );

        let votes = self.store.list_votes(&challenge.id).await?;
        let tally = quorum::tally(&votes, challenge.threshold);
        let challenge = if tally.agree_count >= challenge.threshold {
            self.resolve(challenge, ChallengeResult::Approved, now)
                .await?
        } else {
            challenge
        };

        Ok(view(challenge, &votes, challenger_id))
    }

    /// Record or replace an admin's vote on the track's active challenge.
    #[instrument(skip(self), fields(track_id = %track_id, voter_id = %voter_id))]
    pub async fn cast_vote(
        &self,
        track_id: &TrackId,
        voter_id: &MemberId,
        agree: bool,
    ) -> ConsensusResult<ChallengeView> {
        require_id("track id", track_id.as_str())?;
        require_id("member id", voter_id.as_str())?;
        let now = self.clock.now();

        if !self.roster.is_admin(voter_id).await? {
            return Err(ConsensusError::Forbidden(format!(
                "member {} is not an admin",
                voter_id
            )));
        }

        let challenge = self
            .store
            .active_challenge(track_id)
            .await?
            .ok_or_else(|| no_active_challenge(track_id))?;
        if challenge.is_lapsed_at(now) {
            self.expire(&challenge, now).await?;
            return Err(lapsed(&challenge));
        }

        let vote = Vote {
            challenge_id: challenge.id.clone(),
            member_id: voter_id.clone(),
            agree,
        };
        if self.store.upsert_vote(&vote, now).await? == VoteWrite::Closed {
            return Err(self.closed_under_vote(&challenge, track_id, now).await?);
        }
        debug!(challenge_id = %challenge.id, "Recorded vote");

        let votes = self.store.list_votes(&challenge.id).await?;
        let tally = quorum::tally(&votes, challenge.threshold);
        let challenge = match quorum::decide(&challenge, &tally) {
            Some(result) => self.resolve(challenge, result, now).await?,
            None => challenge,
        };

        Ok(view(challenge, &votes, voter_id))
    }

    /// The track's active challenge with live tallies, or `None`.
    ///
    /// A lapsed challenge is expired on the way through and reported as absent.
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub async fn active_challenge(
        &self,
        track_id: &TrackId,
        viewer_id: &MemberId,
    ) -> ConsensusResult<Option<ChallengeView>> {
        let now = self.clock.now();
        let Some(challenge) = self.store.active_challenge(track_id).await? else {
            return Ok(None);
        };
        if challenge.is_lapsed_at(now) {
            self.expire(&challenge, now).await?;
            return Ok(None);
        }
        let votes = self.store.list_votes(&challenge.id).await?;
        Ok(Some(view(challenge, &votes, viewer_id)))
    }

    /// Active challenge lookup for several tracks, one entry per track in request order.
    pub async fn active_challenges(
        &self,
        track_ids: &[TrackId],
        viewer_id: &MemberId,
    ) -> ConsensusResult<Vec<ActiveChallengeEntry>> {
        let mut entries = Vec::with_capacity(track_ids.len());
        for track_id in track_ids {
            entries.push(ActiveChallengeEntry {
                track_id: track_id.clone(),
                challenge: self.active_challenge(track_id, viewer_id).await?,
            });
        }
        Ok(entries)
    }

    /// A single challenge by id, active or terminal.
    #[instrument(skip(self), fields(challenge_id = %challenge_id))]
    pub async fn challenge(
        &self,
        challenge_id: &ChallengeId,
        viewer_id: &MemberId,
    ) -> ConsensusResult<ChallengeView> {
        let now = self.clock.now();
        let challenge = self
            .store
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| {
                ConsensusError::NotFound(format!("challenge {} not found", challenge_id))
            })?;
        let challenge = self.reconcile(challenge, now).await?;
        let votes = self.store.list_votes(&challenge.id).await?;
        Ok(view(challenge, &votes, viewer_id))
    }

    /// Every challenge opened on the track, newest first.
    #[instrument(skip(self), fields(track_id = %track_id))]
    pub async fn challenge_history(
        &self,
        track_id: &TrackId,
        window: QueryWindow,
        viewer_id: &MemberId,
    ) -> ConsensusResult<Vec<ChallengeView>> {
        let now = self.clock.now();
        let challenges = self.store.list_challenges(track_id, window).await?;
        let mut views = Vec::with_capacity(challenges.len());
        for challenge in challenges {
            let challenge = self.reconcile(challenge, now).await?;
            let votes = self.store.list_votes(&challenge.id).await?;
            views.push(view(challenge, &votes, viewer_id));
        }
        Ok(views)
    }

    /// Expire the challenge if it has lapsed and return its current state.
    async fn reconcile(&self, challenge: Challenge, now: DateTime<Utc>) -> ConsensusResult<Challenge> {
        if challenge.is_lapsed_at(now) {
            self.expire(&challenge, now).await
        } else {
            Ok(challenge)
        }
    }

    async fn expire(&self, challenge: &Challenge, now: DateTime<Utc>) -> ConsensusResult<Challenge> {
        let transition = TerminalTransition::expired(now);
        if self
            .store
            .finalize_challenge(&challenge.id, &transition, None)
            .await?
        {
            info!(
                challenge_id = %challenge.id,
                track_id = %challenge.track_id,
                "Signature challenge expired"
            );
            Ok(apply(challenge.clone(), &transition))
        } else {
            self.reload(&challenge.id).await
        }
    }

    /// Resolve an active challenge. The guarded store transition decides the
    /// winner when several callers resolve concurrently; losers get the
    /// stored state back and perform no flag write.
    async fn resolve(
        &self,
        challenge: Challenge,
        result: ChallengeResult,
        now: DateTime<Utc>,
    ) -> ConsensusResult<Challenge> {
        let transition = TerminalTransition::resolved(result, now);
        let flip = (result == ChallengeResult::Approved).then(|| challenge.approval_flip());
        if self
            .store
            .finalize_challenge(&challenge.id, &transition, flip.as_ref())
            .await?
        {
            info!(
                challenge_id = %challenge.id,
                track_id = %challenge.track_id,
                result = result.as_str(),
                "Signature challenge resolved"
            );
            if let Some(flip) = &flip {
                info!(
                    track_id = %flip.track_id,
                    is_signature = flip.is_signature,
                    "Signature flag updated"
                );
            }
            Ok(apply(challenge, &transition))
        } else {
            debug!(challenge_id = %challenge.id, "Challenge already terminal, resolution skipped");
            self.reload(&challenge.id).await
        }
    }

    async fn reload(&self, challenge_id: &ChallengeId) -> ConsensusResult<Challenge> {
        self.store
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| {
                ConsensusError::NotFound(format!("challenge {} not found", challenge_id))
            })
    }

    /// Work out why the store refused a vote on a challenge we saw as active.
    async fn closed_under_vote(
        &self,
        challenge: &Challenge,
        track_id: &TrackId,
        now: DateTime<Utc>,
    ) -> ConsensusResult<ConsensusError> {
        let current = self.reload(&challenge.id).await?;
        if current.is_lapsed_at(now) {
            self.expire(&current, now).await?;
            return Ok(lapsed(&current));
        }
        Ok(match current.status {
            ChallengeStatus::Expired => lapsed(&current),
            ChallengeStatus::Active | ChallengeStatus::Resolved => no_active_challenge(track_id),
        })
    }
}

fn apply(mut challenge: Challenge, transition: &TerminalTransition) -> Challenge {
    challenge.status = transition.status;
    challenge.result = Some(transition.result);
    challenge.resolved_at = Some(transition.resolved_at);
    challenge
}

fn view(challenge: Challenge, votes: &[Vote], viewer_id: &MemberId) -> ChallengeView {
    ChallengeView {
        tally: quorum::tally(votes, challenge.threshold),
        viewer_vote: quorum::vote_of(votes, viewer_id),
        challenge,
    }
}

fn require_id(what: &str, raw: &str) -> ConsensusResult<()> {
    if raw.trim().is_empty() {
        return Err(ConsensusError::Validation(format!("{what} must not be empty")));
    }
    Ok(())
}

fn active_conflict(track_id: &TrackId) -> ConsensusError {
    ConsensusError::Conflict(format!("track {} already has an active challenge", track_id))
}

fn no_active_challenge(track_id: &TrackId) -> ConsensusError {
    ConsensusError::NotFound(format!("track {} has no active challenge", track_id))
}

fn lapsed(challenge: &Challenge) -> ConsensusError {
    ConsensusError::Expired(format!(
        "challenge {} closed at {}",
        challenge.id,
        challenge.expires_at.to_rfc3339()
    ))
}
