//! PostgreSQL adapter for the consensus storage traits.
//!
//! The single-active-challenge rule is a partial unique index over
//! `track_id WHERE status = 'active'`; a losing concurrent insert surfaces as
//! SQLSTATE 23505 and is reported as `StorageError::Conflict`. Vote upserts
//! and terminal transitions are conditional statements, so no row locks are
//! held across round trips.
//!
//! `mixtape_tracks` and `mixtape_members` are normally owned by the catalog
//! and membership services; they are created here only if missing.

use crate::model::{
    Challenge, ChallengeId, ChallengeKind, ChallengeResult, ChallengeStatus, MemberId, MemberRole,
    SignatureFlip, TrackId, Vote,
};
use crate::traits::{
    AdminRoster, ChallengeStore, QueryWindow, TerminalTransition, TrackCatalog, VoteWrite,
};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

/// PostgreSQL-backed consensus store.
#[derive(Clone)]
pub struct PostgresConsensusStore {
    pool: PgPool,
}

impl PostgresConsensusStore {
    /// Connect to PostgreSQL and initialize required schema.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::connect_with_options(database_url, 10, 5).await
    }

    /// Connect with explicit pool parameters.
    pub async fn connect_with_options(
        database_url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect postgres: {e}")))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create adapter from an existing pool.
    pub async fn from_pool(pool: PgPool) -> StorageResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn init_schema(&self) -> StorageResult<()> {
        let ddl = [
            r#"
            CREATE TABLE IF NOT EXISTS mixtape_tracks (
                track_id TEXT PRIMARY KEY,
                is_signature BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mixtape_members (
                member_id TEXT PRIMARY KEY,
                is_admin BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mixtape_signature_challenges (
                challenge_id TEXT PRIMARY KEY,
                track_id TEXT NOT NULL REFERENCES mixtape_tracks (track_id),
                challenger_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                total_admins INTEGER NOT NULL,
                threshold INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                resolved_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS mixtape_signature_challenges_one_active
                ON mixtape_signature_challenges (track_id)
             WHERE status = 'active'
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS mixtape_signature_challenges_by_track
                ON mixtape_signature_challenges (track_id, created_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS mixtape_signature_votes (
                challenge_id TEXT NOT NULL REFERENCES mixtape_signature_challenges (challenge_id),
                member_id TEXT NOT NULL,
                agree BOOLEAN NOT NULL,
                PRIMARY KEY (challenge_id, member_id)
            )
            "#,
        ];

        for stmt in ddl {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }
}

const CHALLENGE_COLUMNS: &str = "challenge_id, track_id, challenger_id, kind, status, result, \
     total_admins, threshold, created_at, expires_at, resolved_at";

#[async_trait]
impl AdminRoster for PostgresConsensusStore {
    async fn admin_count(&self) -> StorageResult<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM mixtape_members WHERE is_admin")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        u32::try_from(count)
            .map_err(|_| StorageError::InvariantViolation(format!("admin count {count} overflows")))
    }

    async fn member_role(&self, member_id: &MemberId) -> StorageResult<Option<MemberRole>> {
        let is_admin: Option<bool> =
            sqlx::query_scalar("SELECT is_admin FROM mixtape_members WHERE member_id = $1")
                .bind(member_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(is_admin.map(|admin| {
            if admin {
                MemberRole::Admin
            } else {
                MemberRole::Member
            }
        }))
    }
}

#[async_trait]
impl TrackCatalog for PostgresConsensusStore {
    async fn signature_flag(&self, track_id: &TrackId) -> StorageResult<Option<bool>> {
        sqlx::query_scalar("SELECT is_signature FROM mixtape_tracks WHERE track_id = $1")
            .bind(track_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn set_signature_flag(
        &self,
        track_id: &TrackId,
        is_signature: bool,
    ) -> StorageResult<()> {
        let result = sqlx::query("UPDATE mixtape_tracks SET is_signature = $1 WHERE track_id = $2")
            .bind(is_signature)
            .bind(track_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("track {} not found", track_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ChallengeStore for PostgresConsensusStore {
    async fn insert_challenge(
        &self,
        challenge: &Challenge,
        initial_vote: Option<&Vote>,
    ) -> StorageResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO mixtape_signature_challenges
                (challenge_id, track_id, challenger_id, kind, status, result,
                 total_admins, threshold, created_at, expires_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(challenge.id.as_str())
        .bind(challenge.track_id.as_str())
        .bind(challenge.challenger_id.as_str())
        .bind(challenge.kind.as_str())
        .bind(challenge.status.as_str())
        .bind(challenge.result.map(ChallengeResult::as_str))
        .bind(to_i32(challenge.total_admins)?)
        .bind(to_i32(challenge.threshold)?)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(challenge.resolved_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_write)?;

        if let Some(vote) = initial_vote {
            sqlx::query(
                r#"
                INSERT INTO mixtape_signature_votes (challenge_id, member_id, agree)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(vote.challenge_id.as_str())
            .bind(vote.member_id.as_str())
            .bind(vote.agree)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_write)?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn active_challenge(&self, track_id: &TrackId) -> StorageResult<Option<Challenge>> {
        let row = sqlx::query(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM mixtape_signature_challenges \
             WHERE track_id = $1 AND status = 'active'"
        ))
        .bind(track_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(challenge_row_to_record).transpose()
    }

    async fn get_challenge(&self, challenge_id: &ChallengeId) -> StorageResult<Option<Challenge>> {
        let row = sqlx::query(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM mixtape_signature_challenges WHERE challenge_id = $1"
        ))
        .bind(challenge_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(challenge_row_to_record).transpose()
    }

    async fn list_challenges(
        &self,
        track_id: &TrackId,
        window: QueryWindow,
    ) -> StorageResult<Vec<Challenge>> {
        let rows = if window.limit == 0 {
            sqlx::query(&format!(
                "SELECT {CHALLENGE_COLUMNS} FROM mixtape_signature_challenges \
                 WHERE track_id = $1 ORDER BY created_at DESC, challenge_id DESC OFFSET $2"
            ))
            .bind(track_id.as_str())
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        } else {
            sqlx::query(&format!(
                "SELECT {CHALLENGE_COLUMNS} FROM mixtape_signature_challenges \
                 WHERE track_id = $1 ORDER BY created_at DESC, challenge_id DESC \
                 LIMIT $2 OFFSET $3"
            ))
            .bind(track_id.as_str())
            .bind(to_i64(window.limit)?)
            .bind(to_i64(window.offset)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?
        };

        rows.into_iter().map(challenge_row_to_record).collect()
    }

    async fn upsert_vote(&self, vote: &Vote, now: DateTime<Utc>) -> StorageResult<VoteWrite> {
        let result = sqlx::query(
            r#"
            INSERT INTO mixtape_signature_votes (challenge_id, member_id, agree)
            SELECT c.challenge_id, $2, $3
              FROM mixtape_signature_challenges c
             WHERE c.challenge_id = $1
               AND c.status = 'active'
               AND c.expires_at >= $4
               FOR SHARE OF c
            ON CONFLICT (challenge_id, member_id) DO UPDATE SET agree = EXCLUDED.agree
            "#,
        )
        .bind(vote.challenge_id.as_str())
        .bind(vote.member_id.as_str())
        .bind(vote.agree)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() > 0 {
            return Ok(VoteWrite::Recorded);
        }
        if self.get_challenge(&vote.challenge_id).await?.is_none() {
            return Err(StorageError::NotFound(format!(
                "challenge {} not found",
                vote.challenge_id
            )));
        }
        Ok(VoteWrite::Closed)
    }

    async fn list_votes(&self, challenge_id: &ChallengeId) -> StorageResult<Vec<Vote>> {
        let rows = sqlx::query(
            r#"
            SELECT member_id, agree
              FROM mixtape_signature_votes
             WHERE challenge_id = $1
             ORDER BY member_id
            "#,
        )
        .bind(challenge_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(Vote {
                    challenge_id: challenge_id.clone(),
                    member_id: MemberId::new(
                        row.try_get::<String, _>("member_id")
                            .map_err(|e| StorageError::Backend(e.to_string()))?,
                    ),
                    agree: row
                        .try_get("agree")
                        .map_err(|e| StorageError::Backend(e.to_string()))?,
                })
            })
            .collect()
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

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE mixtape_signature_challenges
               SET status = $1,
                   result = $2,
                   resolved_at = $3
             WHERE challenge_id = $4
               AND status = 'active'
            "#,
        )
        .bind(transition.status.as_str())
        .bind(transition.result.as_str())
        .bind(transition.resolved_at)
        .bind(challenge_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if self.get_challenge(challenge_id).await?.is_none() {
                return Err(StorageError::NotFound(format!(
                    "challenge {} not found",
                    challenge_id
                )));
            }
            return Ok(false);
        }

        if let Some(flip) = flip {
            let updated =
                sqlx::query("UPDATE mixtape_tracks SET is_signature = $1 WHERE track_id = $2")
                    .bind(flip.is_signature)
                    .bind(flip.track_id.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
            if updated.rows_affected() == 0 {
                return Err(StorageError::NotFound(format!(
                    "track {} not found",
                    flip.track_id
                )));
            }
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(true)
    }
}

fn challenge_row_to_record(row: sqlx::postgres::PgRow) -> StorageResult<Challenge> {
    let kind: String = row
        .try_get("kind")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let result: Option<String> = row
        .try_get("result")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let total_admins: i32 = row
        .try_get("total_admins")
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    let threshold: i32 = row
        .try_get("threshold")
        .map_err(|e| StorageError::Backend(e.to_string()))?;

    Ok(Challenge {
        id: ChallengeId::new(
            row.try_get::<String, _>("challenge_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        track_id: TrackId::new(
            row.try_get::<String, _>("track_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        challenger_id: MemberId::new(
            row.try_get::<String, _>("challenger_id")
                .map_err(|e| StorageError::Backend(e.to_string()))?,
        ),
        kind: parse_kind(&kind)?,
        status: parse_status(&status)?,
        result: result.as_deref().map(parse_result).transpose()?,
        total_admins: from_i32(total_admins)?,
        threshold: from_i32(threshold)?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        expires_at: row
            .try_get("expires_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
        resolved_at: row
            .try_get("resolved_at")
            .map_err(|e| StorageError::Backend(e.to_string()))?,
    })
}

fn parse_kind(raw: &str) -> StorageResult<ChallengeKind> {
    match raw {
        "promote" => Ok(ChallengeKind::Promote),
        "demote" => Ok(ChallengeKind::Demote),
        _ => Err(StorageError::Serialization(format!(
            "unknown challenge kind `{raw}`"
        ))),
    }
}

fn parse_status(raw: &str) -> StorageResult<ChallengeStatus> {
    match raw {
        "active" => Ok(ChallengeStatus::Active),
        "resolved" => Ok(ChallengeStatus::Resolved),
        "expired" => Ok(ChallengeStatus::Expired),
        _ => Err(StorageError::Serialization(format!(
            "unknown challenge status `{raw}`"
        ))),
    }
}

fn parse_result(raw: &str) -> StorageResult<ChallengeResult> {
    match raw {
        "approved" => Ok(ChallengeResult::Approved),
        "rejected" => Ok(ChallengeResult::Rejected),
        _ => Err(StorageError::Serialization(format!(
            "unknown challenge result `{raw}`"
        ))),
    }
}

/// Unique violations become `Conflict`, foreign key violations `NotFound`.
fn map_sqlx_write(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.code().as_deref() {
            Some("23505") => return StorageError::Conflict(db_err.message().to_string()),
            Some("23503") => return StorageError::NotFound(db_err.message().to_string()),
            _ => {}
        }
    }
    StorageError::Backend(err.to_string())
}

fn to_i32(value: u32) -> StorageResult<i32> {
    i32::try_from(value).map_err(|_| StorageError::InvalidInput(format!("{value} exceeds INTEGER")))
}

fn from_i32(value: i32) -> StorageResult<u32> {
    u32::try_from(value)
        .map_err(|_| StorageError::Serialization(format!("negative counter {value} in row")))
}

fn to_i64(value: usize) -> StorageResult<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::InvalidInput("window value too large".to_string()))
}
