use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Opaque catalog identifier of a mixtape track.
    TrackId
);
string_id!(
    /// Opaque identifier of a group member.
    MemberId
);
string_id!(
    /// Identifier of a signature challenge.
    ChallengeId
);

impl ChallengeId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Membership capability as reported by the admin roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Admin,
}

impl MemberRole {
    pub fn is_admin(self) -> bool {
        matches!(self, MemberRole::Admin)
    }
}

/// Direction of the proposed flag change, fixed when the challenge opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Promote,
    Demote,
}

impl ChallengeKind {
    /// Kind of challenge that would flip a track currently flagged `is_signature`.
    pub fn for_current_flag(is_signature: bool) -> Self {
        if is_signature {
            ChallengeKind::Demote
        } else {
            ChallengeKind::Promote
        }
    }

    /// Flag value the track takes when a challenge of this kind is approved.
    pub fn target_flag(self) -> bool {
        matches!(self, ChallengeKind::Promote)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Promote => "promote",
            ChallengeKind::Demote => "demote",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Active,
    Resolved,
    Expired,
}

impl ChallengeStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChallengeStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeStatus::Active => "active",
            ChallengeStatus::Resolved => "resolved",
            ChallengeStatus::Expired => "expired",
        }
    }
}

/// Outcome of a terminal challenge. Expiry is recorded as `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeResult {
    Approved,
    Rejected,
}

impl ChallengeResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeResult::Approved => "approved",
            ChallengeResult::Rejected => "rejected",
        }
    }
}

/// Persistent challenge record.
///
/// `total_admins` and `threshold` are snapshots taken at creation and are
/// never recomputed, even if the roster changes while the challenge is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub track_id: TrackId,
    pub challenger_id: MemberId,
    pub kind: ChallengeKind,
    pub status: ChallengeStatus,
    pub result: Option<ChallengeResult>,
    pub total_admins: u32,
    pub threshold: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Challenge {
    pub fn is_active(&self) -> bool {
        self.status == ChallengeStatus::Active
    }

    /// True when the challenge is still marked active but its window has lapsed.
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now > self.expires_at
    }

    /// Flag write applied to the track when this challenge is approved.
    pub fn approval_flip(&self) -> SignatureFlip {
        SignatureFlip {
            track_id: self.track_id.clone(),
            is_signature: self.kind.target_flag(),
        }
    }
}

/// One admin's position on a challenge. Re-voting replaces the prior row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub challenge_id: ChallengeId,
    pub member_id: MemberId,
    pub agree: bool,
}

/// Vote counts derived from the current vote rows. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub agree_count: u32,
    pub disagree_count: u32,
    pub total_votes: u32,
    pub threshold: u32,
}

/// Track flag write performed in the same unit as an approving transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureFlip {
    pub track_id: TrackId,
    pub is_signature: bool,
}

/// A challenge together with its live tallies and the viewer's own vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeView {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub tally: Tally,
    pub viewer_vote: Option<bool>,
}

/// Per-track slot in a batch listing of active challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveChallengeEntry {
    pub track_id: TrackId,
    pub challenge: Option<ChallengeView>,
}
