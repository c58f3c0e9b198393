//! Threshold and tally math.

use crate::model::{Challenge, ChallengeResult, MemberId, Tally, Vote};

/// Majority quorum for a roster of `total_admins`: `floor(total_admins / 2) + 1`.
pub fn threshold_for(total_admins: u32) -> u32 {
    total_admins / 2 + 1
}

/// Count the given vote rows against `threshold`.
pub fn tally(votes: &[Vote], threshold: u32) -> Tally {
    let agree_count = votes.iter().filter(|v| v.agree).count() as u32;
    let disagree_count = votes.len() as u32 - agree_count;
    Tally {
        agree_count,
        disagree_count,
        total_votes: agree_count + disagree_count,
        threshold,
    }
}

/// The vote `member_id` currently holds among `votes`, if any.
pub fn vote_of(votes: &[Vote], member_id: &MemberId) -> Option<bool> {
    votes
        .iter()
        .find(|v| &v.member_id == member_id)
        .map(|v| v.agree)
}

/// Outcome an active challenge has reached with the given tally, if any.
///
/// Approval is checked first so a tally that both meets the threshold and
/// exhausts the roster resolves as approved.
pub fn decide(challenge: &Challenge, tally: &Tally) -> Option<ChallengeResult> {
    if tally.agree_count >= challenge.threshold {
        Some(ChallengeResult::Approved)
    } else if tally.total_votes >= challenge.total_admins {
        Some(ChallengeResult::Rejected)
    } else {
        None
    }
}
