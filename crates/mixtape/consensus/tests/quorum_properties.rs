//! Property tests for quorum math and vote replacement.

mod common;

use chrono::{TimeZone, Utc};
use common::{fixture, member, track};
use mixtape_consensus::quorum::{decide, tally, threshold_for};
use mixtape_consensus::{
    Challenge, ChallengeId, ChallengeKind, ChallengeResult, ChallengeStatus, MemberId, TrackId,
    Vote,
};
use proptest::prelude::*;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn open_challenge(total_admins: u32) -> Challenge {
    let created_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    Challenge {
        id: ChallengeId::new("c"),
        track_id: TrackId::new("t"),
        challenger_id: MemberId::new("m"),
        kind: ChallengeKind::Promote,
        status: ChallengeStatus::Active,
        result: None,
        total_admins,
        threshold: threshold_for(total_admins),
        created_at,
        expires_at: created_at + chrono::Duration::hours(48),
        resolved_at: None,
    }
}

/// A roster size together with a split of cast votes that fits inside it.
fn arb_split() -> impl Strategy<Value = (u32, u32, u32)> {
    (1u32..60).prop_flat_map(|total| {
        (Just(total), 0..=total).prop_flat_map(|(total, cast)| {
            (Just(total), 0..=cast).prop_map(move |(total, agree)| (total, agree, cast - agree))
        })
    })
}

/// A sequence of `(voter index, agree)` pairs over three voters.
fn arb_script() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0usize..3, any::<bool>()), 1..24)
}

fn votes(agree: u32, disagree: u32) -> Vec<Vote> {
    (0..agree + disagree)
        .map(|i| Vote {
            challenge_id: ChallengeId::new("c"),
            member_id: MemberId::new(format!("admin-{i}")),
            agree: i < agree,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn threshold_is_strict_majority(total in 1u32..10_000) {
        let threshold = threshold_for(total);
        prop_assert!(threshold * 2 > total);
        prop_assert!((threshold - 1) * 2 <= total);
        prop_assert!(threshold <= total);
    }

    #[test]
    fn tally_counts_every_row_once((total, agree, disagree) in arb_split()) {
        let counted = tally(&votes(agree, disagree), threshold_for(total));
        prop_assert_eq!(counted.agree_count, agree);
        prop_assert_eq!(counted.disagree_count, disagree);
        prop_assert_eq!(counted.total_votes, agree + disagree);
        prop_assert_eq!(counted.threshold, threshold_for(total));
    }

    #[test]
    fn decision_follows_threshold_then_turnout((total, agree, disagree) in arb_split()) {
        let challenge = open_challenge(total);
        let counted = tally(&votes(agree, disagree), challenge.threshold);
        let expected = if agree >= challenge.threshold {
            Some(ChallengeResult::Approved)
        } else if agree + disagree == total {
            Some(ChallengeResult::Rejected)
        } else {
            None
        };
        prop_assert_eq!(decide(&challenge, &counted), expected);
    }

    #[test]
    fn latest_vote_per_admin_wins(script in arb_script()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        // Nine admins put the threshold at five, out of reach of three voters.
        let admins = ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8"];
        let fx = fixture(&admins, &["m"], &[("t", false)]);

        let mut latest = HashMap::new();
        let last = runtime.block_on(async {
            fx.engine
                .create_challenge(&track("t"), &member("m"))
                .await
                .unwrap();
            let mut last = None;
            for (voter, agree) in &script {
                latest.insert(*voter, *agree);
                let view = fx
                    .engine
                    .cast_vote(&track("t"), &member(admins[*voter]), *agree)
                    .await
                    .unwrap();
                last = Some(view);
            }
            last
        });

        let last = last.unwrap();
        let agree = latest.values().filter(|a| **a).count() as u32;
        prop_assert_eq!(last.challenge.status, ChallengeStatus::Active);
        prop_assert_eq!(last.tally.agree_count, agree);
        prop_assert_eq!(last.tally.total_votes, latest.len() as u32);
        prop_assert_eq!(last.viewer_vote, Some(script[script.len() - 1].1));
    }
}
