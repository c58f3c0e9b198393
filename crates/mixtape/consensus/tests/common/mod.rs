#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use mixtape_consensus::{
    Clock, InMemoryConsensusStore, ManualClock, MemberId, MemberRole, SignatureConsensusEngine,
    TrackId,
};
use std::sync::Arc;

pub struct Fixture {
    pub store: Arc<InMemoryConsensusStore>,
    pub clock: Arc<ManualClock>,
    pub engine: SignatureConsensusEngine,
}

/// Engine over an in-memory backend with a manual clock fixed at 2024-06-01 12:00 UTC.
pub fn fixture(admins: &[&str], members: &[&str], tracks: &[(&str, bool)]) -> Fixture {
    let store = Arc::new(InMemoryConsensusStore::new());
    for admin in admins {
        store.upsert_member(MemberId::new(*admin), MemberRole::Admin);
    }
    for member in members {
        store.upsert_member(MemberId::new(*member), MemberRole::Member);
    }
    for (track, is_signature) in tracks {
        store.insert_track(TrackId::new(*track), *is_signature);
    }
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    ));
    let engine = SignatureConsensusEngine::from_backend(store.clone()).with_clock(clock.clone());
    Fixture {
        store,
        clock,
        engine,
    }
}

impl Fixture {
    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub fn track(id: &str) -> TrackId {
    TrackId::new(id)
}

pub fn member(id: &str) -> MemberId {
    MemberId::new(id)
}
