use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Tunables for the challenge lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Hours a challenge stays open for voting.
    #[serde(default = "default_challenge_ttl_hours")]
    pub challenge_ttl_hours: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            challenge_ttl_hours: default_challenge_ttl_hours(),
        }
    }
}

impl ConsensusConfig {
    pub fn challenge_ttl(&self) -> Duration {
        Duration::hours(i64::from(self.challenge_ttl_hours))
    }
}

const fn default_challenge_ttl_hours() -> u32 {
    48
}
