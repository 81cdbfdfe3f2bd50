use std::time::Duration;

use chrono::Duration as ChronoDuration;

/// The configuration of the synchronization engine
#[derive(Debug, Clone)]
pub struct Config {
    /// How often the participant roster is refetched
    pub participant_poll_interval: Duration,
    /// How often the story queue is refetched
    pub story_poll_interval: Duration,
    /// How often votes for the active story are refetched
    pub vote_poll_interval: Duration,
    /// How long an offline participant stays visible in the roster
    pub offline_timeout: Duration,
}

impl Config {
    /// The offline timeout as a chrono duration, for timestamp arithmetic
    pub fn offline_window(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.offline_timeout).unwrap_or_else(|_| ChronoDuration::zero())
    }

    /// The name of the ephemeral presence topic for a room
    pub fn presence_topic(room_id: &str) -> String {
        format!("presence:{}", room_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Push delivery usually wins, the sweep just heals missed events
            participant_poll_interval: Duration::from_secs(5),
            story_poll_interval: Duration::from_secs(5),
            // Votes are latency-sensitive during a round
            vote_poll_interval: Duration::from_secs(3),
            // Enough to survive a flaky reconnect without ghosting the roster
            offline_timeout: Duration::from_secs(2 * 60),
        }
    }
}
