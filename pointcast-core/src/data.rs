use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The type used for entity identifiers in the remote store.
pub type EntityId = String;

pub type RoomId = EntityId;
pub type ParticipantId = EntityId;
pub type StoryId = EntityId;
pub type VoteId = EntityId;
pub type UserId = EntityId;

/// The deck a room estimates with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeckType {
    Scrum,
    Fibonacci,
    Sequential,
    Tshirt,
}

/// Where a story is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    /// Waiting in the queue, not yet estimated
    Queue,
    /// Currently being voted on, votes hidden
    Active,
    /// Votes are visible, awaiting a final estimate
    Revealed,
    /// Estimated and recorded. Terminal.
    Completed,
}

/// An estimation room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    /// The user that created and moderates the room
    pub owner_id: UserId,
    pub deck_type: DeckType,
    /// Optional voting timer, in seconds
    pub timer_duration: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// A user's membership in a room.
/// Note: `room_id` and `user_id` are unique together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub name: String,
    pub avatar_color: Option<String>,
    /// Mirrored from the ephemeral presence channel, this is the ground truth
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// One estimable work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub room_id: RoomId,
    pub title: String,
    pub description: Option<String>,
    pub status: StoryStatus,
    /// The final estimate, recorded on completion
    pub points: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Queue ordering key, ties broken by id
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

/// One participant's estimate for a story.
/// Note: `story_id` and `user_id` are unique together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub story_id: StoryId,
    pub user_id: UserId,
    pub user_name: String,
    pub value: String,
    pub voted_at: DateTime<Utc>,
}

impl Story {
    /// A story in either of these states is "the" story of the room
    pub fn is_current(&self) -> bool {
        matches!(self.status, StoryStatus::Active | StoryStatus::Revealed)
    }
}

impl Participant {
    /// Whether this participant should still appear in the roster at `now`.
    ///
    /// Online participants are always visible. Offline ones linger for the
    /// given window so a flaky reconnect doesn't flicker the roster, then
    /// disappear without requiring an explicit delete.
    pub fn is_visible(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.is_online || now - self.last_seen < window
    }
}

#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub description: Option<String>,
    /// The owner of the new room
    pub owner_id: UserId,
    pub deck_type: DeckType,
    pub timer_duration: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub deck_type: Option<DeckType>,
    pub timer_duration: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub name: String,
    pub avatar_color: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantPatch {
    pub name: Option<String>,
    pub avatar_color: Option<String>,
    pub is_online: Option<bool>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewStory {
    pub room_id: RoomId,
    pub title: String,
    pub description: Option<String>,
    pub status: StoryStatus,
    pub position: i64,
}

#[derive(Debug, Clone, Default)]
pub struct StoryPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<StoryStatus>,
    pub points: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewVote {
    pub story_id: StoryId,
    pub user_id: UserId,
    pub user_name: String,
    pub value: String,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VotePatch {
    pub value: String,
    pub voted_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Duration;

    #[test]
    fn participant_visibility_window() {
        let window = Duration::minutes(2);
        let now = Utc::now();

        let participant = |is_online, seen_ago: Duration| Participant {
            id: "p1".to_string(),
            room_id: "r1".to_string(),
            user_id: "u1".to_string(),
            name: "Ada".to_string(),
            avatar_color: None,
            is_online,
            last_seen: now - seen_ago,
        };

        assert!(participant(true, Duration::minutes(10)).is_visible(now, window));
        assert!(participant(false, Duration::minutes(1)).is_visible(now, window));
        assert!(!participant(false, Duration::minutes(3)).is_visible(now, window));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&StoryStatus::Revealed).unwrap();
        assert_eq!(json, "\"revealed\"");

        let back: StoryStatus = serde_json::from_str("\"queue\"").unwrap();
        assert_eq!(back, StoryStatus::Queue);
    }
}
