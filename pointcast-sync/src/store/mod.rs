use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod memory;
pub use memory::*;

use pointcast_core::{
    NewParticipant, NewRoom, NewStory, NewVote, Participant, ParticipantPatch, Room, RoomId,
    RoomPatch, Story, StoryId, StoryPatch, StoryStatus, UserId, Vote, VotePatch,
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend is not configured. Synchronization stays disabled.
    #[error("remote store is not configured")]
    NotConfigured,
    /// A record in the store doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: String,
    },
    /// A uniqueness or precondition violation
    #[error("{resource} with {field} of value {value} conflicts")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// An unknown or internal error happened with the store
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

/// What happened to a record on a change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One change notification as delivered by the push feed.
///
/// The record arrives untyped. Consumers deserialize it themselves and drop
/// payloads that don't parse, since the feed offers no schema guarantee.
#[derive(Debug, Clone)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub record: Value,
}

/// The slice of a table a change subscription covers
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeScope {
    Room(RoomId),
    Participants(RoomId),
    Stories(RoomId),
    /// All votes. Consumers filter by their story scope.
    Votes,
}

pub type ChangeCallback = Box<dyn Fn(RawChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEventKind {
    Join,
    Leave,
}

/// A liveness transition on an ephemeral presence topic
#[derive(Debug, Clone)]
pub struct PresenceEvent {
    pub kind: PresenceEventKind,
    /// The key the entry was tracked under, a user id
    pub key: UserId,
}

pub type PresenceCallback = Box<dyn Fn(PresenceEvent) + Send + Sync>;

/// What a client advertises about itself on a presence topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub name: String,
    pub avatar_color: Option<String>,
    pub online_at: DateTime<Utc>,
}

/// A handle to an active subscription, which unsubscribes when dropped
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel()
        }
    }
}

/// Represents a backend that owns the durable room data.
///
/// Any backend offering this capability set satisfies the contract. The
/// engine treats it as the single source of truth and only keeps a
/// session-scoped cache in front of it.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn room_by_id(&self, room_id: &str) -> StoreResult<Room>;
    async fn create_room(&self, new_room: NewRoom) -> StoreResult<Room>;
    async fn update_room(&self, room_id: &str, patch: RoomPatch) -> StoreResult<Room>;
    async fn delete_room(&self, room_id: &str) -> StoreResult<()>;

    /// All participants of a room, most recently seen first
    async fn participants_in_room(&self, room_id: &str) -> StoreResult<Vec<Participant>>;
    async fn participant_by_user(&self, room_id: &str, user_id: &str) -> StoreResult<Participant>;
    async fn create_participant(&self, new_participant: NewParticipant) -> StoreResult<Participant>;
    async fn update_participant(
        &self,
        participant_id: &str,
        patch: ParticipantPatch,
    ) -> StoreResult<Participant>;
    /// Writes the durable online flag and last-seen for a (room, user) pair
    async fn set_participant_status(
        &self,
        room_id: &str,
        user_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// All stories of a room, ascending by position
    async fn stories_in_room(&self, room_id: &str) -> StoreResult<Vec<Story>>;
    async fn create_story(&self, new_story: NewStory) -> StoreResult<Story>;
    async fn create_stories(&self, new_stories: Vec<NewStory>) -> StoreResult<Vec<Story>>;
    async fn update_story(&self, story_id: &str, patch: StoryPatch) -> StoreResult<Story>;
    /// Applies the patch only while the story is in one of the expected
    /// statuses, failing with a conflict otherwise. Keeps a stale lifecycle
    /// transition from clobbering a story that already moved on.
    async fn update_story_guarded(
        &self,
        story_id: &str,
        expected: &[StoryStatus],
        patch: StoryPatch,
    ) -> StoreResult<Story>;
    async fn delete_story(&self, story_id: &str) -> StoreResult<()>;

    /// All votes for a story, ascending by voted-at
    async fn votes_for_story(&self, story_id: &str) -> StoreResult<Vec<Vote>>;
    async fn votes_for_stories(&self, story_ids: &[StoryId]) -> StoreResult<Vec<Vote>>;
    async fn vote_by_user(&self, story_id: &str, user_id: &str) -> StoreResult<Vote>;
    async fn create_vote(&self, new_vote: NewVote) -> StoreResult<Vote>;
    async fn update_vote(&self, vote_id: &str, patch: VotePatch) -> StoreResult<Vote>;
    async fn delete_votes_for_story(&self, story_id: &str) -> StoreResult<()>;

    /// Subscribes to change notifications for a scope. Delivery is
    /// best-effort: unordered, possibly duplicated, possibly dropped.
    fn subscribe_changes(&self, scope: ChangeScope, callback: ChangeCallback) -> Subscription;

    async fn track_presence(&self, topic: &str, key: &str, payload: PresencePayload) -> StoreResult<()>;
    async fn untrack_presence(&self, topic: &str, key: &str) -> StoreResult<()>;
    fn subscribe_presence(&self, topic: &str, callback: PresenceCallback) -> Subscription;
}
