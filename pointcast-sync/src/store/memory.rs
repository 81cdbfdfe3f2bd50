use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use pointcast_core::{
    random_string, NewParticipant, NewRoom, NewStory, NewVote, Participant, ParticipantPatch,
    Room, RoomPatch, Story, StoryId, StoryPatch, StoryStatus, Vote, VotePatch,
};

use super::{
    ChangeCallback, ChangeKind, ChangeScope, PresenceCallback, PresenceEvent, PresenceEventKind,
    PresencePayload, RawChange, RemoteStore, StoreError, StoreResult, Subscription,
};

static SUBSCRIBER_COUNTER: AtomicCell<u64> = AtomicCell::new(1);

struct ChangeSubscriber {
    id: u64,
    scope: ChangeScope,
    callback: ChangeCallback,
}

struct PresenceSubscriber {
    id: u64,
    topic: String,
    callback: PresenceCallback,
}

/// An in-memory remote store.
///
/// The reference implementation of [RemoteStore], also used as the test
/// backend. Change notifications are delivered synchronously to subscribers,
/// which makes it a stricter backend than a real one: a racing push and poll
/// arrive closer together than they ever would over a network.
pub struct MemoryStore {
    configured: bool,

    rooms: DashMap<String, Room>,
    participants: DashMap<String, Participant>,
    stories: DashMap<String, Story>,
    votes: DashMap<String, Vote>,

    change_subscribers: Arc<Mutex<Vec<ChangeSubscriber>>>,
    presence_entries: Mutex<HashMap<String, HashMap<String, PresencePayload>>>,
    presence_subscribers: Arc<Mutex<Vec<PresenceSubscriber>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            configured: true,
            rooms: Default::default(),
            participants: Default::default(),
            stories: Default::default(),
            votes: Default::default(),
            change_subscribers: Default::default(),
            presence_entries: Default::default(),
            presence_subscribers: Default::default(),
        }
    }

    /// A store whose backend is missing. Every operation fails with
    /// [StoreError::NotConfigured].
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    fn ensure_configured(&self) -> StoreResult<()> {
        if self.configured {
            Ok(())
        } else {
            Err(StoreError::NotConfigured)
        }
    }

    fn emit_change<T>(&self, scope: ChangeScope, kind: ChangeKind, record: &T)
    where
        T: Serialize,
    {
        let record = serde_json::to_value(record).expect("store records serialize");

        for subscriber in self.change_subscribers.lock().iter() {
            if subscriber.scope == scope {
                (subscriber.callback)(RawChange {
                    kind,
                    record: record.clone(),
                })
            }
        }
    }

    fn emit_presence(&self, topic: &str, kind: PresenceEventKind, key: &str) {
        for subscriber in self.presence_subscribers.lock().iter() {
            if subscriber.topic == topic {
                (subscriber.callback)(PresenceEvent {
                    kind,
                    key: key.to_string(),
                })
            }
        }
    }

    fn new_id() -> String {
        random_string(16)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn room_by_id(&self, room_id: &str) -> StoreResult<Room> {
        self.ensure_configured()?;

        self.rooms
            .get(room_id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound {
                resource: "room",
                identifier: room_id.to_string(),
            })
    }

    async fn create_room(&self, new_room: NewRoom) -> StoreResult<Room> {
        self.ensure_configured()?;

        let room = Room {
            id: Self::new_id(),
            name: new_room.name,
            description: new_room.description,
            owner_id: new_room.owner_id,
            deck_type: new_room.deck_type,
            timer_duration: new_room.timer_duration,
            created_at: Utc::now(),
        };

        self.rooms.insert(room.id.clone(), room.clone());
        self.emit_change(ChangeScope::Room(room.id.clone()), ChangeKind::Insert, &room);

        Ok(room)
    }

    async fn update_room(&self, room_id: &str, patch: RoomPatch) -> StoreResult<Room> {
        self.ensure_configured()?;

        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound {
                resource: "room",
                identifier: room_id.to_string(),
            })?;

        if let Some(name) = patch.name {
            room.name = name;
        }
        if let Some(description) = patch.description {
            room.description = Some(description);
        }
        if let Some(deck_type) = patch.deck_type {
            room.deck_type = deck_type;
        }
        if let Some(timer_duration) = patch.timer_duration {
            room.timer_duration = Some(timer_duration);
        }

        let updated = room.clone();
        drop(room);

        self.emit_change(
            ChangeScope::Room(room_id.to_string()),
            ChangeKind::Update,
            &updated,
        );

        Ok(updated)
    }

    async fn delete_room(&self, room_id: &str) -> StoreResult<()> {
        self.ensure_configured()?;

        let (_, room) = self
            .rooms
            .remove(room_id)
            .ok_or_else(|| StoreError::NotFound {
                resource: "room",
                identifier: room_id.to_string(),
            })?;

        self.emit_change(ChangeScope::Room(room.id.clone()), ChangeKind::Delete, &room);

        Ok(())
    }

    async fn participants_in_room(&self, room_id: &str) -> StoreResult<Vec<Participant>> {
        self.ensure_configured()?;

        let mut participants: Vec<_> = self
            .participants
            .iter()
            .filter(|p| p.room_id == room_id)
            .map(|p| p.clone())
            .collect();

        participants.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));

        Ok(participants)
    }

    async fn participant_by_user(&self, room_id: &str, user_id: &str) -> StoreResult<Participant> {
        self.ensure_configured()?;

        self.participants
            .iter()
            .find(|p| p.room_id == room_id && p.user_id == user_id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::NotFound {
                resource: "participant",
                identifier: format!("{}/{}", room_id, user_id),
            })
    }

    async fn create_participant(&self, new_participant: NewParticipant) -> StoreResult<Participant> {
        self.ensure_configured()?;

        let exists = self.participants.iter().any(|p| {
            p.room_id == new_participant.room_id && p.user_id == new_participant.user_id
        });

        if exists {
            return Err(StoreError::Conflict {
                resource: "participant",
                field: "user_id",
                value: new_participant.user_id,
            });
        }

        let participant = Participant {
            id: Self::new_id(),
            room_id: new_participant.room_id,
            user_id: new_participant.user_id,
            name: new_participant.name,
            avatar_color: new_participant.avatar_color,
            is_online: new_participant.is_online,
            last_seen: new_participant.last_seen,
        };

        self.participants
            .insert(participant.id.clone(), participant.clone());
        self.emit_change(
            ChangeScope::Participants(participant.room_id.clone()),
            ChangeKind::Insert,
            &participant,
        );

        Ok(participant)
    }

    async fn update_participant(
        &self,
        participant_id: &str,
        patch: ParticipantPatch,
    ) -> StoreResult<Participant> {
        self.ensure_configured()?;

        let mut participant =
            self.participants
                .get_mut(participant_id)
                .ok_or_else(|| StoreError::NotFound {
                    resource: "participant",
                    identifier: participant_id.to_string(),
                })?;

        if let Some(name) = patch.name {
            participant.name = name;
        }
        if let Some(avatar_color) = patch.avatar_color {
            participant.avatar_color = Some(avatar_color);
        }
        if let Some(is_online) = patch.is_online {
            participant.is_online = is_online;
        }
        if let Some(last_seen) = patch.last_seen {
            participant.last_seen = last_seen;
        }

        let updated = participant.clone();
        drop(participant);

        self.emit_change(
            ChangeScope::Participants(updated.room_id.clone()),
            ChangeKind::Update,
            &updated,
        );

        Ok(updated)
    }

    async fn set_participant_status(
        &self,
        room_id: &str,
        user_id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> StoreResult<()> {
        let participant = self.participant_by_user(room_id, user_id).await?;

        self.update_participant(
            &participant.id,
            ParticipantPatch {
                is_online: Some(is_online),
                last_seen: Some(last_seen),
                ..Default::default()
            },
        )
        .await?;

        Ok(())
    }

    async fn stories_in_room(&self, room_id: &str) -> StoreResult<Vec<Story>> {
        self.ensure_configured()?;

        let mut stories: Vec<_> = self
            .stories
            .iter()
            .filter(|s| s.room_id == room_id)
            .map(|s| s.clone())
            .collect();

        stories.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));

        Ok(stories)
    }

    async fn create_story(&self, new_story: NewStory) -> StoreResult<Story> {
        self.ensure_configured()?;

        let story = Story {
            id: Self::new_id(),
            room_id: new_story.room_id,
            title: new_story.title,
            description: new_story.description,
            status: new_story.status,
            points: None,
            started_at: None,
            ended_at: None,
            position: new_story.position,
            created_at: Utc::now(),
        };

        self.stories.insert(story.id.clone(), story.clone());
        self.emit_change(
            ChangeScope::Stories(story.room_id.clone()),
            ChangeKind::Insert,
            &story,
        );

        Ok(story)
    }

    async fn create_stories(&self, new_stories: Vec<NewStory>) -> StoreResult<Vec<Story>> {
        let mut created = Vec::with_capacity(new_stories.len());

        for new_story in new_stories {
            created.push(self.create_story(new_story).await?);
        }

        Ok(created)
    }

    async fn update_story(&self, story_id: &str, patch: StoryPatch) -> StoreResult<Story> {
        self.ensure_configured()?;

        let mut story = self
            .stories
            .get_mut(story_id)
            .ok_or_else(|| StoreError::NotFound {
                resource: "story",
                identifier: story_id.to_string(),
            })?;

        if let Some(title) = patch.title {
            story.title = title;
        }
        if let Some(description) = patch.description {
            story.description = Some(description);
        }
        if let Some(status) = patch.status {
            story.status = status;
        }
        if let Some(points) = patch.points {
            story.points = Some(points);
        }
        if let Some(started_at) = patch.started_at {
            story.started_at = Some(started_at);
        }
        if let Some(ended_at) = patch.ended_at {
            story.ended_at = Some(ended_at);
        }

        let updated = story.clone();
        drop(story);

        self.emit_change(
            ChangeScope::Stories(updated.room_id.clone()),
            ChangeKind::Update,
            &updated,
        );

        Ok(updated)
    }

    async fn update_story_guarded(
        &self,
        story_id: &str,
        expected: &[StoryStatus],
        patch: StoryPatch,
    ) -> StoreResult<Story> {
        self.ensure_configured()?;

        let status = self
            .stories
            .get(story_id)
            .map(|s| s.status)
            .ok_or_else(|| StoreError::NotFound {
                resource: "story",
                identifier: story_id.to_string(),
            })?;

        if !expected.contains(&status) {
            return Err(StoreError::Conflict {
                resource: "story",
                field: "status",
                value: format!("{:?}", status).to_lowercase(),
            });
        }

        self.update_story(story_id, patch).await
    }

    async fn delete_story(&self, story_id: &str) -> StoreResult<()> {
        self.ensure_configured()?;

        let (_, story) = self
            .stories
            .remove(story_id)
            .ok_or_else(|| StoreError::NotFound {
                resource: "story",
                identifier: story_id.to_string(),
            })?;

        self.emit_change(
            ChangeScope::Stories(story.room_id.clone()),
            ChangeKind::Delete,
            &story,
        );

        Ok(())
    }

    async fn votes_for_story(&self, story_id: &str) -> StoreResult<Vec<Vote>> {
        self.votes_for_stories(&[story_id.to_string()]).await
    }

    async fn votes_for_stories(&self, story_ids: &[StoryId]) -> StoreResult<Vec<Vote>> {
        self.ensure_configured()?;

        let mut votes: Vec<_> = self
            .votes
            .iter()
            .filter(|v| story_ids.contains(&v.story_id))
            .map(|v| v.clone())
            .collect();

        votes.sort_by(|a, b| a.voted_at.cmp(&b.voted_at).then_with(|| a.id.cmp(&b.id)));

        Ok(votes)
    }

    async fn vote_by_user(&self, story_id: &str, user_id: &str) -> StoreResult<Vote> {
        self.ensure_configured()?;

        self.votes
            .iter()
            .find(|v| v.story_id == story_id && v.user_id == user_id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound {
                resource: "vote",
                identifier: format!("{}/{}", story_id, user_id),
            })
    }

    async fn create_vote(&self, new_vote: NewVote) -> StoreResult<Vote> {
        self.ensure_configured()?;

        let exists = self
            .votes
            .iter()
            .any(|v| v.story_id == new_vote.story_id && v.user_id == new_vote.user_id);

        if exists {
            return Err(StoreError::Conflict {
                resource: "vote",
                field: "user_id",
                value: new_vote.user_id,
            });
        }

        let vote = Vote {
            id: Self::new_id(),
            story_id: new_vote.story_id,
            user_id: new_vote.user_id,
            user_name: new_vote.user_name,
            value: new_vote.value,
            voted_at: new_vote.voted_at,
        };

        self.votes.insert(vote.id.clone(), vote.clone());
        self.emit_change(ChangeScope::Votes, ChangeKind::Insert, &vote);

        Ok(vote)
    }

    async fn update_vote(&self, vote_id: &str, patch: VotePatch) -> StoreResult<Vote> {
        self.ensure_configured()?;

        let mut vote = self
            .votes
            .get_mut(vote_id)
            .ok_or_else(|| StoreError::NotFound {
                resource: "vote",
                identifier: vote_id.to_string(),
            })?;

        vote.value = patch.value;
        vote.voted_at = patch.voted_at;

        let updated = vote.clone();
        drop(vote);

        self.emit_change(ChangeScope::Votes, ChangeKind::Update, &updated);

        Ok(updated)
    }

    async fn delete_votes_for_story(&self, story_id: &str) -> StoreResult<()> {
        self.ensure_configured()?;

        let doomed: Vec<_> = self
            .votes
            .iter()
            .filter(|v| v.story_id == story_id)
            .map(|v| v.clone())
            .collect();

        for vote in doomed {
            self.votes.remove(&vote.id);
            self.emit_change(ChangeScope::Votes, ChangeKind::Delete, &vote);
        }

        Ok(())
    }

    fn subscribe_changes(&self, scope: ChangeScope, callback: ChangeCallback) -> Subscription {
        let id = SUBSCRIBER_COUNTER.fetch_add(1);

        self.change_subscribers.lock().push(ChangeSubscriber {
            id,
            scope,
            callback,
        });

        let subscribers = self.change_subscribers.clone();
        Subscription::new(move || subscribers.lock().retain(|s| s.id != id))
    }

    async fn track_presence(&self, topic: &str, key: &str, payload: PresencePayload) -> StoreResult<()> {
        self.ensure_configured()?;

        self.presence_entries
            .lock()
            .entry(topic.to_string())
            .or_default()
            .insert(key.to_string(), payload);

        self.emit_presence(topic, PresenceEventKind::Join, key);

        Ok(())
    }

    async fn untrack_presence(&self, topic: &str, key: &str) -> StoreResult<()> {
        self.ensure_configured()?;

        let removed = self
            .presence_entries
            .lock()
            .get_mut(topic)
            .and_then(|entries| entries.remove(key));

        if removed.is_some() {
            self.emit_presence(topic, PresenceEventKind::Leave, key);
        }

        Ok(())
    }

    fn subscribe_presence(&self, topic: &str, callback: PresenceCallback) -> Subscription {
        let id = SUBSCRIBER_COUNTER.fetch_add(1);

        self.presence_subscribers.lock().push(PresenceSubscriber {
            id,
            topic: topic.to_string(),
            callback,
        });

        let subscribers = self.presence_subscribers.clone();
        Subscription::new(move || subscribers.lock().retain(|s| s.id != id))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pointcast_core::DeckType;

    fn new_room() -> NewRoom {
        NewRoom {
            name: "backlog grooming".to_string(),
            description: None,
            owner_id: "owner".to_string(),
            deck_type: DeckType::Fibonacci,
            timer_duration: None,
        }
    }

    #[tokio::test]
    async fn participant_is_unique_per_room_and_user() {
        let store = MemoryStore::new();
        let room = store.create_room(new_room()).await.unwrap();

        let new_participant = || NewParticipant {
            room_id: room.id.clone(),
            user_id: "u1".to_string(),
            name: "Ada".to_string(),
            avatar_color: None,
            is_online: true,
            last_seen: Utc::now(),
        };

        store.create_participant(new_participant()).await.unwrap();
        let second = store.create_participant(new_participant()).await;

        assert!(matches!(second, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn guarded_update_rejects_moved_on_story() {
        let store = MemoryStore::new();
        let room = store.create_room(new_room()).await.unwrap();

        let story = store
            .create_story(NewStory {
                room_id: room.id.clone(),
                title: "login flow".to_string(),
                description: None,
                status: StoryStatus::Queue,
                position: 0,
            })
            .await
            .unwrap();

        let result = store
            .update_story_guarded(
                &story.id,
                &[StoryStatus::Revealed],
                StoryPatch {
                    status: Some(StoryStatus::Completed),
                    ..Default::default()
                },
            )
            .await;

        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn changes_fan_out_to_matching_scope_only() {
        let store = MemoryStore::new();
        let room = store.create_room(new_room()).await.unwrap();
        let other = store.create_room(new_room()).await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let _subscription = store.subscribe_changes(
            ChangeScope::Stories(room.id.clone()),
            Box::new(move |change| sink.lock().push(change.kind)),
        );

        for room_id in [room.id.clone(), other.id.clone()] {
            store
                .create_story(NewStory {
                    room_id,
                    title: "story".to_string(),
                    description: None,
                    status: StoryStatus::Queue,
                    position: 0,
                })
                .await
                .unwrap();
        }

        assert_eq!(received.lock().as_slice(), &[ChangeKind::Insert]);
    }

    #[tokio::test]
    async fn unsubscribing_stops_delivery() {
        let store = MemoryStore::new();

        let received = Arc::new(Mutex::new(0));
        let sink = received.clone();

        let subscription = store.subscribe_presence(
            "presence:r1",
            Box::new(move |_| *sink.lock() += 1),
        );

        let payload = PresencePayload {
            user_id: "u1".to_string(),
            name: "Ada".to_string(),
            avatar_color: None,
            online_at: Utc::now(),
        };

        store
            .track_presence("presence:r1", "u1", payload.clone())
            .await
            .unwrap();
        drop(subscription);
        store
            .track_presence("presence:r1", "u2", payload)
            .await
            .unwrap();

        assert_eq!(*received.lock(), 1);
    }

    #[tokio::test]
    async fn unconfigured_store_refuses_everything() {
        let store = MemoryStore::unconfigured();

        let result = store.room_by_id("anything").await;
        assert!(matches!(result, Err(StoreError::NotConfigured)));
    }
}
