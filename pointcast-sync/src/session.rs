use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::Utc;
use log::{info, warn};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

use pointcast_core::{
    statistics, NewParticipant, NewVote, Participant, ParticipantPatch, Room, RoomId, RoomPatch,
    Story, StoryId, StoryStatus, UserId, Vote, VotePatch, VoteStatistics,
};

use crate::{
    spawn_poller, ChangeKind, ChangeScope, Collection, PollHandle, PresenceEvent, PresenceTracker,
    RawChange, ReconcileContext, RemoteStore, StoreError, StoryLifecycle, Subscription,
    SyncContext, SyncEvent,
};

/// The local identity of the user driving a session
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub name: String,
    pub avatar_color: Option<String>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("story cannot {action} while {status:?}")]
    InvalidTransition {
        action: &'static str,
        status: StoryStatus,
    },
    #[error("story {story_id} is not part of this room")]
    UnknownStory { story_id: StoryId },
    #[error("no story is currently being voted on")]
    NoActiveStory,
    #[error("the session has been closed")]
    Closed,
}

/// Which push feed a change notification came from
#[derive(Debug, Clone, Copy)]
enum Feed {
    Room,
    Participants,
    Stories,
    Votes,
}

/// Inbound work for the session actor. All remote input funnels through
/// here, making the actor the single writer of the local collections.
enum SessionMessage {
    Change { feed: Feed, change: RawChange },
    Presence(PresenceEvent),
}

/// The reconciled snapshot handed to report generation
#[derive(Debug, Clone)]
pub struct ReportData {
    pub room_name: String,
    pub stories: Vec<Story>,
    pub votes_by_story: HashMap<StoryId, Vec<Vote>>,
}

/// One user's live view of a room: the session-scoped cache of the remote
/// state, kept consistent by the push feeds, the poll sweeps, and the
/// presence tracker.
///
/// Authoritative for rendering, never for persistence. Constructed on room
/// entry, torn down on room exit, never shared across rooms.
pub struct RoomSession<S>
where
    S: RemoteStore,
{
    context: SyncContext<S>,
    room_id: RoomId,
    identity: Identity,

    lifecycle: StoryLifecycle<S>,
    presence: PresenceTracker<S>,

    room: Mutex<Room>,
    roster: Mutex<Collection<Participant>>,
    stories: Mutex<Collection<Story>>,
    votes: Mutex<Collection<Vote>>,
    /// The story the vote collection is scoped to
    vote_scope: Mutex<Option<StoryId>>,

    inbox: mpsc::UnboundedSender<SessionMessage>,
    pollers: Mutex<Vec<PollHandle>>,
    subscriptions: Mutex<Vec<Subscription>>,
    actor: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<S> RoomSession<S>
where
    S: RemoteStore,
{
    /// Builds a session for a room: fetches the room record, joins as a
    /// participant, then brings up the actor, the pollers, the push
    /// subscriptions, and presence.
    ///
    /// A missing room or an unconfigured backend fails here, before any
    /// synchronization machinery exists — nothing polls or retries after.
    pub(crate) async fn connect(
        context: &SyncContext<S>,
        room_id: &str,
        identity: Identity,
    ) -> Result<Arc<Self>, SessionError> {
        let room = context.store.room_by_id(room_id).await?;
        join_as_participant(context, room_id, &identity).await?;

        let (inbox, receiver) = mpsc::unbounded_channel();

        let session = Arc::new(Self {
            context: context.clone(),
            room_id: room_id.to_string(),
            identity: identity.clone(),
            lifecycle: StoryLifecycle::new(context.store.clone(), room_id.to_string()),
            presence: PresenceTracker::new(
                context.store.clone(),
                room_id.to_string(),
                identity.clone(),
            ),
            room: Mutex::new(room.clone()),
            roster: Default::default(),
            stories: Default::default(),
            votes: Default::default(),
            vote_scope: Default::default(),
            inbox,
            pollers: Default::default(),
            subscriptions: Default::default(),
            actor: Default::default(),
            closed: AtomicBool::new(false),
        });

        session.spawn_actor(receiver);
        session.subscribe_changes();
        session.spawn_pollers();
        session.engage_presence().await;

        info!("{} joined room \"{}\"", identity.name, room.name);
        Ok(session)
    }

    pub fn id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn room(&self) -> Room {
        self.room.lock().clone()
    }

    /// The visible roster, stale offline participants already filtered out
    pub fn participants(&self) -> Vec<Participant> {
        self.roster.lock().to_vec()
    }

    /// All stories, ascending by position
    pub fn stories(&self) -> Vec<Story> {
        self.stories.lock().to_vec()
    }

    /// The story currently being voted on or revealed, if any
    pub fn active_story(&self) -> Option<Story> {
        self.stories
            .lock()
            .items()
            .iter()
            .find(|s| s.is_current())
            .cloned()
    }

    pub fn queued_stories(&self) -> Vec<Story> {
        self.stories_with_status(StoryStatus::Queue)
    }

    pub fn completed_stories(&self) -> Vec<Story> {
        self.stories_with_status(StoryStatus::Completed)
    }

    /// The votes for the current story
    pub fn votes(&self) -> Vec<Vote> {
        self.votes.lock().to_vec()
    }

    pub fn vote_by_user(&self, user_id: &str) -> Option<Vote> {
        self.votes
            .lock()
            .items()
            .iter()
            .find(|v| v.user_id == user_id)
            .cloned()
    }

    /// Statistics over the current story's votes
    pub fn statistics(&self) -> VoteStatistics {
        statistics(self.votes.lock().items())
    }

    /// Casts or replaces this user's vote on the current story. A second
    /// vote by the same user replaces the first, never duplicates it.
    pub async fn cast_vote(&self, value: &str) -> Result<Vote, SessionError> {
        self.ensure_open()?;

        let story = self.active_story().ok_or(SessionError::NoActiveStory)?;
        let now = Utc::now();

        let vote = match self
            .context
            .store
            .vote_by_user(&story.id, &self.identity.user_id)
            .await
        {
            Ok(existing) => {
                self.context
                    .store
                    .update_vote(
                        &existing.id,
                        VotePatch {
                            value: value.to_string(),
                            voted_at: now,
                        },
                    )
                    .await?
            }
            Err(StoreError::NotFound { .. }) => {
                self.context
                    .store
                    .create_vote(NewVote {
                        story_id: story.id.clone(),
                        user_id: self.identity.user_id.clone(),
                        user_name: self.identity.name.clone(),
                        value: value.to_string(),
                        voted_at: now,
                    })
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        Ok(vote)
    }

    pub async fn update_room(&self, patch: RoomPatch) -> Result<Room, SessionError> {
        self.ensure_open()?;
        Ok(self.context.store.update_room(&self.room_id, patch).await?)
    }

    pub async fn create_story(
        &self,
        title: &str,
        description: Option<String>,
    ) -> Result<Story, SessionError> {
        self.ensure_open()?;
        self.lifecycle
            .create(&self.stories(), title, description)
            .await
    }

    pub async fn import_stories(&self, titles: Vec<String>) -> Result<Vec<Story>, SessionError> {
        self.ensure_open()?;
        self.lifecycle.import(&self.stories(), titles).await
    }

    pub async fn start_voting(&self, story_id: &str) -> Result<Story, SessionError> {
        self.ensure_open()?;
        self.lifecycle.start(&self.stories(), story_id).await
    }

    pub async fn reveal_votes(&self, story_id: &str) -> Result<Story, SessionError> {
        self.ensure_open()?;
        self.lifecycle.reveal(story_id).await
    }

    pub async fn reset_voting(&self, story_id: &str) -> Result<Story, SessionError> {
        self.ensure_open()?;
        self.lifecycle.reset_voting(story_id).await
    }

    pub async fn complete_story(
        &self,
        story_id: &str,
        points: &str,
    ) -> Result<Story, SessionError> {
        self.ensure_open()?;
        self.lifecycle.complete(story_id, points).await
    }

    pub async fn delete_story(&self, story_id: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.lifecycle.delete(&self.stories(), story_id).await
    }

    /// Reacts to the process losing or regaining foreground visibility
    pub async fn set_visible(&self, visible: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        if visible {
            if let Err(e) = self.presence.engage().await {
                warn!("failed to re-engage presence in room {}: {}", self.room_id, e);
            }
        } else {
            self.presence.retire().await;
        }
    }

    /// Forces one full corrective sweep, without waiting for the next ticks
    pub async fn refresh(self: &Arc<Self>) {
        self.refresh_roster().await;
        self.refresh_stories().await;
        self.refresh_votes().await;
    }

    /// The already-reconciled snapshot report generation consumes
    pub async fn report_data(&self) -> Result<ReportData, SessionError> {
        let stories = self.stories();
        let story_ids: Vec<StoryId> = stories.iter().map(|s| s.id.clone()).collect();

        let votes = self.context.store.votes_for_stories(&story_ids).await?;

        let mut votes_by_story: HashMap<StoryId, Vec<Vote>> = HashMap::new();
        for vote in votes {
            votes_by_story
                .entry(vote.story_id.clone())
                .or_default()
                .push(vote);
        }

        Ok(ReportData {
            room_name: self.room().name,
            stories,
            votes_by_story,
        })
    }

    /// Tears the session down: stop the pollers, drop the push
    /// subscriptions, leave the presence topic, write the final offline
    /// status. Each step is independent and best-effort.
    pub(crate) async fn teardown(&self) {
        self.closed.store(true, Ordering::SeqCst);

        self.pollers.lock().clear();
        self.subscriptions.lock().clear();
        if let Some(actor) = self.actor.lock().take() {
            actor.abort();
        }
        self.presence.teardown().await;

        info!("{} left room {}", self.identity.name, self.room_id);
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn stories_with_status(&self, status: StoryStatus) -> Vec<Story> {
        self.stories
            .lock()
            .items()
            .iter()
            .filter(|s| s.status == status)
            .cloned()
            .collect()
    }

    fn reconcile_context(&self) -> ReconcileContext {
        ReconcileContext::new(self.context.config.offline_window())
    }

    fn spawn_actor(self: &Arc<Self>, mut receiver: mpsc::UnboundedReceiver<SessionMessage>) {
        let weak = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                let Some(session) = weak.upgrade() else {
                    break;
                };

                session.handle_message(message).await;
            }
        });

        *self.actor.lock() = Some(handle);
    }

    fn subscribe_changes(self: &Arc<Self>) {
        let scopes = [
            (Feed::Room, ChangeScope::Room(self.room_id.clone())),
            (
                Feed::Participants,
                ChangeScope::Participants(self.room_id.clone()),
            ),
            (Feed::Stories, ChangeScope::Stories(self.room_id.clone())),
            (Feed::Votes, ChangeScope::Votes),
        ];

        let subscriptions = scopes
            .into_iter()
            .map(|(feed, scope)| {
                let inbox = self.inbox.clone();

                self.context.store.subscribe_changes(
                    scope,
                    Box::new(move |change| {
                        let _ = inbox.send(SessionMessage::Change { feed, change });
                    }),
                )
            })
            .collect();

        *self.subscriptions.lock() = subscriptions;
    }

    fn spawn_pollers(self: &Arc<Self>) {
        let config = &self.context.config;

        let roster_poller = {
            let weak = Arc::downgrade(self);
            spawn_poller(config.participant_poll_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(session) = weak.upgrade() {
                        session.refresh_roster().await;
                    }
                }
            })
        };

        let story_poller = {
            let weak = Arc::downgrade(self);
            spawn_poller(config.story_poll_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(session) = weak.upgrade() {
                        session.refresh_stories().await;
                    }
                }
            })
        };

        let vote_poller = {
            let weak = Arc::downgrade(self);
            spawn_poller(config.vote_poll_interval, move || {
                let weak = weak.clone();
                async move {
                    if let Some(session) = weak.upgrade() {
                        session.refresh_votes().await;
                    }
                }
            })
        };

        *self.pollers.lock() = vec![roster_poller, story_poller, vote_poller];
    }

    async fn engage_presence(self: &Arc<Self>) {
        let inbox = self.inbox.clone();

        self.presence.subscribe(Box::new(move |event| {
            let _ = inbox.send(SessionMessage::Presence(event));
        }));

        if let Err(e) = self.presence.engage().await {
            // The durable join write already happened, this is only latency
            warn!("failed to engage presence in room {}: {}", self.room_id, e);
        }
    }

    async fn refresh_roster(&self) {
        match self.context.store.participants_in_room(&self.room_id).await {
            Ok(participants) => self.apply_roster_replace(participants),
            Err(e) => warn!("roster sweep failed in room {}: {}", self.room_id, e),
        }
    }

    async fn refresh_stories(self: &Arc<Self>) {
        match self.context.store.stories_in_room(&self.room_id).await {
            Ok(stories) => self.apply_stories_replace(stories),
            Err(e) => warn!("story sweep failed in room {}: {}", self.room_id, e),
        }
    }

    async fn refresh_votes(self: &Arc<Self>) {
        let Some(story_id) = self.vote_scope.lock().clone() else {
            return;
        };

        match self.context.store.votes_for_story(&story_id).await {
            Ok(votes) => self.apply_votes_replace(&story_id, votes),
            Err(e) => warn!("vote sweep failed in room {}: {}", self.room_id, e),
        }
    }

    async fn handle_message(self: &Arc<Self>, message: SessionMessage) {
        match message {
            SessionMessage::Change { feed, change } => self.handle_change(feed, change),
            SessionMessage::Presence(event) => {
                // A closed room takes no more durable presence writes
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }

                self.presence.handle_event(event).await
            }
        }
    }

    fn handle_change(self: &Arc<Self>, feed: Feed, change: RawChange) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        match feed {
            Feed::Room => self.handle_room_change(change),
            Feed::Participants => {
                let Some(participant) = self.decode::<Participant>(change.record) else {
                    return;
                };

                let context = self.reconcile_context();
                let changed = {
                    let mut roster = self.roster.lock();
                    let before = roster.to_vec();
                    roster.apply(change.kind, participant, &context);
                    (before != *roster.items()).then(|| roster.to_vec())
                };

                if let Some(participants) = changed {
                    self.context.emit(SyncEvent::RosterUpdated {
                        room_id: self.room_id.clone(),
                        participants,
                    });
                }
            }
            Feed::Stories => {
                let Some(story) = self.decode::<Story>(change.record) else {
                    return;
                };

                let context = self.reconcile_context();
                let changed = {
                    let mut stories = self.stories.lock();
                    let before = stories.to_vec();
                    stories.apply(change.kind, story, &context);
                    (before != *stories.items()).then(|| stories.to_vec())
                };

                if let Some(stories) = changed {
                    self.context.emit(SyncEvent::StoriesUpdated {
                        room_id: self.room_id.clone(),
                        stories,
                    });
                }

                self.sync_vote_scope();
            }
            Feed::Votes => {
                let Some(vote) = self.decode::<Vote>(change.record) else {
                    return;
                };

                // The feed covers the whole table, only the scoped story counts
                let scope = self.vote_scope.lock().clone();
                if scope.as_deref() != Some(vote.story_id.as_str()) {
                    return;
                }

                let story_id = vote.story_id.clone();
                let context = self.reconcile_context();
                let changed = {
                    let mut votes = self.votes.lock();
                    let before = votes.to_vec();
                    votes.apply(change.kind, vote, &context);
                    (before != *votes.items()).then(|| votes.to_vec())
                };

                if let Some(votes) = changed {
                    self.context.emit(SyncEvent::VotesUpdated {
                        room_id: self.room_id.clone(),
                        story_id,
                        votes,
                    });
                }
            }
        }
    }

    fn handle_room_change(&self, change: RawChange) {
        if change.kind == ChangeKind::Delete {
            info!("room {} was deleted remotely", self.room_id);
            self.close_remotely();
            return;
        }

        let Some(room) = self.decode::<Room>(change.record) else {
            return;
        };

        let changed = {
            let mut current = self.room.lock();
            if *current == room {
                false
            } else {
                *current = room.clone();
                true
            }
        };

        if changed {
            self.context.emit(SyncEvent::RoomUpdated {
                room_id: self.room_id.clone(),
                room,
            });
        }
    }

    /// The room disappeared from the remote store. Terminal: synchronization
    /// stops, the cache stays at its last known state for display.
    fn close_remotely(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pollers.lock().clear();
        self.subscriptions.lock().clear();
        self.presence.unsubscribe();

        self.context.emit(SyncEvent::RoomClosed {
            room_id: self.room_id.clone(),
        });
    }

    fn apply_roster_replace(&self, participants: Vec<Participant>) {
        let context = self.reconcile_context();

        let changed = {
            let mut roster = self.roster.lock();
            let before = roster.to_vec();
            roster.replace(participants, &context);
            (before != *roster.items()).then(|| roster.to_vec())
        };

        if let Some(participants) = changed {
            self.context.emit(SyncEvent::RosterUpdated {
                room_id: self.room_id.clone(),
                participants,
            });
        }
    }

    fn apply_stories_replace(self: &Arc<Self>, stories: Vec<Story>) {
        let context = self.reconcile_context();

        let changed = {
            let mut collection = self.stories.lock();
            let before = collection.to_vec();
            collection.replace(stories, &context);
            (before != *collection.items()).then(|| collection.to_vec())
        };

        if let Some(stories) = changed {
            self.context.emit(SyncEvent::StoriesUpdated {
                room_id: self.room_id.clone(),
                stories,
            });
        }

        self.sync_vote_scope();
    }

    fn apply_votes_replace(&self, story_id: &str, votes: Vec<Vote>) {
        // The scope may have moved while the fetch was in flight
        if self.vote_scope.lock().as_deref() != Some(story_id) {
            return;
        }

        let context = self.reconcile_context();

        let changed = {
            let mut collection = self.votes.lock();
            let before = collection.to_vec();
            collection.replace(votes, &context);
            (before != *collection.items()).then(|| collection.to_vec())
        };

        if let Some(votes) = changed {
            self.context.emit(SyncEvent::VotesUpdated {
                room_id: self.room_id.clone(),
                story_id: story_id.to_string(),
                votes,
            });
        }
    }

    /// Points the vote collection at the current story, clearing it when a
    /// different story takes over and kicking off an immediate refetch.
    fn sync_vote_scope(self: &Arc<Self>) {
        let active = self.active_story();
        let active_id = active.as_ref().map(|s| s.id.clone());

        {
            let mut scope = self.vote_scope.lock();
            if *scope == active_id {
                return;
            }
            *scope = active_id.clone();
        }

        self.votes.lock().clear();

        self.context.emit(SyncEvent::ActiveStoryChanged {
            room_id: self.room_id.clone(),
            story: active,
        });

        if active_id.is_some() {
            let weak = Arc::downgrade(self);
            tokio::spawn(async move {
                if let Some(session) = weak.upgrade() {
                    session.refresh_votes().await;
                }
            });
        }
    }

    fn decode<T>(&self, record: serde_json::Value) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match serde_json::from_value(record) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                // Never let a bad payload corrupt the collections
                warn!(
                    "dropping malformed change payload in room {}: {}",
                    self.room_id, e
                );
                None
            }
        }
    }
}

/// Creates or refreshes the durable participant row for the joining user
async fn join_as_participant<S>(
    context: &SyncContext<S>,
    room_id: &str,
    identity: &Identity,
) -> Result<(), SessionError>
where
    S: RemoteStore,
{
    let now = Utc::now();

    match context
        .store
        .participant_by_user(room_id, &identity.user_id)
        .await
    {
        Ok(existing) => {
            context
                .store
                .update_participant(
                    &existing.id,
                    ParticipantPatch {
                        name: Some(identity.name.clone()),
                        avatar_color: identity.avatar_color.clone(),
                        is_online: Some(true),
                        last_seen: Some(now),
                    },
                )
                .await?;
        }
        Err(StoreError::NotFound { .. }) => {
            context
                .store
                .create_participant(NewParticipant {
                    room_id: room_id.to_string(),
                    user_id: identity.user_id.clone(),
                    name: identity.name.clone(),
                    avatar_color: identity.avatar_color.clone(),
                    is_online: true,
                    last_seen: now,
                })
                .await?;
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
