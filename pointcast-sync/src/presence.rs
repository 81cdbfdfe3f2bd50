use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;

use pointcast_core::{Config, RoomId};

use crate::{
    Identity, PresenceCallback, PresenceEvent, PresenceEventKind, PresencePayload, RemoteStore,
    StoreError, Subscription,
};

/// Advertises a participant's liveness on an ephemeral presence topic and
/// mirrors transitions into the durable participant record.
///
/// The topic is a hint channel only: the durable online flag it writes is
/// the ground truth the reconciler consumes, the topic just shrinks the
/// latency of detecting a transition.
pub struct PresenceTracker<S> {
    store: Arc<S>,
    room_id: RoomId,
    identity: Identity,
    topic: String,
    subscription: Mutex<Option<Subscription>>,
}

impl<S> PresenceTracker<S>
where
    S: RemoteStore,
{
    pub fn new(store: Arc<S>, room_id: RoomId, identity: Identity) -> Self {
        let topic = Config::presence_topic(&room_id);

        Self {
            store,
            room_id,
            identity,
            topic,
            subscription: Default::default(),
        }
    }

    /// Subscribes to join/leave notifications on the topic
    pub fn subscribe(&self, callback: PresenceCallback) {
        let subscription = self.store.subscribe_presence(&self.topic, callback);
        *self.subscription.lock() = Some(subscription);
    }

    /// Stops listening to the topic without writing any durable status
    pub fn unsubscribe(&self) {
        self.subscription.lock().take();
    }

    /// Starts advertising and writes the durable online flag for self.
    /// Called on session start and when the process regains visibility.
    pub async fn engage(&self) -> Result<(), StoreError> {
        let payload = PresencePayload {
            user_id: self.identity.user_id.clone(),
            name: self.identity.name.clone(),
            avatar_color: self.identity.avatar_color.clone(),
            online_at: Utc::now(),
        };

        self.store
            .track_presence(&self.topic, &self.identity.user_id, payload)
            .await?;

        self.write_status(&self.identity.user_id, true).await
    }

    /// Stops advertising and writes the durable offline flag for self.
    /// Called when the process loses visibility.
    pub async fn retire(&self) {
        if let Err(e) = self
            .store
            .untrack_presence(&self.topic, &self.identity.user_id)
            .await
        {
            warn!("failed to untrack presence in room {}: {}", self.room_id, e);
        }

        if let Err(e) = self.write_status(&self.identity.user_id, false).await {
            warn!(
                "failed to write offline status in room {}: {}",
                self.room_id, e
            );
        }
    }

    /// Mirrors a topic transition into the durable participant record
    pub async fn handle_event(&self, event: PresenceEvent) {
        let result = match event.kind {
            // Our own heartbeat, the durable write already happened
            PresenceEventKind::Join if event.key == self.identity.user_id => return,
            PresenceEventKind::Join => {
                debug!("presence join for {} in room {}", event.key, self.room_id);
                self.write_status(&event.key, true).await
            }
            PresenceEventKind::Leave => {
                debug!("presence leave for {} in room {}", event.key, self.room_id);
                self.write_status(&event.key, false).await
            }
        };

        if let Err(e) = result {
            // The poll sweep picks the flag up eventually either way
            warn!(
                "failed to mirror presence for {} in room {}: {}",
                event.key, self.room_id, e
            );
        }
    }

    /// Final teardown: unsubscribe, untrack, and write offline. Three
    /// independent best-effort steps, a failure must not skip the rest.
    pub async fn teardown(&self) {
        self.unsubscribe();
        self.retire().await;
    }

    async fn write_status(&self, user_id: &str, is_online: bool) -> Result<(), StoreError> {
        self.store
            .set_participant_status(&self.room_id, user_id, is_online, Utc::now())
            .await
    }
}
