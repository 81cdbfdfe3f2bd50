mod events;
mod lifecycle;
mod poller;
mod presence;
mod reconcile;
mod session;
mod store;

pub use events::*;
pub use lifecycle::*;
pub use poller::*;
pub use presence::*;
pub use reconcile::*;
pub use session::*;
pub use store::*;

use std::sync::Arc;

use crossbeam::channel::unbounded;
use dashmap::DashMap;

use pointcast_core::{Config, NewRoom, Room, RoomId};

// Reduces verbosity
type Registry<Id, T> = Arc<DashMap<Id, Arc<T>>>;

/// The pointcast engine, facilitating room sessions, synchronization, and
/// vote statistics.
pub struct Pointcast<S>
where
    S: RemoteStore,
{
    store: Arc<S>,
    context: SyncContext<S>,
    event_receiver: EventReceiver,
}

/// A type passed to various components of the engine, to access the store,
/// emit events, and look up sessions.
pub struct SyncContext<S>
where
    S: RemoteStore,
{
    pub store: Arc<S>,
    pub config: Config,
    pub sessions: Registry<RoomId, RoomSession<S>>,

    event_sender: EventSender,
}

impl<S> Pointcast<S>
where
    S: RemoteStore,
{
    pub fn new(store: S, config: Config) -> Self {
        let (event_sender, event_receiver) = unbounded();
        let store = Arc::new(store);

        let context = SyncContext {
            store: store.clone(),
            config,
            sessions: Default::default(),
            event_sender,
        };

        Self {
            store,
            context,
            event_receiver,
        }
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    pub async fn create_room(&self, new_room: NewRoom) -> Result<Room, SessionError> {
        Ok(self.store.create_room(new_room).await?)
    }

    /// Enters a room, building the session that keeps its state synchronized.
    /// Joining a room the engine already has a session for returns that
    /// session.
    pub async fn join_room(
        &self,
        room_id: &str,
        identity: Identity,
    ) -> Result<Arc<RoomSession<S>>, SessionError> {
        if let Some(existing) = self.context.sessions.get(room_id) {
            return Ok(existing.clone());
        }

        let session = RoomSession::connect(&self.context, room_id, identity).await?;
        self.context
            .sessions
            .insert(room_id.to_string(), session.clone());

        Ok(session)
    }

    pub fn session(&self, room_id: &str) -> Option<Arc<RoomSession<S>>> {
        self.context.sessions.get(room_id).map(|s| s.clone())
    }

    /// Leaves a room, tearing its session down
    pub async fn leave_room(&self, room_id: &str) {
        if let Some((_, session)) = self.context.sessions.remove(room_id) {
            session.teardown().await;
        }
    }

    /// Receive events from the engine
    pub fn events(&self) -> EventReceiver {
        self.event_receiver.clone()
    }

    pub fn wait_for_event(&self) -> SyncEvent {
        self.event_receiver
            .recv()
            .expect("event is received without error")
    }
}

impl<S> SyncContext<S>
where
    S: RemoteStore,
{
    pub fn emit(&self, event: SyncEvent) {
        // Consumers may have gone away during teardown, that's fine
        self.event_sender.send(event).ok();
    }
}

impl<S> Clone for SyncContext<S>
where
    S: RemoteStore,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            event_sender: self.event_sender.clone(),
        }
    }
}
