use crossbeam::channel::{Receiver, Sender};

use pointcast_core::{Participant, Room, RoomId, Story, StoryId, Vote};

pub type EventSender = Sender<SyncEvent>;
pub type EventReceiver = Receiver<SyncEvent>;

/// Events emitted by the synchronization engine as local state changes
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The room record changed remotely
    RoomUpdated { room_id: RoomId, room: Room },
    /// The room was deleted remotely. Terminal for the session.
    RoomClosed { room_id: RoomId },
    /// The visible roster changed
    RosterUpdated {
        room_id: RoomId,
        participants: Vec<Participant>,
    },
    /// The story queue changed
    StoriesUpdated { room_id: RoomId, stories: Vec<Story> },
    /// A different story became the one being estimated
    ActiveStoryChanged {
        room_id: RoomId,
        story: Option<Story>,
    },
    /// The votes for the current story changed
    VotesUpdated {
        room_id: RoomId,
        story_id: StoryId,
        votes: Vec<Vote>,
    },
}
