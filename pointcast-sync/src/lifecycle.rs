use std::sync::Arc;

use chrono::Utc;
use log::info;

use pointcast_core::{NewStory, RoomId, Story, StoryPatch, StoryStatus};

use crate::{RemoteStore, SessionError};

/// Drives the story state machine: `queue → active → revealed → completed`,
/// with the `revealed → active` back-edge for voting again.
///
/// Transitions with a single permitted source state are written as guarded
/// updates, so a stale invocation fails with a conflict instead of moving a
/// story that has already moved on.
pub struct StoryLifecycle<S> {
    store: Arc<S>,
    room_id: RoomId,
}

impl<S> StoryLifecycle<S>
where
    S: RemoteStore,
{
    pub fn new(store: Arc<S>, room_id: RoomId) -> Self {
        Self { store, room_id }
    }

    /// Makes the story the one being voted on. Any other story currently
    /// `active` or `revealed` in the room is demoted back to the queue first,
    /// upholding the single-active invariant.
    pub async fn start(&self, stories: &[Story], story_id: &str) -> Result<Story, SessionError> {
        let current = stories
            .iter()
            .find(|s| s.is_current() && s.id != story_id);

        if let Some(current) = current {
            self.store
                .update_story(
                    &current.id,
                    StoryPatch {
                        status: Some(StoryStatus::Queue),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let story = self
            .store
            .update_story(
                story_id,
                StoryPatch {
                    status: Some(StoryStatus::Active),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        info!("voting started on \"{}\" in room {}", story.title, self.room_id);
        Ok(story)
    }

    /// Turns the hidden votes face up. Only permitted while `active`.
    pub async fn reveal(&self, story_id: &str) -> Result<Story, SessionError> {
        let story = self
            .store
            .update_story_guarded(
                story_id,
                &[StoryStatus::Active],
                StoryPatch {
                    status: Some(StoryStatus::Revealed),
                    ..Default::default()
                },
            )
            .await?;

        Ok(story)
    }

    /// Discards all votes and reopens voting. Only permitted while `revealed`.
    pub async fn reset_voting(&self, story_id: &str) -> Result<Story, SessionError> {
        // The guard must run before the deletion. A stale reset has to fail
        // without touching votes cast on the story after it moved on.
        let story = self
            .store
            .update_story_guarded(
                story_id,
                &[StoryStatus::Revealed],
                StoryPatch {
                    status: Some(StoryStatus::Active),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        self.store.delete_votes_for_story(story_id).await?;

        info!("voting reset on \"{}\" in room {}", story.title, self.room_id);
        Ok(story)
    }

    /// Records the final estimate. Only permitted while `revealed`; the
    /// resulting `completed` state is terminal.
    pub async fn complete(&self, story_id: &str, points: &str) -> Result<Story, SessionError> {
        let story = self
            .store
            .update_story_guarded(
                story_id,
                &[StoryStatus::Revealed],
                StoryPatch {
                    status: Some(StoryStatus::Completed),
                    points: Some(points.to_string()),
                    ended_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        info!(
            "\"{}\" completed with {} points in room {}",
            story.title, points, self.room_id
        );
        Ok(story)
    }

    /// Removes a story. Only permitted while it is still in the queue.
    pub async fn delete(&self, stories: &[Story], story_id: &str) -> Result<(), SessionError> {
        let story = stories
            .iter()
            .find(|s| s.id == story_id)
            .ok_or_else(|| SessionError::UnknownStory {
                story_id: story_id.to_string(),
            })?;

        if story.status != StoryStatus::Queue {
            return Err(SessionError::InvalidTransition {
                action: "delete",
                status: story.status,
            });
        }

        self.store.delete_story(story_id).await?;
        Ok(())
    }

    /// Appends a story at the tail of the queue
    pub async fn create(
        &self,
        stories: &[Story],
        title: &str,
        description: Option<String>,
    ) -> Result<Story, SessionError> {
        let story = self
            .store
            .create_story(NewStory {
                room_id: self.room_id.clone(),
                title: title.trim().to_string(),
                description,
                status: StoryStatus::Queue,
                position: next_position(stories),
            })
            .await?;

        Ok(story)
    }

    /// Appends one queued story per title, at sequential positions after the
    /// current maximum, preserving input order.
    pub async fn import(
        &self,
        stories: &[Story],
        titles: Vec<String>,
    ) -> Result<Vec<Story>, SessionError> {
        let base = next_position(stories);

        let new_stories = titles
            .into_iter()
            .enumerate()
            .map(|(index, title)| NewStory {
                room_id: self.room_id.clone(),
                title: title.trim().to_string(),
                description: None,
                status: StoryStatus::Queue,
                position: base + index as i64,
            })
            .collect::<Vec<_>>();

        let created = self.store.create_stories(new_stories).await?;

        info!("imported {} stories into room {}", created.len(), self.room_id);
        Ok(created)
    }
}

fn next_position(stories: &[Story]) -> i64 {
    stories.iter().map(|s| s.position).max().unwrap_or(-1) + 1
}
