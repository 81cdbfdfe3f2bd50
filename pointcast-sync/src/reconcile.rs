use chrono::{DateTime, Duration, Utc};

use pointcast_core::{Participant, Story, Vote};

use crate::ChangeKind;

/// Ambient values entity invariants depend on
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext {
    pub now: DateTime<Utc>,
    /// How long an offline participant stays visible
    pub offline_window: Duration,
}

impl ReconcileContext {
    pub fn new(offline_window: Duration) -> Self {
        Self {
            now: Utc::now(),
            offline_window,
        }
    }
}

/// A locally held record that can be merged by identity.
///
/// The push feed and the poll sweep both produce these; merging has to
/// commute no matter which one wins the race.
pub trait Reconcile: Clone {
    fn id(&self) -> &str;

    /// Restores entity-specific invariants after any mutation
    fn normalize(_items: &mut Vec<Self>, _context: &ReconcileContext) {}
}

impl Reconcile for Story {
    fn id(&self) -> &str {
        &self.id
    }

    fn normalize(items: &mut Vec<Self>, _context: &ReconcileContext) {
        // Position defines queue order, ties broken by id
        items.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
    }
}

impl Reconcile for Participant {
    fn id(&self) -> &str {
        &self.id
    }

    fn normalize(items: &mut Vec<Self>, context: &ReconcileContext) {
        // Hide ghosts that disconnected without a clean leave
        items.retain(|p| p.is_visible(context.now, context.offline_window));
    }
}

impl Reconcile for Vote {
    fn id(&self) -> &str {
        &self.id
    }
}

/// An ordered, deduplicated local collection fed by bulk refetches and
/// incremental change events.
///
/// The merge rules favor a plausible view over strict correctness: duplicate
/// inserts, updates for unknown records, and deletes of unknown ids are all
/// tolerated, since the backend guarantees neither ordering nor exactly-once
/// delivery.
#[derive(Debug)]
pub struct Collection<T> {
    items: Vec<T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> Collection<T>
where
    T: Reconcile,
{
    /// Wholesale replace from a fetch or poll sweep
    pub fn replace(&mut self, items: Vec<T>, context: &ReconcileContext) {
        self.items = items;
        T::normalize(&mut self.items, context);
    }

    /// Applies an incremental insert. A record whose id is already present is
    /// ignored, guarding against a push event racing a fetch that already
    /// delivered it.
    pub fn insert(&mut self, item: T, context: &ReconcileContext) {
        if self.items.iter().any(|i| i.id() == item.id()) {
            return;
        }

        self.items.push(item);
        T::normalize(&mut self.items, context);
    }

    /// Applies an incremental update in place. An update for an unknown id is
    /// applied as an insert, tolerating update-before-insert delivery.
    pub fn update(&mut self, item: T, context: &ReconcileContext) {
        match self.items.iter_mut().find(|i| i.id() == item.id()) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }

        T::normalize(&mut self.items, context);
    }

    /// Removes the record with the given id, if present
    pub fn remove(&mut self, id: &str) {
        self.items.retain(|i| i.id() != id);
    }

    /// Applies one change event from the push feed
    pub fn apply(&mut self, kind: ChangeKind, item: T, context: &ReconcileContext) {
        match kind {
            ChangeKind::Insert => self.insert(item, context),
            ChangeKind::Update => self.update(item, context),
            ChangeKind::Delete => self.remove(item.id()),
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pointcast_core::StoryStatus;

    fn context() -> ReconcileContext {
        ReconcileContext::new(Duration::minutes(2))
    }

    fn story(id: &str, position: i64) -> Story {
        Story {
            id: id.to_string(),
            room_id: "r1".to_string(),
            title: format!("story {}", id),
            description: None,
            status: StoryStatus::Queue,
            points: None,
            started_at: None,
            ended_at: None,
            position,
            created_at: Utc::now(),
        }
    }

    fn participant(id: &str, is_online: bool, seen_ago: Duration) -> Participant {
        Participant {
            id: id.to_string(),
            room_id: "r1".to_string(),
            user_id: format!("user-{}", id),
            name: id.to_string(),
            avatar_color: None,
            is_online,
            last_seen: Utc::now() - seen_ago,
        }
    }

    #[test]
    fn duplicate_insert_is_idempotent() {
        let context = context();
        let mut collection = Collection::default();

        collection.insert(story("a", 0), &context);
        collection.insert(story("a", 0), &context);

        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn update_before_insert_applies_as_insert() {
        let context = context();
        let mut collection = Collection::default();

        let mut updated = story("a", 0);
        updated.title = "renamed".to_string();

        collection.update(updated, &context);

        assert_eq!(collection.len(), 1);
        assert_eq!(collection.items()[0].title, "renamed");

        // The insert the update raced past arrives afterwards and must lose
        collection.insert(story("a", 0), &context);
        assert_eq!(collection.items()[0].title, "renamed");
    }

    #[test]
    fn delete_of_unknown_id_is_tolerated() {
        let context = context();
        let mut collection = Collection::default();

        collection.insert(story("a", 0), &context);
        collection.remove("b");

        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn stories_sort_by_position_with_id_tiebreak() {
        let context = context();
        let mut collection = Collection::default();

        collection.replace(
            vec![story("c", 2), story("b", 1), story("a", 1)],
            &context,
        );

        let ids: Vec<_> = collection.items().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn stale_offline_participants_are_filtered() {
        let context = context();
        let mut collection = Collection::default();

        collection.replace(
            vec![
                participant("fresh", false, Duration::minutes(1)),
                participant("stale", false, Duration::minutes(3)),
                participant("online", true, Duration::minutes(30)),
            ],
            &context,
        );

        let ids: Vec<_> = collection.items().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "online"]);
    }

    #[test]
    fn update_can_hide_a_participant() {
        let context = context();
        let mut collection = Collection::default();

        collection.insert(participant("a", true, Duration::minutes(30)), &context);

        let mut gone_offline = participant("a", false, Duration::minutes(30));
        gone_offline.user_id = "user-a".to_string();
        collection.update(gone_offline, &context);

        assert!(collection.is_empty());
    }

    #[test]
    fn poll_and_push_commute() {
        let context = context();
        let sweep = vec![story("a", 0), story("b", 1)];

        // Push arrives first, then the sweep that already contains it
        let mut push_first = Collection::default();
        push_first.insert(story("b", 1), &context);
        push_first.replace(sweep.clone(), &context);

        // Sweep arrives first, then the duplicate push
        let mut sweep_first = Collection::default();
        sweep_first.replace(sweep, &context);
        sweep_first.insert(story("b", 1), &context);

        let ids = |c: &Collection<Story>| {
            c.items().iter().map(|s| s.id.clone()).collect::<Vec<_>>()
        };

        assert_eq!(ids(&push_first), ids(&sweep_first));
    }
}
