//! Event store abstraction and the in-memory implementation.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::{EventStoreError, Result};
use crate::event::Event;
use crate::query::Query;

/// Event attribute that [`EventStore::aggregate_type`] can count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateField {
    /// `key`
    Key,
    /// `origin`
    Origin,
    /// `entities`
    Entities,
    /// `other_references`
    OtherReferences,
    /// `actors`
    Actors,
    /// `tags`
    Tags,
}

impl FromStr for AggregateField {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "key" => Ok(Self::Key),
            "origin" => Ok(Self::Origin),
            "entities" => Ok(Self::Entities),
            "other_references" => Ok(Self::OtherReferences),
            "actors" => Ok(Self::Actors),
            "tags" => Ok(Self::Tags),
            other => Err(EventStoreError::UnknownField(other.to_owned())),
        }
    }
}

impl AggregateField {
    fn values<'a>(self, event: &'a Event) -> Box<dyn Iterator<Item = &'a String> + 'a> {
        match self {
            Self::Key => Box::new(std::iter::once(&event.key)),
            Self::Origin => Box::new(std::iter::once(&event.origin)),
            Self::Entities => Box::new(event.entities.iter()),
            Self::OtherReferences => Box::new(event.other_references.iter()),
            Self::Actors => Box::new(event.actors.iter()),
            Self::Tags => Box::new(event.tags.iter()),
        }
    }
}

/// Backend the REST service and the upstream pipeline talk to.
pub trait EventStore: Send + Sync {
    /// Persist an event. New events (`id == 0`) are assigned an id and
    /// timestamps; saved events replace the stored version. Returns the
    /// stored event.
    fn save(&self, event: Event) -> Result<Event>;

    /// All events matching `filter`, newest first.
    fn query(&self, filter: &Query) -> Result<Vec<Event>>;

    /// Fetch a single event.
    fn get_by_id(&self, id: i64) -> Result<Event>;

    /// Count the values of `field` across events matching `filter`.
    fn aggregate_type(&self, filter: &Query, field: AggregateField)
    -> Result<BTreeMap<String, u64>>;
}

/// Process-local store guarded by a `parking_lot::RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    events: Vec<Event>,
    next_id: i64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    /// Whether the store holds no events.
    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

impl EventStore for MemoryStore {
    fn save(&self, mut event: Event) -> Result<Event> {
        let mut inner = self.inner.write();
        let now = Utc::now();
        if event.is_saved() {
            let slot = inner
                .events
                .iter_mut()
                .find(|e| e.id == event.id)
                .ok_or(EventStoreError::EventNotFound(event.id))?;
            event.created = slot.created;
            event.updated = now;
            *slot = event.clone();
            debug!(id = event.id, key = %event.key, "event updated");
        } else {
            inner.next_id += 1;
            event.id = inner.next_id;
            event.created = now;
            event.updated = now;
            inner.events.push(event.clone());
            debug!(id = event.id, key = %event.key, "event created");
        }
        Ok(event)
    }

    fn query(&self, filter: &Query) -> Result<Vec<Event>> {
        let inner = self.inner.read();
        Ok(inner
            .events
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    fn get_by_id(&self, id: i64) -> Result<Event> {
        self.inner
            .read()
            .events
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(EventStoreError::EventNotFound(id))
    }

    fn aggregate_type(
        &self,
        filter: &Query,
        field: AggregateField,
    ) -> Result<BTreeMap<String, u64>> {
        let inner = self.inner.read();
        let mut counts = BTreeMap::new();
        for event in inner.events.iter().filter(|e| filter.matches(e)) {
            for value in field.values(event) {
                *counts.entry(value.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let _ = store
            .save(
                Event::new("myapp.user.login", "User foobar logged in", 3, "myapp")
                    .with_entities(["user/foo", "ns/moo"])
                    .with_actors(["actor1", "actor2"]),
            )
            .unwrap();
        let _ = store
            .save(
                Event::new("myapp.user.logout", "User foobar logged out", 2, "myapp")
                    .with_entities(["user/foo", "ns/moo"])
                    .with_actors(["actor1", "actor2", "actor3"]),
            )
            .unwrap();
        store
    }

    #[test]
    fn save_assigns_sequential_ids() {
        let store = seeded();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get_by_id(1).unwrap().key, "myapp.user.login");
        assert_eq!(store.get_by_id(2).unwrap().key, "myapp.user.logout");
    }

    #[test]
    fn update_replaces_and_keeps_created() {
        let store = seeded();
        let original = store.get_by_id(1).unwrap();
        let mut changed = original.clone();
        changed.description = "edited".into();
        let saved = store.save(changed).unwrap();
        assert_eq!(saved.id, 1);
        assert_eq!(saved.created, original.created);
        assert!(saved.updated >= original.updated);
        assert_eq!(store.get_by_id(1).unwrap().description, "edited");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn update_missing_event_fails() {
        let store = MemoryStore::new();
        let mut e = Event::new("k", "d", 0, "o");
        e.id = 99;
        assert_matches!(store.save(e), Err(EventStoreError::EventNotFound(99)));
    }

    #[test]
    fn get_missing_event_fails() {
        assert_matches!(
            MemoryStore::new().get_by_id(7),
            Err(EventStoreError::EventNotFound(7))
        );
    }

    #[test]
    fn query_is_newest_first() {
        let store = seeded();
        let all = store.query(&Query::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, 2);
        assert_eq!(all[1].id, 1);
    }

    #[test]
    fn query_filters() {
        let store = seeded();
        let q = Query {
            actors: vec!["actor3".into()],
            ..Query::default()
        };
        let hits = store.query(&q).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "myapp.user.logout");
    }

    #[test]
    fn aggregate_counts_list_values() {
        let store = seeded();
        let counts = store
            .aggregate_type(&Query::default(), AggregateField::Actors)
            .unwrap();
        assert_eq!(counts["actor1"], 2);
        assert_eq!(counts["actor2"], 2);
        assert_eq!(counts["actor3"], 1);
    }

    #[test]
    fn aggregate_counts_scalar_values() {
        let store = seeded();
        let counts = store
            .aggregate_type(&Query::default(), AggregateField::Key)
            .unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["myapp.user.login"], 1);
    }

    #[test]
    fn aggregate_field_parsing() {
        assert_eq!("tags".parse::<AggregateField>().unwrap(), AggregateField::Tags);
        assert_matches!(
            "color".parse::<AggregateField>(),
            Err(EventStoreError::UnknownField(_))
        );
    }

    #[test]
    fn store_is_object_safe() {
        let store: Box<dyn EventStore> = Box::new(MemoryStore::new());
        assert!(store.query(&Query::default()).unwrap().is_empty());
    }
}
